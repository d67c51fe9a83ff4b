//! Address book of live topics.
//!
//! The hub is a shared structure rather than a task: sessions call into it
//! to attach to a topic or to reach one they are not attached to. Sends into
//! topics never wait, so a busy topic answers 503 instead of stalling the
//! caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use entity::{topics, users, AccessMode, AuthLevel, DefaultAccess, Uid};
use log::*;
use protocol::topic_name::{group_topic_name, is_new_topic, topic_category, TopicCategory};
use protocol::{ClientComMessage, Routing, ServerComMessage};
use store::Store;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;

use crate::error::{
    AuthorizationErrorKind, CapacityErrorKind, Error, ProtocolErrorKind, ResourceErrorKind,
};
use crate::limits::Limits;
use crate::session::Session;
use crate::subscription::{JoinReq, MetaReq, SessionLeave};
use crate::topic::{Topic, TopicHandle};

/// How long shutdown waits for each topic to acknowledge.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

pub struct Hub {
    store: Arc<dyn Store>,
    limits: Limits,
    topics: DashMap<String, TopicHandle>,
    /// Serializes topic start-up so one name never gets two actors.
    spawn_lock: tokio::sync::Mutex<()>,
    next_topic_id: AtomicU64,
    me: Weak<Hub>,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>, limits: Limits) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            limits,
            topics: DashMap::new(),
            spawn_lock: tokio::sync::Mutex::new(()),
            next_topic_id: AtomicU64::new(1),
            me: me.clone(),
        })
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    /// Hands a join request to its topic, starting the topic if needed. The
    /// topic answers the client and replies on `req.reply`.
    pub async fn join(&self, mut req: JoinReq) -> Result<(), Error> {
        if is_new_topic(&req.pkt.routing.rcpt_to) {
            let handle = self.create_group(&req.pkt.routing).await?;
            req.created = true;
            req.pkt.routing.rcpt_to = handle.name.clone();
            // Not retried; every attempt creates a topic record.
            return match self.offer_join(&handle, req)? {
                None => Ok(()),
                Some(_) => Err(Error::capacity(CapacityErrorKind::Unavailable)),
            };
        }

        // A topic that closed its queue is on its way out; start a fresh one.
        for _ in 0..2 {
            let handle = self.find_or_start(&req.pkt.routing, true).await?;
            match self.offer_join(&handle, req)? {
                None => return Ok(()),
                Some(returned) => req = returned,
            }
        }
        Err(Error::capacity(CapacityErrorKind::Unavailable))
    }

    /// Queues `req` on the topic. Hands the request back if the topic has
    /// already stopped, after dropping it from the address book.
    fn offer_join(&self, handle: &TopicHandle, req: JoinReq) -> Result<Option<JoinReq>, Error> {
        match handle.join.try_send(req) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(_)) => {
                warn!("hub: join queue of '{}' is full", handle.name);
                Err(Error::capacity(CapacityErrorKind::Unavailable))
            }
            Err(TrySendError::Closed(returned)) => {
                self.unregister_topic(&handle.name, handle.id);
                Ok(Some(returned))
            }
        }
    }

    /// Forwards a leave request for a topic the session is not attached to.
    pub async fn route_leave(&self, pkt: ClientComMessage, sess: Arc<Session>) -> Result<(), Error> {
        if is_new_topic(&pkt.routing.rcpt_to) {
            return Err(Error::protocol(ProtocolErrorKind::Malformed));
        }
        let handle = self.find_or_start(&pkt.routing, false).await?;
        let leave = SessionLeave {
            pkt: Some(pkt),
            sess,
        };
        match handle.channels.done.try_send(leave) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("hub: leave queue of '{}' is full", handle.name);
                Err(Error::capacity(CapacityErrorKind::Unavailable))
            }
            Err(TrySendError::Closed(_)) => Err(Error::resource(ResourceErrorKind::Gone)),
        }
    }

    /// Forwards a `get`, `set` or `del` for a topic the session is not
    /// attached to, starting the topic if needed.
    pub async fn route_meta(&self, req: MetaReq) -> Result<(), Error> {
        if is_new_topic(&req.pkt.routing.rcpt_to) {
            return Err(Error::protocol(ProtocolErrorKind::Malformed));
        }
        let handle = self.find_or_start(&req.pkt.routing, false).await?;
        match handle.channels.meta.try_send(req) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("hub: meta queue of '{}' is full", handle.name);
                Err(Error::capacity(CapacityErrorKind::Unavailable))
            }
            Err(TrySendError::Closed(_)) => Err(Error::resource(ResourceErrorKind::Gone)),
        }
    }

    /// Delivers `msg` to the `me` topic of `user` if it is live. Nobody to
    /// tell otherwise.
    pub fn route_to_user_me(&self, user: Uid, msg: ServerComMessage) {
        let name = user.user_id();
        let Some(broadcast) = self
            .topics
            .get(&name)
            .map(|handle| handle.channels.broadcast.clone())
        else {
            trace!("hub: '{}' is offline, dropped {}", name, msg.describe());
            return;
        };
        if let Err(err) = broadcast.try_send(msg) {
            warn!("hub: failed to route presence to '{}': {}", name, err);
        }
    }

    /// Forgets a topic that shut down. A newer actor under the same name is left alone.
    pub(crate) fn unregister_topic(&self, name: &str, id: u64) {
        if self.topics.remove_if(name, |_, handle| handle.id == id).is_some() {
            debug!("hub: unregistered topic '{}' ({} live)", name, self.topics.len());
        }
    }

    /// Stops every topic and waits briefly for each to acknowledge.
    pub async fn shutdown(&self) {
        let handles: Vec<TopicHandle> = self
            .topics
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        info!("hub: shutting down {} topics", handles.len());

        for handle in handles {
            let (ack, done) = oneshot::channel();
            let stopped = tokio::time::timeout(SHUTDOWN_WAIT, async {
                if handle.exit.send(ack).await.is_ok() {
                    let _ = done.await;
                }
            })
            .await;
            if stopped.is_err() {
                warn!("hub: topic '{}' did not stop in time", handle.name);
            }
        }
    }

    // Topic start-up

    async fn find_or_start(&self, routing: &Routing, create: bool) -> Result<TopicHandle, Error> {
        let name = routing.rcpt_to.as_str();
        if let Some(handle) = self.live(name) {
            return Ok(handle);
        }

        let _guard = self.spawn_lock.lock().await;
        if let Some(handle) = self.live(name) {
            return Ok(handle);
        }
        let category =
            topic_category(name).ok_or_else(|| Error::protocol(ProtocolErrorKind::Malformed))?;
        let desc = self.load(name, category, routing, create).await?;
        Ok(self.start(category, desc))
    }

    fn live(&self, name: &str) -> Option<TopicHandle> {
        self.topics.get(name).map(|handle| handle.clone())
    }

    async fn create_group(&self, routing: &Routing) -> Result<TopicHandle, Error> {
        if routing.auth_lvl < AuthLevel::Auth {
            return Err(Error::authorization(
                AuthorizationErrorKind::PermissionDenied,
            ));
        }
        let name = group_topic_name(self.store.next_uid());
        let desc = self
            .store
            .create_topic(topics::Model::new(&name, routing.as_user, Utc::now()))
            .await?;
        info!("hub: created topic '{}' for {}", name, routing.as_user.user_id());

        let _guard = self.spawn_lock.lock().await;
        Ok(self.start(TopicCategory::Grp, desc))
    }

    /// Loads or builds the description of a topic that is not live.
    async fn load(
        &self,
        name: &str,
        category: TopicCategory,
        routing: &Routing,
        create: bool,
    ) -> Result<topics::Model, Error> {
        match category {
            TopicCategory::Me => {
                let uid = Uid::parse_user_id(name)
                    .ok_or_else(|| Error::protocol(ProtocolErrorKind::Malformed))?;
                let user = self.find_user(uid).await?;
                let mut desc = topics::Model::new(name, uid, user.created_at);
                desc.public = user.public;
                desc.access = user.access;
                desc.tags = user.tags;
                desc.updated_at = user.updated_at;
                Ok(desc)
            }
            TopicCategory::Fnd => {
                let uid: Uid = name
                    .get(3..)
                    .and_then(|raw| raw.parse().ok())
                    .ok_or_else(|| Error::protocol(ProtocolErrorKind::Malformed))?;
                let user = self.find_user(uid).await?;
                Ok(topics::Model::new(name, uid, user.created_at))
            }
            TopicCategory::Sys => {
                if routing.auth_lvl != AuthLevel::Root {
                    return Err(Error::authorization(
                        AuthorizationErrorKind::PermissionDenied,
                    ));
                }
                Ok(topics::Model::new(name, Uid::ZERO, Utc::now()))
            }
            TopicCategory::Grp => self
                .store
                .find_topic(name)
                .await
                .map_err(|err| Error::lookup(err, ResourceErrorKind::TopicNotFound)),
            TopicCategory::P2P => match self.store.find_topic(name).await {
                Ok(desc) => Ok(desc),
                Err(err) if err.is_not_found() && create => self.create_p2p(name, routing).await,
                Err(err) => Err(Error::lookup(err, ResourceErrorKind::TopicNotFound)),
            },
        }
    }

    async fn create_p2p(&self, name: &str, routing: &Routing) -> Result<topics::Model, Error> {
        let (a, b) =
            Uid::parse_p2p(name).ok_or_else(|| Error::protocol(ProtocolErrorKind::Malformed))?;
        if routing.as_user != a && routing.as_user != b {
            return Err(Error::authorization(
                AuthorizationErrorKind::PermissionDenied,
            ));
        }
        self.find_user(a).await?;
        self.find_user(b).await?;

        let mut desc = topics::Model::new(name, Uid::ZERO, Utc::now());
        desc.access = DefaultAccess {
            auth: AccessMode::C_P2P,
            anon: AccessMode::NONE,
        };
        let desc = self.store.create_topic(desc).await?;
        info!("hub: created topic '{}'", name);
        Ok(desc)
    }

    async fn find_user(&self, uid: Uid) -> Result<users::Model, Error> {
        self.store
            .find_user(uid)
            .await
            .map_err(|err| Error::lookup(err, ResourceErrorKind::UserNotFound))
    }

    /// Spawns the actor for `desc` and registers it. Callers hold `spawn_lock`.
    fn start(&self, category: TopicCategory, desc: topics::Model) -> TopicHandle {
        let id = self.next_topic_id.fetch_add(1, Ordering::Relaxed);
        let handle = Topic::spawn(
            id,
            category,
            desc,
            self.store.clone(),
            self.limits.clone(),
            self.me.clone(),
        );
        self.topics.insert(handle.name.clone(), handle.clone());
        debug!("hub: started topic '{}' ({} live)", handle.name, self.topics.len());
        handle
    }
}
