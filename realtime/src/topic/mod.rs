//! One actor per live topic.
//!
//! The topic task owns everything about a conversation while it is live:
//! the attached sessions, each user's effective access, the message
//! sequence and online counts. All of it is touched from this task only;
//! sessions reach it through the channels of their [`Subscription`].

mod meta;
pub(crate) mod presence;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use entity::{messages, subscriptions, topics, AccessMode, AuthLevel, Uid};
use log::*;
use protocol::server::MsgAccessMode;
use protocol::topic_name::{original_name, TopicCategory};
use protocol::{ClientComMessage, ClientPayload, ServerComMessage, ServerPayload, Status};
use serde_json::json;
use store::Store;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{AuthorizationErrorKind, Error, ProtocolErrorKind, ResourceErrorKind};
use crate::hub::Hub;
use crate::limits::Limits;
use crate::session::Session;
use crate::subscription::{JoinReq, Joined, MetaReq, SessionLeave, SessionUpdate, Subscription};

pub(crate) use meta::parse_default_access;
use presence::Recipient;

const JOIN_QUEUE_LEN: usize = 64;
const CONTROL_QUEUE_LEN: usize = 64;

/// Sending half of a live topic, held by the hub.
#[derive(Debug, Clone)]
pub(crate) struct TopicHandle {
    /// Distinguishes successive actors started under the same name.
    pub id: u64,
    pub name: String,
    pub join: mpsc::Sender<JoinReq>,
    pub channels: Subscription,
    /// Server shutdown. The topic acknowledges on the enclosed sender.
    pub exit: mpsc::Sender<oneshot::Sender<()>>,
}

struct Inbox {
    join: mpsc::Receiver<JoinReq>,
    broadcast: mpsc::Receiver<ServerComMessage>,
    done: mpsc::Receiver<SessionLeave>,
    meta: mpsc::Receiver<MetaReq>,
    supd: mpsc::Receiver<SessionUpdate>,
    exit: mpsc::Receiver<oneshot::Sender<()>>,
}

struct Attached {
    sess: Arc<Session>,
    uid: Uid,
    /// Not yet counted as online.
    background: bool,
}

#[derive(Debug, Default)]
struct PerUser {
    mode: AccessMode,
    /// Attached foreground sessions.
    online: usize,
}

enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Topic {
    id: u64,
    name: String,
    category: TopicCategory,
    desc: topics::Model,
    store: Arc<dyn Store>,
    limits: Limits,
    hub: Weak<Hub>,
    channels: Subscription,
    sessions: HashMap<String, Attached>,
    users: HashMap<Uid, PerUser>,
}

impl Topic {
    /// Starts the actor for `desc` and returns the handle used to reach it.
    pub(crate) fn spawn(
        id: u64,
        category: TopicCategory,
        desc: topics::Model,
        store: Arc<dyn Store>,
        limits: Limits,
        hub: Weak<Hub>,
    ) -> TopicHandle {
        let (join_tx, join_rx) = mpsc::channel(JOIN_QUEUE_LEN);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(limits.topic_queue_limit);
        let (done_tx, done_rx) = mpsc::channel(CONTROL_QUEUE_LEN);
        let (meta_tx, meta_rx) = mpsc::channel(CONTROL_QUEUE_LEN);
        let (supd_tx, supd_rx) = mpsc::channel(CONTROL_QUEUE_LEN);
        let (exit_tx, exit_rx) = mpsc::channel(1);

        let channels = Subscription {
            broadcast: broadcast_tx,
            done: done_tx,
            meta: meta_tx,
            supd: supd_tx,
        };
        let handle = TopicHandle {
            id,
            name: desc.name.clone(),
            join: join_tx,
            channels: channels.clone(),
            exit: exit_tx,
        };
        let topic = Topic {
            id,
            name: desc.name.clone(),
            category,
            desc,
            store,
            limits,
            hub,
            channels,
            sessions: HashMap::new(),
            users: HashMap::new(),
        };
        let inbox = Inbox {
            join: join_rx,
            broadcast: broadcast_rx,
            done: done_rx,
            meta: meta_rx,
            supd: supd_rx,
            exit: exit_rx,
        };
        tokio::spawn(topic.run(inbox));
        handle
    }

    async fn run(mut self, mut inbox: Inbox) {
        info!("topic[{}]: started", self.name);
        let mut idle_since = Some(Instant::now());

        loop {
            let idle_deadline = idle_since.map(|since| since + self.limits.topic_idle);
            let flow = tokio::select! {
                Some(req) = inbox.join.recv() => {
                    self.handle_join(req).await;
                    Flow::Continue
                }
                Some(msg) = inbox.broadcast.recv() => {
                    self.handle_broadcast(msg).await;
                    Flow::Continue
                }
                Some(leave) = inbox.done.recv() => {
                    self.handle_leave(leave).await;
                    Flow::Continue
                }
                Some(req) = inbox.meta.recv() => self.handle_meta(req).await,
                Some(update) = inbox.supd.recv() => {
                    self.handle_session_update(update).await;
                    Flow::Continue
                }
                Some(ack) = inbox.exit.recv() => {
                    self.detach_all();
                    let _ = ack.send(());
                    Flow::Exit
                }
                _ = sleep_until(idle_deadline) => {
                    info!("topic[{}]: idle, shutting down", self.name);
                    Flow::Exit
                }
            };
            if let Flow::Exit = flow {
                break;
            }

            idle_since = match (self.sessions.is_empty(), idle_since) {
                (false, _) => None,
                (true, Some(since)) => Some(since),
                (true, None) => Some(Instant::now()),
            };
        }

        self.stop(inbox).await;
    }

    /// Unregisters from the hub and refuses whatever is still queued.
    async fn stop(self, mut inbox: Inbox) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister_topic(&self.name, self.id);
        }

        inbox.join.close();
        inbox.meta.close();
        while let Ok(req) = inbox.join.try_recv() {
            // Dropping the reply tells the session the topic is unavailable.
            debug!(
                "topic[{}]: dropping join from {} on exit",
                self.name,
                req.sess.sid()
            );
        }
        while let Ok(req) = inbox.meta.try_recv() {
            let routing = &req.pkt.routing;
            req.sess
                .queue_out(ServerComMessage::ctrl(
                    Status::ServiceUnavailable,
                    &routing.id,
                    &routing.original,
                    routing.timestamp,
                ))
                .await;
        }
        info!("topic[{}]: stopped", self.name);
    }

    fn is_persistent(&self) -> bool {
        matches!(self.category, TopicCategory::Grp | TopicCategory::P2P)
    }

    fn mode_of(&self, uid: Uid) -> AccessMode {
        self.users.get(&uid).map(|user| user.mode).unwrap_or_default()
    }

    fn joined(&self) -> Joined {
        Joined {
            topic: self.name.clone(),
            sub: self.channels.clone(),
        }
    }

    // Join

    async fn handle_join(&mut self, req: JoinReq) {
        let JoinReq {
            pkt,
            sess,
            created,
            reply,
        } = req;
        let uid = pkt.routing.as_user;
        let ts = pkt.routing.timestamp;

        if self.sessions.contains_key(sess.sid()) {
            sess.queue_out(ServerComMessage::ctrl(
                Status::AlreadySubscribed,
                &pkt.routing.id,
                &pkt.routing.original,
                ts,
            ))
            .await;
            let _ = reply.send(Some(self.joined()));
            return;
        }

        let sub = match self.admit(&pkt, created).await {
            Ok(sub) => sub,
            Err(err) => {
                debug!(
                    "topic[{}]: refused {} from {}: {}",
                    self.name,
                    pkt.describe(),
                    sess.sid(),
                    err
                );
                sess.queue_out(err.to_ctrl(&pkt.routing.id, &pkt.routing.original, ts))
                    .await;
                let _ = reply.send(None);
                return;
            }
        };

        if reply.send(Some(self.joined())).is_err() {
            warn!(
                "topic[{}]: session {} went away while joining",
                self.name,
                sess.sid()
            );
            return;
        }

        let background = sess.is_background();
        self.users.entry(uid).or_default().mode = sub.mode();
        self.sessions.insert(
            sess.sid().to_owned(),
            Attached {
                sess: sess.clone(),
                uid,
                background,
            },
        );
        debug!(
            "topic[{}]: attached {} ({} sessions)",
            self.name,
            sess.sid(),
            self.sessions.len()
        );

        let (status, topic) = if created {
            (Status::Created, self.name.clone())
        } else {
            (Status::Ok, pkt.routing.original.clone())
        };
        sess.queue_out(
            ServerComMessage::ctrl(status, &pkt.routing.id, &topic, ts)
                .with_params(json!({ "acs": access_mode(&sub) })),
        )
        .await;

        if !background {
            self.user_online(uid).await;
        }

        if let ClientPayload::Sub(req) = &pkt.payload {
            if let Some(set) = &req.set {
                if let Err(err) = self.apply_set(&pkt, set).await {
                    sess.queue_out(err.to_ctrl(&pkt.routing.id, &topic, ts)).await;
                }
            }
            if let Some(get) = &req.get {
                if let Err(err) = self.apply_get(&sess, &pkt, get).await {
                    sess.queue_out(err.to_ctrl(&pkt.routing.id, &topic, ts)).await;
                }
            }
        }
    }

    /// Finds or creates the subscription that lets the requester attach.
    async fn admit(
        &self,
        pkt: &ClientComMessage,
        created: bool,
    ) -> Result<subscriptions::Model, Error> {
        let uid = pkt.routing.as_user;
        let now = Utc::now();

        match self.category {
            TopicCategory::Me | TopicCategory::Fnd => {
                if uid != self.desc.owner {
                    return Err(Error::authorization(
                        AuthorizationErrorKind::PermissionDenied,
                    ));
                }
                Ok(virtual_subscription(&self.name, uid, AccessMode::C_FULL, now))
            }
            TopicCategory::Sys => Ok(virtual_subscription(
                &self.name,
                uid,
                AccessMode::C_FULL,
                now,
            )),
            TopicCategory::Grp | TopicCategory::P2P => {
                match self.store.find_subscription(&self.name, uid).await {
                    Ok(sub) if sub.mode().is_joiner() => Ok(sub),
                    Ok(_) => Err(Error::authorization(
                        AuthorizationErrorKind::PermissionDenied,
                    )),
                    Err(err) if err.is_not_found() => {
                        let given = self.initial_grant(uid, pkt.routing.auth_lvl, created);
                        if !given.is_joiner() {
                            return Err(Error::authorization(
                                AuthorizationErrorKind::PermissionDenied,
                            ));
                        }
                        let want = requested_mode(pkt)?.unwrap_or(given);
                        let mut sub = subscriptions::Model::new(&self.name, uid, now);
                        sub.mode_want = want;
                        sub.mode_given = given;
                        let sub = self.store.upsert_subscription(sub).await?;
                        info!(
                            "topic[{}]: new subscriber {} with {}",
                            self.name,
                            uid.user_id(),
                            sub.mode()
                        );
                        Ok(sub)
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    fn initial_grant(&self, uid: Uid, level: AuthLevel, created: bool) -> AccessMode {
        if created {
            return AccessMode::C_FULL;
        }
        match self.category {
            TopicCategory::P2P => match Uid::parse_p2p(&self.name) {
                Some((a, b)) if a == uid || b == uid => AccessMode::C_P2P,
                _ => AccessMode::NONE,
            },
            _ => match level {
                AuthLevel::Auth | AuthLevel::Root => self.desc.access.auth,
                AuthLevel::Anon => self.desc.access.anon,
                AuthLevel::None => AccessMode::NONE,
            },
        }
    }

    // Leave

    async fn handle_leave(&mut self, leave: SessionLeave) {
        let SessionLeave { pkt, sess } = leave;
        let was_attached = self.detach_session(sess.sid()).await.is_some();
        let Some(pkt) = pkt else {
            return;
        };

        let unsub = matches!(&pkt.payload, ClientPayload::Leave(leave) if leave.unsub);
        let routing = &pkt.routing;
        let reply = if unsub {
            match self.unsubscribe(routing.as_user).await {
                Ok(()) => ServerComMessage::ctrl(
                    Status::Ok,
                    &routing.id,
                    &routing.original,
                    routing.timestamp,
                ),
                Err(err) => err.to_ctrl(&routing.id, &routing.original, routing.timestamp),
            }
        } else {
            let status = if was_attached {
                Status::Ok
            } else {
                Status::NotJoined
            };
            ServerComMessage::ctrl(status, &routing.id, &routing.original, routing.timestamp)
        };
        sess.queue_out(reply).await;
    }

    async fn unsubscribe(&mut self, uid: Uid) -> Result<(), Error> {
        if !self.is_persistent() {
            return Err(Error::authorization(
                AuthorizationErrorKind::OperationNotAllowed,
            ));
        }
        if uid == self.desc.owner {
            return Err(Error::authorization(
                AuthorizationErrorKind::PermissionDenied,
            ));
        }
        self.store
            .delete_subscription(&self.name, uid)
            .await
            .map_err(|err| Error::lookup(err, ResourceErrorKind::NotFound))?;
        self.evict_user(uid).await;
        info!("topic[{}]: {} unsubscribed", self.name, uid.user_id());
        Ok(())
    }

    /// Removes a session from the topic. Returns the user it belonged to.
    async fn detach_session(&mut self, sid: &str) -> Option<Uid> {
        let attached = self.sessions.remove(sid)?;
        let uid = attached.uid;
        let mut went_offline = false;
        if !attached.background {
            if let Some(user) = self.users.get_mut(&uid) {
                user.online = user.online.saturating_sub(1);
                went_offline = user.online == 0;
            }
        }
        debug!(
            "topic[{}]: detached {} ({} sessions)",
            self.name,
            sid,
            self.sessions.len()
        );
        if went_offline && self.is_persistent() {
            self.fan_out(&presence::online_status(&self.name, uid, false))
                .await;
        }
        Some(uid)
    }

    /// Detaches every session of `uid` and tells them to forget the topic.
    async fn evict_user(&mut self, uid: Uid) {
        let sids: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, attached)| attached.uid == uid)
            .map(|(sid, _)| sid.clone())
            .collect();
        for sid in sids {
            if let Some(attached) = self.sessions.get(&sid) {
                attached.sess.detach_topic(&self.name);
            }
            self.detach_session(&sid).await;
        }
        self.users.remove(&uid);
    }

    /// Server shutdown: drop every session without presence.
    fn detach_all(&mut self) {
        for attached in self.sessions.values() {
            attached.sess.detach_topic(&self.name);
        }
        self.sessions.clear();
        self.users.clear();
    }

    // Presence

    async fn user_online(&mut self, uid: Uid) {
        let user = self.users.entry(uid).or_default();
        user.online += 1;
        if user.online == 1 && self.is_persistent() {
            self.fan_out(&presence::online_status(&self.name, uid, true))
                .await;
        }
    }

    async fn handle_session_update(&mut self, update: SessionUpdate) {
        let uid = match self.sessions.get_mut(update.sess.sid()) {
            Some(attached) if attached.background => {
                attached.background = false;
                attached.uid
            }
            _ => return,
        };
        debug!(
            "topic[{}]: {} moved to foreground",
            self.name,
            update.sess.sid()
        );
        self.user_online(uid).await;
    }

    // Broadcast

    async fn handle_broadcast(&mut self, msg: ServerComMessage) {
        match &msg.payload {
            ServerPayload::Data(_) => self.publish(msg).await,
            ServerPayload::Info(_) => self.forward_note(msg).await,
            ServerPayload::Pres(_) => self.fan_out(&msg).await,
            _ => warn!(
                "topic[{}]: unexpected broadcast {}",
                self.name,
                msg.describe()
            ),
        }
    }

    async fn publish(&mut self, mut msg: ServerComMessage) {
        let origin = msg
            .routing
            .origin_sid
            .as_deref()
            .and_then(|sid| self.sessions.get(sid))
            .map(|attached| attached.sess.clone());
        let Some(origin) = origin else {
            warn!(
                "topic[{}]: dropped {} from a detached session",
                self.name,
                msg.describe()
            );
            return;
        };

        let uid = msg.routing.as_user;
        let topic = original_name(&self.name, uid);
        let reply = match self.save_data(&mut msg).await {
            Ok(seq) => ServerComMessage::ctrl(
                Status::Accepted,
                &msg.routing.id,
                &topic,
                msg.routing.timestamp,
            )
            .with_params(json!({ "seq": seq })),
            Err(err) => {
                origin
                    .queue_out(err.to_ctrl(&msg.routing.id, &topic, msg.routing.timestamp))
                    .await;
                return;
            }
        };
        origin.queue_out(reply).await;

        msg.routing.filters.filter_in = AccessMode::READ;
        self.fan_out(&msg).await;
        self.notify_subscribers(&msg).await;
    }

    /// Assigns the next sequence id and persists the message.
    async fn save_data(&mut self, msg: &mut ServerComMessage) -> Result<i64, Error> {
        if !self.is_persistent() {
            return Err(Error::authorization(
                AuthorizationErrorKind::OperationNotAllowed,
            ));
        }
        let uid = msg.routing.as_user;
        if !self.mode_of(uid).is_writer() {
            return Err(Error::authorization(
                AuthorizationErrorKind::PermissionDenied,
            ));
        }
        let ServerPayload::Data(data) = &mut msg.payload else {
            return Err(Error::protocol(ProtocolErrorKind::Malformed));
        };

        let seq = self.desc.seq_id + 1;
        let ts = msg.routing.timestamp;
        self.store
            .save_message(messages::Model {
                topic: self.name.clone(),
                seq_id: seq,
                from: uid,
                head: data.head.clone(),
                content: data.content.clone(),
                created_at: ts,
            })
            .await?;

        self.desc.seq_id = seq;
        self.desc.touched_at = Some(ts);
        if let Err(err) = self.store.update_topic(self.desc.clone()).await {
            warn!("topic[{}]: failed to persist seq {}: {}", self.name, seq, err);
        }
        data.seq = seq;
        data.ts = ts;
        trace!("topic[{}]: saved message {}", self.name, seq);
        Ok(seq)
    }

    /// Tells each reader's `me` topic about a new message. Sessions already
    /// attached here saw the message itself and are skipped.
    async fn notify_subscribers(&self, msg: &ServerComMessage) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let ServerPayload::Data(data) = &msg.payload else {
            return;
        };
        let subs = match self.store.find_subscriptions_by_topic(&self.name).await {
            Ok(subs) => subs,
            Err(err) => {
                warn!("topic[{}]: failed to load subscribers: {}", self.name, err);
                return;
            }
        };
        for sub in subs.iter().filter(|sub| sub.mode().is_reader()) {
            let mut pres = presence::pres(
                &sub.user.user_id(),
                original_name(&self.name, sub.user),
                "msg",
                msg.routing.timestamp,
            );
            if let ServerPayload::Pres(body) = &mut pres.payload {
                body.seq = data.seq;
            }
            pres.routing.filters.skip_topic = Some(self.name.clone());
            hub.route_to_user_me(sub.user, pres);
        }
    }

    async fn forward_note(&mut self, mut msg: ServerComMessage) {
        let uid = msg.routing.as_user;
        let (what, seq) = match &msg.payload {
            ServerPayload::Info(info) => (info.what.clone(), info.seq),
            _ => return,
        };
        let mode = self.mode_of(uid);

        match what.as_str() {
            "kp" if mode.is_writer() => {}
            "read" | "recv" if mode.is_reader() => {
                if seq > self.desc.seq_id {
                    debug!(
                        "topic[{}]: receipt for unknown seq {} from {}",
                        self.name,
                        seq,
                        uid.user_id()
                    );
                    return;
                }
                if !self.save_receipt(uid, &what, seq).await {
                    return;
                }
            }
            _ => {
                debug!(
                    "topic[{}]: ignored note '{}' from {}",
                    self.name,
                    what,
                    uid.user_id()
                );
                return;
            }
        }

        msg.routing.filters.filter_in = AccessMode::READ;
        self.fan_out(&msg).await;
    }

    /// Moves a read or received marker forward. Returns false when the
    /// marker is already at or past `seq`.
    async fn save_receipt(&self, uid: Uid, what: &str, seq: i64) -> bool {
        if !self.is_persistent() {
            return true;
        }
        let mut sub = match self.store.find_subscription(&self.name, uid).await {
            Ok(sub) => sub,
            Err(err) => {
                warn!(
                    "topic[{}]: no subscription for receipt from {}: {}",
                    self.name,
                    uid.user_id(),
                    err
                );
                return false;
            }
        };
        let marker = if what == "read" {
            &mut sub.read_seq
        } else {
            &mut sub.recv_seq
        };
        if *marker >= seq {
            return false;
        }
        *marker = seq;
        // Anything read has also been received.
        if sub.recv_seq < sub.read_seq {
            sub.recv_seq = sub.read_seq;
        }
        sub.updated_at = Utc::now();
        if let Err(err) = self.store.upsert_subscription(sub).await {
            warn!("topic[{}]: failed to save receipt: {}", self.name, err);
        }
        true
    }

    /// Delivers `msg` to every attached session its filters allow, under
    /// the name each recipient knows the topic by.
    async fn fan_out(&self, msg: &ServerComMessage) {
        for (sid, attached) in &self.sessions {
            let recipient = Recipient {
                sid,
                uid: attached.uid,
                mode: self.mode_of(attached.uid),
            };
            if !presence::should_deliver(&msg.routing, &recipient, |topic| {
                attached.sess.has_sub(topic)
            }) {
                continue;
            }
            let mut copy = msg.clone();
            copy.set_topic(original_name(&self.name, attached.uid));
            attached.sess.queue_out(copy).await;
        }
    }
}

fn virtual_subscription(
    topic: &str,
    uid: Uid,
    mode: AccessMode,
    now: chrono::DateTime<Utc>,
) -> subscriptions::Model {
    let mut sub = subscriptions::Model::new(topic, uid, now);
    sub.mode_want = mode;
    sub.mode_given = mode;
    sub
}

fn access_mode(sub: &subscriptions::Model) -> MsgAccessMode {
    MsgAccessMode {
        want: sub.mode_want.to_string(),
        given: sub.mode_given.to_string(),
        mode: sub.mode().to_string(),
    }
}

/// Access mode the client asked for in `sub.set.sub.mode`, if any.
fn requested_mode(pkt: &ClientComMessage) -> Result<Option<AccessMode>, Error> {
    let ClientPayload::Sub(sub) = &pkt.payload else {
        return Ok(None);
    };
    match sub.set.as_ref().and_then(|set| set.sub.as_ref()) {
        Some(req) if !req.mode.is_empty() => req
            .mode
            .parse()
            .map(Some)
            .map_err(|_| Error::protocol(ProtocolErrorKind::Malformed)),
        _ => Ok(None),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
