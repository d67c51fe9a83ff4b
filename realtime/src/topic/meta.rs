//! `get`, `set` and `del` handling inside the topic actor.

use std::sync::Arc;

use chrono::Utc;
use entity::{subscriptions, AccessMode, DefaultAccess, Uid};
use log::*;
use protocol::client::{MsgClientDel, MsgDefaultAcsMode, MsgGetQuery, MsgSetDesc, MsgSetQuery, MsgSetSub};
use protocol::server::{MsgDelValues, MsgServerData, MsgServerMeta, MsgTopicDesc, MsgTopicSub};
use protocol::topic_name::{original_name, TopicCategory};
use protocol::{ClientComMessage, ClientPayload, MetaWhat, ServerComMessage, ServerPayload, Status};
use serde_json::json;
use store::{DelRange, MessageQuery};

use super::{access_mode, presence, Flow, Topic};
use crate::error::{AuthorizationErrorKind, Error, ProtocolErrorKind, ResourceErrorKind};
use crate::session::Session;
use crate::subscription::MetaReq;

/// Applies a client's `defacs` on top of `base`. Empty fields keep the
/// current value.
pub(crate) fn parse_default_access(
    acs: &MsgDefaultAcsMode,
    base: DefaultAccess,
) -> Result<DefaultAccess, Error> {
    let parse = |text: &str, current: AccessMode| {
        if text.is_empty() {
            Ok(current)
        } else {
            text.parse::<AccessMode>()
                .map_err(|_| Error::protocol(ProtocolErrorKind::Malformed))
        }
    };
    Ok(DefaultAccess {
        auth: parse(&acs.auth, base.auth)?,
        anon: parse(&acs.anon, base.anon)?,
    })
}

fn denied() -> Error {
    Error::authorization(AuthorizationErrorKind::PermissionDenied)
}

fn not_allowed() -> Error {
    Error::authorization(AuthorizationErrorKind::OperationNotAllowed)
}

fn malformed() -> Error {
    Error::protocol(ProtocolErrorKind::Malformed)
}

fn ctrl(status: Status, pkt: &ClientComMessage) -> ServerComMessage {
    ServerComMessage::ctrl(
        status,
        &pkt.routing.id,
        &pkt.routing.original,
        pkt.routing.timestamp,
    )
}

impl Topic {
    pub(super) async fn handle_meta(&mut self, req: MetaReq) -> Flow {
        let MetaReq {
            pkt,
            sess,
            for_user,
            state,
        } = req;

        if self.desc.state != state {
            sess.queue_out(ctrl(Status::NotFound, &pkt)).await;
            return Flow::Continue;
        }

        let result = match &pkt.payload {
            ClientPayload::Get(get) => self
                .apply_get(&sess, &pkt, &get.query)
                .await
                .map(|()| Flow::Continue),
            ClientPayload::Set(set) => match self.apply_set(&pkt, &set.query).await {
                Ok(changed) => {
                    let status = if changed {
                        Status::Ok
                    } else {
                        Status::NotModified
                    };
                    sess.queue_out(ctrl(status, &pkt)).await;
                    Ok(Flow::Continue)
                }
                Err(err) => Err(err),
            },
            ClientPayload::Del(del) => self.apply_del(&sess, &pkt, for_user, del).await,
            _ => Err(malformed()),
        };

        match result {
            Ok(flow) => flow,
            Err(err) => {
                debug!(
                    "topic[{}]: {} failed: {}",
                    self.name,
                    pkt.describe(),
                    err
                );
                sess.queue_out(err.to_ctrl(
                    &pkt.routing.id,
                    &pkt.routing.original,
                    pkt.routing.timestamp,
                ))
                .await;
                Flow::Continue
            }
        }
    }

    /// Effective access of `uid`, whether or not one of their sessions is attached.
    async fn access_for(&self, uid: Uid) -> AccessMode {
        if let Some(user) = self.users.get(&uid) {
            return user.mode;
        }
        match self.category {
            TopicCategory::Me | TopicCategory::Fnd if uid == self.desc.owner => {
                AccessMode::C_FULL
            }
            TopicCategory::Sys => AccessMode::C_FULL,
            TopicCategory::Grp | TopicCategory::P2P => self
                .store
                .find_subscription(&self.name, uid)
                .await
                .map(|sub| sub.mode())
                .unwrap_or_default(),
            _ => AccessMode::NONE,
        }
    }

    // Get

    pub(super) async fn apply_get(
        &self,
        sess: &Arc<Session>,
        pkt: &ClientComMessage,
        query: &MsgGetQuery,
    ) -> Result<(), Error> {
        let what = if pkt.routing.meta_what.is_empty() {
            MetaWhat::parse(&query.what)
        } else {
            pkt.routing.meta_what
        };
        if what.is_empty() {
            return Err(malformed());
        }

        let uid = pkt.routing.as_user;
        let mode = self.access_for(uid).await;
        let mut meta = MsgServerMeta {
            id: pkt.routing.id.clone(),
            topic: pkt.routing.original.clone(),
            ts: pkt.routing.timestamp,
            desc: None,
            sub: Vec::new(),
            del: None,
            tags: Vec::new(),
        };

        if what.contains(MetaWhat::DESC) {
            meta.desc = Some(self.describe(uid, mode).await);
        }
        if what.contains(MetaWhat::SUB) {
            if !mode.is_joiner() {
                return Err(denied());
            }
            meta.sub = self.list_subs(uid).await?;
        }
        if what.contains(MetaWhat::TAGS) && mode.is_owner() {
            meta.tags = self.desc.tags.clone();
        }
        if what.contains(MetaWhat::DEL) {
            if !mode.is_reader() {
                return Err(denied());
            }
            meta.del = Some(MsgDelValues {
                clear: self.desc.del_id,
                del_seq: Vec::new(),
            });
        }

        let mut replied = false;
        if meta.desc.is_some() || !meta.sub.is_empty() || meta.del.is_some() || !meta.tags.is_empty() {
            sess.queue_out(ServerComMessage::new(ServerPayload::Meta(meta)))
                .await;
            replied = true;
        }

        if what.contains(MetaWhat::DATA) {
            if !mode.is_reader() {
                return Err(denied());
            }
            let sent = self.replay_data(sess, pkt, query).await?;
            if sent > 0 {
                sess.queue_out(
                    ctrl(Status::Ok, pkt).with_params(json!({ "what": "data", "count": sent })),
                )
                .await;
                replied = true;
            }
        }

        if !replied {
            sess.queue_out(ctrl(Status::NoContent, pkt)).await;
        }
        Ok(())
    }

    async fn describe(&self, uid: Uid, mode: AccessMode) -> MsgTopicDesc {
        let mut desc = MsgTopicDesc {
            created: Some(self.desc.created_at),
            updated: Some(self.desc.updated_at),
            touched: self.desc.touched_at,
            public: self.desc.public.clone(),
            ..Default::default()
        };
        if !mode.is_joiner() {
            return desc;
        }

        desc.seq = self.desc.seq_id;
        desc.clear = self.desc.del_id;
        if mode.is_owner() {
            desc.default_acs = Some(MsgDefaultAcsMode {
                auth: self.desc.access.auth.to_string(),
                anon: self.desc.access.anon.to_string(),
            });
        }
        if self.is_persistent() {
            if let Ok(sub) = self.store.find_subscription(&self.name, uid).await {
                desc.acs = Some(access_mode(&sub));
                desc.read = sub.read_seq;
                desc.recv = sub.recv_seq;
                desc.private = sub.private;
            }
        } else {
            desc.acs = Some(access_mode(&super::virtual_subscription(
                &self.name,
                uid,
                mode,
                self.desc.created_at,
            )));
        }
        desc
    }

    async fn list_subs(&self, viewer: Uid) -> Result<Vec<MsgTopicSub>, Error> {
        match self.category {
            TopicCategory::Me => {
                let subs = self.store.find_subscriptions_by_user(self.desc.owner).await?;
                let mut out = Vec::with_capacity(subs.len());
                for sub in subs {
                    let seq = match self.store.find_topic(&sub.topic).await {
                        Ok(topic) => topic.seq_id,
                        Err(_) => 0,
                    };
                    out.push(MsgTopicSub {
                        updated: Some(sub.updated_at),
                        acs: Some(access_mode(&sub)),
                        read: sub.read_seq,
                        recv: sub.recv_seq,
                        private: sub.private.clone(),
                        topic: original_name(&sub.topic, viewer),
                        seq,
                        ..Default::default()
                    });
                }
                Ok(out)
            }
            TopicCategory::Grp | TopicCategory::P2P => {
                let subs = self.store.find_subscriptions_by_topic(&self.name).await?;
                let mut out = Vec::with_capacity(subs.len());
                for sub in subs {
                    let public = match self.store.find_user(sub.user).await {
                        Ok(user) => user.public,
                        Err(_) => None,
                    };
                    let online = self
                        .users
                        .get(&sub.user)
                        .map(|user| user.online > 0)
                        .unwrap_or(false);
                    out.push(MsgTopicSub {
                        updated: Some(sub.updated_at),
                        online,
                        acs: Some(access_mode(&sub)),
                        read: sub.read_seq,
                        recv: sub.recv_seq,
                        public,
                        private: if sub.user == viewer {
                            sub.private.clone()
                        } else {
                            None
                        },
                        user: sub.user.user_id(),
                        ..Default::default()
                    });
                }
                Ok(out)
            }
            TopicCategory::Fnd | TopicCategory::Sys => Ok(Vec::new()),
        }
    }

    /// Sends stored messages matching the query's `data` options. Returns
    /// how many were queued.
    async fn replay_data(
        &self,
        sess: &Arc<Session>,
        pkt: &ClientComMessage,
        query: &MsgGetQuery,
    ) -> Result<usize, Error> {
        if !self.is_persistent() {
            return Ok(0);
        }
        let opts = query.data.clone().unwrap_or_default();
        let query = MessageQuery {
            since: opts.since,
            before: opts.before,
            limit: usize::try_from(opts.limit).unwrap_or(0),
        };
        let messages = self.store.find_messages(&self.name, &query).await?;
        for message in &messages {
            let mut data = ServerComMessage::new(ServerPayload::Data(MsgServerData {
                topic: pkt.routing.original.clone(),
                from: message.from.user_id(),
                ts: message.created_at,
                seq: message.seq_id,
                head: message.head.clone(),
                content: message.content.clone(),
            }));
            data.routing.rcpt_to = self.name.clone();
            sess.queue_out(data).await;
        }
        Ok(messages.len())
    }

    // Set

    /// Applies a `set` query. Returns whether anything changed.
    pub(super) async fn apply_set(
        &mut self,
        pkt: &ClientComMessage,
        query: &MsgSetQuery,
    ) -> Result<bool, Error> {
        if query.cred.is_some() {
            return Err(Error::protocol(ProtocolErrorKind::NotImplemented));
        }
        let uid = pkt.routing.as_user;
        let mode = self.access_for(uid).await;

        let mut changed = false;
        if let Some(desc) = &query.desc {
            changed |= self.set_desc(uid, mode, desc).await?;
        }
        if let Some(sub) = &query.sub {
            changed |= self.set_sub(uid, mode, sub).await?;
        }
        if !query.tags.is_empty() {
            if !mode.is_owner() {
                return Err(denied());
            }
            self.desc.tags = query.tags.clone();
            self.save_desc().await?;
            changed = true;
        }
        Ok(changed)
    }

    async fn set_desc(&mut self, uid: Uid, mode: AccessMode, desc: &MsgSetDesc) -> Result<bool, Error> {
        let mut changed = false;
        let shared = desc.public.is_some() || desc.default_acs.is_some();

        if shared {
            match self.category {
                TopicCategory::Me | TopicCategory::Grp if mode.is_owner() => {
                    if let Some(public) = &desc.public {
                        self.desc.public = Some(public.clone());
                    }
                    if let Some(acs) = &desc.default_acs {
                        self.desc.access = parse_default_access(acs, self.desc.access)?;
                    }
                    self.save_desc().await?;
                    changed = true;
                }
                TopicCategory::Me | TopicCategory::Grp => return Err(denied()),
                _ => return Err(not_allowed()),
            }
        }

        if let Some(private) = &desc.private {
            if !self.is_persistent() {
                return Err(not_allowed());
            }
            let mut sub = self
                .store
                .find_subscription(&self.name, uid)
                .await
                .map_err(|err| Error::lookup(err, ResourceErrorKind::NotFound))?;
            sub.private = Some(private.clone());
            sub.updated_at = Utc::now();
            self.store.upsert_subscription(sub).await?;
            changed = true;
        }
        Ok(changed)
    }

    /// Persists the topic description. For `me` the description lives on
    /// the user record.
    async fn save_desc(&mut self) -> Result<(), Error> {
        let now = Utc::now();
        self.desc.updated_at = now;
        match self.category {
            TopicCategory::Me => {
                let mut user = self
                    .store
                    .find_user(self.desc.owner)
                    .await
                    .map_err(|err| Error::lookup(err, ResourceErrorKind::UserNotFound))?;
                user.public = self.desc.public.clone();
                user.access = self.desc.access;
                user.tags = self.desc.tags.clone();
                user.updated_at = now;
                self.store.update_user(user).await?;
            }
            TopicCategory::Grp | TopicCategory::P2P => {
                self.store.update_topic(self.desc.clone()).await?;
            }
            TopicCategory::Fnd | TopicCategory::Sys => return Err(not_allowed()),
        }
        Ok(())
    }

    async fn set_sub(&mut self, uid: Uid, mode: AccessMode, req: &MsgSetSub) -> Result<bool, Error> {
        if !self.is_persistent() {
            return Err(not_allowed());
        }
        let requested: AccessMode = req.mode.parse().map_err(|_| malformed())?;
        let target = if req.user.is_empty() {
            uid
        } else {
            Uid::parse_user_id(&req.user).ok_or_else(malformed)?
        };
        let now = Utc::now();

        let sub = if target == uid {
            let mut sub = self
                .store
                .find_subscription(&self.name, uid)
                .await
                .map_err(|err| Error::lookup(err, ResourceErrorKind::NotFound))?;
            if uid == self.desc.owner && !requested.is_owner() {
                return Err(denied());
            }
            if sub.mode_want == requested {
                return Ok(false);
            }
            sub.mode_want = requested;
            sub
        } else {
            if !mode.is_admin() || target == self.desc.owner {
                return Err(denied());
            }
            if requested.is_owner() && !mode.is_owner() {
                return Err(denied());
            }
            match self.store.find_subscription(&self.name, target).await {
                Ok(mut sub) => {
                    if sub.mode_given == requested {
                        return Ok(false);
                    }
                    sub.mode_given = requested;
                    sub
                }
                Err(err) if err.is_not_found() => {
                    self.store
                        .find_user(target)
                        .await
                        .map_err(|err| Error::lookup(err, ResourceErrorKind::UserNotFound))?;
                    let mut sub = subscriptions::Model::new(&self.name, target, now);
                    sub.mode_given = requested;
                    sub.mode_want = requested;
                    sub
                }
                Err(err) => return Err(err.into()),
            }
        };

        let mut sub = sub;
        sub.updated_at = now;
        let sub = self.store.upsert_subscription(sub).await?;
        info!(
            "topic[{}]: access of {} is now {}",
            self.name,
            target.user_id(),
            sub.mode()
        );

        if sub.mode().is_joiner() {
            if let Some(user) = self.users.get_mut(&target) {
                user.mode = sub.mode();
            }
        } else {
            self.evict_user(target).await;
        }
        Ok(true)
    }

    // Del

    async fn apply_del(
        &mut self,
        sess: &Arc<Session>,
        pkt: &ClientComMessage,
        uid: Uid,
        del: &MsgClientDel,
    ) -> Result<Flow, Error> {
        let mode = self.access_for(uid).await;
        match del.what.as_str() {
            "msg" => {
                let del_id = self.delete_messages(sess, mode, del).await?;
                sess.queue_out(ctrl(Status::Ok, pkt).with_params(json!({ "del": del_id })))
                    .await;
                Ok(Flow::Continue)
            }
            "topic" => {
                self.delete_topic(mode).await?;
                sess.queue_out(ctrl(Status::Ok, pkt)).await;
                Ok(Flow::Exit)
            }
            "sub" => {
                self.delete_sub(uid, mode, &del.user).await?;
                sess.queue_out(ctrl(Status::Ok, pkt)).await;
                Ok(Flow::Continue)
            }
            _ => Err(malformed()),
        }
    }

    /// Hard-deletes the requested ranges. Returns the new deletion id.
    async fn delete_messages(
        &mut self,
        sess: &Arc<Session>,
        mode: AccessMode,
        del: &MsgClientDel,
    ) -> Result<i64, Error> {
        if !self.is_persistent() {
            return Err(not_allowed());
        }
        if !mode.is_deleter() {
            return Err(denied());
        }
        if del.del_seq.is_empty() {
            return Err(malformed());
        }
        let ranges: Vec<DelRange> = del
            .del_seq
            .iter()
            .map(|range| DelRange {
                low: range.low,
                hi: range.hi,
            })
            .collect();
        for range in &ranges {
            range.validate()?;
        }

        let removed = self.store.delete_messages(&self.name, &ranges).await?;
        self.desc.del_id += 1;
        self.save_desc().await?;
        info!(
            "topic[{}]: deleted {} messages, del id {}",
            self.name, removed, self.desc.del_id
        );

        let mut pres = presence::pres(&self.name, String::new(), "del", Utc::now());
        if let ServerPayload::Pres(body) = &mut pres.payload {
            body.clear = self.desc.del_id;
            body.del_seq = del.del_seq.clone();
        }
        pres.routing.skip_sid = Some(sess.sid().to_owned());
        pres.routing.filters.filter_in = AccessMode::READ;
        self.fan_out(&pres).await;
        Ok(self.desc.del_id)
    }

    async fn delete_topic(&mut self, mode: AccessMode) -> Result<(), Error> {
        if self.category != TopicCategory::Grp {
            return Err(not_allowed());
        }
        if !mode.is_owner() {
            return Err(denied());
        }

        let subs = self
            .store
            .find_subscriptions_by_topic(&self.name)
            .await
            .unwrap_or_default();
        self.store.delete_topic(&self.name).await?;
        info!("topic[{}]: deleted by owner", self.name);

        if let Some(hub) = self.hub.upgrade() {
            for sub in subs {
                let pres = presence::pres(
                    &sub.user.user_id(),
                    self.name.clone(),
                    "gone",
                    Utc::now(),
                );
                hub.route_to_user_me(sub.user, pres);
            }
        }
        for attached in self.sessions.values() {
            attached.sess.detach_topic(&self.name);
        }
        self.sessions.clear();
        self.users.clear();
        Ok(())
    }

    async fn delete_sub(&mut self, uid: Uid, mode: AccessMode, user: &str) -> Result<(), Error> {
        if !self.is_persistent() {
            return Err(not_allowed());
        }
        let target = Uid::parse_user_id(user).ok_or_else(malformed)?;
        if target != uid && !mode.is_admin() {
            return Err(denied());
        }
        if target == self.desc.owner {
            return Err(denied());
        }
        self.store
            .delete_subscription(&self.name, target)
            .await
            .map_err(|err| Error::lookup(err, ResourceErrorKind::NotFound))?;
        self.evict_user(target).await;
        info!(
            "topic[{}]: {} removed {}",
            self.name,
            uid.user_id(),
            target.user_id()
        );
        Ok(())
    }
}
