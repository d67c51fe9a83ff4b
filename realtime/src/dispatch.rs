//! Inbound half of a session: decoding, ordering checks and routing of
//! client envelopes.

use std::sync::Arc;

use chrono::Utc;
use entity::{users, AuthLevel, ObjState, Uid};
use log::*;
use protocol::client::{
    MsgClientAcc, MsgClientHi, MsgClientLeave, MsgClientLogin, MsgClientNote, MsgClientPub,
    MsgSetQuery,
};
use protocol::server::{MsgServerData, MsgServerInfo};
use protocol::topic_name::{expand_topic_name, topic_category, TopicCategory};
use protocol::{
    ClientComMessage, ClientPayload, MetaWhat, ProtocolVersion, ServerComMessage, ServerPayload,
    Status, BUILD, CURRENT_VERSION,
};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;

use crate::error::{
    AuthorizationErrorKind, CapacityErrorKind, Error, ProtocolErrorKind, ResourceErrorKind,
};
use crate::session::{Session, SessionState};
use crate::subscription::{JoinReq, MetaReq, SessionLeave};
use crate::topic::parse_default_access;
use crate::transport::SessionProto;

fn malformed() -> Error {
    Error::protocol(ProtocolErrorKind::Malformed)
}

fn ctrl(status: Status, msg: &ClientComMessage) -> ServerComMessage {
    ServerComMessage::ctrl(status, &msg.routing.id, "", msg.routing.timestamp)
}

/// Categories touched by a `set` query.
fn set_what(query: &MsgSetQuery) -> MetaWhat {
    let mut what = MetaWhat::NONE;
    if query.desc.is_some() {
        what = what | MetaWhat::DESC;
    }
    if query.sub.is_some() {
        what = what | MetaWhat::SUB;
    }
    if !query.tags.is_empty() {
        what = what | MetaWhat::TAGS;
    }
    if query.cred.is_some() {
        what = what | MetaWhat::CRED;
    }
    what
}

impl Session {
    /// Handles one raw inbound frame. Every failure is answered with a ctrl
    /// envelope on the session's own queue.
    pub async fn dispatch_raw(self: &Arc<Self>, raw: &[u8]) {
        let limit = self.ctx.limits.max_message_size;
        if raw.len() > limit {
            warn!(
                "session[{}]: rejected {} byte message, limit {}",
                self.sid(),
                raw.len(),
                limit
            );
            let reply = Error::capacity(CapacityErrorKind::TooLarge)
                .to_ctrl("", "", Utc::now())
                .with_params(json!({ "limit": limit }));
            self.queue_out(reply).await;
            return;
        }

        match ClientComMessage::decode(raw) {
            Ok(msg) => self.dispatch(msg).await,
            Err(err) => {
                info!("session[{}]: failed to decode message: {}", self.sid(), err);
                self.queue_out(Error::from(err).to_ctrl("", "", Utc::now()))
                    .await;
            }
        }
    }

    /// Stamps routing data onto a decoded message and routes it.
    pub async fn dispatch(self: &Arc<Self>, mut msg: ClientComMessage) {
        let state = self.state();
        msg.routing.timestamp = Utc::now();
        msg.routing.as_user = state.uid;
        msg.routing.auth_lvl = state.auth_lvl;
        trace!("session[{}]: in {}", self.sid(), msg.describe());

        if let Err(err) = self.route(&mut msg, &state).await {
            if err.is_fatal() {
                error!("session[{}]: {}, terminating", self.sid(), err);
                self.terminate();
                return;
            }
            debug!(
                "session[{}]: {} failed: {}",
                self.sid(),
                msg.describe(),
                err
            );
            self.queue_out(err.to_ctrl(
                &msg.routing.id,
                &msg.routing.original,
                msg.routing.timestamp,
            ))
            .await;
        }
    }

    async fn route(self: &Arc<Self>, msg: &mut ClientComMessage, state: &SessionState) -> Result<(), Error> {
        if state.ver.is_none() && !matches!(msg.payload, ClientPayload::Hi(_)) {
            return Err(Error::protocol(ProtocolErrorKind::OutOfSequence));
        }
        if msg.payload.requires_auth() && state.uid.is_zero() {
            return Err(Error::authorization(AuthorizationErrorKind::AuthRequired));
        }
        if let Some(topic) = msg.payload.topic() {
            if topic.is_empty() {
                return Err(malformed());
            }
            msg.routing.rcpt_to = expand_topic_name(topic, state.uid)?;
        }
        msg.routing.meta_what = match &msg.payload {
            ClientPayload::Get(get) => MetaWhat::parse(&get.query.what),
            ClientPayload::Set(set) => set_what(&set.query),
            _ => MetaWhat::NONE,
        };

        let msg = &*msg;
        match &msg.payload {
            ClientPayload::Hi(hi) => self.hello(msg, hi, state).await,
            ClientPayload::Login(login) => self.login(msg, login, state).await,
            ClientPayload::Acc(acc) if acc.user.starts_with("new") => {
                self.create_account(msg, acc, state).await
            }
            ClientPayload::Acc(acc) => self.update_account(msg, acc, state).await,
            ClientPayload::Sub(_) => self.subscribe(msg).await,
            ClientPayload::Leave(leave) => self.leave(msg, leave).await,
            ClientPayload::Pub(publish) => self.publish(msg, publish).await,
            ClientPayload::Get(_) | ClientPayload::Set(_) | ClientPayload::Del(_) => {
                self.meta(msg, state).await
            }
            ClientPayload::Note(note) => self.note(msg, note),
        }
    }

    // Handshake and authentication

    async fn hello(
        self: &Arc<Self>,
        msg: &ClientComMessage,
        hi: &MsgClientHi,
        state: &SessionState,
    ) -> Result<(), Error> {
        if let Some(current) = state.ver {
            if !state.uid.is_zero() {
                return Err(Error::authorization(
                    AuthorizationErrorKind::AlreadyAuthenticated,
                ));
            }
            if !hi.ver.is_empty() {
                let ver: ProtocolVersion = hi.ver.parse().map_err(|_| malformed())?;
                if ver.cmp_minor(&current).is_ne() {
                    return Err(Error::protocol(ProtocolErrorKind::OutOfSequence));
                }
            }
            // Repeated handshake only refreshes client metadata.
            self.update_state(|state| apply_client_info(state, hi));
            self.queue_out(ctrl(Status::Ok, msg)).await;
            return Ok(());
        }

        let ver: ProtocolVersion = hi.ver.parse().map_err(|_| malformed())?;
        if !ver.is_supported_by(&self.ctx.limits.min_supported_version) {
            info!(
                "session[{}]: client version {} is below {}",
                self.sid(),
                ver,
                self.ctx.limits.min_supported_version
            );
            return Err(Error::protocol(ProtocolErrorKind::VersionNotSupported));
        }

        self.update_state(|state| {
            state.ver = Some(ver);
            apply_client_info(state, hi);
        });
        if hi.background {
            self.start_background(self.ctx.limits.deferred_notifications);
        }

        let mut params = json!({
            "ver": CURRENT_VERSION.to_string(),
            "build": BUILD,
            "maxMessageSize": self.ctx.limits.max_message_size,
        });
        if self.proto() == SessionProto::LongPoll {
            params["sid"] = json!(self.sid());
        }
        debug!("session[{}]: handshake ver={} ua={}", self.sid(), ver, hi.user_agent);
        self.queue_out(ctrl(Status::Created, msg).with_params(params))
            .await;
        Ok(())
    }

    async fn login(
        self: &Arc<Self>,
        msg: &ClientComMessage,
        login: &MsgClientLogin,
        state: &SessionState,
    ) -> Result<(), Error> {
        if !state.uid.is_zero() {
            return Err(Error::authorization(
                AuthorizationErrorKind::AlreadyAuthenticated,
            ));
        }
        let handler = self
            .ctx
            .auth
            .handler(&login.scheme)
            .ok_or_else(|| Error::authorization(AuthorizationErrorKind::UnknownScheme))?;
        let result = handler
            .authenticate(&login.secret, &state.remote_addr)
            .await?;

        let user = self
            .ctx
            .store
            .find_user(result.uid)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    Error::authorization(AuthorizationErrorKind::AuthFailed)
                } else {
                    err.into()
                }
            })?;
        if user.state != ObjState::Ok {
            info!(
                "session[{}]: login refused for {} account {}",
                self.sid(),
                user.state,
                user.id.user_id()
            );
            return Err(Error::authorization(
                AuthorizationErrorKind::PermissionDenied,
            ));
        }

        self.update_state(|state| {
            state.uid = result.uid;
            state.auth_lvl = result.level;
            state.auth_expires = result.expires;
        });
        info!(
            "session[{}]: logged in as {} ({})",
            self.sid(),
            result.uid.user_id(),
            result.level
        );
        let params = login_params(result.uid, result.level, result.expires);
        self.queue_out(ctrl(Status::Ok, msg).with_params(params))
            .await;
        Ok(())
    }

    async fn create_account(
        self: &Arc<Self>,
        msg: &ClientComMessage,
        acc: &MsgClientAcc,
        state: &SessionState,
    ) -> Result<(), Error> {
        if acc.login && !state.uid.is_zero() {
            return Err(Error::authorization(
                AuthorizationErrorKind::AlreadyAuthenticated,
            ));
        }
        let handler = self
            .ctx
            .auth
            .handler(&acc.scheme)
            .ok_or_else(|| Error::authorization(AuthorizationErrorKind::UnknownScheme))?;
        if !handler.is_unique(&acc.secret).await? {
            return Err(Error::authorization(
                AuthorizationErrorKind::DuplicateCredential,
            ));
        }

        let store = &self.ctx.store;
        let uid = store.next_uid();
        let mut user = users::Model::new(uid, Utc::now());
        user.user_agent = state.user_agent.clone();
        user.tags = acc.tags.clone();
        if let Some(desc) = &acc.desc {
            user.public = desc.public.clone();
            if let Some(acs) = &desc.default_acs {
                user.access = parse_default_access(acs, user.access)?;
            }
        }
        store.create_user(user).await?;

        let level = if handler.scheme() == auth::anon::SCHEME {
            AuthLevel::Anon
        } else {
            AuthLevel::Auth
        };
        let result = match handler.add_record(uid, &acc.secret, level).await {
            Ok(result) => result,
            Err(err) => {
                if let Err(cleanup) = store.delete_user(uid).await {
                    warn!(
                        "session[{}]: failed to roll back user {}: {}",
                        self.sid(),
                        uid.user_id(),
                        cleanup
                    );
                }
                return Err(err.into());
            }
        };
        info!(
            "session[{}]: created account {} with scheme '{}'",
            self.sid(),
            uid.user_id(),
            handler.scheme()
        );

        let params = if acc.login {
            self.update_state(|state| {
                state.uid = result.uid;
                state.auth_lvl = result.level;
                state.auth_expires = result.expires;
            });
            login_params(result.uid, result.level, result.expires)
        } else {
            json!({ "user": uid.user_id() })
        };
        self.queue_out(ctrl(Status::Created, msg).with_params(params))
            .await;
        Ok(())
    }

    async fn update_account(
        self: &Arc<Self>,
        msg: &ClientComMessage,
        acc: &MsgClientAcc,
        state: &SessionState,
    ) -> Result<(), Error> {
        if state.uid.is_zero() {
            return Err(Error::authorization(AuthorizationErrorKind::AuthRequired));
        }
        let target = if acc.user.is_empty() {
            state.uid
        } else {
            Uid::parse_user_id(&acc.user).ok_or_else(malformed)?
        };
        let is_root = state.auth_lvl == AuthLevel::Root;
        if target != state.uid && !is_root {
            return Err(Error::authorization(
                AuthorizationErrorKind::PermissionDenied,
            ));
        }

        let store = &self.ctx.store;
        let mut user = store
            .find_user(target)
            .await
            .map_err(|err| Error::lookup(err, ResourceErrorKind::UserNotFound))?;
        let mut changed = false;

        if !acc.scheme.is_empty() {
            let handler = self
                .ctx
                .auth
                .handler(&acc.scheme)
                .ok_or_else(|| Error::authorization(AuthorizationErrorKind::UnknownScheme))?;
            handler.update_record(target, &acc.secret).await?;
            changed = true;
        }
        if !acc.state.is_empty() {
            if !is_root {
                return Err(Error::authorization(
                    AuthorizationErrorKind::PermissionDenied,
                ));
            }
            user.state = acc.state.parse().map_err(|_| malformed())?;
            changed = true;
        }
        if !acc.tags.is_empty() {
            user.tags = acc.tags.clone();
            changed = true;
        }
        if let Some(public) = acc.desc.as_ref().and_then(|desc| desc.public.clone()) {
            user.public = Some(public);
            changed = true;
        }

        if !changed {
            self.queue_out(ctrl(Status::NoAction, msg)).await;
            return Ok(());
        }
        user.updated_at = Utc::now();
        store.update_user(user).await?;
        info!(
            "session[{}]: updated account {}",
            self.sid(),
            target.user_id()
        );
        self.queue_out(ctrl(Status::Ok, msg)).await;
        Ok(())
    }

    // Topics

    async fn subscribe(self: &Arc<Self>, msg: &ClientComMessage) -> Result<(), Error> {
        if self.has_sub(&msg.routing.rcpt_to) {
            self.queue_out(ServerComMessage::ctrl(
                Status::AlreadySubscribed,
                &msg.routing.id,
                &msg.routing.original,
                msg.routing.timestamp,
            ))
            .await;
            return Ok(());
        }

        let (reply, joined) = oneshot::channel();
        self.ctx
            .hub
            .join(JoinReq {
                pkt: msg.clone(),
                sess: self.clone(),
                created: false,
                reply,
            })
            .await?;

        match joined.await {
            Ok(Some(joined)) => {
                if self.is_terminating() {
                    // Too late to keep it; tell the topic right away.
                    self.notify_gone(&joined.topic, &joined.sub);
                } else {
                    self.add_sub(joined.topic, joined.sub);
                }
                Ok(())
            }
            // Refused; the topic already answered the client.
            Ok(None) => Ok(()),
            Err(_) => Err(Error::capacity(CapacityErrorKind::Unavailable)),
        }
    }

    async fn leave(self: &Arc<Self>, msg: &ClientComMessage, leave: &MsgClientLeave) -> Result<(), Error> {
        let topic = &msg.routing.rcpt_to;
        if leave.unsub
            && !matches!(
                topic_category(topic),
                Some(TopicCategory::Grp | TopicCategory::P2P)
            )
        {
            return Err(Error::authorization(
                AuthorizationErrorKind::OperationNotAllowed,
            ));
        }

        match self.del_sub(topic) {
            Some(sub) => {
                let notice = SessionLeave {
                    pkt: Some(msg.clone()),
                    sess: self.clone(),
                };
                if sub.done.send(notice).await.is_err() {
                    // The topic is already gone, so the session is detached anyway.
                    if leave.unsub {
                        return self.ctx.hub.route_leave(msg.clone(), self.clone()).await;
                    }
                    self.queue_out(ServerComMessage::ctrl(
                        Status::Ok,
                        &msg.routing.id,
                        &msg.routing.original,
                        msg.routing.timestamp,
                    ))
                    .await;
                }
                Ok(())
            }
            None if leave.unsub => self.ctx.hub.route_leave(msg.clone(), self.clone()).await,
            None => {
                self.queue_out(ServerComMessage::ctrl(
                    Status::NotJoined,
                    &msg.routing.id,
                    &msg.routing.original,
                    msg.routing.timestamp,
                ))
                .await;
                Ok(())
            }
        }
    }

    async fn publish(self: &Arc<Self>, msg: &ClientComMessage, publish: &MsgClientPub) -> Result<(), Error> {
        let sub = self
            .get_sub(&msg.routing.rcpt_to)
            .ok_or_else(|| Error::resource(ResourceErrorKind::AttachFirst))?;
        self.foreground();

        let mut data = ServerComMessage::new(ServerPayload::Data(MsgServerData {
            topic: msg.routing.original.clone(),
            from: msg.routing.as_user.user_id(),
            ts: msg.routing.timestamp,
            seq: 0,
            head: publish.head.clone(),
            content: publish.content.clone(),
        }));
        data.routing.id = msg.routing.id.clone();
        data.routing.rcpt_to = msg.routing.rcpt_to.clone();
        data.routing.as_user = msg.routing.as_user;
        data.routing.timestamp = msg.routing.timestamp;
        data.routing.origin_sid = Some(self.sid().to_owned());
        if publish.noecho {
            data.routing.skip_sid = Some(self.sid().to_owned());
        }

        sub.broadcast
            .send(data)
            .await
            .map_err(|_| Error::resource(ResourceErrorKind::Gone))
    }

    async fn meta(self: &Arc<Self>, msg: &ClientComMessage, state: &SessionState) -> Result<(), Error> {
        match &msg.payload {
            ClientPayload::Get(_) if msg.routing.meta_what.is_empty() => return Err(malformed()),
            ClientPayload::Set(_) if msg.routing.meta_what.is_empty() => return Err(malformed()),
            ClientPayload::Del(del) if !matches!(del.what.as_str(), "msg" | "topic" | "sub") => {
                return Err(malformed())
            }
            _ => {}
        }

        let req = MetaReq {
            pkt: msg.clone(),
            sess: self.clone(),
            for_user: state.uid,
            state: ObjState::Ok,
        };
        match self.get_sub(&msg.routing.rcpt_to) {
            Some(sub) => sub
                .meta
                .send(req)
                .await
                .map_err(|_| Error::resource(ResourceErrorKind::Gone)),
            None => self.ctx.hub.route_meta(req).await,
        }
    }

    /// Notes are fire-and-forget: nothing is sent back on success, and a
    /// note for a topic the session is not attached to is dropped.
    fn note(self: &Arc<Self>, msg: &ClientComMessage, note: &MsgClientNote) -> Result<(), Error> {
        match note.what.as_str() {
            "kp" => {}
            "read" | "recv" if note.seq > 0 => {}
            _ => return Err(malformed()),
        }
        self.foreground();

        let Some(sub) = self.get_sub(&msg.routing.rcpt_to) else {
            debug!(
                "session[{}]: note for unattached topic '{}'",
                self.sid(),
                msg.routing.rcpt_to
            );
            return Ok(());
        };

        let mut info = ServerComMessage::new(ServerPayload::Info(MsgServerInfo {
            topic: msg.routing.original.clone(),
            src: String::new(),
            from: msg.routing.as_user.user_id(),
            what: note.what.clone(),
            seq: note.seq,
        }));
        info.routing.rcpt_to = msg.routing.rcpt_to.clone();
        info.routing.as_user = msg.routing.as_user;
        info.routing.origin_sid = Some(self.sid().to_owned());
        info.routing.skip_sid = Some(self.sid().to_owned());

        match sub.broadcast.try_send(info) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "session[{}]: topic '{}' busy, dropped note",
                    self.sid(),
                    msg.routing.rcpt_to
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    "session[{}]: topic '{}' gone, dropped note",
                    self.sid(),
                    msg.routing.rcpt_to
                );
            }
        }
        Ok(())
    }
}

fn apply_client_info(state: &mut SessionState, hi: &MsgClientHi) {
    if !hi.user_agent.is_empty() {
        state.user_agent = hi.user_agent.clone();
    }
    if !hi.device_id.is_empty() {
        state.device_id = hi.device_id.clone();
    }
    if !hi.platform.is_empty() {
        state.platform = hi.platform.clone();
    }
    if !hi.lang.is_empty() {
        state.lang = hi.lang.clone();
    }
}

fn login_params(
    uid: Uid,
    level: AuthLevel,
    expires: Option<chrono::DateTime<Utc>>,
) -> Value {
    let mut params = Map::new();
    params.insert("user".into(), json!(uid.user_id()));
    params.insert("authlvl".into(), json!(level.to_string()));
    if let Some(expires) = expires {
        params.insert("expires".into(), json!(expires));
    }
    Value::Object(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::Limits;
    use crate::test_support;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::time::Duration;

    async fn send(sess: &Arc<Session>, raw: &str) {
        sess.dispatch_raw(raw.as_bytes()).await;
    }

    async fn replies(sess: &Arc<Session>) -> Vec<ServerComMessage> {
        sess.poll(Duration::from_millis(200)).await
    }

    fn ctrl_of(msg: &ServerComMessage) -> &protocol::server::MsgServerCtrl {
        match &msg.payload {
            ServerPayload::Ctrl(ctrl) => ctrl,
            other => panic!("expected ctrl, got {:?}", other),
        }
    }

    fn secret(text: &str) -> String {
        STANDARD.encode(text)
    }

    /// Handshake, create a basic account and log the session in with it.
    async fn signed_in(ctx: &Arc<crate::Context>, login: &str) -> Arc<Session> {
        let sess = test_support::session(ctx, SessionProto::LongPoll);
        send(&sess, r#"{"hi":{"id":"1","ver":"1.2"}}"#).await;
        send(
            &sess,
            &format!(
                r#"{{"acc":{{"id":"2","user":"new","scheme":"basic","secret":"{}","login":true}}}}"#,
                secret(&format!("{login}:password"))
            ),
        )
        .await;
        let batch = replies(&sess).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(ctrl_of(&batch[1]).code, 201);
        sess
    }

    /// Polls until a message matching `wanted` arrives. Returns everything
    /// received on the way, the match included.
    async fn wait_for(
        sess: &Arc<Session>,
        wanted: impl Fn(&ServerComMessage) -> bool,
    ) -> Vec<ServerComMessage> {
        let mut seen = Vec::new();
        for _ in 0..20 {
            let batch = replies(sess).await;
            let found = batch.iter().any(&wanted);
            seen.extend(batch);
            if found {
                return seen;
            }
        }
        panic!("nothing matched, got {:?}", seen);
    }

    /// The ctrl answering the request with `id`.
    async fn answer(sess: &Arc<Session>, id: &str) -> protocol::server::MsgServerCtrl {
        let seen = wait_for(
            sess,
            |msg| matches!(&msg.payload, ServerPayload::Ctrl(ctrl) if ctrl.id == id),
        )
        .await;
        seen.iter()
            .find_map(|msg| match &msg.payload {
                ServerPayload::Ctrl(ctrl) if ctrl.id == id => Some(ctrl.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn is_pres(msg: &ServerComMessage, what: &str) -> bool {
        matches!(&msg.payload, ServerPayload::Pres(pres) if pres.what == what)
    }

    /// Alice owns a fresh group topic and Bob has joined it.
    async fn shared_group(ctx: &Arc<crate::Context>) -> (Arc<Session>, Arc<Session>, String) {
        let alice = signed_in(ctx, "alice").await;
        let bob = signed_in(ctx, "bob").await;

        send(&alice, r#"{"sub":{"id":"3","topic":"new"}}"#).await;
        let created = answer(&alice, "3").await;
        assert_eq!(created.code, 201);
        let topic = created.topic;

        send(&bob, &format!(r#"{{"sub":{{"id":"4","topic":"{topic}"}}}}"#)).await;
        assert_eq!(answer(&bob, "4").await.code, 200);
        wait_for(&alice, |msg| is_pres(msg, "on")).await;
        (alice, bob, topic)
    }

    #[tokio::test]
    async fn message_before_handshake_is_out_of_sequence() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);

        send(&sess, r#"{"sub":{"id":"1","topic":"grp1"}}"#).await;

        let batch = replies(&sess).await;
        let ctrl = ctrl_of(&batch[0]);
        assert_eq!(ctrl.code, 409);
        assert_eq!(ctrl.text, "command out of sequence");
        assert_eq!(ctrl.id, "1");
    }

    #[tokio::test]
    async fn old_client_version_is_refused() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);

        send(&sess, r#"{"hi":{"id":"1","ver":"1.0"}}"#).await;

        let batch = replies(&sess).await;
        let ctrl = ctrl_of(&batch[0]);
        assert_eq!(ctrl.code, 505);
        assert_eq!(ctrl.text, "version not supported");
        assert!(sess.version().is_none());
    }

    #[tokio::test]
    async fn handshake_reports_server_parameters() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);

        send(&sess, r#"{"hi":{"id":"1","ver":"1.2","ua":"test/1.0"}}"#).await;

        let batch = replies(&sess).await;
        let ctrl = ctrl_of(&batch[0]);
        assert_eq!(ctrl.code, 201);
        let params = ctrl.params.as_ref().unwrap();
        assert_eq!(params["ver"], json!("1.2"));
        assert_eq!(params["sid"], json!(sess.sid()));
        assert_eq!(params["maxMessageSize"], json!(ctx.limits.max_message_size));
        assert_eq!(sess.state().user_agent, "test/1.0");
    }

    #[tokio::test]
    async fn second_handshake_after_login_is_rejected() {
        let ctx = test_support::context();
        let sess = signed_in(&ctx, "alice").await;

        send(&sess, r#"{"hi":{"id":"3","ver":"1.2"}}"#).await;

        let batch = replies(&sess).await;
        let ctrl = ctrl_of(&batch[0]);
        assert_eq!(ctrl.code, 409);
        assert_eq!(ctrl.text, "already authenticated");
    }

    #[tokio::test]
    async fn subscribe_requires_login() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        send(&sess, r#"{"hi":{"id":"1","ver":"1.2"}}"#).await;
        send(&sess, r#"{"sub":{"id":"2","topic":"grp1"}}"#).await;

        let batch = replies(&sess).await;
        assert_eq!(ctrl_of(&batch[1]).code, 401);
    }

    #[tokio::test]
    async fn broken_json_and_oversized_frames_are_answered() {
        let limits = Limits {
            max_message_size: 64,
            ..Limits::default()
        };
        let ctx = test_support::context_with(limits);
        let sess = test_support::session(&ctx, SessionProto::LongPoll);

        send(&sess, "{\"hi\":").await;
        send(&sess, &format!(r#"{{"hi":{{"ua":"{}"}}}}"#, "x".repeat(100))).await;

        let batch = replies(&sess).await;
        assert_eq!(ctrl_of(&batch[0]).code, 400);
        let too_large = ctrl_of(&batch[1]);
        assert_eq!(too_large.code, 413);
        assert_eq!(too_large.params, Some(json!({ "limit": 64 })));
    }

    #[tokio::test]
    async fn login_with_wrong_password_fails() {
        let ctx = test_support::context();
        let _alice = signed_in(&ctx, "alice").await;
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        send(&sess, r#"{"hi":{"id":"1","ver":"1.2"}}"#).await;
        send(
            &sess,
            &format!(
                r#"{{"login":{{"id":"2","scheme":"basic","secret":"{}"}}}}"#,
                secret("alice:wrong")
            ),
        )
        .await;
        send(
            &sess,
            &format!(
                r#"{{"login":{{"id":"3","scheme":"basic","secret":"{}"}}}}"#,
                secret("alice:password")
            ),
        )
        .await;

        let batch = replies(&sess).await;
        assert_eq!(ctrl_of(&batch[1]).code, 401);
        let ok = ctrl_of(&batch[2]);
        assert_eq!(ok.code, 200);
        assert_eq!(ok.params.as_ref().unwrap()["authlvl"], json!("auth"));
        assert!(!sess.uid().is_zero());
    }

    #[tokio::test]
    async fn duplicate_login_name_is_rejected() {
        let ctx = test_support::context();
        let _alice = signed_in(&ctx, "alice").await;
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        send(&sess, r#"{"hi":{"id":"1","ver":"1.2"}}"#).await;
        send(
            &sess,
            &format!(
                r#"{{"acc":{{"id":"2","user":"new","scheme":"basic","secret":"{}"}}}}"#,
                secret("alice:other")
            ),
        )
        .await;

        let batch = replies(&sess).await;
        assert_eq!(ctrl_of(&batch[1]).code, 409);
    }

    #[tokio::test]
    async fn publish_requires_attach() {
        let ctx = test_support::context();
        let sess = signed_in(&ctx, "alice").await;
        send(&sess, r#"{"pub":{"id":"3","topic":"grpNope","content":"hi"}}"#).await;

        let batch = replies(&sess).await;
        assert_eq!(ctrl_of(&batch[0]).code, 409);
        assert_eq!(ctrl_of(&batch[0]).text, "must attach first");
    }

    #[tokio::test]
    async fn group_conversation_round_trip() {
        let ctx = test_support::context();
        let alice = signed_in(&ctx, "alice").await;
        let bob = signed_in(&ctx, "bob").await;

        send(&alice, r#"{"sub":{"id":"3","topic":"new"}}"#).await;
        let batch = replies(&alice).await;
        let created = ctrl_of(&batch[0]);
        assert_eq!(created.code, 201);
        let topic = created.topic.clone();
        assert!(topic.starts_with("grp"));
        assert!(alice.has_sub(&topic));

        send(&bob, &format!(r#"{{"sub":{{"id":"4","topic":"{topic}"}}}}"#)).await;
        assert_eq!(ctrl_of(&replies(&bob).await[0]).code, 200);
        // Alice learns that Bob came online.
        let pres = replies(&alice).await;
        assert!(matches!(&pres[0].payload, ServerPayload::Pres(p) if p.what == "on"));

        send(
            &bob,
            &format!(r#"{{"pub":{{"id":"5","topic":"{topic}","noecho":true,"content":"hello"}}}}"#),
        )
        .await;
        let bob_batch = replies(&bob).await;
        let accepted = ctrl_of(&bob_batch[0]);
        assert_eq!(accepted.code, 202);
        assert_eq!(accepted.params, Some(json!({ "seq": 1 })));
        assert!(bob_batch
            .iter()
            .all(|msg| !matches!(msg.payload, ServerPayload::Data(_))));

        let alice_batch = replies(&alice).await;
        let ServerPayload::Data(data) = &alice_batch[0].payload else {
            panic!("expected data, got {:?}", alice_batch[0]);
        };
        assert_eq!(data.seq, 1);
        assert_eq!(data.content, json!("hello"));
        assert_eq!(data.from, bob.uid().user_id());

        send(
            &alice,
            &format!(r#"{{"get":{{"id":"6","topic":"{topic}","what":"data"}}}}"#),
        )
        .await;
        let history = replies(&alice).await;
        assert!(matches!(history[0].payload, ServerPayload::Data(_)));
        assert_eq!(
            ctrl_of(&history[1]).params,
            Some(json!({ "what": "data", "count": 1 }))
        );

        send(&bob, &format!(r#"{{"leave":{{"id":"7","topic":"{topic}"}}}}"#)).await;
        assert_eq!(ctrl_of(&replies(&bob).await[0]).code, 200);
        assert!(!bob.has_sub(&topic));
    }

    #[tokio::test]
    async fn leave_unknown_topic_with_unsub_is_not_found() {
        let ctx = test_support::context();
        let sess = signed_in(&ctx, "alice").await;
        send(&sess, r#"{"leave":{"id":"3","topic":"grpMissing","unsub":true}}"#).await;

        let batch = replies(&sess).await;
        let ctrl = ctrl_of(&batch[0]);
        assert_eq!(ctrl.code, 404);
        assert_eq!(ctrl.topic, "grpMissing");
    }

    #[tokio::test]
    async fn background_handshake_marks_session() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);

        send(&sess, r#"{"hi":{"id":"1","ver":"1.2","bkg":true}}"#).await;

        assert_eq!(answer(&sess, "1").await.code, 201);
        assert!(sess.is_background());
    }

    #[tokio::test]
    async fn owner_updates_description_and_tags() {
        let ctx = test_support::context();
        let (alice, bob, topic) = shared_group(&ctx).await;

        send(
            &alice,
            &format!(
                r#"{{"set":{{"id":"10","topic":"{topic}","desc":{{"public":{{"fn":"Rustaceans"}},"defacs":{{"auth":"JRWP"}}}},"tags":["rust"]}}}}"#
            ),
        )
        .await;
        assert_eq!(answer(&alice, "10").await.code, 200);

        let stored = ctx.store.find_topic(&topic).await.unwrap();
        assert_eq!(stored.public, Some(json!({ "fn": "Rustaceans" })));
        assert_eq!(stored.access.auth.to_string(), "JRWP");
        assert_eq!(stored.tags, vec!["rust".to_owned()]);

        send(&bob, &format!(r#"{{"get":{{"id":"11","topic":"{topic}","what":"desc"}}}}"#)).await;
        let seen = wait_for(&bob, |msg| matches!(msg.payload, ServerPayload::Meta(_))).await;
        let desc = seen
            .iter()
            .find_map(|msg| match &msg.payload {
                ServerPayload::Meta(meta) => meta.desc.clone(),
                _ => None,
            })
            .unwrap();
        assert_eq!(desc.public, Some(json!({ "fn": "Rustaceans" })));
        // Only the owner sees the default access.
        assert!(desc.default_acs.is_none());

        send(
            &bob,
            &format!(r#"{{"set":{{"id":"12","topic":"{topic}","desc":{{"public":{{"fn":"Mine"}}}}}}}}"#),
        )
        .await;
        assert_eq!(answer(&bob, "12").await.code, 403);
        send(&bob, &format!(r#"{{"set":{{"id":"13","topic":"{topic}","tags":["bob"]}}}}"#)).await;
        assert_eq!(answer(&bob, "13").await.code, 403);
        assert_eq!(ctx.store.find_topic(&topic).await.unwrap().tags, vec!["rust".to_owned()]);
    }

    #[tokio::test]
    async fn owner_changes_member_access() {
        let ctx = test_support::context();
        let (alice, bob, topic) = shared_group(&ctx).await;
        let bob_id = bob.uid().user_id();

        let set_mode = |id: &str, user: &str, mode: &str| {
            format!(r#"{{"set":{{"id":"{id}","topic":"{topic}","sub":{{"user":"{user}","mode":"{mode}"}}}}}}"#)
        };

        send(&alice, &set_mode("10", &bob_id, "JR")).await;
        assert_eq!(answer(&alice, "10").await.code, 200);
        let sub = ctx.store.find_subscription(&topic, bob.uid()).await.unwrap();
        assert_eq!(sub.mode_given.to_string(), "JR");

        send(&alice, &set_mode("11", &bob_id, "JR")).await;
        assert_eq!(answer(&alice, "11").await.code, 304);

        // Read-only members cannot publish.
        send(&bob, &format!(r#"{{"pub":{{"id":"12","topic":"{topic}","content":"hi"}}}}"#)).await;
        assert_eq!(answer(&bob, "12").await.code, 403);

        // The owner cannot give up ownership.
        let alice_id = alice.uid().user_id();
        send(&alice, &set_mode("13", &alice_id, "JRWPASD")).await;
        assert_eq!(answer(&alice, "13").await.code, 403);

        // Without the join bit Bob is thrown out.
        send(&alice, &set_mode("14", &bob_id, "N")).await;
        assert_eq!(answer(&alice, "14").await.code, 200);
        bob.drain();
        assert!(!bob.has_sub(&topic));
    }

    #[tokio::test]
    async fn deleting_messages_needs_delete_access_and_tells_readers() {
        let ctx = test_support::context();
        let (alice, bob, topic) = shared_group(&ctx).await;

        for id in ["20", "21"] {
            send(
                &bob,
                &format!(r#"{{"pub":{{"id":"{id}","topic":"{topic}","noecho":true,"content":"x"}}}}"#),
            )
            .await;
            assert_eq!(answer(&bob, id).await.code, 202);
        }

        let del_first = |id: &str| {
            format!(r#"{{"del":{{"id":"{id}","topic":"{topic}","what":"msg","delseq":[{{"low":1}}]}}}}"#)
        };
        send(&bob, &del_first("22")).await;
        assert_eq!(answer(&bob, "22").await.code, 403);

        send(&alice, &del_first("23")).await;
        let done = answer(&alice, "23").await;
        assert_eq!(done.code, 200);
        assert_eq!(done.params, Some(json!({ "del": 1 })));

        let seen = wait_for(&bob, |msg| is_pres(msg, "del")).await;
        let pres = seen
            .iter()
            .find_map(|msg| match &msg.payload {
                ServerPayload::Pres(pres) if pres.what == "del" => Some(pres.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(pres.topic, topic);
        assert_eq!(pres.clear, 1);
        assert_eq!(pres.del_seq[0].low, 1);
        // The deleting session is not told twice.
        assert!(replies(&alice).await.iter().all(|msg| !is_pres(msg, "del")));

        send(&alice, &format!(r#"{{"get":{{"id":"24","topic":"{topic}","what":"data"}}}}"#)).await;
        assert_eq!(
            answer(&alice, "24").await.params,
            Some(json!({ "what": "data", "count": 1 }))
        );
    }

    #[tokio::test]
    async fn only_the_owner_deletes_a_group() {
        let ctx = test_support::context();
        let (alice, bob, topic) = shared_group(&ctx).await;
        let del_topic = |id: &str| format!(r#"{{"del":{{"id":"{id}","topic":"{topic}","what":"topic"}}}}"#);

        send(&bob, &del_topic("30")).await;
        assert_eq!(answer(&bob, "30").await.code, 403);
        assert!(ctx.store.find_topic(&topic).await.is_ok());

        send(&alice, &del_topic("31")).await;
        assert_eq!(answer(&alice, "31").await.code, 200);
        assert!(ctx.store.find_topic(&topic).await.is_err());

        for _ in 0..50 {
            if !ctx.hub.is_live(&topic) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!ctx.hub.is_live(&topic));
        alice.drain();
        bob.drain();
        assert!(!alice.has_sub(&topic));
        assert!(!bob.has_sub(&topic));
    }

    #[tokio::test]
    async fn members_are_removed_by_the_owner_but_the_owner_stays() {
        let ctx = test_support::context();
        let (alice, bob, topic) = shared_group(&ctx).await;
        let del_sub = |id: &str, user: &str| {
            format!(r#"{{"del":{{"id":"{id}","topic":"{topic}","what":"sub","user":"{user}"}}}}"#)
        };

        send(&bob, &del_sub("40", &alice.uid().user_id())).await;
        assert_eq!(answer(&bob, "40").await.code, 403);

        send(&alice, &del_sub("41", &bob.uid().user_id())).await;
        assert_eq!(answer(&alice, "41").await.code, 200);
        assert!(ctx
            .store
            .find_subscription(&topic, bob.uid())
            .await
            .is_err());
        bob.drain();
        assert!(!bob.has_sub(&topic));
        assert!(alice.has_sub(&topic));
    }

    #[tokio::test]
    async fn notes_reach_other_members_and_receipts_are_saved() {
        let ctx = test_support::context();
        let (alice, bob, topic) = shared_group(&ctx).await;

        send(
            &bob,
            &format!(r#"{{"pub":{{"id":"20","topic":"{topic}","noecho":true,"content":"x"}}}}"#),
        )
        .await;
        assert_eq!(answer(&bob, "20").await.code, 202);
        wait_for(&alice, |msg| matches!(msg.payload, ServerPayload::Data(_))).await;

        let info_of = |seen: &[ServerComMessage], what: &str| {
            seen.iter()
                .find_map(|msg| match &msg.payload {
                    ServerPayload::Info(info) if info.what == what => Some(info.clone()),
                    _ => None,
                })
                .unwrap()
        };
        let is_info = |msg: &ServerComMessage| matches!(msg.payload, ServerPayload::Info(_));

        send(&alice, &format!(r#"{{"note":{{"topic":"{topic}","what":"kp"}}}}"#)).await;
        let typing = info_of(&wait_for(&bob, is_info).await, "kp");
        assert_eq!(typing.from, alice.uid().user_id());
        assert_eq!(typing.topic, topic);

        send(&alice, &format!(r#"{{"note":{{"topic":"{topic}","what":"read","seq":1}}}}"#)).await;
        let read = info_of(&wait_for(&bob, is_info).await, "read");
        assert_eq!(read.seq, 1);
        let sub = ctx.store.find_subscription(&topic, alice.uid()).await.unwrap();
        assert_eq!(sub.read_seq, 1);
        assert_eq!(sub.recv_seq, 1);

        // A marker that does not move and a seq past the end are both dropped.
        send(&alice, &format!(r#"{{"note":{{"topic":"{topic}","what":"recv","seq":1}}}}"#)).await;
        send(&alice, &format!(r#"{{"note":{{"topic":"{topic}","what":"read","seq":9}}}}"#)).await;
        assert!(replies(&bob).await.iter().all(|msg| !is_info(msg)));
        assert!(replies(&alice).await.iter().all(|msg| !is_info(msg)));
        let sub = ctx.store.find_subscription(&topic, alice.uid()).await.unwrap();
        assert_eq!(sub.read_seq, 1);
    }

    #[tokio::test]
    async fn p2p_topic_is_only_for_its_two_users() {
        let ctx = test_support::context();
        let alice = signed_in(&ctx, "alice").await;
        let bob = signed_in(&ctx, "bob").await;
        let carol = signed_in(&ctx, "carol").await;
        let p2p = alice.uid().p2p_name(bob.uid());

        send(&carol, &format!(r#"{{"sub":{{"id":"3","topic":"{p2p}"}}}}"#)).await;
        assert_eq!(answer(&carol, "3").await.code, 403);
        assert!(ctx.store.find_topic(&p2p).await.is_err());

        send(&alice, &format!(r#"{{"sub":{{"id":"4","topic":"{}"}}}}"#, bob.uid().user_id())).await;
        let joined = answer(&alice, "4").await;
        assert_eq!(joined.code, 200);
        assert_eq!(joined.topic, bob.uid().user_id());
        assert!(alice.has_sub(&p2p));
        let stored = ctx.store.find_topic(&p2p).await.unwrap();
        assert_eq!(stored.access.auth, entity::AccessMode::C_P2P);

        send(&bob, &format!(r#"{{"sub":{{"id":"5","topic":"{}"}}}}"#, alice.uid().user_id())).await;
        assert_eq!(answer(&bob, "5").await.code, 200);
        assert!(bob.has_sub(&p2p));

        send(&carol, &format!(r#"{{"sub":{{"id":"6","topic":"{p2p}"}}}}"#)).await;
        assert_eq!(answer(&carol, "6").await.code, 403);
        assert!(!carol.has_sub(&p2p));
    }

    #[tokio::test]
    async fn background_session_comes_online_after_delay() {
        let ctx = test_support::context();
        let alice = signed_in(&ctx, "alice").await;
        let bob = signed_in(&ctx, "bob").await;

        send(&alice, r#"{"sub":{"id":"3","topic":"new"}}"#).await;
        let topic = answer(&alice, "3").await.topic;

        bob.start_background(Duration::from_secs(1));
        send(&bob, &format!(r#"{{"sub":{{"id":"4","topic":"{topic}"}}}}"#)).await;
        assert_eq!(answer(&bob, "4").await.code, 200);
        assert!(bob.is_background());
        assert!(replies(&alice).await.iter().all(|msg| !is_pres(msg, "on")));

        wait_for(&alice, |msg| is_pres(msg, "on")).await;
        assert!(!bob.is_background());
    }

    #[tokio::test]
    async fn hub_shutdown_detaches_sessions() {
        let ctx = test_support::context();
        let alice = signed_in(&ctx, "alice").await;
        send(&alice, r#"{"sub":{"id":"3","topic":"new"}}"#).await;
        let topic = answer(&alice, "3").await.topic;
        assert!(alice.has_sub(&topic));

        ctx.hub.shutdown().await;

        alice.drain();
        assert!(!alice.has_sub(&topic));
        for _ in 0..50 {
            if ctx.hub.topic_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ctx.hub.topic_count(), 0);
    }
}
