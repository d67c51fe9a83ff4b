//! One actor per client connection.
//!
//! A session owns its outbound queue and its subscription map. Inbound
//! envelopes are handled strictly in order by the task that feeds the
//! transport (see `dispatch.rs`); outbound envelopes are pumped either by
//! [`Session::run_writer`] for persistent transports or by
//! [`Session::poll`] for long-poll requests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use entity::{AuthLevel, Uid};
use log::*;
use parking_lot::{Mutex, RwLock};
use protocol::{ProtocolVersion, ServerComMessage};
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::limits::DETACH_QUEUE_LEN;
use crate::subscription::{SessionLeave, SessionUpdate, Subscription};
use crate::transport::{SessionProto, SessionSink};

/// Per-session data set by the handshake and by authentication.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// `None` until a successful handshake.
    pub ver: Option<ProtocolVersion>,
    /// Zero while unauthenticated.
    pub uid: Uid,
    pub auth_lvl: AuthLevel,
    pub auth_expires: Option<chrono::DateTime<chrono::Utc>>,
    pub user_agent: String,
    pub device_id: String,
    pub platform: String,
    pub lang: String,
    pub remote_addr: String,
}

/// Receiving ends of the session's queues, owned by whoever pumps them.
pub(crate) struct Queues {
    send: mpsc::Receiver<ServerComMessage>,
    stop: mpsc::Receiver<Option<ServerComMessage>>,
    detach: mpsc::Receiver<String>,
}

pub struct Session {
    sid: String,
    proto: SessionProto,
    pub(crate) ctx: Arc<Context>,

    state: RwLock<SessionState>,
    /// Attached topics by expanded name. Written by the session's own tasks only.
    subs: RwLock<HashMap<String, Subscription>>,

    terminating: AtomicBool,
    background: AtomicBool,
    bkg_timer: Mutex<Option<JoinHandle<()>>>,

    send: mpsc::Sender<ServerComMessage>,
    stop: mpsc::Sender<Option<ServerComMessage>>,
    detach: mpsc::Sender<String>,
    queues: tokio::sync::Mutex<Queues>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("proto", &self.proto)
            .field("terminating", &self.is_terminating())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(sid: String, proto: SessionProto, ctx: Arc<Context>) -> Arc<Self> {
        let (send_tx, send_rx) = mpsc::channel(ctx.limits.outbound_capacity());
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (detach_tx, detach_rx) = mpsc::channel(DETACH_QUEUE_LEN);

        Arc::new(Self {
            sid,
            proto,
            ctx,
            state: RwLock::new(SessionState::default()),
            subs: RwLock::new(HashMap::new()),
            terminating: AtomicBool::new(false),
            background: AtomicBool::new(false),
            bkg_timer: Mutex::new(None),
            send: send_tx,
            stop: stop_tx,
            detach: detach_tx,
            queues: tokio::sync::Mutex::new(Queues {
                send: send_rx,
                stop: stop_rx,
                detach: detach_rx,
            }),
        })
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn proto(&self) -> SessionProto {
        self.proto
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub(crate) fn update_state(&self, update: impl FnOnce(&mut SessionState)) {
        update(&mut *self.state.write());
    }

    pub fn uid(&self) -> Uid {
        self.state.read().uid
    }

    pub fn auth_level(&self) -> AuthLevel {
        self.state.read().auth_lvl
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.state.read().ver
    }

    pub fn set_remote_addr(&self, addr: impl Into<String>) {
        self.state.write().remote_addr = addr.into();
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    // Subscriptions

    pub fn get_sub(&self, topic: &str) -> Option<Subscription> {
        self.subs.read().get(topic).cloned()
    }

    pub fn has_sub(&self, topic: &str) -> bool {
        self.subs.read().contains_key(topic)
    }

    pub fn sub_count(&self) -> usize {
        self.subs.read().len()
    }

    pub(crate) fn add_sub(&self, topic: String, sub: Subscription) {
        self.subs.write().insert(topic, sub);
    }

    pub(crate) fn del_sub(&self, topic: &str) -> Option<Subscription> {
        self.subs.write().remove(topic)
    }

    // Outbound

    /// Queues a message for the client, waiting at most `send_timeout` for
    /// room. Returns false if the message was dropped.
    pub async fn queue_out(&self, msg: ServerComMessage) -> bool {
        if self.is_terminating() {
            debug!("session[{}]: terminating, dropped {}", self.sid, msg.describe());
            return false;
        }
        match self.send.send_timeout(msg, self.ctx.limits.send_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(msg)) => {
                warn!(
                    "session[{}]: outbound queue full, dropped {}",
                    self.sid,
                    msg.describe()
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("session[{}]: outbound queue closed", self.sid);
                false
            }
        }
    }

    /// Asks the outbound pump to stop, optionally after writing one last message.
    pub fn stop_session(&self, last: Option<ServerComMessage>) {
        if let Err(TrySendError::Full(_)) = self.stop.try_send(last) {
            debug!("session[{}]: stop already requested", self.sid);
        }
    }

    /// Asks the session to forget a topic that dropped it.
    pub fn detach_topic(&self, topic: &str) {
        if self.is_terminating() {
            return;
        }
        if let Err(err) = self.detach.try_send(topic.to_owned()) {
            warn!(
                "session[{}]: failed to queue detach from '{}': {}",
                self.sid, topic, err
            );
        }
    }

    /// Terminates the session. Only the first call has any effect.
    /// Tells a topic this session is gone. A full leave queue is retried in
    /// the background so the topic never keeps a dead session attached.
    pub(crate) fn notify_gone(self: &Arc<Self>, topic: &str, sub: &Subscription) {
        let leave = SessionLeave {
            pkt: None,
            sess: self.clone(),
        };
        match sub.done.try_send(leave) {
            Ok(()) => {}
            Err(TrySendError::Full(leave)) => {
                let done = sub.done.clone();
                tokio::spawn(async move {
                    let _ = done.send(leave).await;
                });
            }
            Err(TrySendError::Closed(_)) => {
                trace!("session[{}]: topic '{}' already gone", self.sid, topic);
            }
        }
    }

    pub fn terminate(self: &Arc<Self>) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("session[{}]: terminating", self.sid);

        self.background.store(false, Ordering::SeqCst);
        if let Some(timer) = self.bkg_timer.lock().take() {
            timer.abort();
        }

        let subs: Vec<(String, Subscription)> = self.subs.write().drain().collect();
        for (topic, sub) in subs {
            self.notify_gone(&topic, &sub);
        }

        self.stop_session(None);
        if let Ok(mut queues) = self.queues.try_lock() {
            queues.send.close();
            queues.detach.close();
        }
    }

    // Background mode

    /// Marks the session background and arms the timer that brings it back
    /// to foreground.
    pub(crate) fn start_background(self: &Arc<Self>, delay: Duration) {
        self.background.store(true, Ordering::SeqCst);
        let weak: Weak<Session> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sess) = weak.upgrade() {
                sess.foreground();
            }
        });
        if let Some(previous) = self.bkg_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Moves a background session to foreground and tells every attached
    /// topic so it can announce the user. No-op for foreground sessions.
    pub fn foreground(self: &Arc<Self>) {
        if !self.background.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(timer) = self.bkg_timer.lock().take() {
            timer.abort();
        }
        let subs: Vec<Subscription> = self.subs.read().values().cloned().collect();
        for sub in subs {
            if let Err(err) = sub.supd.try_send(SessionUpdate { sess: self.clone() }) {
                warn!("session[{}]: failed to send foreground update: {}", self.sid, err);
            }
        }
    }

    // Outbound pumps

    /// Writes queued messages into `sink` until the session is stopped or the
    /// sink fails.
    pub async fn run_writer<S: SessionSink>(self: Arc<Self>, mut sink: S) {
        let mut guard = self.queues.lock().await;
        let Queues { send, stop, detach } = &mut *guard;

        loop {
            tokio::select! {
                msg = send.recv() => match msg {
                    Some(msg) => {
                        if !self.write_to(&mut sink, &msg).await {
                            break;
                        }
                    }
                    None => break,
                },
                last = stop.recv() => {
                    if let Some(Some(msg)) = last {
                        self.write_to(&mut sink, &msg).await;
                    }
                    break;
                }
                Some(topic) = detach.recv() => {
                    self.del_sub(&topic);
                }
            }
        }

        while let Ok(topic) = detach.try_recv() {
            self.del_sub(&topic);
        }
        send.close();
        detach.close();
        drop(guard);
        sink.close().await;
        debug!("session[{}]: writer stopped", self.sid);
    }

    async fn write_to<S: SessionSink>(&self, sink: &mut S, msg: &ServerComMessage) -> bool {
        let text = match msg.encode() {
            Ok(text) => text,
            Err(err) => {
                error!("session[{}]: failed to encode {}: {}", self.sid, msg.describe(), err);
                return true;
            }
        };
        match sink.send_text(text).await {
            Ok(()) => true,
            Err(err) => {
                info!("session[{}]: transport write failed: {}", self.sid, err);
                false
            }
        }
    }

    /// Collects outbound messages for one long-poll response, waiting up to
    /// `wait` for the first one.
    pub async fn poll(&self, wait: Duration) -> Vec<ServerComMessage> {
        let mut guard = self.queues.lock().await;
        let Queues { send, stop, detach } = &mut *guard;

        while let Ok(topic) = detach.try_recv() {
            self.del_sub(&topic);
        }

        let mut batch = Vec::new();
        while let Ok(msg) = send.try_recv() {
            batch.push(msg);
        }
        if !batch.is_empty() {
            return batch;
        }

        tokio::select! {
            Some(msg) = send.recv() => batch.push(msg),
            Some(last) = stop.recv() => batch.extend(last),
            _ = tokio::time::sleep(wait) => {}
        }
        while let Ok(msg) = send.try_recv() {
            batch.push(msg);
        }
        batch
    }

    /// Takes whatever is queued right now without waiting. Returns nothing
    /// while a long-poll request holds the queues; that request delivers the
    /// pending messages instead.
    pub fn drain(&self) -> Vec<ServerComMessage> {
        let Ok(mut guard) = self.queues.try_lock() else {
            trace!("session[{}]: drain skipped, poll in flight", self.sid);
            return Vec::new();
        };
        let Queues { send, stop, detach } = &mut *guard;

        while let Ok(topic) = detach.try_recv() {
            self.del_sub(&topic);
        }
        let mut batch = Vec::new();
        while let Ok(msg) = send.try_recv() {
            batch.push(msg);
        }
        if batch.is_empty() {
            if let Ok(last) = stop.try_recv() {
                batch.extend(last);
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use protocol::Status;
    use tokio::time::Instant;

    fn ctrl(status: Status) -> ServerComMessage {
        ServerComMessage::ctrl(status, "", "", chrono::Utc::now())
    }

    #[tokio::test]
    async fn queue_out_refuses_after_terminate() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);

        assert!(sess.queue_out(ctrl(Status::Ok)).await);
        sess.terminate();
        assert!(sess.is_terminating());
        assert!(!sess.queue_out(ctrl(Status::Ok)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_queue_returns_within_send_timeout() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        for _ in 0..ctx.limits.outbound_capacity() {
            assert!(sess.queue_out(ctrl(Status::Ok)).await);
        }

        let started = Instant::now();
        assert!(!sess.queue_out(ctrl(Status::Ok)).await);
        assert!(started.elapsed() <= ctx.limits.send_timeout + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn poll_returns_queued_batch() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        sess.queue_out(ctrl(Status::Ok)).await;
        sess.queue_out(ctrl(Status::Accepted)).await;

        let batch = sess.poll(Duration::from_millis(10)).await;
        let codes: Vec<_> = batch.iter().filter_map(|m| m.ctrl_code()).collect();
        assert_eq!(codes, vec![200, 202]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out_empty() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        assert!(sess.poll(Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test]
    async fn drain_returns_queued_messages() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        sess.queue_out(ctrl(Status::Accepted)).await;

        let batch = sess.drain();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].ctrl_code(), Some(202));
        assert!(sess.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_does_not_wait_for_pending_poll() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        let poller = {
            let sess = sess.clone();
            tokio::spawn(async move { sess.poll(Duration::from_secs(3)).await })
        };
        // Let the poll take the queues.
        tokio::task::yield_now().await;

        let started = Instant::now();
        assert!(sess.drain().is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);

        sess.queue_out(ctrl(Status::Accepted)).await;
        let batch = poller.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].ctrl_code(), Some(202));
    }

    #[tokio::test]
    async fn stop_message_is_delivered_to_poll() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::LongPoll);
        sess.stop_session(Some(ctrl(Status::Shutdown)));

        let batch = sess.poll(Duration::from_secs(1)).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].ctrl_code(), Some(205));
    }

    #[tokio::test]
    async fn terminate_sends_leave_to_every_topic() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::WebSocket);
        let (sub, mut inbox) = test_support::subscription();
        sess.add_sub("grpA".into(), sub);

        sess.terminate();
        sess.terminate();

        let leave = inbox.done.recv().await.unwrap();
        assert!(leave.pkt.is_none());
        assert_eq!(leave.sess.sid(), sess.sid());
        assert!(inbox.done.try_recv().is_err());
        assert_eq!(sess.sub_count(), 0);
    }

    #[tokio::test]
    async fn leave_notice_survives_full_topic_queue() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::WebSocket);
        let other = test_support::session(&ctx, SessionProto::WebSocket);
        let (sub, mut inbox) = test_support::subscription();
        while sub
            .done
            .try_send(SessionLeave {
                pkt: None,
                sess: other.clone(),
            })
            .is_ok()
        {}

        sess.notify_gone("grpA", &sub);

        let mut last = None;
        while let Some(leave) = inbox.done.recv().await {
            if leave.sess.sid() == sess.sid() {
                last = Some(leave);
                break;
            }
        }
        assert!(last.unwrap().pkt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn background_timer_moves_session_to_foreground() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::WebSocket);
        let (sub, mut inbox) = test_support::subscription();
        sess.add_sub("grpA".into(), sub);

        sess.start_background(ctx.limits.deferred_notifications);
        assert!(sess.is_background());

        tokio::time::sleep(ctx.limits.deferred_notifications + Duration::from_millis(10)).await;
        assert!(!sess.is_background());
        let update = inbox.supd.recv().await.unwrap();
        assert_eq!(update.sess.sid(), sess.sid());
    }

    #[tokio::test]
    async fn writer_pumps_messages_into_sink() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::WebSocket);
        let (sink, mut written) = test_support::RecordingSink::new();
        let writer = tokio::spawn(sess.clone().run_writer(sink));

        sess.queue_out(ctrl(Status::Ok)).await;
        let text = written.recv().await.unwrap();
        assert!(text.starts_with("{\"ctrl\":"));

        sess.terminate();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn writer_applies_detach_requests() {
        let ctx = test_support::context();
        let sess = test_support::session(&ctx, SessionProto::WebSocket);
        let (sub, _inbox) = test_support::subscription();
        sess.add_sub("grpA".into(), sub);
        let (sink, mut written) = test_support::RecordingSink::new();
        let writer = tokio::spawn(sess.clone().run_writer(sink));

        sess.detach_topic("grpA");
        sess.stop_session(None);
        writer.await.unwrap();

        assert!(!sess.has_sub("grpA"));
        assert!(written.try_recv().is_err());
    }
}
