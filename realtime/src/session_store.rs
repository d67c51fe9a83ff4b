//! Process-wide registry of live sessions.
//!
//! Long-poll sessions have no connection whose closure would end them, so
//! they are additionally kept in an LRU ordering by last activity and
//! expired by a periodic sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::*;
use parking_lot::Mutex;
use protocol::{ServerComMessage, Status};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{Error, FatalErrorKind};
use crate::session::Session;
use crate::transport::SessionProto;

/// Position in the LRU ordering. The counter breaks ties between sessions
/// touched at the same instant.
type LruKey = (Instant, u64);

struct Entry {
    sess: Arc<Session>,
    lru_key: Option<LruKey>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    /// Long-poll sessions only, oldest first.
    lru: BTreeMap<LruKey, String>,
    seq: u64,
}

impl Inner {
    fn next_key(&mut self, now: Instant) -> LruKey {
        self.seq += 1;
        (now, self.seq)
    }
}

pub struct SessionStore {
    ctx: Arc<Context>,
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new(ctx: Arc<Context>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Creates and registers a session. `sid` defaults to a fresh unique id.
    ///
    /// A duplicate id means two sessions would share one identity: the
    /// existing session is kept and the error aborts the process once it
    /// reaches the transport layer.
    pub fn new_session(
        &self,
        proto: SessionProto,
        sid: Option<String>,
    ) -> Result<Arc<Session>, Error> {
        if proto == SessionProto::None {
            error!("session store: refused session without a transport");
            return Err(Error::fatal(FatalErrorKind::UnsupportedTransport));
        }
        let sid = sid.unwrap_or_else(|| self.ctx.store.next_uid().to_string());

        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&sid) {
            error!("session store: duplicate session id {}", sid);
            return Err(Error::fatal(FatalErrorKind::DuplicateSessionId));
        }

        let sess = Session::new(sid.clone(), proto, self.ctx.clone());
        let lru_key = if proto.is_stateless() {
            let key = inner.next_key(Instant::now());
            inner.lru.insert(key, sid.clone());
            Some(key)
        } else {
            None
        };
        inner.sessions.insert(
            sid.clone(),
            Entry {
                sess: sess.clone(),
                lru_key,
            },
        );
        info!(
            "session store: registered {} session {}, {} live",
            proto,
            sid,
            inner.sessions.len()
        );
        Ok(sess)
    }

    pub fn get(&self, sid: &str) -> Option<Arc<Session>> {
        self.inner
            .lock()
            .sessions
            .get(sid)
            .map(|entry| entry.sess.clone())
    }

    /// Marks a long-poll session as just used. Returns the session, or
    /// `None` if the id is unknown.
    pub fn touch(&self, sid: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let key = inner.next_key(Instant::now());
        let Inner { sessions, lru, .. } = &mut *inner;

        let entry = sessions.get_mut(sid)?;
        if let Some(old) = entry.lru_key.take() {
            lru.remove(&old);
            lru.insert(key, sid.to_owned());
            entry.lru_key = Some(key);
        }
        Some(entry.sess.clone())
    }

    /// Forgets a session. Terminating it is up to the caller.
    pub fn delete(&self, sid: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let entry = inner.sessions.remove(sid)?;
        if let Some(key) = entry.lru_key {
            inner.lru.remove(&key);
        }
        debug!(
            "session store: removed session {}, {} live",
            sid,
            inner.sessions.len()
        );
        Some(entry.sess)
    }

    /// Removes and terminates every long-poll session idle for longer than
    /// the configured lifetime as of `now`.
    pub fn evict_expired(&self, now: Instant) -> Vec<Arc<Session>> {
        let lifetime = self.ctx.limits.long_poll_lifetime;
        let expired: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock();
            let mut expired = Vec::new();
            while let Some((&key, _)) = inner.lru.first_key_value() {
                if now.saturating_duration_since(key.0) <= lifetime {
                    break;
                }
                if let Some(sid) = inner.lru.remove(&key) {
                    if let Some(entry) = inner.sessions.remove(&sid) {
                        expired.push(entry.sess);
                    }
                }
            }
            expired
        };

        for sess in &expired {
            info!("session store: long-poll session {} expired", sess.sid());
            sess.terminate();
        }
        expired
    }

    /// Runs [`evict_expired`](Self::evict_expired) every `interval` until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = store.evict_expired(Instant::now());
                if !evicted.is_empty() {
                    debug!("session store: sweep evicted {} sessions", evicted.len());
                }
            }
        })
    }

    /// Tells every session the server is going away and terminates it.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock();
            inner.lru.clear();
            inner
                .sessions
                .drain()
                .map(|(_, entry)| entry.sess)
                .collect()
        };
        info!("session store: shutting down {} sessions", sessions.len());

        let now = Utc::now();
        for sess in sessions {
            sess.stop_session(Some(ServerComMessage::ctrl(Status::Shutdown, "", "", now)));
            sess.terminate();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    /// Number of sessions tracked for idle expiry.
    pub fn lp_len(&self) -> usize {
        self.inner.lock().lru.len()
    }
}
