use crate::{AccessMode, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user's persisted relationship with a topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub topic: String,
    pub user: Uid,
    /// Access the user asked for.
    pub mode_want: AccessMode,
    /// Access the topic granted.
    pub mode_given: AccessMode,
    pub read_seq: i64,
    pub recv_seq: i64,
    pub del_id: i64,
    pub private: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn new(topic: impl Into<String>, user: Uid, now: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            user,
            mode_want: AccessMode::NONE,
            mode_given: AccessMode::NONE,
            read_seq: 0,
            recv_seq: 0,
            del_id: 0,
            private: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Access actually in effect: what was both wanted and given.
    pub fn mode(&self) -> AccessMode {
        self.mode_want & self.mode_given
    }
}
