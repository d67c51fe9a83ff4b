use crate::{DefaultAccess, ObjState, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Fully expanded topic name, e.g. `grp...` or `p2p...`.
    pub name: String,
    pub state: ObjState,
    /// Zero for topics without an owner (peer-to-peer).
    pub owner: Uid,
    pub access: DefaultAccess,
    /// Id of the most recent message published to the topic.
    pub seq_id: i64,
    /// Id of the most recent deletion operation.
    pub del_id: i64,
    pub public: Option<Value>,
    pub tags: Vec<String>,
    pub touched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn new(name: impl Into<String>, owner: Uid, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            state: ObjState::Ok,
            owner,
            access: DefaultAccess::default(),
            seq_id: 0,
            del_id: 0,
            public: None,
            tags: Vec::new(),
            touched_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
