use crate::{DefaultAccess, ObjState, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: Uid,
    pub state: ObjState,
    pub access: DefaultAccess,
    pub public: Option<Value>,
    pub tags: Vec<String>,
    pub user_agent: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn new(id: Uid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: ObjState::Ok,
            access: DefaultAccess::default(),
            public: None,
            tags: Vec::new(),
            user_agent: String::new(),
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }
}
