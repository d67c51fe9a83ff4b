use crate::Uid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub topic: String,
    pub seq_id: i64,
    pub from: Uid,
    pub head: Option<Map<String, Value>>,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}
