//! Server to client envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::{is_false, is_zero, MsgDefaultAcsMode, MsgDelRange};
use crate::error::Error;
use crate::routing::ServerRouting;
use crate::status::Status;

/// Response to a client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgServerCtrl {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    pub code: u16,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Receipt time of the request being answered.
    pub ts: DateTime<Utc>,
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgServerData {
    pub topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    pub ts: DateTime<Utc>,
    pub seq: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<Map<String, Value>>,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgAccessMode {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub want: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub given: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

/// Presence notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgServerPres {
    pub topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src: String,
    /// E.g. `on`, `off`, `msg`, `upd`, `gone`, `del`, `acs`.
    pub what: String,
    #[serde(default, rename = "ua", skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub clear: i64,
    #[serde(default, rename = "delseq", skip_serializing_if = "Vec::is_empty")]
    pub del_seq: Vec<MsgDelRange>,
    /// User the change is about when different from `src`.
    #[serde(default, rename = "tgt", skip_serializing_if = "String::is_empty")]
    pub target: String,
    /// User who made the change.
    #[serde(default, rename = "act", skip_serializing_if = "String::is_empty")]
    pub actor: String,
    #[serde(default, rename = "dacs", skip_serializing_if = "Option::is_none")]
    pub delta_acs: Option<MsgAccessMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgTopicDesc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched: Option<DateTime<Utc>>,
    #[serde(default, rename = "defacs", skip_serializing_if = "Option::is_none")]
    pub default_acs: Option<MsgDefaultAcsMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acs: Option<MsgAccessMode>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub read: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub recv: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub clear: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgTopicSub {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acs: Option<MsgAccessMode>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub read: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub recv: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
    /// Set when listing a topic's subscribers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Set when listing a user's subscriptions.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgDelValues {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub clear: i64,
    #[serde(default, rename = "delseq", skip_serializing_if = "Vec::is_empty")]
    pub del_seq: Vec<MsgDelRange>,
}

/// Topic metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgServerMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub topic: String,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<MsgTopicDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub: Vec<MsgTopicSub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub del: Option<MsgDelValues>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Forwarded client note: typing indicator or receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgServerInfo {
    pub topic: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src: String,
    pub from: String,
    pub what: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: i64,
}

/// The single payload of a server envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerPayload {
    Ctrl(MsgServerCtrl),
    Data(MsgServerData),
    Meta(MsgServerMeta),
    Pres(MsgServerPres),
    Info(MsgServerInfo),
}

/// An outbound envelope plus its routing context.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerComMessage {
    pub payload: ServerPayload,
    pub routing: ServerRouting,
}

impl ServerComMessage {
    pub fn new(payload: ServerPayload) -> Self {
        Self {
            payload,
            routing: ServerRouting {
                timestamp: Utc::now(),
                ..Default::default()
            },
        }
    }

    /// Control response to the request `id` on `topic`, received at `ts`.
    pub fn ctrl(status: Status, id: &str, topic: &str, ts: DateTime<Utc>) -> Self {
        let mut msg = Self::new(ServerPayload::Ctrl(MsgServerCtrl {
            id: id.to_owned(),
            topic: topic.to_owned(),
            code: status.code(),
            text: status.text().to_owned(),
            params: None,
            ts,
        }));
        msg.routing.id = id.to_owned();
        msg
    }

    /// Attaches parameters to a ctrl message. Other payloads are left unchanged.
    pub fn with_params(mut self, params: Value) -> Self {
        if let ServerPayload::Ctrl(ctrl) = &mut self.payload {
            ctrl.params = Some(params);
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            ServerPayload::Ctrl(_) => "ctrl",
            ServerPayload::Data(_) => "data",
            ServerPayload::Meta(_) => "meta",
            ServerPayload::Pres(_) => "pres",
            ServerPayload::Info(_) => "info",
        }
    }

    pub fn ctrl_code(&self) -> Option<u16> {
        match &self.payload {
            ServerPayload::Ctrl(ctrl) => Some(ctrl.code),
            _ => None,
        }
    }

    /// Topic name as it appears on the wire.
    pub fn topic(&self) -> &str {
        match &self.payload {
            ServerPayload::Ctrl(msg) => &msg.topic,
            ServerPayload::Data(msg) => &msg.topic,
            ServerPayload::Meta(msg) => &msg.topic,
            ServerPayload::Pres(msg) => &msg.topic,
            ServerPayload::Info(msg) => &msg.topic,
        }
    }

    /// Rewrites the wire topic name, used when each recipient knows the
    /// topic under a different name.
    pub fn set_topic(&mut self, topic: String) {
        match &mut self.payload {
            ServerPayload::Ctrl(msg) => msg.topic = topic,
            ServerPayload::Data(msg) => msg.topic = topic,
            ServerPayload::Meta(msg) => msg.topic = topic,
            ServerPayload::Pres(msg) => msg.topic = topic,
            ServerPayload::Info(msg) => msg.topic = topic,
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.payload)?)
    }

    /// Short rendering for logs.
    pub fn describe(&self) -> String {
        match &self.payload {
            ServerPayload::Ctrl(ctrl) => format!(
                "{{ctrl id={} code={} txt={} topic={}}}",
                ctrl.id, ctrl.code, ctrl.text, ctrl.topic
            ),
            ServerPayload::Data(data) => format!(
                "{{data topic={} from={} seq={}}}",
                data.topic, data.from, data.seq
            ),
            ServerPayload::Meta(meta) => format!(
                "{{meta id={} topic={} desc={} subs={}}}",
                meta.id,
                meta.topic,
                meta.desc.is_some(),
                meta.sub.len()
            ),
            ServerPayload::Pres(pres) => format!(
                "{{pres topic={} what={} src={} seq={}}}",
                pres.topic, pres.what, pres.src, pres.seq
            ),
            ServerPayload::Info(info) => format!(
                "{{info topic={} what={} from={} seq={}}}",
                info.topic, info.what, info.from, info.seq
            ),
        }
    }
}

impl Serialize for ServerComMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn ctrl_keeps_request_time_apart_from_build_time() {
        let received = at(1_700_000_000);
        let msg = ServerComMessage::ctrl(Status::VersionNotSupported, "1", "", received);
        let ServerPayload::Ctrl(ctrl) = &msg.payload else {
            panic!("expected ctrl");
        };
        assert_eq!(ctrl.code, 505);
        assert_eq!(ctrl.text, "version not supported");
        assert_eq!(ctrl.ts, received);
        assert!(msg.routing.timestamp > received);
    }

    #[test]
    fn routing_is_not_serialized() {
        let mut msg = ServerComMessage::ctrl(Status::Ok, "5", "grpA", at(0))
            .with_params(json!({"seq": 3}));
        msg.routing.skip_sid = Some("sid-1".into());
        msg.routing.origin_sid = Some("sid-1".into());

        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"ctrl": {
                "id": "5",
                "topic": "grpA",
                "code": 200,
                "text": "ok",
                "params": {"seq": 3},
                "ts": "1970-01-01T00:00:00Z"
            }})
        );
    }

    #[test]
    fn pres_omits_empty_fields() {
        let msg = ServerComMessage::new(ServerPayload::Pres(MsgServerPres {
            topic: "me".into(),
            src: "grpA".into(),
            what: "msg".into(),
            seq: 4,
            ..Default::default()
        }));
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"pres": {"topic": "me", "src": "grpA", "what": "msg", "seq": 4}})
        );
    }

    #[test]
    fn set_topic_rewrites_wire_name() {
        let mut msg = ServerComMessage::new(ServerPayload::Info(MsgServerInfo {
            topic: "p2pXYZ".into(),
            from: "usrA".into(),
            what: "kp".into(),
            ..Default::default()
        }));
        msg.set_topic("usrB".into());
        assert_eq!(msg.topic(), "usrB");
        assert_eq!(msg.describe(), "{info topic=usrB what=kp from=usrA seq=0}");
    }
}
