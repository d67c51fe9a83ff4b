//! Client to server envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind};
use crate::routing::Routing;

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

pub(crate) fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Binary secrets travel as standard base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientHi {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, rename = "ua", skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ver: String,
    #[serde(default, rename = "dev", skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(default, rename = "platf", skip_serializing_if = "String::is_empty")]
    pub platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lang: String,
    /// Session starts in background mode.
    #[serde(default, rename = "bkg", skip_serializing_if = "is_false")]
    pub background: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgCredClient {
    #[serde(default, rename = "meth", skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, rename = "val", skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, rename = "resp", skip_serializing_if = "String::is_empty")]
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgDefaultAcsMode {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub anon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgSetDesc {
    #[serde(default, rename = "defacs", skip_serializing_if = "Option::is_none")]
    pub default_acs: Option<MsgDefaultAcsMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgSetSub {
    /// Target user; empty means the requester.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgSetQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<MsgSetDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<MsgSetSub>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred: Option<MsgCredClient>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgGetOpts {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    /// If modified since.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ims: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub since: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub before: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgGetQuery {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub what: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<MsgGetOpts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<MsgGetOpts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MsgGetOpts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub del: Option<MsgGetOpts>,
}

/// Account creation or update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientAcc {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// `new...` to create an account, a user id or empty to update one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheme: String,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub secret: Vec<u8>,
    /// Account state change, e.g. `suspended`.
    #[serde(default, rename = "status", skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default, rename = "authlevel", skip_serializing_if = "String::is_empty")]
    pub auth_level: String,
    /// Log the session in with the new account.
    #[serde(default, skip_serializing_if = "is_false")]
    pub login: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<MsgSetDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cred: Vec<MsgCredClient>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientLogin {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheme: String,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub secret: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cred: Vec<MsgCredClient>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientSub {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<MsgSetQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<MsgGetQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientLeave {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unsub: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientPub {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub noecho: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<Map<String, Value>>,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientGet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(flatten)]
    pub query: MsgGetQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientSet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(flatten)]
    pub query: MsgSetQuery,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgDelRange {
    #[serde(default)]
    pub low: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hi: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientDel {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    /// One of `msg`, `topic`, `sub`.
    #[serde(default)]
    pub what: String,
    #[serde(default, rename = "delseq", skip_serializing_if = "Vec::is_empty")]
    pub del_seq: Vec<MsgDelRange>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hard: bool,
}

/// Fire-and-forget notification: typing, read and received receipts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgClientNote {
    #[serde(default)]
    pub topic: String,
    /// One of `kp`, `read`, `recv`.
    #[serde(default)]
    pub what: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: i64,
}

/// The single payload of a client envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientPayload {
    Hi(MsgClientHi),
    Acc(MsgClientAcc),
    Login(MsgClientLogin),
    Sub(MsgClientSub),
    Leave(MsgClientLeave),
    Pub(MsgClientPub),
    Get(MsgClientGet),
    Set(MsgClientSet),
    Del(MsgClientDel),
    Note(MsgClientNote),
}

impl ClientPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientPayload::Hi(_) => "hi",
            ClientPayload::Acc(_) => "acc",
            ClientPayload::Login(_) => "login",
            ClientPayload::Sub(_) => "sub",
            ClientPayload::Leave(_) => "leave",
            ClientPayload::Pub(_) => "pub",
            ClientPayload::Get(_) => "get",
            ClientPayload::Set(_) => "set",
            ClientPayload::Del(_) => "del",
            ClientPayload::Note(_) => "note",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ClientPayload::Hi(msg) => &msg.id,
            ClientPayload::Acc(msg) => &msg.id,
            ClientPayload::Login(msg) => &msg.id,
            ClientPayload::Sub(msg) => &msg.id,
            ClientPayload::Leave(msg) => &msg.id,
            ClientPayload::Pub(msg) => &msg.id,
            ClientPayload::Get(msg) => &msg.id,
            ClientPayload::Set(msg) => &msg.id,
            ClientPayload::Del(msg) => &msg.id,
            ClientPayload::Note(_) => "",
        }
    }

    /// Topic the payload addresses, for the kinds that address one.
    pub fn topic(&self) -> Option<&str> {
        match self {
            ClientPayload::Hi(_) | ClientPayload::Acc(_) | ClientPayload::Login(_) => None,
            ClientPayload::Sub(msg) => Some(&msg.topic),
            ClientPayload::Leave(msg) => Some(&msg.topic),
            ClientPayload::Pub(msg) => Some(&msg.topic),
            ClientPayload::Get(msg) => Some(&msg.topic),
            ClientPayload::Set(msg) => Some(&msg.topic),
            ClientPayload::Del(msg) => Some(&msg.topic),
            ClientPayload::Note(msg) => Some(&msg.topic),
        }
    }

    /// Handshake and account management are the only kinds allowed before login.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            ClientPayload::Hi(_) | ClientPayload::Acc(_) | ClientPayload::Login(_)
        )
    }
}

/// Wire shape of a client envelope: every payload optional, so that
/// envelopes with zero or several payloads can be told apart from broken JSON.
#[derive(Deserialize)]
struct RawClientMessage {
    hi: Option<MsgClientHi>,
    acc: Option<MsgClientAcc>,
    login: Option<MsgClientLogin>,
    sub: Option<MsgClientSub>,
    leave: Option<MsgClientLeave>,
    #[serde(rename = "pub")]
    publish: Option<MsgClientPub>,
    get: Option<MsgClientGet>,
    set: Option<MsgClientSet>,
    del: Option<MsgClientDel>,
    note: Option<MsgClientNote>,
}

impl TryFrom<RawClientMessage> for ClientPayload {
    type Error = Error;

    fn try_from(raw: RawClientMessage) -> Result<Self, Self::Error> {
        let RawClientMessage {
            hi,
            acc,
            login,
            sub,
            leave,
            publish,
            get,
            set,
            del,
            note,
        } = raw;

        let mut found: Vec<ClientPayload> = Vec::with_capacity(1);
        found.extend(hi.map(ClientPayload::Hi));
        found.extend(acc.map(ClientPayload::Acc));
        found.extend(login.map(ClientPayload::Login));
        found.extend(sub.map(ClientPayload::Sub));
        found.extend(leave.map(ClientPayload::Leave));
        found.extend(publish.map(ClientPayload::Pub));
        found.extend(get.map(ClientPayload::Get));
        found.extend(set.map(ClientPayload::Set));
        found.extend(del.map(ClientPayload::Del));
        found.extend(note.map(ClientPayload::Note));

        match (found.pop(), found.len()) {
            (Some(payload), 0) => Ok(payload),
            (None, _) => Err(Error::new(ErrorKind::PayloadCount(0))),
            (Some(_), extra) => Err(Error::new(ErrorKind::PayloadCount(extra + 1))),
        }
    }
}

/// A decoded client envelope plus its routing context.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientComMessage {
    pub payload: ClientPayload,
    pub routing: Routing,
}

impl ClientComMessage {
    pub fn new(payload: ClientPayload) -> Self {
        let routing = Routing {
            id: payload.id().to_owned(),
            original: payload.topic().unwrap_or_default().to_owned(),
            ..Default::default()
        };
        Self { payload, routing }
    }

    /// Decodes one JSON envelope. Exactly one payload must be present.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let raw: RawClientMessage = serde_json::from_slice(bytes)?;
        Ok(Self::new(raw.try_into()?))
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(&self.payload)?)
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Short rendering for logs.
    pub fn describe(&self) -> String {
        let mut out = format!("{{{}", self.kind());
        if !self.routing.id.is_empty() {
            out.push_str(&format!(" id={}", self.routing.id));
        }
        if !self.routing.original.is_empty() {
            out.push_str(&format!(" topic={}", self.routing.original));
        }
        match &self.payload {
            ClientPayload::Hi(hi) => out.push_str(&format!(" ver={} ua={}", hi.ver, hi.user_agent)),
            ClientPayload::Login(login) => out.push_str(&format!(" scheme={}", login.scheme)),
            ClientPayload::Acc(acc) => {
                out.push_str(&format!(" user={} scheme={}", acc.user, acc.scheme))
            }
            ClientPayload::Get(get) => out.push_str(&format!(" what={}", get.query.what)),
            ClientPayload::Del(del) => out.push_str(&format!(" what={}", del.what)),
            ClientPayload::Note(note) => {
                out.push_str(&format!(" what={} seq={}", note.what, note.seq))
            }
            ClientPayload::Leave(leave) if leave.unsub => out.push_str(" unsub"),
            _ => {}
        }
        out.push('}');
        out
    }
}

impl Serialize for ClientComMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}
