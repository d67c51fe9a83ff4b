//! Topic naming: categories and expansion of client-side aliases.

use entity::Uid;

use crate::error::{Error, ErrorKind};

/// Alias a client uses for its own `me` topic.
pub const ME: &str = "me";
/// Alias a client uses for its own `fnd` topic.
pub const FND: &str = "fnd";
/// The system topic.
pub const SYS: &str = "sys";

const NEW_PREFIX: &str = "new";
const NEW_CHANNEL_PREFIX: &str = "nch";
const GROUP_PREFIX: &str = "grp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    Me,
    Fnd,
    P2P,
    Grp,
    Sys,
}

/// Categorizes an expanded topic name.
pub fn topic_category(name: &str) -> Option<TopicCategory> {
    if name == SYS {
        return Some(TopicCategory::Sys);
    }
    if is_new_topic(name) {
        return Some(TopicCategory::Grp);
    }
    let prefix = name.get(..3)?;
    if name.len() == prefix.len() {
        return None;
    }
    match prefix {
        "usr" => Some(TopicCategory::Me),
        "fnd" => Some(TopicCategory::Fnd),
        "p2p" => Some(TopicCategory::P2P),
        "grp" => Some(TopicCategory::Grp),
        _ => None,
    }
}

/// True for the names a client uses to ask for a new group topic.
pub fn is_new_topic(name: &str) -> bool {
    name.starts_with(NEW_PREFIX) || name.starts_with(NEW_CHANNEL_PREFIX)
}

/// Builds the name of a freshly created group topic.
pub fn group_topic_name(id: Uid) -> String {
    format!("{GROUP_PREFIX}{id}")
}

/// Resolves a topic name as written by `as_user` into the name it is routed
/// under: `me` and `fnd` become the user's own topics, and a `usr...` name
/// becomes the peer-to-peer topic between the two users.
pub fn expand_topic_name(original: &str, as_user: Uid) -> Result<String, Error> {
    match original {
        ME => Ok(as_user.user_id()),
        FND => Ok(as_user.fnd_name()),
        SYS => Ok(SYS.to_owned()),
        _ if original.starts_with("usr") => {
            let peer = Uid::parse_user_id(original)
                .filter(|uid| !uid.is_zero())
                .ok_or_else(|| Error::new(ErrorKind::InvalidTopic))?;
            if peer == as_user {
                return Err(Error::new(ErrorKind::SelfTopic));
            }
            Ok(as_user.p2p_name(peer))
        }
        _ if original.starts_with("p2p") => {
            Uid::parse_p2p(original).ok_or_else(|| Error::new(ErrorKind::InvalidTopic))?;
            Ok(original.to_owned())
        }
        _ if original.starts_with(GROUP_PREFIX) || is_new_topic(original) => {
            Ok(original.to_owned())
        }
        _ => Err(Error::new(ErrorKind::InvalidTopic)),
    }
}

/// Name under which `viewer` sees the topic `name`: `me` for their own
/// user topic, the peer's user id for a peer-to-peer topic, otherwise the
/// name itself.
pub fn original_name(name: &str, viewer: Uid) -> String {
    match topic_category(name) {
        Some(TopicCategory::Me) if Uid::parse_user_id(name) == Some(viewer) => ME.to_owned(),
        Some(TopicCategory::Fnd) if name == viewer.fnd_name() => FND.to_owned(),
        Some(TopicCategory::P2P) => match Uid::parse_p2p(name) {
            Some((a, b)) if a == viewer => b.user_id(),
            Some((a, b)) if b == viewer => a.user_id(),
            _ => name.to_owned(),
        },
        _ => name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn me_and_fnd_expand_to_user_topics() {
        let uid = Uid::new(3);
        assert_eq!(expand_topic_name("me", uid).unwrap(), uid.user_id());
        assert_eq!(expand_topic_name("fnd", uid).unwrap(), uid.fnd_name());
    }

    #[test]
    fn user_name_expands_to_p2p() {
        let alice = Uid::new(3);
        let bob = Uid::new(4);
        let from_alice = expand_topic_name(&bob.user_id(), alice).unwrap();
        let from_bob = expand_topic_name(&alice.user_id(), bob).unwrap();
        assert_eq!(from_alice, from_bob);
        assert_eq!(topic_category(&from_alice), Some(TopicCategory::P2P));
        assert_eq!(original_name(&from_alice, alice), bob.user_id());
    }

    #[test]
    fn p2p_with_self_is_rejected() {
        let uid = Uid::new(3);
        let err = expand_topic_name(&uid.user_id(), uid).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::SelfTopic);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(expand_topic_name("chat", Uid::new(1)).is_err());
        assert_eq!(topic_category("grp"), None);
        assert_eq!(topic_category("xyzAbc"), None);
    }

    #[test]
    fn group_names_pass_through() {
        assert_eq!(expand_topic_name("grpX1", Uid::new(1)).unwrap(), "grpX1");
        assert_eq!(expand_topic_name("new", Uid::new(1)).unwrap(), "new");
        assert!(is_new_topic("new"));
        assert_eq!(topic_category("sys"), Some(TopicCategory::Sys));
    }
}
