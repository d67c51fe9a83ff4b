//! Delivery filters and presence notifications.

use chrono::{DateTime, Utc};
use entity::{AccessMode, Uid};
use protocol::server::MsgServerPres;
use protocol::{ServerComMessage, ServerPayload, ServerRouting};

/// One attached session as seen by the fan-out loop.
pub(crate) struct Recipient<'a> {
    pub sid: &'a str,
    pub uid: Uid,
    /// Effective access mode of `uid` in the topic.
    pub mode: AccessMode,
}

/// Decides whether a fanned-out message reaches `recipient`.
///
/// `attached_to` answers whether the recipient session is attached to a
/// given topic; it backs the `skip_topic` filter.
pub(crate) fn should_deliver(
    routing: &ServerRouting,
    recipient: &Recipient<'_>,
    attached_to: impl Fn(&str) -> bool,
) -> bool {
    if routing.skip_sid.as_deref() == Some(recipient.sid) {
        return false;
    }

    let filters = &routing.filters;
    if let Some(only) = filters.single_user {
        if only != recipient.uid {
            return false;
        }
    }
    if filters.exclude_user == Some(recipient.uid) {
        return false;
    }
    if !filters.filter_in.is_none() && (recipient.mode & filters.filter_in).is_none() {
        return false;
    }
    if !filters.filter_out.is_none() && !(recipient.mode & filters.filter_out).is_none() {
        return false;
    }
    if let Some(topic) = filters.skip_topic.as_deref() {
        if attached_to(topic) {
            return false;
        }
    }
    true
}

/// Builds a `pres` message about `src` on `topic`. The wire topic name is
/// rewritten per recipient during fan-out.
pub(crate) fn pres(topic: &str, src: String, what: &str, ts: DateTime<Utc>) -> ServerComMessage {
    let mut msg = ServerComMessage::new(ServerPayload::Pres(MsgServerPres {
        topic: topic.to_owned(),
        src,
        what: what.to_owned(),
        ..Default::default()
    }));
    msg.routing.rcpt_to = topic.to_owned();
    msg.routing.timestamp = ts;
    msg
}

/// Presence about a user going online or offline: sent to subscribers with
/// the `P` bit, never to the user's own sessions.
pub(crate) fn online_status(topic: &str, user: Uid, online: bool) -> ServerComMessage {
    let what = if online { "on" } else { "off" };
    let mut msg = pres(topic, user.user_id(), what, Utc::now());
    msg.routing.filters.exclude_user = Some(user);
    msg.routing.filters.filter_in = AccessMode::PRES;
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::DeliveryFilters;

    fn routing(filters: DeliveryFilters) -> ServerRouting {
        ServerRouting {
            filters,
            ..Default::default()
        }
    }

    #[test]
    fn single_user_reaches_only_that_users_sessions() {
        let target = Uid::new(1);
        let routing = routing(DeliveryFilters {
            single_user: Some(target),
            ..Default::default()
        });

        let sids: Vec<String> = (0..12).map(|n| format!("s{n}")).collect();
        let mut delivered = Vec::new();
        for (n, sid) in sids.iter().enumerate() {
            // Sessions 0 and 1 belong to the target user, ten others do not.
            let uid = if n < 2 { target } else { Uid::new(100 + n as u64) };
            let recipient = Recipient {
                sid,
                uid,
                mode: AccessMode::C_FULL,
            };
            if should_deliver(&routing, &recipient, |_| false) {
                delivered.push(uid);
            }
        }
        assert_eq!(delivered, vec![target, target]);
    }

    #[test]
    fn exclude_user_skips_only_that_user() {
        let routing = routing(DeliveryFilters {
            exclude_user: Some(Uid::new(1)),
            ..Default::default()
        });
        let me = Recipient {
            sid: "a",
            uid: Uid::new(1),
            mode: AccessMode::C_FULL,
        };
        let other = Recipient {
            sid: "b",
            uid: Uid::new(2),
            mode: AccessMode::C_FULL,
        };
        assert!(!should_deliver(&routing, &me, |_| false));
        assert!(should_deliver(&routing, &other, |_| false));
    }

    #[test]
    fn noecho_skips_the_origin_session() {
        let routing = ServerRouting {
            skip_sid: Some("a".into()),
            ..Default::default()
        };
        let origin = Recipient {
            sid: "a",
            uid: Uid::new(1),
            mode: AccessMode::C_FULL,
        };
        let sibling = Recipient {
            sid: "b",
            uid: Uid::new(1),
            mode: AccessMode::C_FULL,
        };
        assert!(!should_deliver(&routing, &origin, |_| false));
        assert!(should_deliver(&routing, &sibling, |_| false));
    }

    #[test]
    fn access_filters_check_recipient_mode() {
        let routing = routing(DeliveryFilters {
            filter_in: AccessMode::PRES,
            filter_out: AccessMode::OWNER,
            ..Default::default()
        });
        let presencer = Recipient {
            sid: "a",
            uid: Uid::new(1),
            mode: AccessMode::C_PUBLIC,
        };
        let read_only = Recipient {
            sid: "b",
            uid: Uid::new(2),
            mode: AccessMode::C_READ_ONLY,
        };
        let owner = Recipient {
            sid: "c",
            uid: Uid::new(3),
            mode: AccessMode::C_FULL,
        };
        assert!(should_deliver(&routing, &presencer, |_| false));
        assert!(!should_deliver(&routing, &read_only, |_| false));
        assert!(!should_deliver(&routing, &owner, |_| false));
    }

    #[test]
    fn skip_topic_spares_sessions_already_attached() {
        let routing = routing(DeliveryFilters {
            skip_topic: Some("grpA".into()),
            ..Default::default()
        });
        let recipient = Recipient {
            sid: "a",
            uid: Uid::new(1),
            mode: AccessMode::C_FULL,
        };
        assert!(!should_deliver(&routing, &recipient, |topic| topic == "grpA"));
        assert!(should_deliver(&routing, &recipient, |topic| topic == "grpB"));
    }

    #[test]
    fn online_status_targets_presencers_except_subject() {
        let msg = online_status("grpA", Uid::new(7), true);
        assert_eq!(msg.routing.filters.exclude_user, Some(Uid::new(7)));
        assert_eq!(msg.routing.filters.filter_in, AccessMode::PRES);
        let ServerPayload::Pres(pres) = &msg.payload else {
            panic!("expected pres");
        };
        assert_eq!(pres.what, "on");
        assert_eq!(pres.src, Uid::new(7).user_id());
    }
}
