//! Control response taxonomy. Codes and texts are part of the wire contract.

/// Outcome carried by a `ctrl` envelope.
///
/// Several variants share a numeric code and differ only in text, e.g. the
/// 304 family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    // 2xx success
    Ok,
    Created,
    Accepted,
    NoContent,
    Evicted,
    Shutdown,
    Delivered,

    // 3xx informational
    ValidateCredentials,
    Challenge,
    AuthReset,
    Found,
    UseOther,
    AlreadySubscribed,
    NotJoined,
    NoAction,
    NotModified,

    // 4xx client errors
    Malformed,
    AuthRequired,
    AuthFailed,
    UnknownScheme,
    PermissionDenied,
    ApiKeyRequired,
    SessionNotFound,
    TopicNotFound,
    UserNotFound,
    NotFound,
    OperationNotAllowed,
    InvalidResponse,
    AlreadyAuthenticated,
    DuplicateCredential,
    AttachFirst,
    AlreadyExists,
    CommandOutOfSequence,
    Gone,
    TooLarge,
    PolicyViolation,

    // 5xx server and cluster errors
    Unknown,
    NotImplemented,
    ClusterUnreachable,
    ServiceUnavailable,
    Locked,
    VersionNotSupported,
}

impl Status {
    pub const ALL: [Status; 42] = [
        Status::Ok,
        Status::Created,
        Status::Accepted,
        Status::NoContent,
        Status::Evicted,
        Status::Shutdown,
        Status::Delivered,
        Status::ValidateCredentials,
        Status::Challenge,
        Status::AuthReset,
        Status::Found,
        Status::UseOther,
        Status::AlreadySubscribed,
        Status::NotJoined,
        Status::NoAction,
        Status::NotModified,
        Status::Malformed,
        Status::AuthRequired,
        Status::AuthFailed,
        Status::UnknownScheme,
        Status::PermissionDenied,
        Status::ApiKeyRequired,
        Status::SessionNotFound,
        Status::TopicNotFound,
        Status::UserNotFound,
        Status::NotFound,
        Status::OperationNotAllowed,
        Status::InvalidResponse,
        Status::AlreadyAuthenticated,
        Status::DuplicateCredential,
        Status::AttachFirst,
        Status::AlreadyExists,
        Status::CommandOutOfSequence,
        Status::Gone,
        Status::TooLarge,
        Status::PolicyViolation,
        Status::Unknown,
        Status::NotImplemented,
        Status::ClusterUnreachable,
        Status::ServiceUnavailable,
        Status::Locked,
        Status::VersionNotSupported,
    ];

    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Accepted => 202,
            Status::NoContent => 204,
            Status::Evicted | Status::Shutdown => 205,
            Status::Delivered => 208,

            Status::ValidateCredentials | Status::Challenge => 300,
            Status::AuthReset => 301,
            Status::Found => 302,
            Status::UseOther => 303,
            Status::AlreadySubscribed
            | Status::NotJoined
            | Status::NoAction
            | Status::NotModified => 304,

            Status::Malformed => 400,
            Status::AuthRequired | Status::AuthFailed | Status::UnknownScheme => 401,
            Status::PermissionDenied | Status::ApiKeyRequired => 403,
            Status::SessionNotFound
            | Status::TopicNotFound
            | Status::UserNotFound
            | Status::NotFound => 404,
            Status::OperationNotAllowed => 405,
            Status::InvalidResponse => 406,
            Status::AlreadyAuthenticated
            | Status::DuplicateCredential
            | Status::AttachFirst
            | Status::AlreadyExists
            | Status::CommandOutOfSequence => 409,
            Status::Gone => 410,
            Status::TooLarge => 413,
            Status::PolicyViolation => 422,

            Status::Unknown => 500,
            Status::NotImplemented => 501,
            Status::ClusterUnreachable => 502,
            Status::ServiceUnavailable | Status::Locked => 503,
            Status::VersionNotSupported => 505,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Created => "created",
            Status::Accepted => "accepted",
            Status::NoContent => "no content",
            Status::Evicted => "evicted",
            Status::Shutdown => "server shutdown",
            Status::Delivered => "delivered",

            Status::ValidateCredentials => "validate credentials",
            Status::Challenge => "challenge",
            Status::AuthReset => "auth reset",
            Status::Found => "found",
            Status::UseOther => "use other",
            Status::AlreadySubscribed => "already subscribed",
            Status::NotJoined => "not joined",
            Status::NoAction => "no action",
            Status::NotModified => "not modified",

            Status::Malformed => "malformed",
            Status::AuthRequired => "authentication required",
            Status::AuthFailed => "authentication failed",
            Status::UnknownScheme => "unknown authentication scheme",
            Status::PermissionDenied => "permission denied",
            Status::ApiKeyRequired => "valid API key required",
            Status::SessionNotFound => "invalid or expired session",
            Status::TopicNotFound => "topic not found",
            Status::UserNotFound => "user not found",
            Status::NotFound => "not found",
            Status::OperationNotAllowed => "operation or method not allowed",
            Status::InvalidResponse => "invalid response",
            Status::AlreadyAuthenticated => "already authenticated",
            Status::DuplicateCredential => "duplicate credential",
            Status::AttachFirst => "must attach first",
            Status::AlreadyExists => "already exists",
            Status::CommandOutOfSequence => "command out of sequence",
            Status::Gone => "gone",
            Status::TooLarge => "too large",
            Status::PolicyViolation => "policy violation",

            Status::Unknown => "internal error",
            Status::NotImplemented => "not implemented",
            Status::ClusterUnreachable => "cluster unreachable",
            Status::ServiceUnavailable => "service unavailable",
            Status::Locked => "locked",
            Status::VersionNotSupported => "version not supported",
        }
    }

    pub fn is_error(&self) -> bool {
        self.code() >= 400
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{} {}", self.code(), self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_fall_into_documented_classes() {
        let allowed: HashSet<u16> = [
            200, 201, 202, 204, 205, 208, 300, 301, 302, 303, 304, 400, 401, 403, 404, 405, 406,
            409, 410, 413, 422, 500, 501, 502, 503, 505,
        ]
        .into_iter()
        .collect();
        for status in Status::ALL {
            assert!(allowed.contains(&status.code()), "{status:?}");
        }
    }

    #[test]
    fn texts_are_unique() {
        let texts: HashSet<&str> = Status::ALL.iter().map(|s| s.text()).collect();
        assert_eq!(texts.len(), Status::ALL.len());
    }

    #[test]
    fn well_known_conditions_map_to_http_codes() {
        assert_eq!(Status::PermissionDenied.code(), 403);
        assert_eq!(Status::TopicNotFound.code(), 404);
        assert_eq!(Status::VersionNotSupported.code(), 505);
        assert_eq!(Status::CommandOutOfSequence.code(), 409);
        assert_eq!(Status::AlreadyAuthenticated.code(), 409);
        assert_eq!(Status::TooLarge.code(), 413);
    }

    #[test]
    fn only_4xx_and_5xx_are_errors() {
        assert!(!Status::NotJoined.is_error());
        assert!(Status::Malformed.is_error());
        assert!(Status::Locked.is_error());
    }
}
