use serde::Deserialize;

/// Query string of the long-poll endpoint.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct LongPollParams {
    /// Session id handed out by the first long-poll request.
    pub sid: Option<String>,
}
