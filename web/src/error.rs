use std::error::Error as StdError;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use realtime::Error as RealtimeError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(RealtimeError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

// The body is always a ctrl envelope carrying the same code as the HTTP status.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let http_status =
            StatusCode::from_u16(status.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self.0.to_ctrl("", "", Utc::now()).encode() {
            Ok(body) => (
                http_status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(_) => (http_status, status.text()).into_response(),
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<RealtimeError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
