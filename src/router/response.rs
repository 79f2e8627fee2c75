//! Response status and payloads.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::codec::JsonCodec;

/// Header map carried by requests and responses.
pub type Headers = HashMap<String, String>;

/// Response status.
///
/// Numeric codes are HTTP-inspired. `Timeout` is synthesized by the caller
/// and never crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    BadRequest,
    Unauthorized,
    NotFound,
    /// The target owner was not connected when the call was made.
    NotReachable,
    InternalServerError,
    Timeout,
    /// Any code this crate does not name.
    Other(i32),
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::NotFound => 404,
            Status::NotReachable => 405,
            Status::InternalServerError => 500,
            Status::Timeout => 501,
            Status::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            200 => Status::Ok,
            400 => Status::BadRequest,
            401 => Status::Unauthorized,
            404 => Status::NotFound,
            405 => Status::NotReachable,
            500 => Status::InternalServerError,
            501 => Status::Timeout,
            other => Status::Other(other),
        }
    }

    /// Codes below 400 count as success.
    #[inline]
    pub fn is_ok(self) -> bool {
        self.code() < 400
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Other(code) => write!(f, "{}", code),
            other => write!(f, "{} {:?}", other.code(), other),
        }
    }
}

/// Untyped response: status, headers and the raw JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub headers: Headers,
    pub body: Option<String>,
}

impl Response {
    /// Empty response with the given status.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(Status::Ok)
    }

    /// OK response with a JSON-encoded body.
    pub fn json<T: Serialize>(body: &T) -> Self {
        Self::ok().with_body(body)
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Replace the body with `body` encoded as JSON.
    ///
    /// A value that fails to encode is logged and leaves no body.
    pub fn with_body<T: Serialize>(mut self, body: &T) -> Self {
        self.body = match JsonCodec::encode(body) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!("Failed to encode response body: {}", e);
                None
            }
        };
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}

/// Typed response: what a typed handler returns and what a typed call
/// resolves with.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub status: Status,
    pub headers: Headers,
    pub body: Option<T>,
}

impl<T> Reply<T> {
    /// OK reply carrying `body`.
    pub fn ok(body: T) -> Self {
        Self {
            status: Status::Ok,
            headers: Headers::new(),
            body: Some(body),
        }
    }

    /// Bodiless reply with the given status.
    pub fn status(status: Status) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl<T: Serialize> Reply<T> {
    pub(crate) fn into_response(self) -> Response {
        let mut response = Response::new(self.status);
        response.headers = self.headers;
        if let Some(body) = &self.body {
            response = response.with_body(body);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in [
            Status::Ok,
            Status::BadRequest,
            Status::Unauthorized,
            Status::NotFound,
            Status::NotReachable,
            Status::InternalServerError,
            Status::Timeout,
        ] {
            assert_eq!(Status::from_code(status.code()), status);
        }
        assert_eq!(Status::from_code(418), Status::Other(418));
        assert_eq!(Status::NotReachable.code(), 405);
        assert_eq!(Status::Timeout.code(), 501);
    }

    #[test]
    fn test_is_ok() {
        assert!(Status::Ok.is_ok());
        assert!(Status::Other(204).is_ok());
        assert!(!Status::NotFound.is_ok());
        assert!(!Status::Timeout.is_ok());
    }

    #[test]
    fn test_response_builders() {
        let response = Response::json(&vec![1, 2])
            .with_header("x", "y")
            .with_status(Status::BadRequest);
        assert_eq!(response.body.as_deref(), Some("[1,2]"));
        assert_eq!(response.header("x"), Some("y"));
        assert_eq!(response.status, Status::BadRequest);
    }

    #[test]
    fn test_reply_into_response() {
        let response = Reply::ok("hi").with_header("a", "b").into_response();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body.as_deref(), Some("\"hi\""));
        assert_eq!(response.header("a"), Some("b"));

        let response = Reply::<String>::status(Status::NotFound).into_response();
        assert_eq!(response.body, None);
    }
}
