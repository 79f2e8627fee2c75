//! Inbound request passed through middleware to a route handler.

use std::any::{Any, TypeId};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::path::RoutePath;
use super::response::Headers;
use crate::codec::{JsonCodec, NULL_PAYLOAD};
use crate::peer::{Peer, PeerInfo};
use crate::services::ServiceScope;

/// One inbound method call.
///
/// Middleware receives `&mut Request` and may rewrite headers before the
/// handler sees them. The body stays raw JSON until a handler decodes it.
pub struct Request {
    caller: PeerInfo,
    peer: Option<Peer>,
    sequence: u32,
    path: RoutePath,
    remaining: RoutePath,
    headers: Headers,
    body: Option<String>,
    services: Option<Box<dyn ServiceScope>>,
}

impl Request {
    /// Build a request from `caller` for `path`.
    ///
    /// Requests built by hand carry no live [`Peer`] and no service scope.
    pub fn new(caller: PeerInfo, path: impl Into<RoutePath>) -> Self {
        let path = path.into();
        Self {
            caller,
            peer: None,
            sequence: 0,
            remaining: path.clone(),
            path,
            headers: Headers::new(),
            body: None,
            services: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the raw JSON body. Empty text and `null` mean no body.
    pub fn with_raw_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() || body == NULL_PAYLOAD {
            None
        } else {
            Some(body)
        };
        self
    }

    /// Set the body to `value` encoded as JSON.
    pub fn with_body<T: Serialize>(mut self, value: &T) -> Self {
        self.body = JsonCodec::encode(value).ok();
        self
    }

    pub(crate) fn with_peer(mut self, peer: Peer) -> Self {
        self.peer = Some(peer);
        self
    }

    pub(crate) fn with_services(mut self, scope: Box<dyn ServiceScope>) -> Self {
        self.services = Some(scope);
        self
    }

    /// Identity of the connected owner that made the call.
    #[inline]
    pub fn caller(&self) -> &PeerInfo {
        &self.caller
    }

    /// Handle for calling back into the caller.
    #[inline]
    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Full path as sent by the caller.
    #[inline]
    pub fn path(&self) -> &RoutePath {
        &self.path
    }

    /// Path relative to the router currently handling the request.
    #[inline]
    pub fn remaining(&self) -> &RoutePath {
        &self.remaining
    }

    pub(crate) fn set_remaining(&mut self, remaining: RoutePath) {
        self.remaining = remaining;
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Raw JSON body, if any.
    #[inline]
    pub fn raw_body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Decode the body as `T`.
    ///
    /// A missing body gives `None`; so does a malformed one, which is
    /// logged.
    pub fn body<T: DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_deref()
            .and_then(|text| JsonCodec::decode_lenient(text, "body"))
    }

    /// Resolve a service of type `T` from this request's scope.
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .as_ref()?
            .resolve(TypeId::of::<T>())?
            .downcast::<T>()
            .ok()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("caller", &self.caller)
            .field("sequence", &self.sequence)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}
