//! Route handlers and adapters.
//!
//! Every route runs one handler shape, [`RouteHandler`]. The adapters here
//! build that shape from typed closures:
//!
//! ```
//! use peerwire::router::{handler, Reply, Router};
//!
//! let mut router = Router::new();
//! router
//!     .route("/add", handler::body(|nums: Option<Vec<i64>>| {
//!         Ok(nums.unwrap_or_default().iter().sum::<i64>())
//!     }))
//!     .unwrap()
//!     .route("/whoami", handler::json(|req, _: Option<()>| {
//!         Ok(Reply::ok(req.caller().id().value()))
//!     }))
//!     .unwrap();
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::HandlerError;
use super::request::Request;
use super::response::{Reply, Response, Status};

/// The single executable handler shape.
pub type RouteHandler =
    Arc<dyn Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static>;

/// Typed handler: the body is decoded into `Option<B>` and the reply body
/// encoded from `R`.
///
/// A malformed body is logged and passed as `None`.
pub fn json<B, R, F>(
    handler: F,
) -> impl Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static
where
    B: DeserializeOwned + 'static,
    R: Serialize + 'static,
    F: Fn(&Request, Option<B>) -> Result<Reply<R>, HandlerError> + Send + Sync + 'static,
{
    move |request: &Request| {
        let body = request.body::<B>();
        handler(request, body).map(Reply::into_response)
    }
}

/// Body-only handler replying OK with the returned value.
pub fn body<B, R, F>(
    handler: F,
) -> impl Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static
where
    B: DeserializeOwned + 'static,
    R: Serialize + 'static,
    F: Fn(Option<B>) -> Result<R, HandlerError> + Send + Sync + 'static,
{
    move |request: &Request| handler(request.body::<B>()).map(|value| Response::json(&value))
}

/// Restrict a handler to callers that connected to us as clients.
///
/// Other callers get `Unauthorized`.
pub fn clients_only<H>(
    handler: H,
) -> impl Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static
where
    H: Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    move |request: &Request| {
        if request.caller().is_client() {
            handler(request)
        } else {
            Ok(Response::new(Status::Unauthorized))
        }
    }
}

/// Restrict a handler to callers we dialed as servers.
pub fn servers_only<H>(
    handler: H,
) -> impl Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static
where
    H: Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    move |request: &Request| {
        if request.caller().is_server() {
            handler(request)
        } else {
            Ok(Response::new(Status::Unauthorized))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{OwnerId, PeerInfo};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    fn from_client() -> Request {
        Request::new(PeerInfo::client(OwnerId::new(1), 3), "/x")
    }

    fn from_server() -> Request {
        Request::new(PeerInfo::server(OwnerId::new(2), "Server", 9), "/x")
    }

    #[test]
    fn test_json_adapter() {
        let h = json(|req: &Request, body: Option<Greeting>| {
            let name = body.map(|g| g.name).unwrap_or_default();
            Ok(Reply::ok(format!("hi {}", name)).with_header("seq", req.sequence().to_string()))
        });

        let req = from_client().with_sequence(4).with_raw_body(r#"{"name":"bob"}"#);
        let response = h(&req).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body.as_deref(), Some("\"hi bob\""));
        assert_eq!(response.header("seq"), Some("4"));
    }

    #[test]
    fn test_json_adapter_malformed_body_is_none() {
        let h = json(|_: &Request, body: Option<Greeting>| Ok(Reply::ok(body.is_none())));
        let response = h(&from_client().with_raw_body("[1,2")).unwrap();
        assert_eq!(response.body.as_deref(), Some("true"));
    }

    #[test]
    fn test_body_adapter() {
        let h = body(|n: Option<u32>| Ok(n.unwrap_or(0) * 2));
        let response = h(&from_client().with_raw_body("21")).unwrap();
        assert_eq!(response.body.as_deref(), Some("42"));
    }

    #[test]
    fn test_role_restrictions() {
        let h = clients_only(|_: &Request| Ok(Response::ok()));
        assert_eq!(h(&from_client()).unwrap().status, Status::Ok);
        assert_eq!(h(&from_server()).unwrap().status, Status::Unauthorized);

        let h = servers_only(|_: &Request| Ok(Response::ok()));
        assert_eq!(h(&from_server()).unwrap().status, Status::Ok);
        assert_eq!(h(&from_client()).unwrap().status, Status::Unauthorized);
    }
}
