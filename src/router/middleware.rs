//! Middleware chain.
//!
//! Each router runs its middleware as an onion around route resolution:
//!
//! ```text
//! middleware[0] ─► middleware[1] ─► ... ─► route / sub-router
//! ```
//!
//! A middleware receives the request and a [`Next`] continuation. It may
//! rewrite headers, answer without calling `next`, or post-process the
//! response `next` returns.

use std::sync::Arc;

use super::error::HandlerError;
use super::request::Request;
use super::response::Response;

/// A registered middleware function.
pub type Middleware =
    Arc<dyn Fn(&mut Request, Next<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static>;

/// Box a middleware closure.
pub fn from_fn<F>(middleware: F) -> Middleware
where
    F: Fn(&mut Request, Next<'_>) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    Arc::new(middleware)
}

type Endpoint<'a> = dyn Fn(&mut Request) -> Result<Response, HandlerError> + 'a;

/// The rest of the chain after the current middleware.
pub struct Next<'a> {
    chain: &'a [Middleware],
    endpoint: &'a Endpoint<'a>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Middleware], endpoint: &'a Endpoint<'a>) -> Self {
        Self { chain, endpoint }
    }

    /// Invoke the next middleware, or the route once the chain is exhausted.
    pub fn run(self, request: &mut Request) -> Result<Response, HandlerError> {
        match self.chain.split_first() {
            Some((first, rest)) => first(request, Next::new(rest, self.endpoint)),
            None => (self.endpoint)(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{OwnerId, PeerInfo};
    use crate::router::Status;
    use std::sync::Mutex;

    fn request() -> Request {
        Request::new(PeerInfo::client(OwnerId::new(1), 1), "/x")
    }

    #[test]
    fn test_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Middleware> = (0..3)
            .map(|i| {
                let log = log.clone();
                from_fn(move |req, next| {
                    log.lock().unwrap().push(format!("before {}", i));
                    let response = next.run(req);
                    log.lock().unwrap().push(format!("after {}", i));
                    response
                })
            })
            .collect();

        let endpoint_log = log.clone();
        let endpoint = move |_: &mut Request| -> Result<Response, HandlerError> {
            endpoint_log.lock().unwrap().push("endpoint".to_string());
            Ok(Response::ok())
        };

        let mut req = request();
        Next::new(&chain, &endpoint).run(&mut req).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "before 0", "before 1", "before 2", "endpoint", "after 2", "after 1", "after 0"
            ]
        );
    }

    #[test]
    fn test_short_circuit() {
        let chain = vec![from_fn(|_, _| Ok(Response::new(Status::Unauthorized)))];
        let endpoint = |_: &mut Request| -> Result<Response, HandlerError> {
            panic!("endpoint must not run")
        };

        let mut req = request();
        let response = Next::new(&chain, &endpoint).run(&mut req).unwrap();
        assert_eq!(response.status, Status::Unauthorized);
    }

    #[test]
    fn test_header_rewrite_visible_downstream() {
        let chain = vec![from_fn(|req, next| {
            req.headers_mut().insert("user".into(), "alice".into());
            next.run(req)
        })];
        let endpoint = |req: &mut Request| -> Result<Response, HandlerError> {
            Ok(Response::json(&req.header("user").map(str::to_string)))
        };

        let mut req = request();
        let response = Next::new(&chain, &endpoint).run(&mut req).unwrap();
        assert_eq!(response.body.as_deref(), Some("\"alice\""));
    }
}
