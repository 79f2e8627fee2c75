//! Exception handlers.
//!
//! A router tries its handlers in registration order. The first one that
//! matches the error decides the outcome: a response, or a new error that
//! is resolved again starting from the same router.

use std::error::Error as StdError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::error::HandlerError;
use super::request::Request;
use super::response::Response;

/// A registered exception handler. `None` means the error did not match.
pub type ExceptionHandler = Arc<
    dyn Fn(&Request, &HandlerError) -> Option<Result<Response, HandlerError>>
        + Send
        + Sync
        + 'static,
>;

/// Re-entries allowed on one router before the error moves to the parent.
pub(crate) const MAX_REENTRIES: usize = 16;

/// Handler for errors of type `E`, or errors whose source chain holds an `E`.
pub fn catch<E, F>(handler: F) -> ExceptionHandler
where
    E: StdError + 'static,
    F: Fn(&Request, &E) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    exception_handler(move |request, error| error.find::<E>().map(|e| handler(request, e)))
}

/// Handler matching every error.
pub fn catch_all<F>(handler: F) -> ExceptionHandler
where
    F: Fn(&Request, &HandlerError) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    exception_handler(move |request, error| Some(handler(request, error)))
}

fn exception_handler<F>(handler: F) -> ExceptionHandler
where
    F: Fn(&Request, &HandlerError) -> Option<Result<Response, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(handler)
}

/// Run `handlers` against `error` until one produces a response.
///
/// Returns the error still unresolved when nothing matches or the re-entry
/// bound is reached.
pub(crate) fn resolve(
    handlers: &[ExceptionHandler],
    request: &Request,
    mut error: HandlerError,
) -> Result<Response, HandlerError> {
    for _ in 0..=MAX_REENTRIES {
        let outcome = handlers.iter().find_map(|handler| {
            catch_unwind(AssertUnwindSafe(|| handler(request, &error)))
                .unwrap_or_else(|payload| Some(Err(HandlerError::from_panic(payload))))
        });
        match outcome {
            None => return Err(error),
            Some(Ok(response)) => return Ok(response),
            Some(Err(next)) => {
                tracing::debug!(
                    "Exception handler raised {} while handling {}",
                    next.type_name(),
                    error.type_name()
                );
                error = next;
            }
        }
    }
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{OwnerId, PeerInfo};
    use crate::router::Status;

    #[derive(Debug, thiserror::Error)]
    #[error("invalid argument")]
    struct InvalidArgument;

    #[derive(Debug, thiserror::Error)]
    #[error("missing field")]
    struct MissingField(#[source] InvalidArgument);

    #[derive(Debug, thiserror::Error)]
    #[error("other")]
    struct Other;

    fn request() -> Request {
        Request::new(PeerInfo::client(OwnerId::new(1), 1), "/x")
    }

    #[test]
    fn test_first_matching_handler_wins() {
        let handlers = vec![
            catch::<Other, _>(|_, _| Ok(Response::new(Status::Other(1)))),
            catch::<InvalidArgument, _>(|_, _| Ok(Response::new(Status::BadRequest))),
            catch_all(|_, _| Ok(Response::new(Status::Other(2)))),
        ];
        let response = resolve(&handlers, &request(), InvalidArgument.into()).unwrap();
        assert_eq!(response.status, Status::BadRequest);
    }

    #[test]
    fn test_source_chain_match() {
        let handlers = vec![catch::<InvalidArgument, _>(|_, _| {
            Ok(Response::new(Status::BadRequest))
        })];
        let response = resolve(&handlers, &request(), MissingField(InvalidArgument).into()).unwrap();
        assert_eq!(response.status, Status::BadRequest);
    }

    #[test]
    fn test_unmatched_error_returned() {
        let handlers = vec![catch::<Other, _>(|_, _| Ok(Response::ok()))];
        let err = resolve(&handlers, &request(), InvalidArgument.into()).unwrap_err();
        assert!(err.is::<InvalidArgument>());
    }

    #[test]
    fn test_failing_handler_reenters_same_list() {
        let handlers = vec![
            catch::<InvalidArgument, _>(|_, _| Err(Other.into())),
            catch::<Other, _>(|_, _| Ok(Response::new(Status::Unauthorized))),
        ];
        let response = resolve(&handlers, &request(), InvalidArgument.into()).unwrap();
        assert_eq!(response.status, Status::Unauthorized);
    }

    #[test]
    fn test_reentry_is_bounded() {
        let handlers = vec![catch_all(|_, _| Err(HandlerError::msg("again")))];
        let err = resolve(&handlers, &request(), Other.into()).unwrap_err();
        assert_eq!(err.message(), "again");
    }

    #[test]
    fn test_panicking_handler_becomes_error() {
        let handlers = vec![catch::<Other, _>(|_, _| panic!("handler blew up"))];
        let err = resolve(&handlers, &request(), Other.into()).unwrap_err();
        assert_eq!(err.type_name(), "panic");
    }
}
