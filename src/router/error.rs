//! Errors raised by route handlers and middleware.
//!
//! [`HandlerError`] wraps any `std::error::Error` and remembers its concrete
//! type name, so `?` works on any error inside a handler:
//!
//! ```
//! use peerwire::router::HandlerError;
//!
//! fn parse(input: &str) -> Result<u32, HandlerError> {
//!     Ok(input.parse::<u32>()?)
//! }
//!
//! let err = parse("x").unwrap_err();
//! assert!(err.find::<std::num::ParseIntError>().is_some());
//! assert_eq!(err.type_name(), "core::num::error::ParseIntError");
//! ```

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// An application error raised while handling a request.
///
/// Exception handlers match on the wrapped error or on anything in its
/// `source()` chain, which is how a handler for a general error also catches
/// more specific errors that wrap it.
///
/// This type does not implement `std::error::Error` itself; that is what
/// allows the blanket `From` conversion.
pub struct HandlerError {
    inner: Box<dyn StdError + Send + Sync + 'static>,
    type_name: &'static str,
    backtrace: Backtrace,
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// Error carried by a [`HandlerError`] built from a caught panic.
#[derive(Debug)]
pub struct Panicked(pub String);

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}", self.0)
    }
}

impl StdError for Panicked {}

impl HandlerError {
    /// Wrap an error value.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
            type_name: std::any::type_name::<E>(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Build an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            type_name: "HandlerError",
            ..Self::new(Message(message.into()))
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self {
            type_name: "panic",
            ..Self::new(Panicked(message))
        }
    }

    /// Type name of the wrapped error.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Display text of the wrapped error.
    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    /// Backtrace captured when the error was wrapped.
    ///
    /// Empty unless `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` enables capture.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Find an error of type `E` in the wrapped error or its source chain.
    pub fn find<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self.inner.as_ref());
        while let Some(error) = current {
            if let Some(found) = error.downcast_ref::<E>() {
                return Some(found);
            }
            current = error.source();
        }
        None
    }

    /// Check if an error of type `E` is in the chain.
    pub fn is<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.find::<E>().is_some()
    }

    /// Unwrap into the inner boxed error.
    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync + 'static> {
        self.inner
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("type_name", &self.type_name)
            .field("inner", &self.inner)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("base failure")]
    struct Base;

    #[derive(Debug, thiserror::Error)]
    #[error("derived failure")]
    struct Derived(#[source] Base);

    #[test]
    fn test_find_walks_source_chain() {
        let err = HandlerError::from(Derived(Base));
        assert!(err.find::<Derived>().is_some());
        assert!(err.find::<Base>().is_some());
        assert!(!err.is::<std::io::Error>());
    }

    #[test]
    fn test_type_name_is_concrete_type() {
        let err = HandlerError::new(Base);
        assert!(err.type_name().ends_with("Base"));
        assert_eq!(err.message(), "base failure");
    }

    #[test]
    fn test_msg() {
        let err = HandlerError::msg("nope");
        assert_eq!(err.type_name(), "HandlerError");
        assert_eq!(err.message(), "nope");
        assert_eq!(err.to_string(), "HandlerError: nope");
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = HandlerError::from_panic(Box::new("static str"));
        assert_eq!(err.type_name(), "panic");
        assert!(err.message().contains("static str"));

        let err = HandlerError::from_panic(Box::new(String::from("owned")));
        assert!(err.is::<Panicked>());
        assert!(err.message().contains("owned"));
    }

    #[test]
    fn test_question_mark_conversion() {
        fn fails() -> Result<(), HandlerError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk"))?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(err.is::<std::io::Error>());
    }
}
