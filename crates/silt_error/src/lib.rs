//! Error types and utilities shared across all silt crates.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Result type with the error defaulting to [`SiltError`].
pub type Result<T, E = SiltError> = std::result::Result<T, E>;

/// The error type used throughout the workspace.
///
/// Errors are cheap to clone. Cloning shares the underlying source error,
/// which lets an error be latched in shared state and returned to every
/// subsequent caller.
#[derive(Clone)]
pub struct SiltError {
    inner: Box<ErrorInner>,
}

#[derive(Clone)]
struct ErrorInner {
    msg: String,
    source: Option<Arc<dyn Error + Send + Sync>>,
    /// Extra key/value context included in the display output.
    fields: Vec<(&'static str, String)>,
}

impl SiltError {
    pub fn new(msg: impl Into<String>) -> Self {
        SiltError {
            inner: Box::new(ErrorInner {
                msg: msg.into(),
                source: None,
                fields: Vec::new(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        SiltError {
            inner: Box::new(ErrorInner {
                msg: msg.into(),
                source: Some(Arc::from(source)),
                fields: Vec::new(),
            }),
        }
    }

    /// Attach a key/value pair to the error for additional context.
    pub fn with_field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key, value.to_string()));
        self
    }

    pub fn message(&self) -> &str {
        &self.inner.msg
    }
}

impl fmt::Display for SiltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        if !self.inner.fields.is_empty() {
            write!(f, " (")?;
            for (idx, (key, value)) in self.inner.fields.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}: {value}")?;
            }
            write!(f, ")")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SiltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiltError")
            .field("msg", &self.inner.msg)
            .field("fields", &self.inner.fields)
            .field("source", &self.inner.source)
            .finish()
    }
}

impl Error for SiltError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn Error + 'static))
    }
}

impl From<std::io::Error> for SiltError {
    fn from(value: std::io::Error) -> Self {
        SiltError::with_source("IO error", Box::new(value))
    }
}

impl From<std::str::Utf8Error> for SiltError {
    fn from(value: std::str::Utf8Error) -> Self {
        SiltError::with_source("Invalid UTF-8", Box::new(value))
    }
}

/// Extension trait for adding context to results holding external errors.
pub trait ResultExt<T, E> {
    /// Wrap the error with a static context message.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap the error with a lazily computed context message.
    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SiltError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SiltError::with_source(f(), Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_fields() {
        let err = SiltError::new("something failed")
            .with_field("expected", 4)
            .with_field("got", 8);
        assert_eq!("something failed (expected: 4, got: 8)", err.to_string());
    }

    #[test]
    fn display_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = SiltError::with_source("write failed", Box::new(io));
        assert_eq!("write failed: disk gone", err.to_string());
    }

    #[test]
    fn clone_shares_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = SiltError::with_source("write failed", Box::new(io));
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(cloned.source().is_some());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = SiltError::from(io);
        assert_eq!("IO error: disk gone", err.to_string());
    }
}
