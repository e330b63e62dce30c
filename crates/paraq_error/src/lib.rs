use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Broad classification of an error.
///
/// Most errors are `Execution` errors. The other kinds exist so that callers
/// can tell apart the failures they may want to react to (cancellation, shape
/// errors from First/Single) from everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic failure during execution.
    Execution,
    /// The query was canceled, either by the caller or because a peer
    /// partition failed.
    Canceled,
    /// A user-provided delegate panicked.
    UserCode,
    /// The sequence contained no elements when at least one was required.
    NoElements,
    /// The sequence contained more than one element when exactly one was
    /// required.
    MoreThanOneElement,
    /// An argument or setting was outside its valid range.
    InvalidArgument,
    /// An engine invariant was violated.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Execution => "execution",
            Self::Canceled => "canceled",
            Self::UserCode => "user code",
            Self::NoElements => "no elements",
            Self::MoreThanOneElement => "more than one element",
            Self::InvalidArgument => "invalid argument",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

struct ErrorField {
    key: Cow<'static, str>,
    value: Box<dyn fmt::Display + Sync + Send>,
}

struct DbErrorInner {
    kind: ErrorKind,
    /// Message for the error.
    msg: String,
    /// Source of the error.
    source: Option<Box<dyn Error + Send + Sync>>,
    /// Additional fields to display with the error.
    fields: Vec<ErrorField>,
    /// Captured backtrace. Only populated when enabled through the usual
    /// `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE` variables.
    backtrace: Backtrace,
}

impl fmt::Debug for DbErrorInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbErrorInner")
            .field("kind", &self.kind)
            .field("msg", &self.msg)
            .field("source", &self.source)
            .field("num_fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

impl DbError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Execution, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                kind,
                msg: msg.into(),
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    /// Create an error indicating the query was canceled.
    pub fn canceled() -> Self {
        Self::with_kind(ErrorKind::Canceled, "Query canceled")
    }

    /// Create an error for a violated engine invariant.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InvalidArgument, msg)
    }

    /// Attach a field to the error for additional context.
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: fmt::Display + Sync + Send + 'static,
    {
        self.inner.fields.push(ErrorField {
            key: key.into(),
            value: Box::new(value),
        });
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.kind == ErrorKind::Canceled
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    pub fn get_backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        for field in &self.inner.fields {
            write!(f, "\n  {}: {}", field.key, field.value)?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if let Some(backtrace) = self.get_backtrace() {
            write!(f, "\nBacktrace: {backtrace}")?;
        }

        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Add context to foreign errors, turning them into a [`DbError`].
pub trait ResultExt<T, E> {
    /// Wrap the error with a static message.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap the error with a message produced only on failure.
    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| DbError::with_source(msg, Box::new(e)))
    }

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DbError::with_source(f(), Box::new(e)))
    }
}

pub trait OptionExt<T> {
    /// Return an internal error if the option is None.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(DbError::internal(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_fields_and_source() {
        let source = std::io::Error::other("disk on fire");
        let err = DbError::with_source("failed to read", Box::new(source))
            .with_field("partition", 3)
            .with_field("state", "Shuffled");

        let s = err.to_string();
        assert!(s.starts_with("failed to read"));
        assert!(s.contains("partition: 3"));
        assert!(s.contains("state: Shuffled"));
        assert!(s.contains("disk on fire"));
        assert_eq!(ErrorKind::Execution, err.kind());
    }

    #[test]
    fn canceled_kind() {
        let err = DbError::canceled();
        assert!(err.is_canceled());
        assert!(!DbError::new("nope").is_canceled());
    }

    #[test]
    fn option_required() {
        let missing: Option<u8> = None;
        let err = missing.required("expected a value").unwrap_err();
        assert_eq!(ErrorKind::Internal, err.kind());
        assert_eq!(Some(4), Some(4).required("expected a value").ok());
    }

    #[test]
    fn result_context_keeps_source() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("formatting failed").unwrap_err();
        assert_eq!("formatting failed", err.get_msg());
        assert!(err.source().is_some());
    }
}
