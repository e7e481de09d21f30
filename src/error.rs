//! Contains the `Error` and `Result` types that `mongodb_dispatch` uses.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{bson::RawDocumentBuf, cmap::RawCommandResponse};

const NS_NOT_FOUND_CODE: i32 = 26;
pub(crate) const CURSOR_NOT_FOUND_CODE: i32 = 43;

/// Label attached by 4.4+ servers to command errors after which a change stream may resume.
pub const RESUMABLE_CHANGE_STREAM_ERROR: &str = "ResumableChangeStreamError";
/// Added to network and server selection errors raised inside a transaction.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// The result type for all methods that can return an error in the `mongodb_dispatch` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongodb_dispatch` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is wrapped in a `Box` to keep `Result`s small.
#[derive(Clone, Debug, Error)]
#[cfg_attr(
    feature = "error-backtrace",
    error("Kind: {kind}, labels: {labels:?}, source: {source:?}, backtrace: {backtrace}")
)]
#[cfg_attr(
    not(feature = "error-backtrace"),
    error("Kind: {kind}, labels: {labels:?}, source: {source:?}")
)]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    labels: HashSet<String>,

    #[source]
    pub(crate) source: Option<Box<Error>>,

    pub(crate) server_response: Option<Box<RawDocumentBuf>>,

    #[cfg(feature = "error-backtrace")]
    pub(crate) backtrace: Arc<std::backtrace::Backtrace>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        Self {
            kind: Box::new(kind),
            labels,
            source: None,
            server_response: None,
            #[cfg(feature = "error-backtrace")]
            backtrace: Arc::new(std::backtrace::Backtrace::capture()),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn server_selection(message: impl Into<String>) -> Error {
        ErrorKind::ServerSelection {
            message: message.into(),
        }
        .into()
    }

    /// An I/O timeout.
    pub(crate) fn network_timeout() -> Error {
        ErrorKind::Io(Arc::new(std::io::ErrorKind::TimedOut.into())).into()
    }

    /// The error reported by a cursor whose previous getMore was cancelled before its reply was
    /// read. The server-side position of such a cursor is unknown.
    pub(crate) fn interrupted_get_more() -> Error {
        ErrorKind::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "a previous getMore was cancelled before its reply was received",
        )))
        .into()
    }

    /// Classifies this error for callers deciding whether to retry, fix the request, or back off.
    pub fn category(&self) -> ErrorCategory {
        match self.kind.as_ref() {
            ErrorKind::ServerSelection { .. } => ErrorCategory::Selection,
            ErrorKind::ConnectionCheckout { .. } | ErrorKind::SessionsNotSupported => {
                ErrorCategory::Resource
            }
            ErrorKind::InvalidArgument { .. }
            | ErrorKind::InvalidReadPreference { .. }
            | ErrorKind::Transaction { .. }
            | ErrorKind::BsonSerialization(_) => ErrorCategory::Configuration,
            ErrorKind::MissingResumeToken
            | ErrorKind::InvalidResponse { .. }
            | ErrorKind::BsonDeserialization(_)
            | ErrorKind::Internal { .. } => ErrorCategory::Protocol,
            ErrorKind::Command(ref err) if err.code == CURSOR_NOT_FOUND_CODE => {
                ErrorCategory::Transport
            }
            ErrorKind::Command(_) => ErrorCategory::Command,
            ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } => {
                ErrorCategory::Transport
            }
        }
    }

    pub(crate) fn is_network_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(..) | ErrorKind::ConnectionPoolCleared { .. }
        )
    }

    pub(crate) fn is_server_selection_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ServerSelection { .. })
    }

    pub(crate) fn is_ns_not_found(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Command(ref err) if err.code == NS_NOT_FOUND_CODE)
    }

    /// Whether the server replied with `ok: 0`.
    pub(crate) fn is_server_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Command(_))
    }

    /// Gets the server error code, if any, looking through to the source error.
    pub(crate) fn code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.code),
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.code()))
    }

    /// Whether a change stream may re-open its cursor after this error. Network errors and
    /// `CursorNotFound` always qualify, as do command errors the server explicitly labeled
    /// resumable. Every other command error means the server rejected the request.
    pub(crate) fn is_resumable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        if !self.is_server_error() {
            return false;
        }
        self.code() == Some(CURSOR_NOT_FOUND_CODE)
            || self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR)
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        let label = label.as_ref();
        self.labels().contains(label)
            || self
                .source
                .as_ref()
                .map(|source| source.contains_label(label))
                .unwrap_or(false)
    }

    /// Adds the given label to this error.
    pub(crate) fn add_label<T: AsRef<str>>(&mut self, label: T) {
        let label = label.as_ref().to_string();
        self.labels.insert(label);
    }

    /// The raw reply behind a command error, for fields `Error` does not model.
    pub fn server_response(&self) -> Option<&RawDocumentBuf> {
        self.server_response.as_deref()
    }

    /// Attaches the raw reply unless one is already attached.
    pub(crate) fn with_server_response(mut self, response: &RawCommandResponse) -> Self {
        if self.server_response.is_none() {
            self.server_response = Some(Box::new(response.raw_body().to_owned()));
        }
        self
    }

    pub(crate) fn with_source<E: Into<Option<Error>>>(mut self, source: E) -> Self {
        self.source = source.into().map(Box::new);
        self
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(err: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(err: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

impl From<crate::bson::raw::Error> for ErrorKind {
    fn from(err: crate::bson::raw::Error) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

impl From<crate::bson::raw::ValueAccessError> for ErrorKind {
    fn from(err: crate::bson::raw::ValueAccessError) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// The read preference requested for an operation contradicts the state of its session.
    #[error("Invalid read preference: {message}")]
    #[non_exhaustive]
    InvalidReadPreference { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(crate::bson::de::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(crate::bson::ser::Error),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// A connection could not be leased from the selected server.
    #[error("Failed to check out a connection to {address}: {message}")]
    #[non_exhaustive]
    ConnectionCheckout { address: String, message: String },

    /// An error occurred internally. This is likely a bug in the crate; please open an issue.
    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`].
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The selected server's pool was cleared while the operation held a connection.
    #[error("{message}")]
    #[non_exhaustive]
    ConnectionPoolCleared { message: String },

    /// A reply that could not be interpreted.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// No suitable server was found in time.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// The deployment has no logical session support.
    #[error("Attempted to start a session on a deployment that does not support sessions")]
    SessionsNotSupported,

    /// A transaction state transition was not allowed.
    #[error("{message}")]
    #[non_exhaustive]
    Transaction { message: String },

    /// A change document was missing the token needed to resume the stream.
    #[error("Cannot provide resume functionality when the resume token is missing")]
    MissingResumeToken,
}

/// The broad class an [`Error`] falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// No eligible server could be found.
    #[display("selection")]
    Selection,

    /// A connection or session could not be acquired.
    #[display("resource")]
    Resource,

    /// The request contradicts itself or its session's state.
    #[display("configuration")]
    Configuration,

    /// The server's reply violated the wire protocol.
    #[display("protocol")]
    Protocol,

    /// The server rejected the request.
    #[display("command")]
    Command,

    /// The transport failed, or the server lost the cursor.
    #[display("transport")]
    Transport,
}

impl ErrorCategory {
    /// Whether the failed request can be safely issued again without changing it.
    pub fn is_retry_safe(self) -> bool {
        self == ErrorCategory::Transport
    }
}

/// The `code`, `codeName` and `errmsg` of a failed command reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Numeric server error code.
    pub code: i32,

    /// Symbolic name of `code`.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// Human readable message.
    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn command_error(code: i32, labels: &[&str]) -> Error {
        Error::new(
            ErrorKind::Command(CommandError {
                code,
                code_name: "TestError".to_string(),
                message: "test".to_string(),
            }),
            Some(labels.iter().map(|l| l.to_string())),
        )
    }

    #[test]
    fn network_errors_are_resumable() {
        let error = Error::network_timeout();
        assert!(error.is_resumable());
        assert_eq!(error.category(), ErrorCategory::Transport);
        assert!(error.category().is_retry_safe());

        let cleared: Error = ErrorKind::ConnectionPoolCleared {
            message: "cleared".to_string(),
        }
        .into();
        assert!(cleared.is_resumable());
        assert!(Error::interrupted_get_more().is_resumable());
    }

    #[test]
    fn cursor_not_found_is_resumable_transport() {
        let error = command_error(43, &[]);
        assert!(error.is_resumable());
        assert_eq!(error.category(), ErrorCategory::Transport);
    }

    #[test]
    fn plain_command_errors_are_not_resumable() {
        // Interrupted, NotWritablePrimary, Unauthorized, and a made-up code.
        for code in [11601, 10107, 13, 280, 9999] {
            let error = command_error(code, &[]);
            assert!(!error.is_resumable(), "code {} was resumable", code);
            assert_eq!(error.category(), ErrorCategory::Command);
            assert!(!error.category().is_retry_safe());
        }
    }

    #[test]
    fn labeled_command_errors_are_resumable() {
        let error = command_error(10107, &[RESUMABLE_CHANGE_STREAM_ERROR]);
        assert!(error.is_resumable());
        assert_eq!(error.category(), ErrorCategory::Command);
    }

    #[test]
    fn local_errors_are_not_resumable() {
        let errors = [
            Error::server_selection("no servers"),
            Error::invalid_argument("bad"),
            Error::invalid_response("bad"),
            ErrorKind::MissingResumeToken.into(),
            ErrorKind::InvalidReadPreference {
                message: "secondary in a transaction".to_string(),
            }
            .into(),
        ];
        for error in errors {
            assert!(!error.is_resumable(), "{} was resumable", error);
        }
    }

    #[test]
    fn categories() {
        assert_eq!(
            Error::server_selection("none").category(),
            ErrorCategory::Selection
        );
        assert_eq!(
            Error::from(ErrorKind::SessionsNotSupported).category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            Error::from(ErrorKind::ConnectionCheckout {
                address: "localhost:27017".to_string(),
                message: "pool closed".to_string(),
            })
            .category(),
            ErrorCategory::Resource
        );
        assert_eq!(
            Error::from(ErrorKind::InvalidReadPreference {
                message: String::new()
            })
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::from(ErrorKind::MissingResumeToken).category(),
            ErrorCategory::Protocol
        );
    }

    #[test]
    fn labels_are_inherited_from_source() {
        let source = command_error(91, &[TRANSIENT_TRANSACTION_ERROR]);
        let error = Error::network_timeout().with_source(source);
        assert!(error.contains_label(TRANSIENT_TRANSACTION_ERROR));
        assert_eq!(error.code(), Some(91));
    }
}
