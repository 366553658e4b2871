use std::borrow::Cow;
use std::fmt;

/// All controller error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A desired-state patch does not contain any actuator.
    Validation,
    /// The message bus failed to publish or subscribe.
    Transport,
    /// The control state store is unreachable or holds invalid data.
    Persistence,
    /// An inbound message payload cannot be decoded.
    MalformedMessage,
    /// The controller configuration is invalid.
    Config,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::Transport => "Transport",
            Self::Persistence => "Persistence",
            Self::MalformedMessage => "Malformed Message",
            Self::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description().fmt(f)
    }
}

/// A controller error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error().fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error().fmt(f)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the complete error message.
    #[must_use]
    pub fn error(&self) -> String {
        format!("{}: {}", self.kind, self.description)
    }

    pub(crate) fn validation(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Validation, description)
    }

    pub(crate) fn config(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Config, description)
    }

    pub(crate) fn malformed(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::MalformedMessage, description)
    }

    pub(crate) fn persistence(error: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Persistence, error.to_string())
    }

    pub(crate) fn transport(error: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Transport, error.to_string())
    }
}

impl From<rumqttc::v5::ClientError> for Error {
    fn from(e: rumqttc::v5::ClientError) -> Self {
        Self::transport(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
