//! Error types for MRS operations

use thiserror::Error;

/// Result type alias using MrsError
pub type Result<T> = std::result::Result<T, MrsError>;

/// Errors that can occur while talking to the MRS federation
///
/// The set is closed: callers match on it to choose a remediation
/// (retry another server, fix the input, or re-authenticate).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MrsError {
    /// Transport-level failure: unreachable host, timeout, malformed response
    #[error("Connection to {server} failed: {message}")]
    Connection {
        server: String,
        status: Option<u16>,
        message: String,
    },

    /// Missing, invalid or expired credentials, or signing without a private key
    #[error("Authentication failed: {message}")]
    Authentication {
        status: Option<u16>,
        message: String,
    },

    /// Referenced registration does not exist server-side
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Malformed or policy-violating input
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A federated search query to a specific server failed
    #[error("Federated query to {server} failed: {message}")]
    Federation {
        server: String,
        status: Option<u16>,
        message: String,
    },
}

/// Discriminant of an [`MrsError`], for callers that only need the category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Authentication,
    NotFound,
    Validation,
    Federation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Authentication => write!(f, "authentication"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Federation => write!(f, "federation"),
        }
    }
}

impl MrsError {
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        MrsError::Connection {
            server: server.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        MrsError::Authentication {
            status: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        MrsError::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        MrsError::Validation {
            message: message.into(),
        }
    }

    pub fn federation(server: impl Into<String>, message: impl Into<String>) -> Self {
        MrsError::Federation {
            server: server.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Attach an HTTP status code (no-op for kinds that do not carry one)
    pub fn with_status(mut self, code: u16) -> Self {
        match &mut self {
            MrsError::Connection { status, .. }
            | MrsError::Authentication { status, .. }
            | MrsError::Federation { status, .. } => *status = Some(code),
            MrsError::NotFound { .. } | MrsError::Validation { .. } => {}
        }
        self
    }

    /// Get the error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            MrsError::Connection { .. } => ErrorKind::Connection,
            MrsError::Authentication { .. } => ErrorKind::Authentication,
            MrsError::NotFound { .. } => ErrorKind::NotFound,
            MrsError::Validation { .. } => ErrorKind::Validation,
            MrsError::Federation { .. } => ErrorKind::Federation,
        }
    }

    /// HTTP status that triggered this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            MrsError::Connection { status, .. }
            | MrsError::Authentication { status, .. }
            | MrsError::Federation { status, .. } => *status,
            MrsError::NotFound { .. } | MrsError::Validation { .. } => None,
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_federation(&self) -> bool {
        self.kind() == ErrorKind::Federation
    }
}

impl From<serde_json::Error> for MrsError {
    fn from(err: serde_json::Error) -> Self {
        MrsError::validation(format!("Serialization error: {}", err))
    }
}

impl From<base64::DecodeError> for MrsError {
    fn from(err: base64::DecodeError) -> Self {
        MrsError::validation(format!("Invalid base64 encoding: {}", err))
    }
}

impl From<ed25519_dalek::SignatureError> for MrsError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        MrsError::authentication(format!("Invalid key material: {}", err))
    }
}

impl From<url::ParseError> for MrsError {
    fn from(err: url::ParseError) -> Self {
        MrsError::validation(format!("Invalid URL: {}", err))
    }
}
