//! Error kinds.
use std::fmt;

/// One diagnostic gathered during push-path validation, identified by a
/// `TYPE(dx,dy)/page-N/element-i/eventName` path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        type_name: &str,
        dx: i8,
        dy: i8,
        page: u8,
        element: u8,
        event_name: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: format!("{type_name}({dx},{dy})/page-{page}/element-{element}/{event_name}"),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("protocol unstable: {0}")]
    ProtocolUnstable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{} validation issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),
}

impl GridError {
    pub fn config(message: impl Into<String>) -> Self {
        GridError::Config(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        GridError::Protocol(message.into())
    }
}
