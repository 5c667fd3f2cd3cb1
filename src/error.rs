use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Result type for BluOS operations
pub type Result<T> = std::result::Result<T, BluosError>;

/// Errors that can occur when discovering or controlling BluOS players
#[derive(Error, Debug)]
pub enum BluosError {
    /// Input rejected before any I/O was attempted
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Network call did not complete within its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Could not reach the device
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Hostname resolution or resolver process failed
    #[error("Resolver failed: {0}")]
    Resolver(String),

    /// Device answered with a non-success HTTP status
    #[error("Device returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Calls to this device are suspended by the circuit breaker
    #[error("Circuit open for {0}")]
    CircuitOpen(Ipv4Addr),

    /// Malformed discovery packet or response payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Response body exceeded the configured size cap
    #[error("Response exceeded {limit} bytes")]
    ResponseTooLarge {
        /// Configured cap in bytes
        limit: usize,
    },

    /// Device-reported application failure
    #[error("Device error: {0}")]
    Device(String),

    /// Corrupt or unreadable cache file
    #[error("Cache error: {0}")]
    Cache(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classes used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Transport,
    Protocol,
    Device,
    Cache,
}

/// Transient failure classes a retry policy may opt into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetryClass {
    Timeout,
    Connection,
    ServerError,
}

impl BluosError {
    /// Classify this error into the crate's error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            BluosError::Validation(_) => ErrorKind::Validation,
            BluosError::Timeout(_)
            | BluosError::Connection(_)
            | BluosError::Resolver(_)
            | BluosError::CircuitOpen(_)
            | BluosError::Io(_) => ErrorKind::Transport,
            BluosError::Status { status } if *status >= 500 => ErrorKind::Transport,
            BluosError::Status { .. } | BluosError::Device(_) => ErrorKind::Device,
            BluosError::Protocol(_) | BluosError::ResponseTooLarge { .. } => ErrorKind::Protocol,
            BluosError::Cache(_) | BluosError::Json(_) => ErrorKind::Cache,
        }
    }

    /// The transient class of this error, if it has one
    ///
    /// Errors without a class are permanent and never retried.
    pub fn retry_class(&self) -> Option<RetryClass> {
        match self {
            BluosError::Timeout(_) => Some(RetryClass::Timeout),
            BluosError::Connection(_) | BluosError::Resolver(_) => Some(RetryClass::Connection),
            BluosError::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::BrokenPipe => Some(RetryClass::Connection),
                std::io::ErrorKind::TimedOut => Some(RetryClass::Timeout),
                _ => None,
            },
            BluosError::Status { status } if *status >= 500 => Some(RetryClass::ServerError),
            _ => None,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        BluosError::Validation(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        BluosError::Protocol(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = BluosError::Status { status: 503 };
        assert_eq!(server.kind(), ErrorKind::Transport);
        assert_eq!(server.retry_class(), Some(RetryClass::ServerError));

        let client = BluosError::Status { status: 404 };
        assert_eq!(client.kind(), ErrorKind::Device);
        assert_eq!(client.retry_class(), None);
    }

    #[test]
    fn io_reset_maps_to_connection_class() {
        let err = BluosError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(err.retry_class(), Some(RetryClass::Connection));
        let err = BluosError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(err.retry_class(), None);
    }

    #[test]
    fn circuit_open_is_transport_but_not_retryable() {
        let err = BluosError::CircuitOpen(Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.retry_class(), None);
    }
}
