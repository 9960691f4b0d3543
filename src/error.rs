/// Unified error handling for the UDA client
///
/// Every failure classified by the connection layer is returned to the caller
/// as a [`UdaError`] and also pushed onto an [`ErrorStack`], so a caller can
/// inspect the accumulated trace after a failed call.
use std::fmt;
use std::io;
use thiserror::Error;
use tracing::error;

use crate::config::ConfigError;
use crate::core::Handle;

/// Code reported when a host alias or host name is unusable
pub const CODE_INVALID_HOST: i32 = -1;
/// Code reported when a requested session handle is not registered
pub const CODE_NO_SOCKET_CONNECTION: i32 = -2;
/// Code reported for a zero-byte read after the socket signalled readiness
pub const CODE_EMPTY_READ: i32 = 999;

/// Main error type for UDA client connection operations
#[derive(Debug, Error)]
pub enum UdaError {
    /// A configured alias was found but carries no host name
    #[error("The hostname is not recognised for the host alias provided: {alias}")]
    InvalidAlias { alias: String },

    /// The server port resolved to zero
    #[error("The server port must be a positive integer (host {host})")]
    InvalidPort { host: String },

    /// Address resolution failed
    #[error("Address resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Socket allocation failed
    #[error("Problem opening socket: {0}")]
    SocketCreate(#[source] io::Error),

    /// Every connect attempt against a host was exhausted
    #[error("Unable to connect to server {host}:{port} (code {code})")]
    ConnectFailed { host: String, port: u16, code: i32 },

    /// A post-connect socket option could not be applied
    #[error("Problem setting socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    /// A socket switch named a handle that is not registered
    #[error("The user specified socket connection does not exist: {handle}")]
    NoSuchSession { handle: Handle },

    /// Read/write failures on the active connection
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A caller-supplied deadline expired
    #[error("Operation timed out: {operation}")]
    TimedOut { operation: String },

    /// The operation was abandoned through a cancel token
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Address resolution failure carrying the resolver's own code and text
#[derive(Debug, Error)]
#[error("{host}: {message} (code {code})")]
pub struct ResolutionError {
    pub host: String,
    pub code: i32,
    pub message: String,
    /// OS error attached when the resolver reports a system-level failure
    #[source]
    pub system: Option<io::Error>,
}

/// Transport-level (read/write) errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ECONNRESET: The server program has crashed or closed the socket unexpectedly")]
    PeerReset,

    #[error("EPIPE: The server has closed its end of the connection")]
    BrokenPipe,

    #[error("Server Unavailable: ENETUNREACH")]
    NetworkUnreachable,

    #[error("Server Unavailable: ECONNREFUSED")]
    ConnectionRefused,

    #[error("No Data waiting at Socket when Data Expected!")]
    UnexpectedEmptyRead,

    #[error("No server connection is open")]
    NotConnected,

    #[error("Socket I/O error: {0}")]
    Os(#[from] io::Error),
}

/// Result type alias for UDA client operations
pub type UdaResult<T> = Result<T, UdaError>;

impl TransportError {
    /// Classify an OS error, mapping the fatal socket conditions to their own variants
    pub fn from_os_error(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ECONNRESET) => TransportError::PeerReset,
            Some(libc::EPIPE) => TransportError::BrokenPipe,
            Some(libc::ENETUNREACH) => TransportError::NetworkUnreachable,
            Some(libc::ECONNREFUSED) => TransportError::ConnectionRefused,
            _ => TransportError::Os(err),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TransportError::PeerReset => libc::ECONNRESET,
            TransportError::BrokenPipe => libc::EPIPE,
            TransportError::NetworkUnreachable => libc::ENETUNREACH,
            TransportError::ConnectionRefused => libc::ECONNREFUSED,
            TransportError::UnexpectedEmptyRead => CODE_EMPTY_READ,
            TransportError::NotConnected => CODE_NO_SOCKET_CONNECTION,
            TransportError::Os(e) => e.raw_os_error().unwrap_or(-1),
        }
    }
}

impl UdaError {
    /// Create a timeout error
    pub fn timed_out<S: Into<String>>(operation: S) -> Self {
        UdaError::TimedOut {
            operation: operation.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        UdaError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Numeric code pushed onto the error stack for this error
    pub fn code(&self) -> i32 {
        match self {
            UdaError::InvalidAlias { .. } | UdaError::InvalidPort { .. } => CODE_INVALID_HOST,
            UdaError::Resolution(e) => e.code,
            UdaError::SocketCreate(e) | UdaError::SocketOption { source: e, .. } => {
                e.raw_os_error().unwrap_or(-1)
            }
            UdaError::ConnectFailed { code, .. } => *code,
            UdaError::NoSuchSession { .. } => CODE_NO_SOCKET_CONNECTION,
            UdaError::Transport(e) => e.code(),
            UdaError::TimedOut { .. } => libc::ETIMEDOUT,
            UdaError::Cancelled { .. } => libc::ECANCELED,
            UdaError::Config(_) => CODE_INVALID_HOST,
        }
    }

    /// Check if this error is recoverable (a later connect or I/O may succeed)
    pub fn is_recoverable(&self) -> bool {
        match self {
            UdaError::ConnectFailed { .. } => true,
            UdaError::TimedOut { .. } => true,
            UdaError::Resolution(e) => e.code == libc::EAI_AGAIN,
            UdaError::Transport(TransportError::Os(_)) => true,
            UdaError::Transport(TransportError::UnexpectedEmptyRead) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            UdaError::Config(_) => ErrorSeverity::Critical,
            UdaError::InvalidAlias { .. } | UdaError::InvalidPort { .. } => ErrorSeverity::Critical,
            UdaError::SocketCreate(_) | UdaError::SocketOption { .. } => ErrorSeverity::Error,
            UdaError::ConnectFailed { .. } => ErrorSeverity::Error,
            UdaError::Transport(_) => ErrorSeverity::Warning,
            UdaError::TimedOut { .. } => ErrorSeverity::Warning,
            UdaError::Cancelled { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// The OS error underlying this failure, if there is one
    fn system_error(&self) -> Option<&io::Error> {
        match self {
            UdaError::Resolution(e) => e.system.as_ref(),
            UdaError::SocketCreate(e) => Some(e),
            UdaError::SocketOption { source, .. } => Some(source),
            UdaError::Transport(TransportError::Os(e)) => Some(e),
            _ => None,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

/// Origin of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Classified by this library
    Code,
    /// Raised by the operating system or resolver
    System,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorType::Code => write!(f, "code"),
            ErrorType::System => write!(f, "system"),
        }
    }
}

/// One entry of the error stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorType,
    pub location: &'static str,
    pub code: i32,
    pub message: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.kind, self.location, self.message, self.code
        )
    }
}

/// Accumulated error trace for post-mortem inspection
#[derive(Debug, Default, Clone)]
pub struct ErrorStack {
    records: Vec<ErrorRecord>,
}

impl ErrorStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a single record
    pub fn report<S: Into<String>>(
        &mut self,
        kind: ErrorType,
        location: &'static str,
        code: i32,
        message: S,
    ) {
        let record = ErrorRecord {
            kind,
            location,
            code,
            message: message.into(),
        };
        error!("{}", record);
        self.records.push(record);
    }

    /// Push a classified error, preceded by its system error when it has one
    pub fn report_error(&mut self, location: &'static str, err: &UdaError) {
        if let Some(system) = err.system_error() {
            self.report(
                ErrorType::System,
                location,
                system.raw_os_error().unwrap_or(-1),
                system.to_string(),
            );
        }
        self.report(ErrorType::Code, location, err.code(), err.to_string());
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&ErrorRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drain the stack, returning everything reported so far
    pub fn take(&mut self) -> Vec<ErrorRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = UdaError::ConnectFailed {
            host: "bad.example".to_string(),
            port: 56565,
            code: libc::ECONNREFUSED,
        };
        assert!(matches!(error, UdaError::ConnectFailed { .. }));
        assert_eq!(error.code(), libc::ECONNREFUSED);
        assert!(error.to_string().contains("bad.example:56565"));
    }

    #[test]
    fn test_error_severity() {
        let config_error = UdaError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let io_error = UdaError::Transport(TransportError::PeerReset);
        assert_eq!(io_error.severity(), ErrorSeverity::Warning);
    }

    #[test]
    fn test_error_recoverability() {
        let connect_error = UdaError::ConnectFailed {
            host: "h".to_string(),
            port: 1,
            code: libc::ECONNREFUSED,
        };
        assert!(connect_error.is_recoverable());

        let alias_error = UdaError::InvalidAlias {
            alias: "mast".to_string(),
        };
        assert!(!alias_error.is_recoverable());
    }

    #[test]
    fn test_transport_classification() {
        let reset = io::Error::from_raw_os_error(libc::ECONNRESET);
        assert!(matches!(
            TransportError::from_os_error(reset),
            TransportError::PeerReset
        ));

        let pipe = io::Error::from_raw_os_error(libc::EPIPE);
        assert!(matches!(
            TransportError::from_os_error(pipe),
            TransportError::BrokenPipe
        ));

        let other = io::Error::from_raw_os_error(libc::EBADF);
        let classified = TransportError::from_os_error(other);
        assert!(matches!(classified, TransportError::Os(_)));
        assert_eq!(classified.code(), libc::EBADF);
    }

    #[test]
    fn test_error_stack_nests_system_error() {
        let mut stack = ErrorStack::new();
        let err = UdaError::Resolution(ResolutionError {
            host: "nowhere".to_string(),
            code: libc::EAI_SYSTEM,
            message: "System error".to_string(),
            system: Some(io::Error::from_raw_os_error(libc::EMFILE)),
        });

        stack.report_error("resolve", &err);

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.records()[0].kind, ErrorType::System);
        assert_eq!(stack.records()[0].code, libc::EMFILE);
        assert_eq!(stack.records()[1].kind, ErrorType::Code);
        assert_eq!(stack.records()[1].code, libc::EAI_SYSTEM);
        assert_eq!(stack.last().map(|r| r.location), Some("resolve"));
    }

    #[test]
    fn test_error_stack_take_empties() {
        let mut stack = ErrorStack::new();
        stack.report(ErrorType::Code, "read", CODE_EMPTY_READ, "no data");
        let taken = stack.take();
        assert_eq!(taken.len(), 1);
        assert!(stack.is_empty());
    }
}
