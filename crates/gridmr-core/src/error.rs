use std::fmt;

/// Main error type for gridmr
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),

    /// Invalid submission (missing input, bad task counts, empty code refs)
    BadRequest(String),

    /// Unknown job, task or worker
    NotFound(String),

    /// Mapper/reducer raised during execution
    UserCode(String),

    /// Worker dead or unreachable mid-attempt
    WorkerUnavailable(String),

    /// Attempt deadline or cancellation grace exceeded
    Timeout(String),

    /// Blob store I/O failure (read, write, rename)
    BlobStore(String),

    /// HTTP/Network errors
    Network(String),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),

    /// IO errors
    Io(std::io::Error),

    /// Invariant violated; fatal for the affected job
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::UserCode(msg) => write!(f, "User code error: {}", msg),
            Error::WorkerUnavailable(msg) => write!(f, "Worker unavailable: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::BlobStore(msg) => write!(f, "Blob store error: {}", msg),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Network(error.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(error: uuid::Error) -> Self {
        Error::BadRequest(format!("Invalid UUID: {}", error))
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new bad request error
    pub fn bad_request<T: Into<String>>(msg: T) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new user code error
    pub fn user_code<T: Into<String>>(msg: T) -> Self {
        Error::UserCode(msg.into())
    }

    /// Create a new worker unavailable error
    pub fn worker_unavailable<T: Into<String>>(msg: T) -> Self {
        Error::WorkerUnavailable(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new blob store error
    pub fn blob_store<T: Into<String>>(msg: T) -> Self {
        Error::BlobStore(msg.into())
    }

    /// Create a new network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        Error::Network(msg.into())
    }

    /// Create a new internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        Error::Internal(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::Timeout(_) => 408,
            Error::Network(_) => 503,
            Error::WorkerUnavailable(_) => 409,
            Error::Config(_) => 500,
            Error::UserCode(_) => 500,
            Error::BlobStore(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::BadRequest(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::UserCode(_) => "user_code",
            Error::WorkerUnavailable(_) => "worker_unavailable",
            Error::Timeout(_) => "timeout",
            Error::BlobStore(_) => "blob_store",
            Error::Network(_) => "network",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    /// Check whether a retry may recover this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::WorkerUnavailable(_) | Error::Timeout(_) | Error::Network(_) | Error::BlobStore(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::bad_request("M < 1").status_code(), 400);
        assert_eq!(Error::not_found("no such job").status_code(), 404);
        assert_eq!(Error::network("connection refused").status_code(), 503);
        assert_eq!(Error::internal("invariant violated").status_code(), 500);
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::user_code("mapper panicked").category(), "user_code");
        assert_eq!(Error::blob_store("rename failed").category(), "blob_store");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::worker_unavailable("worker-2 dead").is_transient());
        assert!(Error::timeout("deadline exceeded").is_transient());
        assert!(!Error::bad_request("R < 1").is_transient());
        assert!(!Error::internal("double commit").is_transient());
    }
}
