pub mod blobstore;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod worker;

// Re-export commonly used types
pub use blobstore::{BlobStore, LocalBlobStore};
pub use client::{HttpTransport, SchedulerClient, WorkerClient};
pub use config::Config;
pub use error::{Error, Result};
pub use scheduler::{Scheduler, SchedulerState, TaskTransport};
pub use worker::TaskExecutor;

/// Current version of gridmr
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_creation() {
        let err = Error::bad_request("num_maps must be >= 1");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "bad_request");
    }
}
