//! Errors that abort a run.

use thiserror::Error;

use crate::client::ClientError;

/// Errors that abort a run before any worker starts.
///
/// Failures after startup never surface here: they are reported as lines and contained within the
/// worker unit that hit them.
#[derive(Debug, Error)]
pub enum Error {
    /// The listing of the target bucket returned no objects.
    #[error("no content in list response for bucket `{bucket}`")]
    ListingEmpty {
        /// The bucket that was listed.
        bucket: String,
    },

    /// The client used for the initial listing could not be created.
    #[error("failed to create listing client")]
    Connect(#[source] ClientError),

    /// The initial listing request failed.
    #[error("failed to list objects in bucket `{bucket}`")]
    Listing {
        /// The bucket that was listed.
        bucket: String,
        /// The underlying client error.
        #[source]
        cause: ClientError,
    },

    /// Random-offset ranges cannot be placed inside the assumed object size.
    #[error("range length {length} does not fit into the assumed object size of {size} bytes")]
    RangeExceedsObject {
        /// The configured range length in bytes.
        length: u64,
        /// The object size used for range arithmetic.
        size: u64,
    },

    /// The configuration contains values the workload cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread or async runtime could not be started.
    #[error("failed to start worker runtime")]
    Runtime(#[from] std::io::Error),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
