//! Storage clients the workload issues its requests through.
//!
//! The workload only needs two capabilities from a storage service: listing the objects of a
//! bucket once, and reading an object, optionally restricted to a [`ByteRange`]. Both are expressed
//! by the [`StorageClient`] trait. Every worker unit owns its own client, created through a
//! [`ClientFactory`].

use std::fmt::Debug;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::catalog::ObjectKey;
use crate::generator::ByteRange;

mod in_memory;
mod s3_compatible;

pub use in_memory::{InMemoryClient, InMemoryFactory, RecordedRequest};
pub use s3_compatible::{S3Client, S3ClientConfig, S3ClientFactory};

/// A type-erased [`StorageClient`] instance.
pub type BoxedClient = Box<dyn StorageClient>;

/// A shareable [`ClientFactory`] instance.
pub type SharedFactory = std::sync::Arc<dyn ClientFactory>;

/// The body of an object, streamed in chunks.
pub type BodyStream = BoxStream<'static, ClientResult<Bytes>>;

/// A client bound to a single bucket of a storage service.
#[async_trait::async_trait]
pub trait StorageClient: Debug + Send + Sync + 'static {
    /// The client name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Lists all objects below `prefix`, following pagination until exhausted.
    async fn list_objects(&self, prefix: &str) -> ClientResult<Vec<ObjectKey>>;

    /// Reads the object at `key`, or only the given byte range of it.
    async fn get_object(&self, key: &str, range: Option<ByteRange>) -> ClientResult<BodyStream>;
}

/// Creates [`StorageClient`]s on demand.
///
/// Creation may fail transiently, for example while credentials are being fetched. Callers decide
/// how often to retry.
#[async_trait::async_trait]
pub trait ClientFactory: Debug + Send + Sync + 'static {
    /// Creates a new client handle.
    async fn connect(&self) -> ClientResult<BoxedClient>;
}

/// Errors returned by [`StorageClient`] and [`ClientFactory`] implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Errors stemming from the S3 client, including error responses of the service.
    #[error("s3 error: {0}")]
    S3(#[from] s3::error::S3Error),

    /// Credentials could not be resolved.
    #[error("credentials error: {0}")]
    Credentials(#[from] s3::creds::error::CredentialsError),

    /// The service answered with a status code outside of the success range.
    #[error("unexpected status {status} reading `{key}`")]
    Status {
        /// The requested key.
        key: String,
        /// The HTTP status code of the response.
        status: u16,
    },

    /// The requested object does not exist.
    #[error("object `{0}` not found")]
    NotFound(String),

    /// The requested range starts beyond the end of the object.
    #[error("range {range} not satisfiable for `{key}` of {size} bytes")]
    RangeNotSatisfiable {
        /// The requested key.
        key: String,
        /// The requested range.
        range: ByteRange,
        /// The actual size of the object.
        size: u64,
    },

    /// The service is not reachable or refused the request.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
