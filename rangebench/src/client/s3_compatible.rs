//! [`StorageClient`] for S3 and S3-compatible gateways, built on `rust-s3`.

use std::fmt;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use super::{BodyStream, BoxedClient, ClientError, ClientFactory, ClientResult, StorageClient};
use crate::catalog::ObjectKey;
use crate::generator::ByteRange;

/// Connection settings for an S3-compatible service.
///
/// Used both for talking to the object store directly and for talking to a gateway in front of it.
/// Gateways are typically addressed with [`path_style`](Self::path_style) URLs.
#[derive(Clone, Default)]
pub struct S3ClientConfig {
    /// The bucket all requests go to.
    pub bucket: String,
    /// The region used for request signing.
    pub region: String,
    /// Endpoint URL. Defaults to the public AWS endpoint of [`region`](Self::region).
    pub endpoint: Option<String>,
    /// Use path-style instead of virtual-host-style addressing.
    pub path_style: bool,
    /// Timeout applied to every request by the underlying HTTP client.
    pub request_timeout: Option<Duration>,
    /// Static access key. Falls back to the environment, profile or instance metadata.
    pub access_key: Option<String>,
    /// Static secret key, paired with [`access_key`](Self::access_key).
    pub secret_key: Option<String>,
}

impl fmt::Debug for S3ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3ClientConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("path_style", &self.path_style)
            .field("request_timeout", &self.request_timeout)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// Creates an [`S3Client`] per call, each with freshly resolved credentials.
#[derive(Debug)]
pub struct S3ClientFactory {
    config: S3ClientConfig,
}

impl S3ClientFactory {
    /// Creates a factory for clients bound to the configured bucket.
    pub fn new(config: S3ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ClientFactory for S3ClientFactory {
    async fn connect(&self) -> ClientResult<BoxedClient> {
        Ok(Box::new(S3Client::new(&self.config)?))
    }
}

/// A [`StorageClient`] for S3 and S3-compatible gateways.
pub struct S3Client {
    bucket: Box<Bucket>,
}

impl S3Client {
    /// Creates a new client bound to the configured bucket.
    pub fn new(config: &S3ClientConfig) -> ClientResult<Self> {
        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: match &config.endpoint {
                Some(endpoint) => endpoint.clone(),
                None => format!("https://s3.{}.amazonaws.com", config.region),
            },
        };

        let mut bucket = Bucket::new(&config.bucket, region, credentials)?;

        if config.path_style {
            bucket = bucket.with_path_style();
        }

        if let Some(request_timeout) = config.request_timeout {
            bucket = bucket.with_request_timeout(request_timeout)?;
        }

        Ok(Self { bucket })
    }
}

impl fmt::Debug for S3Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Client")
            .field("bucket", &self.bucket.name())
            .field("endpoint", &self.bucket.host())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl StorageClient for S3Client {
    fn name(&self) -> &'static str {
        "s3-compatible"
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn list_objects(&self, prefix: &str) -> ClientResult<Vec<ObjectKey>> {
        tracing::debug!("Listing s3_compatible bucket");
        let pages = self.bucket.list(prefix.to_owned(), None).await?;

        let objects = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| ObjectKey::new(object.key, object.size))
            .collect();

        Ok(objects)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get_object(&self, key: &str, range: Option<ByteRange>) -> ClientResult<BodyStream> {
        let response = match range {
            Some(range) => {
                self.bucket
                    .get_object_range(key, range.start, Some(range.end))
                    .await
            }
            None => self.bucket.get_object(key).await,
        };

        let response = match response {
            Ok(response) => response,
            Err(S3Error::HttpFailWithBody(404, _)) => {
                return Err(ClientError::NotFound(key.to_owned()));
            }
            Err(error) => return Err(error.into()),
        };

        let status = response.status_code();
        if status == 404 {
            return Err(ClientError::NotFound(key.to_owned()));
        }
        if !(200..300).contains(&status) {
            return Err(ClientError::Status {
                key: key.to_owned(),
                status,
            });
        }

        let bytes = response.bytes().clone();
        Ok(stream::once(async move { Ok(bytes) }).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_config() -> S3ClientConfig {
        S3ClientConfig {
            bucket: "bench".into(),
            region: "us-east-1".into(),
            endpoint: Some("http://localhost:9000".into()),
            path_style: true,
            request_timeout: Some(Duration::from_secs(5)),
            access_key: Some("access".into()),
            secret_key: Some("secret".into()),
        }
    }

    #[test]
    fn builds_gateway_client() {
        let client = S3Client::new(&gateway_config()).unwrap();
        assert_eq!(client.bucket.name(), "bench");
        assert_eq!(client.name(), "s3-compatible");
    }

    #[test]
    fn debug_redacts_secret_key() {
        let formatted = format!("{:?}", gateway_config());
        assert!(formatted.contains("access"));
        assert!(!formatted.contains("\"secret\""));
    }
}
