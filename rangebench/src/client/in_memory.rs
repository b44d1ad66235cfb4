//! In-memory client for tests.
//!
//! [`InMemoryClient`] serves zero-filled objects of configurable sizes and can be told to fail,
//! delay responses and record every request it receives. It is [`Clone`], so tests can keep a
//! handle for inspection while the workload owns boxed copies created by an [`InMemoryFactory`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{StreamExt, stream};

use super::{BodyStream, BoxedClient, ClientError, ClientFactory, ClientResult, StorageClient};
use crate::catalog::ObjectKey;
use crate::generator::ByteRange;

/// Chunk size of served object bodies.
const CHUNK_SIZE: usize = 64 * 1024;

static ZEROES: [u8; CHUNK_SIZE] = [0; CHUNK_SIZE];

/// A request received by an [`InMemoryClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    /// The requested key.
    pub key: String,
    /// The requested range, if any.
    pub range: Option<ByteRange>,
}

#[derive(Clone, Debug)]
enum Failures {
    Never,
    Always,
    /// Fail this many requests, counted across all clones.
    First(Arc<AtomicUsize>),
}

/// A [`StorageClient`] that serves zero-filled objects from memory.
#[derive(Clone, Debug)]
pub struct InMemoryClient {
    objects: Arc<Vec<ObjectKey>>,
    failures: Failures,
    latency: Duration,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl InMemoryClient {
    /// Creates a client without any objects.
    pub fn new() -> Self {
        Self {
            objects: Arc::default(),
            failures: Failures::Never,
            latency: Duration::ZERO,
            requests: Arc::default(),
        }
    }

    /// Adds an object of the given size. Listing returns objects in insertion order.
    pub fn with_object(mut self, key: impl Into<String>, size: u64) -> Self {
        Arc::make_mut(&mut self.objects).push(ObjectKey::new(key.into(), size));
        self
    }

    /// Delays every `get_object` call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails every `get_object` call.
    pub fn fail_always(mut self) -> Self {
        self.failures = Failures::Always;
        self
    }

    /// Fails the next `count` `get_object` calls, then succeeds.
    pub fn fail_first(mut self, count: usize) -> Self {
        self.failures = Failures::First(Arc::new(AtomicUsize::new(count)));
        self
    }

    /// Returns all `get_object` requests received so far, across all clones.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn should_fail(&self) -> bool {
        match &self.failures {
            Failures::Never => false,
            Failures::Always => true,
            Failures::First(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StorageClient for InMemoryClient {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn list_objects(&self, prefix: &str) -> ClientResult<Vec<ObjectKey>> {
        Ok(self
            .objects
            .iter()
            .filter(|object| object.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_object(&self, key: &str, range: Option<ByteRange>) -> ClientResult<BodyStream> {
        self.requests.lock().unwrap().push(RecordedRequest {
            key: key.to_owned(),
            range,
        });

        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }

        if self.should_fail() {
            return Err(ClientError::Unavailable("injected failure".into()));
        }

        let size = self
            .objects
            .iter()
            .find(|object| object.key == key)
            .map(|object| object.size)
            .ok_or_else(|| ClientError::NotFound(key.to_owned()))?;

        // Like S3, a range starting past the end is rejected and a range ending past it is clamped.
        let len = match range {
            None => size,
            Some(range) if range.start >= size => {
                return Err(ClientError::RangeNotSatisfiable {
                    key: key.to_owned(),
                    range,
                    size,
                });
            }
            Some(range) => range.end.min(size - 1) - range.start + 1,
        };

        Ok(zeroes(len).boxed())
    }
}

fn zeroes(len: u64) -> impl futures_util::Stream<Item = ClientResult<Bytes>> + Send + 'static {
    let full_chunks = len / CHUNK_SIZE as u64;
    let rest = (len % CHUNK_SIZE as u64) as usize;

    let chunks = (0..full_chunks)
        .map(|_| CHUNK_SIZE)
        .chain((rest > 0).then_some(rest));

    stream::iter(chunks.map(|n| Ok(Bytes::from_static(&ZEROES[..n]))))
}

/// A [`ClientFactory`] handing out clones of an [`InMemoryClient`].
#[derive(Debug)]
pub struct InMemoryFactory {
    client: InMemoryClient,
    failing_connects: AtomicUsize,
    connect_attempts: AtomicUsize,
}

impl InMemoryFactory {
    /// Creates a factory that always connects successfully.
    pub fn new(client: InMemoryClient) -> Self {
        Self {
            client,
            failing_connects: AtomicUsize::new(0),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    /// Fails the next `count` connection attempts, then succeeds.
    pub fn fail_connects(self, count: usize) -> Self {
        self.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    /// Returns the number of connection attempts made so far.
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClientFactory for InMemoryFactory {
    async fn connect(&self) -> ClientResult<BoxedClient> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ClientError::Unavailable("injected connect failure".into()));
        }

        Ok(Box::new(self.client.clone()))
    }
}
