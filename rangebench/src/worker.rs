//! The request loop of a single worker unit.
//!
//! A unit repeatedly picks a key and range, reads it, and reports the attempt. A failed request is
//! retried exactly once, immediately. If the retry fails too, the unit terminates for good; the
//! other units of its process keep running.
//!
//! Units stop at the deadline of their process or when the process cancels them. Cancellation
//! also interrupts a request that is still in flight, such an attempt is not reported.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::KeyCatalog;
use crate::client::{BoxedClient, ClientError, StorageClient};
use crate::generator::{GetRequest, RequestGenerator};
use crate::reporter::{AttemptRecord, Outcome, Reporter, UnitId};

/// The states a unit moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitState {
    /// Between requests.
    Idle,
    /// The initial attempt of a request is in flight.
    Requesting,
    /// The initial attempt failed and its retry is in flight.
    RetryingAfterFailure,
    /// The retry failed; the unit does not issue further requests.
    Terminated,
}

/// Which attempt of a request completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
    /// The first attempt.
    Initial,
    /// The single retry following a failed first attempt.
    Retry,
}

/// The result of a request, including its retry if there was one.
#[derive(Debug)]
pub enum RequestOutcome<T, E> {
    /// The first attempt succeeded.
    Success(T),
    /// The first attempt failed and the retry succeeded.
    FailureThenRetrySuccess {
        /// The error of the first attempt.
        failure: E,
        /// The value of the retry.
        retry: T,
    },
    /// Both attempts failed.
    FailureThenRetryFailure {
        /// The error of the first attempt.
        failure: E,
        /// The error of the retry.
        retry: E,
    },
}

impl<T, E> RequestOutcome<T, E> {
    /// Returns `true` if both attempts failed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FailureThenRetryFailure { .. })
    }
}

/// Runs `op`, and runs it once more if it fails.
///
/// There is no delay before the retry and no third attempt. `observe` is called right after each
/// attempt completes.
pub async fn retry_once<T, E, F, Fut, O>(mut op: F, mut observe: O) -> RequestOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    O: FnMut(Attempt, &Result<T, E>),
{
    let first = op().await;
    observe(Attempt::Initial, &first);
    let failure = match first {
        Ok(value) => return RequestOutcome::Success(value),
        Err(failure) => failure,
    };

    let retry = op().await;
    observe(Attempt::Retry, &retry);
    match retry {
        Ok(retry) => RequestOutcome::FailureThenRetrySuccess { failure, retry },
        Err(retry) => RequestOutcome::FailureThenRetryFailure { failure, retry },
    }
}

/// A completed read.
#[derive(Clone, Copy, Debug)]
pub struct Transfer {
    /// Time until the whole body was read.
    pub elapsed: Duration,
    /// Size of the body.
    pub bytes: u64,
}

/// A failed read.
#[derive(Debug)]
pub struct FailedTransfer {
    /// Time until the request failed.
    pub elapsed: Duration,
    /// Bytes of the body received before the failure.
    pub bytes: u64,
    /// The cause of the failure.
    pub error: ClientError,
}

/// Issues `request` and drains the response body.
async fn attempt(
    client: &dyn StorageClient,
    request: &GetRequest<'_>,
) -> Result<Transfer, FailedTransfer> {
    let start = Instant::now();
    let mut bytes = 0;

    let result = async {
        let mut body = client.get_object(&request.object.key, request.range).await?;
        while let Some(chunk) = body.try_next().await? {
            bytes += chunk.len() as u64;
        }
        Ok::<_, ClientError>(())
    }
    .await;

    let elapsed = start.elapsed();
    match result {
        Ok(()) => Ok(Transfer { elapsed, bytes }),
        Err(error) => Err(FailedTransfer {
            elapsed,
            bytes,
            error,
        }),
    }
}

/// How a unit ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitExit {
    /// The deadline passed or the unit was cancelled.
    Stopped,
    /// A request and its retry both failed.
    Terminated,
}

/// State shared by all units of a worker process.
#[derive(Clone, Debug)]
pub struct UnitContext {
    /// The keys to read from.
    pub catalog: KeyCatalog,
    /// Produces the key and range of each request.
    pub generator: RequestGenerator,
    /// Receives every attempt.
    pub reporter: Arc<dyn Reporter>,
    /// No new request is started after this instant.
    pub deadline: Instant,
    /// Stops the unit, including a request in flight.
    pub cancel: CancellationToken,
}

/// One concurrent request loop with its own client.
#[derive(Debug)]
pub struct WorkerUnit {
    id: UnitId,
    client: BoxedClient,
    context: UnitContext,
    rng: SmallRng,
    state: UnitState,
}

impl WorkerUnit {
    /// Creates an idle unit. `seed` initializes its key and range selection.
    pub fn new(id: UnitId, client: BoxedClient, context: UnitContext, seed: u64) -> Self {
        Self {
            id,
            client,
            context,
            rng: SmallRng::seed_from_u64(seed),
            state: UnitState::Idle,
        }
    }

    /// The current state of the unit.
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Runs requests until the deadline passes, the unit is cancelled, or a retry fails.
    #[tracing::instrument(level = "debug", skip_all, fields(unit = %self.id))]
    pub async fn run(mut self) -> UnitExit {
        tracing::debug!(client = self.client.name(), "worker unit started");

        loop {
            let context = &self.context;
            if context.cancel.is_cancelled() || Instant::now() >= context.deadline {
                tracing::debug!("worker unit stopped");
                return UnitExit::Stopped;
            }

            let request = context
                .generator
                .next_request(&context.catalog, &mut self.rng);
            self.state = UnitState::Requesting;

            let id = self.id;
            let client = &*self.client;
            let reporter = &*context.reporter;
            let state = &mut self.state;
            let current = &request;

            let request_future = retry_once(
                move || attempt(client, current),
                move |attempt, result| {
                    let next = report(reporter, id, attempt, result);
                    tracing::trace!(from = ?*state, to = ?next, "state transition");
                    *state = next;
                },
            );

            let outcome = tokio::select! {
                biased;
                _ = context.cancel.cancelled() => {
                    tracing::debug!("worker unit cancelled during request");
                    return UnitExit::Stopped;
                }
                outcome = request_future => outcome,
            };

            if let RequestOutcome::FailureThenRetryFailure { retry, .. } = outcome {
                tracing::warn!(
                    error = &retry.error as &dyn std::error::Error,
                    key = %request.object.key,
                    "worker unit terminated after failed retry"
                );
                return UnitExit::Terminated;
            }
        }
    }
}

/// Reports an attempt and returns the state the unit moves to.
fn report(
    reporter: &dyn Reporter,
    unit: UnitId,
    attempt: Attempt,
    result: &Result<Transfer, FailedTransfer>,
) -> UnitState {
    let (outcome, next) = match (attempt, result.is_ok()) {
        (Attempt::Initial, true) => (Outcome::Success, UnitState::Idle),
        (Attempt::Initial, false) => (Outcome::Failure, UnitState::RetryingAfterFailure),
        (Attempt::Retry, true) => (Outcome::RetrySuccess, UnitState::Idle),
        (Attempt::Retry, false) => (Outcome::RetryFailure, UnitState::Terminated),
    };

    let record = match result {
        Ok(transfer) => AttemptRecord {
            unit,
            outcome,
            elapsed: transfer.elapsed,
            bytes: transfer.bytes,
            error: None,
        },
        Err(failed) => AttemptRecord {
            unit,
            outcome,
            elapsed: failed.elapsed,
            bytes: failed.bytes,
            error: Some(failed.error.to_string()),
        },
    };

    reporter.report(&record);
    next
}
