//! Emission of per-attempt outcome lines.
//!
//! Every completed attempt, including retries, results in exactly one line with the outcome,
//! the response time and the number of bytes read. Lines of concurrent units interleave freely;
//! there is no aggregation, summary statistics are derived by parsing the output.

use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use yansi::{Paint, Style};

/// Identifies a worker unit within the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitId {
    /// Index of the worker process.
    pub process: usize,
    /// Index of the unit within its process.
    pub unit: usize,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}.u{}", self.process, self.unit)
    }
}

/// Classification of a single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The initial attempt succeeded.
    Success,
    /// The initial attempt failed; a retry follows.
    Failure,
    /// The retry after a failure succeeded.
    RetrySuccess,
    /// The retry after a failure failed as well; the unit terminates.
    RetryFailure,
}

impl Outcome {
    /// The label printed at the start of the line.
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success => "Success",
            Outcome::Failure => "Failure",
            Outcome::RetrySuccess => "Retry success",
            Outcome::RetryFailure => "Retry failure",
        }
    }

    fn style(self) -> Style {
        match self {
            Outcome::Success | Outcome::RetrySuccess => Style::new().green(),
            Outcome::Failure => Style::new().yellow(),
            Outcome::RetryFailure => Style::new().red().bold(),
        }
    }
}

/// One reported attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    /// The unit that issued the attempt.
    pub unit: UnitId,
    /// How the attempt ended.
    pub outcome: Outcome,
    /// Time from issuing the request until the body was read or the request failed.
    pub elapsed: Duration,
    /// Bytes of the body received, possibly partial for failures.
    pub bytes: u64,
    /// The error of a failed attempt.
    pub error: Option<String>,
}

impl AttemptRecord {
    fn write_details(&self, f: &mut impl fmt::Write) -> fmt::Result {
        write!(
            f,
            "response time {:.6} sec, read {} bytes",
            self.elapsed.as_secs_f64(),
            self.bytes
        )?;
        if let Some(error) = &self.error {
            write!(f, ", error: {error}")?;
        }
        Ok(())
    }
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: ", self.unit, self.outcome.label())?;
        self.write_details(f)
    }
}

/// Receives every completed attempt.
pub trait Reporter: fmt::Debug + Send + Sync + 'static {
    /// Emits one record.
    fn report(&self, record: &AttemptRecord);
}

/// Prints one line per record to stdout.
///
/// The outcome label is colored if stdout is a terminal that supports it.
#[derive(Debug, Default)]
pub struct StdoutReporter;

impl StdoutReporter {
    /// Creates a new reporter writing to stdout.
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for StdoutReporter {
    fn report(&self, record: &AttemptRecord) {
        let mut line = format!(
            "[{}] {}: ",
            record.unit,
            record.outcome.label().paint(record.outcome.style())
        );
        // Writing into a `String` cannot fail.
        let _ = record.write_details(&mut line);

        let mut stdout = std::io::stdout().lock();
        // A closed stdout must not take the worker down with it.
        let _ = writeln!(stdout, "{line}");
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemoryReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all records reported so far, in order of arrival.
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Returns the records of a single unit, in order of arrival.
    pub fn records_of(&self, unit: UnitId) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.unit == unit)
            .cloned()
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, record: &AttemptRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: Outcome, error: Option<&str>) -> AttemptRecord {
        AttemptRecord {
            unit: UnitId {
                process: 1,
                unit: 2,
            },
            outcome,
            elapsed: Duration::from_millis(1500),
            bytes: 1_048_577,
            error: error.map(str::to_owned),
        }
    }

    #[test]
    fn formats_success_line() {
        assert_eq!(
            record(Outcome::Success, None).to_string(),
            "[p1.u2] Success: response time 1.500000 sec, read 1048577 bytes"
        );
    }

    #[test]
    fn formats_failure_line_with_error() {
        assert_eq!(
            record(Outcome::RetryFailure, Some("storage unavailable")).to_string(),
            "[p1.u2] Retry failure: response time 1.500000 sec, read 1048577 bytes, \
             error: storage unavailable"
        );
    }

    #[test]
    fn memory_reporter_filters_by_unit() {
        let reporter = MemoryReporter::new();
        let mut other = record(Outcome::Failure, Some("boom"));
        other.unit.unit = 0;

        reporter.report(&record(Outcome::Success, None));
        reporter.report(&other);

        assert_eq!(reporter.records().len(), 2);
        assert_eq!(
            reporter.records_of(other.unit),
            vec![other.clone()],
        );
    }
}
