//! A load generator for GET and range-GET requests against S3-compatible object storage.
//!
//! A run lists the target bucket once into a [`KeyCatalog`], then starts a number of worker
//! processes, each running a number of concurrent worker units. Every unit repeatedly picks a
//! random key, optionally a byte range of it, reads it, and prints one line per attempt with the
//! outcome, response time and bytes read. There is no aggregation; summary statistics are derived
//! from the output.
//!
//! Ranges either always cover the head of the object (`bytes=0-<length>`), or start at a uniformly
//! random offset. A failed request is retried exactly once without delay. If the retry fails too,
//! the unit that issued it stops, while all other units keep running until the deadline.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod generator;
pub mod manager;
pub mod observability;
pub mod process;
pub mod reporter;
pub mod worker;

pub use crate::catalog::{KeyCatalog, ObjectKey};
pub use crate::error::{Error, Result};
pub use crate::manager::{RunConfig, RunReport, WorkloadManager};
