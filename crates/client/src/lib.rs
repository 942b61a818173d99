//! Producer/consumer client library for the job-queue HTTP API.
//!
//! [`Client`] wraps the REST surface; [`Client::process_tasks`] runs the
//! concurrent worker-pool consumer loop over a single queue.

pub mod client;
pub mod filters;
pub mod processor;

pub use client::{Client, ClientBuilder, HealthStatus, CLIENT_ID_HEADER};
pub use processor::{ProcessorConfig, ProcessorHandle};

pub use jobq_core::{Error, Queue, Result, Task, TaskFilter, TaskId, TaskStats, TaskStatus};
