//! Business layer: queue/task validation and transition rules, plus the
//! background sweeper that reclaims expired leases.

pub mod service;
pub mod sweeper;

pub use service::{QueueService, TaskUpdate};
pub use sweeper::{SweeperHandle, TimeoutSweeper, DEFAULT_SWEEP_INTERVAL};
