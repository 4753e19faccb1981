//! Background worker logic for the fleet orchestrator (spec §4.5, §4.6,
//! §5): the deployment and batch-job state machines, cluster-inventory
//! sync, and the task-queue/metrics/telemetry scaffolding they share.
//!
//! This crate has no resident reconcile loop per record. Every tick reads
//! its record from [`store::Store`], recomputes whatever it needs from
//! the current cluster/fleet snapshot, and either requeues itself at a
//! bounded countdown or returns `Done`.

pub mod batchjob_controller;
pub mod cluster_sync;
pub mod deployment_controller;
pub mod error;
pub mod metrics;
pub mod store;
pub mod taskqueue;
pub mod telemetry;

pub use error::{Error, Result};
pub use metrics::Metrics;
pub use store::Store;
pub use taskqueue::{interval, Action, TaskQueue};
