//! Scheduler layer for the forge
//!
//! Accepts jobs into a bounded queue, tracks their progress and runs them
//! through the deployment pipeline with limited parallelism.

pub mod queue;
pub mod tracker;
pub mod worker;

pub use queue::{JobQueue, JobReceiver, QueueError};
pub use tracker::JobTracker;
pub use worker::Worker;
