//! # Seckill Runtime
//!
//! The moving parts of the pipeline, written against the collaborator traits
//! in `seckill-core`:
//!
//! - [`purchase::SeckillService`] - the synchronous purchase path
//! - [`materializer::Materializer`] - the consume / lock / persist / ack worker
//! - [`pool::MaterializerPool`] - a fixed set of workers with graceful shutdown
//! - [`retry`] - backoff shared by both halves
//! - [`metrics`] - Prometheus recorder and pipeline counters

pub mod materializer;
pub mod metrics;
pub mod pool;
pub mod purchase;
pub mod retry;

pub use materializer::{Materializer, MaterializerConfig, ProcessOutcome, WorkerState};
pub use pool::MaterializerPool;
pub use purchase::{PurchaseDecision, PurchaseDependencies, Rejection, SeckillService};
