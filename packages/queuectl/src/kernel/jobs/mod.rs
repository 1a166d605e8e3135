//! Job lifecycle engine.
//!
//! - [`store::JobStore`] — durable persistence and the atomic claim
//! - [`config::ConfigRegistry`] — runtime settings in the `meta` table
//! - [`executor`] — subprocess supervision with timeout enforcement
//! - [`worker::Worker`] — the claim/execute/finalize loop
//! - [`dispatcher::Dispatcher`] — pool lifecycle and CLI-facing operations
//! - [`recovery`] — startup sweep for jobs abandoned in `processing`
//!
//! # Architecture
//!
//! ```text
//! CLI ──► Dispatcher ──► JobStore (enqueue / dlq_retry / show)
//!
//! Worker loop
//!     ├─► JobStore.pick_and_lock()        (atomic claim)
//!     ├─► executor::execute(job)          (sh -c, captured output, timeout)
//!     ├─► JobStore.record_trace()
//!     └─► JobStore.finalize(outcome)      (completed / retry / dead)
//!
//! recovery::sweep runs once at startup, before any worker.
//! ```

pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod job;
pub mod recovery;
pub mod store;
pub mod worker;

pub use dispatcher::{Dispatcher, EngineError, ReplayOutcome};
pub use executor::ExecResult;
pub use job::{Job, JobOutcome, JobState};
pub use store::JobStore;
pub use worker::{Tick, Worker};
