//! queuectl — a durable, single-node background job queue.
//!
//! Jobs are shell commands persisted in a SQLite file next to the binary.
//! A pool of workers claims jobs in priority order, runs them as child
//! processes with a wall-clock timeout, and applies retry-with-backoff
//! until a job completes or lands in the dead-letter queue. All state
//! survives process restarts; a recovery sweep at startup returns jobs
//! abandoned mid-flight to the queue.
//!
//! The [`kernel`] module holds the engine (store, executor, workers,
//! dispatcher); the [`cli`] module maps command-line verbs onto it.

pub mod cli;
pub mod kernel;
