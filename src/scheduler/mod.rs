//! Concurrent batch execution.
//!
//! - **Dispatcher**: fixed-size pool of tokio workers pulling tasks from a
//!   shared queue and streaming records to a single JSONL writer
//! - **SharedPoolStats**: atomic counters shared by the workers
//! - **ProgressMonitor**: periodic progress log lines
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐
//!                  │  tasks.jsonl │
//!                  └──────┬───────┘
//!                         │
//!                  ┌──────▼───────┐
//!                  │ mpsc queue   │
//!                  └──────┬───────┘
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!    ┌─────────┐     ┌─────────┐     ┌─────────┐
//!    │ Worker 1│     │ Worker 2│     │ Worker N│
//!    └────┬────┘     └────┬────┘     └────┬────┘
//!         └───────────────┼───────────────┘
//!                  ┌──────▼───────┐
//!                  │ JSONL writer │
//!                  └──────────────┘
//! ```

pub mod dispatcher;
pub mod progress;
pub mod stats;

pub use dispatcher::{DispatchMode, DispatchSummary, Dispatcher, DispatcherConfig, KeyedLocks};
pub use progress::ProgressMonitor;
pub use stats::{PoolStats, SharedPoolStats};
