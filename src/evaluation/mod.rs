//! Correctness evaluation.
//!
//! For each task the [`Evaluator`] runs, against one repository handle:
//!
//! ```text
//! prepare → build
//! clean → test                               (before)
//! clean → apply test_patch → test            (after)
//! clean → apply test_patch, patch → test     (gold)
//! ```
//!
//! and derives a [`CorrectnessVerdict`] from the `after` and `gold` reports.
//! Results accumulate in per-phase structs and end up in one
//! [`TaskOutcome`], which renders the output record.

pub mod outcome;
pub mod protocol;
pub mod verdict;

pub use outcome::{BuildResult, OutcomeStatus, TaskOutcome, TestPhaseResult, SKIP_NOT_BUILT};
pub use protocol::Evaluator;
pub use verdict::{CorrectnessVerdict, TestSets};
