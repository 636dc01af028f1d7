//! Performance bisection engine.
//!
//! Given a "good" and a "bad" source revision (optionally with a patch) and a
//! test configuration, the engine isolates the commit(s) that caused a
//! statistically significant change in a performance or functional metric.
//! It repeatedly builds, runs, and measures code at chosen revisions,
//! inserting midpoint revisions between any adjacent pair whose results
//! differ significantly, until a single-commit culprit is isolated or the
//! revision range becomes non-linear.
//!
//! # Architecture
//!
//! ```text
//! POST /api/new ──► Job ──► TaskQueue (named task, 10s countdown)
//!                            │
//!                            ▼
//!                       TickRunner
//!                            │
//!                            ├─► JobState::explore()      (add midpoints)
//!                            ├─► JobState::schedule_work() (poll executions)
//!                            └─► reschedule or complete, persist
//! ```
//!
//! Each tick is a single cooperative pass: every non-terminal execution is
//! polled at most once, performing at most one remote call. All state needed
//! to resume (build ids, task ids, bot assignments) lives on the executions
//! and is persisted with the job, so re-delivered ticks never re-dispatch
//! work that was already recorded.

pub mod args;
pub mod attempt;
pub mod config;
pub mod job;
pub mod kernel;
pub mod model;
pub mod quest;
pub mod server;
pub mod services;
pub mod state;
pub mod stats;
