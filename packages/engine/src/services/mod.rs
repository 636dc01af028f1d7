//! Remote service collaborators, by capability.
//!
//! Each module defines an async trait for one capability plus a reqwest
//! client implementing it against the real service. In-memory fakes for all
//! of them live in [`crate::kernel::test_dependencies`].

pub mod buildbucket;
pub mod gitiles;
pub mod isolate;
pub mod issue_tracker;
pub mod swarming;
