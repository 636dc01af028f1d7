//! Engine infrastructure: persistence, task queue, shared caches, and the
//! collaborator container injected into everything that talks to the
//! outside world.

mod deps;
pub mod isolate_cache;
pub mod runner;
pub mod store;
pub mod task_queue;
pub mod test_dependencies;

pub use deps::EngineDeps;
pub use isolate_cache::{IsolateCache, IsolateRef, PendingBuilds};
pub use runner::{TickRunner, TickRunnerConfig};
pub use store::JobStore;
pub use task_queue::{ClaimedTask, EnqueueResult, TaskQueue, TaskQueueError, TaskSpec};
