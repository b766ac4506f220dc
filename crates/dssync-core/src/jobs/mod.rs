pub(crate) mod executor;
pub mod queue;

pub use queue::{JobKey, JobPriority, JobQueue, RefreshPriority};
