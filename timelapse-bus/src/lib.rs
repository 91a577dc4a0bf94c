pub mod error;
pub mod event;
pub mod job;
pub mod overlay;
pub mod palette;
pub mod pipeline;
pub mod placers;
pub mod queue;
pub mod stage;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use error::{JobError, PipelineError, QueueClosed};
pub use event::{EventBus, LogLevel, PipelineEvent, StageWorkers};
pub use job::{Payload, SaveRecord, SaveType, SnapshotId, SnapshotJob, StageKind, WorkerStatus};
pub use pipeline::{Orchestrator, PipelineState, PoolSizes, RunConfig, SkipFilter, StageSet};
pub use queue::JobQueue;
pub use stats::{SaveStatus, StatsAggregator, StatsSnapshot};
pub use worker::{Outlet, Stage, WorkerPool, WorkerView};
