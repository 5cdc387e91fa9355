//! Background job pipeline: job records, the persisted queue, and the
//! polling workers that drive the retry state machine.
//!
//! ```text
//! producer --enqueue--> [ queue (KV store) ] --dequeue--> worker
//!                                                          |
//!                      completed <--- ok ------------------+
//!                      retrying  <--- transient error -----+--> pending (tail)
//!                      failed    <--- terminal / exhausted-+
//! ```

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{Job, JobId, JobStatus, RetryPolicy};
pub use queue::{JobQueue, QueueConfig, QueueStats};
pub use worker::{JobHandler, Worker, WorkerConfig, WorkerHandle, WorkerStats};
