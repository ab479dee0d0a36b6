//! flowgate-jobs: periodic maintenance shared by every running instance.
//!
//! Each job runs on its own interval in every instance, but a named
//! advisory lock in the state store lets only one instance execute a given
//! round. The lock is leased for one interval, so a crashed holder blocks
//! the job for at most one round.
//!
//! ```text
//! every interval:
//!     release own expired lock
//!     acquire job_locks[name] (lease = interval)
//!     acquired? → run()   else → skip
//! ```

pub mod jobs;
pub mod runner;

pub use jobs::{CorrelationCleanup, EventRetention, RolloutTick};
pub use runner::{Job, JobRunner};
