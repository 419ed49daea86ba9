//! Scheduler (§4.7): a tick loop over `pynchy-store`'s `scheduled_tasks`
//! table that serializes task runs through the same per-workspace queue as
//! user messages via an injected [`types::TaskRunner`], plus a parallel
//! loop over configured `[cron_jobs.*]` host jobs that never touch a
//! container.
//!
//! `cron`/`interval`/`once` schedule values are evaluated against the
//! scheduler's resolved timezone (`scheduler.timezone`, else `$TZ`, else
//! `/etc/localtime`, else UTC).

pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use engine::{HostCronEngine, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use schedule::compute_next_run;
pub use types::{resolve_timezone, TaskRunOutcome, TaskRunner};
