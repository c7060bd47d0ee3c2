//! Job handlers run by the scheduler.
//!
//! - **Daily retention**: archives records past the live retention window.
//! - **Weekly deep clean**: the same sweep with store compaction, followed by
//!   a purge of stale temp files.
//! - **Health probe**: checks the record store and the watched volume are
//!   reachable.
//! - **Disk check**: samples disk usage and evaluates the breach latch.
//! - **Emergency cleanup**: the remediation cascade, dispatched on a latched
//!   breach.
//!
//! Handlers follow a consistent pattern:
//! 1. Read the policy snapshot from the [`JobContext`](crate::scheduler::JobContext)
//! 2. Perform a single pass
//! 3. Report recoverable failures in the outcome's `errors` instead of
//!    returning early, so partial counts survive
//!
//! Retention passes send a summary alert when the live policy enables
//! notifications and the configured flags ask for it:
//!
//! ```toml
//! [notifications]
//! notify_on_success = false
//! notify_on_failure = true
//! ```

mod emergency;
mod probes;
mod retention;

pub use emergency::EmergencyJob;
pub use probes::{DiskCheckJob, HealthProbeJob};
pub use retention::{RetentionDeps, RetentionJob, RetentionPass, SummaryFlags};
