//! vigil: a maintenance engine for record stores on a single host.
//!
//! The engine runs scheduled retention sweeps, watches disk usage with a
//! latched threshold, and escalates to an emergency remediation cascade
//! when the watched volume fills up. Policy changes are versioned and can
//! be restored.

pub mod archive;
pub mod clock;
pub mod config;
pub mod disk;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod history;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod observability;
pub mod scheduler;
pub mod settings;

#[cfg(test)]
mod tests;

pub use engine::{EngineStatus, MaintenanceEngine};
pub use error::{EngineError, EngineResult};
