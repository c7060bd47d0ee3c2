//! Domain types shared across the engine.

mod alert;
mod disk;
mod job;
mod policy;
mod trigger;

pub use alert::*;
pub use disk::*;
pub use job::*;
pub use policy::*;
pub use trigger::*;
