pub mod log;
pub mod publisher;

pub use publisher::{spawn, Snapshot};
