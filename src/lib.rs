pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod position;
pub mod registry;
pub mod shared;
pub mod stats;
pub mod telemetry;
pub mod tracker;
pub mod types;
pub mod venue;
