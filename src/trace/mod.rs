pub mod discover;
pub mod engine;
mod scheduler;

pub use discover::{IcmpPathDiscoverer, PathDiscoverer};
pub use engine::MonitorEngine;
