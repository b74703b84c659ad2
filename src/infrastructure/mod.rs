//! Infrastructure layer - Port implementations
//!
//! Flash drivers, the storage policy layer, the image fetcher, validators,
//! status sinks and the update worker task.

pub mod drivers;
pub mod services;
pub mod tasks;
