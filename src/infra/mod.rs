//! Infrastructure layer: config, logging, secret handling, and the offline store.

pub mod config;
pub mod contracts;
pub mod error;
pub mod logging;
pub mod memory_store;
pub mod secrets;
