//! proctor-store — storage backends and configuration.
//!
//! Implements the core `KeyValueStore` trait on the local filesystem and
//! loads `proctor.toml` into the engine configuration.

pub mod config;
pub mod file;

pub use config::{create_store, load_config, load_config_from, ProctorConfig, StorageBackend};
pub use file::FileStore;
