//! snapctl library
//!
//! Backs up and restores Cassandra keyspaces to object storage on top of
//! `snapshot-core`: SSH transport, a Cassandra node driver, a directory
//! backed object store, configuration and logging.

pub mod app;
pub mod collab;
pub mod config;
pub mod daemon;
pub mod utils;

pub use app::App;
pub use config::Config;
pub use utils::errors::CtlError;
