//! Utility modules for snapctl.

pub mod errors;
pub mod logger;

pub use errors::{CtlError, Result};
