//! `wellcast-core`: configuration and shared error type for the Wellcast
//! workflow scheduler.

pub mod config;
pub mod error;

pub use config::WellcastConfig;
pub use error::{CoreError, Result};
