//! # ILoveMusic Common Library
//!
//! Shared code for the ILoveMusic pipeline and any host that drives it:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Track records exchanged across the host boundary

pub mod config;
pub mod error;
pub mod models;

pub use error::{Error, Result};
pub use models::{ExportOutcome, TrackIdGenerator, TrackRecord};
