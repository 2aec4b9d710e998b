//! Core data models for sensemake.
//!
//! - Records and annotations: what flows between the caller and the model
//! - Config: every resolvable parameter, loaded from TOML
//! - Errors: one taxonomy shared by clients, retry loop, and pipeline

mod config;
mod error;
mod record;

pub use config::*;
pub use error::*;
pub use record::*;
