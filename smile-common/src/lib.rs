//! # SMILE Lakehouse Common Library
//!
//! Shared code for the SMILE lakehouse ingest service:
//! - Error type used for infrastructure failures
//! - Bootstrap configuration (TOML file + compiled defaults)
//! - Pipeline event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent};
