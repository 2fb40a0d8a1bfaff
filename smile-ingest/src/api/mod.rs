//! HTTP API handlers for smile-ingest
//!
//! Read-only: the tables change only through ingestion.

pub mod health;
pub mod tables;

pub use health::health_routes;
pub use tables::table_routes;
