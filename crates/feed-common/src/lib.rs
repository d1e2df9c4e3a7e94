//! Shared building blocks for the Feed ingest pipeline.
//!
//! This crate holds the pieces every Feed component needs: error types,
//! logging initialization, MD5 checksum helpers, and the pairtree encoding
//! used by the object store layout.

pub mod checksum;
pub mod error;
pub mod logging;
pub mod pairtree;

pub use error::{CommonError, Result};
