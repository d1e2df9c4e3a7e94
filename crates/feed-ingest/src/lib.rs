//! Feed ingest engine
//!
//! The orchestration core of the Feed preservation pipeline. Submitted
//! information packages (SIPs) from many content providers are validated,
//! normalized, and repackaged as archival information packages (AIPs): a
//! zip of content plus a METS document carrying merged PREMIS provenance.
//! Finished AIPs land in a pairtree object store.
//!
//! The moving parts:
//!
//! - **Descriptors** ([`namespace`], [`packagetype`]): immutable per-provider
//!   configuration, registered with the [`registry::Engine`] at startup
//! - **Config resolver** ([`registry`]): layered key lookup across
//!   namespace, package type, and the global configuration
//! - **[`volume::Volume`]**: the runtime object for one item being ingested
//! - **Stages** ([`stage`], [`stages`]): declarative state machine; each
//!   stage names its success and failure states statically
//! - **[`runner`]**: drives volumes through the stage map, one stage per
//!   job, checkpointing through the queue callback
//! - **METS assembly** ([`mets`], [`stages::assemble`]): merges historical,
//!   source, and freshly generated PREMIS events without duplication

pub mod config;
pub mod db;
pub mod error;
pub mod mets;
pub mod namespace;
pub mod packagetype;
pub mod premis;
pub mod registry;
pub mod runner;
pub mod stage;
pub mod stages;
pub mod volume;

pub use config::FeedConfig;
pub use error::{IngestError, Result};
pub use registry::Engine;
pub use volume::Volume;

/// Crate version, used by the CLI banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
