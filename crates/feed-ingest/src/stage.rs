//! Stage contract
//!
//! A stage is one unit of pipeline work. Its success and failure states are
//! declared statically, which is what makes the pipeline a declarative
//! state machine: the runner never computes transitions, it reads them.

use crate::error::Result;
use crate::volume::Volume;
use async_trait::async_trait;

/// Volume status identifiers used by the built-in stage maps
pub mod status {
    pub const READY: &str = "ready";
    pub const UNPACKED: &str = "unpacked";
    pub const REMEDIATED: &str = "remediated";
    pub const OCR_EXTRACTED: &str = "ocr_extracted";
    pub const MANIFEST_VERIFIED: &str = "manifest_verified";
    pub const SRC_METSED: &str = "src_metsed";
    pub const VALIDATED: &str = "validated";
    pub const PACKED: &str = "packed";
    pub const METSED: &str = "metsed";
    pub const HANDLED: &str = "handled";
    pub const COLLATED: &str = "collated";
    pub const PUNTED: &str = "punted";
}

/// Statically declared transitions for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageInfo {
    pub success_state: &'static str,
    pub failure_state: &'static str,
}

/// One unit of pipeline work over a volume.
///
/// `run` either fully completes or returns a typed error; the runner
/// converts errors into the declared failure state and a journal row.
/// Cleanup hooks run after `run`: `clean_always` on every outcome, then
/// `clean_success` or `clean_failure`.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Registry key, also used in the stage maps
    fn identifier(&self) -> &'static str;

    /// Human-readable description for diagnostics
    fn description(&self) -> &'static str;

    /// Declared transitions. Must be pure: no I/O, no mutation.
    fn stage_info(&self) -> StageInfo;

    /// Execute the stage against a volume
    async fn run(&self, volume: &mut Volume) -> Result<()>;

    async fn clean_always(&self, _volume: &mut Volume) -> Result<()> {
        Ok(())
    }

    async fn clean_success(&self, _volume: &mut Volume) -> Result<()> {
        Ok(())
    }

    async fn clean_failure(&self, _volume: &mut Volume) -> Result<()> {
        Ok(())
    }
}

/// Constructor registered for each stage identifier
pub type StageCtor = fn() -> Box<dyn Stage>;

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("identifier", &self.identifier())
            .finish()
    }
}
