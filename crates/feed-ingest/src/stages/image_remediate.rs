//! ImageRemediate: normalize preingest content into the staging area
//!
//! Provider trees arrive with junk files and inconsistent extension case.
//! This stage moves content from the preingest area into staging, dropping
//! desktop litter and lowercasing extensions, and records the
//! `image_header_modification` event.

use crate::error::{IngestError, Result};
use crate::premis::EventOutcome;
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use tracing::{debug, info};

const JUNK: &[&str] = &["Thumbs.db", ".DS_Store", "desktop.ini"];

pub struct ImageRemediate;

#[async_trait]
impl Stage for ImageRemediate {
    fn identifier(&self) -> &'static str {
        "image_remediate"
    }

    fn description(&self) -> &'static str {
        "Normalize preingest content file names into the staging area"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::REMEDIATED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let preingest = volume.preingest_directory();
        if !preingest.is_dir() {
            return Err(IngestError::operation_failed_on(
                "remediate",
                preingest.display().to_string(),
                "preingest directory missing",
            ));
        }
        let staging = volume.mk_staging_directory()?;

        let mut moved = 0usize;
        let mut renamed = 0usize;
        for entry in std::fs::read_dir(&preingest)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if JUNK.contains(&name.as_str()) || name.starts_with('.') {
                debug!(file = %name, "dropping junk file");
                continue;
            }

            let normalized = normalize_name(&name);
            if normalized != name {
                renamed += 1;
            }
            std::fs::rename(entry.path(), staging.join(&normalized))?;
            moved += 1;
        }

        volume.refresh_file_caches();

        let outcome = EventOutcome::new("pass")
            .with_note(format!("{} files staged, {} renamed", moved, renamed));
        volume
            .record_premis_event("image_header_modification", None, Some(&outcome.to_xml()))
            .await?;

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            moved,
            renamed,
            "remediation complete"
        );
        Ok(())
    }

    async fn clean_success(&self, volume: &mut Volume) -> Result<()> {
        match std::fs::remove_dir_all(volume.preingest_directory()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lowercase the extension; the stem is provider-controlled and left alone
fn normalize_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}.{}", stem, ext.to_lowercase()),
        None => name.to_string(),
    }
}
