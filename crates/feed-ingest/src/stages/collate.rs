//! Collate: install the AIP into the pairtree object store
//!
//! The METS and zip are placed atomically (copy to a temp name, then
//! rename) under `obj_dir/<namespace>/<ppath>/<pt_objid>/`, with a
//! symlink layer mirroring the path when `link_dir` differs from
//! `obj_dir`. A pre-existing object directory marks the ingest as a
//! repeat; the stage still succeeds and the ingest log records it.

use crate::db;
use crate::error::{IngestError, Result};
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

pub struct Collate;

#[async_trait]
impl Stage for Collate {
    fn identifier(&self) -> &'static str {
        "collate"
    }

    fn description(&self) -> &'static str {
        "Install the AIP into the pairtree object store"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::COLLATED,
            // object-store hiccups are usually transient
            failure_state: status::READY,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let mets_src = volume.mets_path();
        let zip_src = volume.zip_path();
        let object_dir = volume.object_directory();

        let is_repeat = object_dir.is_dir() || volume.repository_symlink().is_some();

        std::fs::create_dir_all(&object_dir)?;

        // the symlink layer mirrors the canonical path
        let config = volume.engine().config();
        if config.repository.link_dir != config.repository.obj_dir {
            let link = volume.link_directory();
            if let Some(parent) = link.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if std::fs::symlink_metadata(&link).is_err() {
                #[cfg(unix)]
                std::os::unix::fs::symlink(&object_dir, &link)?;
            }
        }

        let mut missing = Vec::new();
        for path in [&mets_src, &zip_src] {
            if !path.is_file() {
                missing.push(path.display().to_string());
            }
        }
        if !object_dir.is_dir() {
            missing.push(object_dir.display().to_string());
        }
        if !missing.is_empty() {
            return Err(IngestError::operation_failed(
                "collate",
                format!("missing paths: {}", missing.join(", ")),
            ));
        }

        let pt_objid = volume.pt_objid();
        install(&mets_src, &object_dir.join(format!("{}.mets.xml", pt_objid)))?;
        install(&zip_src, &object_dir.join(format!("{}.zip", pt_objid)))?;

        db::log_ingest_success(
            volume.engine().pool(),
            volume.namespace(),
            volume.objid(),
            is_repeat,
        )
        .await?;

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            is_repeat,
            object_dir = %object_dir.display(),
            "AIP collated"
        );
        Ok(())
    }

    async fn clean_always(&self, volume: &mut Volume) -> Result<()> {
        super::remove_file_quiet(&volume.mets_path())?;
        super::remove_file_quiet(&volume.zip_path())
    }

    async fn clean_success(&self, volume: &mut Volume) -> Result<()> {
        volume.clear_premis_events().await?;
        volume.remove_download()?;
        volume.clean_all()
    }
}

/// Copy through a temp name then rename, so a reader never sees a
/// half-written archive file
fn install(src: &Path, dest: &Path) -> Result<()> {
    let tmp = dest.with_extension("tmp");
    std::fs::copy(src, &tmp)?;
    std::fs::rename(&tmp, dest)?;
    Ok(())
}
