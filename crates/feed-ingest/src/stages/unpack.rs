//! Unpack: extract the SIP zip into the staging area

use crate::error::{IngestError, Result};
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use tracing::info;

pub struct Unpack;

#[async_trait]
impl Stage for Unpack {
    fn identifier(&self) -> &'static str {
        "unpack"
    }

    fn description(&self) -> &'static str {
        "Extract the submitted SIP zip into the staging area"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::UNPACKED,
            // a missing or half-transferred SIP is usually transient
            failure_state: status::READY,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let sip = volume.sip_path();
        if !sip.is_file() {
            return Err(IngestError::operation_failed_on(
                "unzip",
                sip.display().to_string(),
                "SIP not found in the download area",
            ));
        }

        let target = if volume.packagetype().use_preingest {
            volume.mk_preingest_directory()?
        } else {
            volume.mk_staging_directory()?
        };

        let file = std::fs::File::open(&sip)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut extracted = 0usize;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            // flatten: providers disagree on leading directories
            let name = entry
                .name()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                continue;
            }
            let mut out = std::fs::File::create(target.join(&name))?;
            std::io::copy(&mut entry, &mut out)?;
            extracted += 1;
        }

        volume.refresh_file_caches();
        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            files = extracted,
            "SIP unpacked"
        );

        Ok(())
    }
}
