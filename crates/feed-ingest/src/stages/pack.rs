//! Pack: build the AIP zip
//!
//! Content files plus the source METS are zipped under the pairtree-
//! cleaned object name. Already-compressed formats (per the package
//! type's `uncompressed_extensions`) are stored rather than deflated.
//! Records the `zip_compression` and `zip_md5_create` events.

use crate::error::Result;
use crate::premis::EventOutcome;
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use feed_common::checksum::md5_file;
use std::io::Write;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

pub struct Pack;

#[async_trait]
impl Stage for Pack {
    fn identifier(&self) -> &'static str {
        "pack"
    }

    fn description(&self) -> &'static str {
        "Compress content files into the AIP zip archive"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::PACKED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let staging = volume.staging_directory();
        let zip_path = volume.zip_path();
        if let Some(parent) = zip_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut names = volume.all_content_files()?;
        names.push(volume.source_mets_file()?);

        let uncompressed = volume.packagetype().uncompressed_extensions.clone();
        let out = std::fs::File::create(&zip_path)?;
        let mut writer = zip::ZipWriter::new(out);

        for name in &names {
            let stored = name
                .rsplit_once('.')
                .map(|(_, ext)| uncompressed.iter().any(|u| u.eq_ignore_ascii_case(ext)))
                .unwrap_or(false);
            let options = SimpleFileOptions::default().compression_method(if stored {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            });

            writer.start_file(name.as_str(), options)?;
            writer.write_all(&std::fs::read(staging.join(name))?)?;
        }
        writer.finish()?;

        volume
            .record_premis_event("zip_compression", None, None)
            .await?;

        let digest = md5_file(&zip_path)?;
        let outcome = EventOutcome::new("pass").with_note(digest);
        volume
            .record_premis_event("zip_md5_create", None, Some(&outcome.to_xml()))
            .await?;

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            files = names.len(),
            zip = %zip_path.display(),
            "AIP zip written"
        );
        Ok(())
    }
}
