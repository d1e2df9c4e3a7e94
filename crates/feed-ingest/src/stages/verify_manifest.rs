//! VerifyManifest: structural and fixity checks on the unpacked SIP
//!
//! Everything cheap to detect fails here, before any transformation runs:
//! unexpected files, a missing or ambiguous source METS, empty required
//! filegroups, sequence holes, and checksum mismatches.

use crate::error::{IngestError, Result};
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use feed_common::checksum::md5_file;
use tracing::info;

pub struct VerifyManifest;

#[async_trait]
impl Stage for VerifyManifest {
    fn identifier(&self) -> &'static str {
        "verify_manifest"
    }

    fn description(&self) -> &'static str {
        "Verify SIP structure and checksums against the manifest"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::MANIFEST_VERIFIED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let files = volume.all_directory_files()?;
        let pattern = volume.packagetype().valid_file_pattern.clone();

        for file in &files {
            if !pattern.is_match(file) {
                return Err(IngestError::bad_field("filename", file.clone()));
            }
        }

        // exactly one source METS
        let source_mets = volume.source_mets_file()?;

        // required filegroups must have matched something
        let specs = volume.packagetype().filegroups.clone();
        let groups = volume.file_groups()?;
        for spec in &specs {
            if spec.required {
                let empty = groups
                    .iter()
                    .find(|g| g.name == spec.name)
                    .map(|g| g.files.is_empty())
                    .unwrap_or(true);
                if empty {
                    return Err(IngestError::missing_field(format!(
                        "{} filegroup",
                        spec.name
                    )));
                }
            }
        }

        // page sequence must be 1..n without holes unless the package
        // type tolerates gaps
        if !volume.packagetype().allow_sequence_gaps {
            let pages = volume.file_groups_by_page()?;
            for (position, sequence) in pages.keys().enumerate() {
                let expected = (position + 1) as u32;
                if *sequence != expected {
                    return Err(IngestError::bad_field_actual(
                        "sequence_number",
                        format!("page {}", expected),
                        format!("gap before sequence {}", sequence),
                    ));
                }
            }
        }

        // fixity: every content file must be listed and must match
        let checksums = volume.checksums()?;
        let staging = volume.staging_directory();
        let mut verified = 0usize;

        for file in volume.all_content_files()? {
            let expected = checksums.get(&file).ok_or_else(|| {
                IngestError::missing_field_in("checksum", file.clone())
            })?;
            let actual = md5_file(staging.join(&file))?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(IngestError::bad_field_actual("checksum", file, actual));
            }
            verified += 1;
        }

        // a manifest entry whose file never arrived is as bad as a
        // mismatch
        for name in checksums.keys() {
            if !files.contains(name) {
                return Err(IngestError::missing_field_in("file", name.clone()));
            }
        }

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            files = files.len(),
            verified,
            source_mets = %source_mets,
            "manifest verified"
        );
        Ok(())
    }
}
