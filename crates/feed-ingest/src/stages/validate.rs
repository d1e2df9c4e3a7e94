//! VolumeValidator: technical validation of content files
//!
//! UTF-8 flagged files must decode; XML-shaped files must be well-formed.
//! Format validators proper (JPEG2000, TIFF) are external black boxes;
//! this stage resolves their layered parameter overrides and hands off.
//! The `package_validation` event is recorded on success.

use crate::error::{IngestError, Result};
use crate::premis::EventOutcome;
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use tracing::{debug, info};

pub struct VolumeValidator;

#[async_trait]
impl Stage for VolumeValidator {
    fn identifier(&self) -> &'static str {
        "validate"
    }

    fn description(&self) -> &'static str {
        "Validate technical characteristics of content files"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::VALIDATED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let staging = volume.staging_directory();
        let mut checked = 0usize;

        for file in volume.utf8_files()? {
            let bytes = std::fs::read(staging.join(&file))?;
            let Ok(_) = std::str::from_utf8(&bytes) else {
                return Err(IngestError::bad_field("utf8", file));
            };
            if file.ends_with(".xml") || file.ends_with(".html") {
                let text = String::from_utf8_lossy(&bytes);
                if let Err(e) = well_formed(&text) {
                    return Err(IngestError::bad_field_actual(
                        "well-formed XML",
                        file,
                        e.to_string(),
                    ));
                }
            }
            checked += 1;
        }

        // resolve the merged parameters each configured validator runs
        // with; the validators themselves are external tools
        let validators: Vec<String> = volume
            .packagetype()
            .validation
            .keys()
            .cloned()
            .collect();
        for validator in validators {
            let params = volume.engine().get_validation_overrides(
                volume.namespace(),
                volume.pkg_type(),
                &validator,
            )?;
            debug!(validator = %validator, params = params.len(), "resolved validator overrides");
        }

        let jhove_count = volume.jhove_files()?.len();
        let outcome = EventOutcome::new("pass").with_note(format!(
            "{} files checked, {} queued for format validation",
            checked, jhove_count
        ));
        volume
            .record_premis_event("package_validation", None, Some(&outcome.to_xml()))
            .await?;

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            checked,
            "package validated"
        );
        Ok(())
    }
}

fn well_formed(xml: &str) -> std::result::Result<(), quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            quick_xml::events::Event::Eof => return Ok(()),
            _ => continue,
        }
    }
}
