//! SourceMets: validate the provider METS and harvest its provenance
//!
//! The source METS must validate (externally when a validator is
//! configured) and parse. Event codes listed in the package type's
//! `source_premis_events_extract` are recorded into the event table here,
//! so later stages and reporting can see provider provenance without
//! re-reading the document.

use crate::error::Result;
use crate::mets::validate_xml_file;
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use tracing::{debug, info};

pub struct SourceMets;

#[async_trait]
impl Stage for SourceMets {
    fn identifier(&self) -> &'static str {
        "source_mets"
    }

    fn description(&self) -> &'static str {
        "Validate the source METS and record extracted provenance"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::SRC_METSED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let path = volume.source_mets_path()?;
        let xerces = volume.engine().config().xerces.clone();
        validate_xml_file(xerces.as_deref(), &path).await?;

        let document = volume.source_mets_xpc()?;
        let grouped = document.events_by_type();

        let extract_codes = volume.packagetype().source_premis_events_extract.clone();
        for code in extract_codes {
            let config = volume.engine().event_configuration(
                volume.namespace(),
                volume.pkg_type(),
                &code,
            )?;
            let Some(event_type) = config.event_type else {
                continue;
            };
            // latest event of the type wins; REPLACE keys on the code
            let Some(event) = grouped.get(&event_type).and_then(|e| e.last()) else {
                debug!(code = %code, "no source event of this type to extract");
                continue;
            };
            let outcome = event.outcomes.first().map(|o| o.to_xml());
            volume
                .record_premis_event(&code, Some(&event.date), outcome.as_deref())
                .await?;
        }

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            events = document.premis_events.len(),
            "source METS accepted"
        );
        Ok(())
    }
}
