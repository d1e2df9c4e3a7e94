//! METS document handling
//!
//! [`read`] extracts what the engine needs from source and repository METS
//! documents: PREMIS events, file checksums, the MARC descriptive record,
//! and page labels. [`write`] is the event-level XML builder the assembler
//! drives. Namespace prefixes vary across providers, so all extraction
//! matches on local names.

pub mod read;
pub mod write;

pub use read::{MarcFragment, MetsDocument, PageData};
pub use write::XmlBuilder;

use crate::error::{IngestError, Result};
use std::path::Path;

/// Validate a METS file, preferring the configured external validator.
///
/// The external tool contract: a subprocess invoked with the file path,
/// exit 0 on pass, diagnostics on stdout/stderr. When no validator is
/// configured the document is re-parsed for well-formedness instead.
pub async fn validate_xml_file(xerces: Option<&str>, path: &Path) -> Result<()> {
    match xerces {
        Some(tool) => {
            let output = tokio::process::Command::new(tool)
                .arg(path)
                .output()
                .await
                .map_err(|e| IngestError::operation_failed_on("xerces", tool, e.to_string()))?;

            if output.status.success() {
                Ok(())
            } else {
                let mut detail = String::from_utf8_lossy(&output.stdout).to_string();
                detail.push_str(&String::from_utf8_lossy(&output.stderr));
                Err(IngestError::InvalidMets {
                    path: path.to_path_buf(),
                    detail,
                })
            }
        }
        None => {
            let raw = std::fs::read_to_string(path)?;
            check_well_formed(&raw).map_err(|e| IngestError::InvalidMets {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    }
}

/// Walk a document start to finish, surfacing the first parse error
fn check_well_formed(xml: &str) -> std::result::Result<(), quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            quick_xml::events::Event::Eof => return Ok(()),
            _ => continue,
        }
    }
}
