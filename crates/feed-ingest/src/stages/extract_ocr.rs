//! ExtractOcr: derive plain-text OCR from EPUB markup
//!
//! Born-digital EPUBs carry no page text files. This stage opens the EPUB
//! (itself a zip), walks its XHTML chapters in reading order, strips
//! markup, and writes one sequence-numbered `.txt` per chapter so the rest
//! of the pipeline can treat chapters as pages.

use crate::error::{IngestError, Result};
use crate::premis::EventOutcome;
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Read, Write};
use tracing::info;

pub struct ExtractOcr;

#[async_trait]
impl Stage for ExtractOcr {
    fn identifier(&self) -> &'static str {
        "extract_ocr"
    }

    fn description(&self) -> &'static str {
        "Extract plain-text OCR from EPUB chapter markup"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::OCR_EXTRACTED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let epub_name = volume
            .file_groups()?
            .into_iter()
            .find(|g| g.name == "epub")
            .and_then(|g| g.files.into_iter().next())
            .ok_or_else(|| IngestError::missing_field("epub file"))?;

        let staging = volume.staging_directory();
        let file = std::fs::File::open(staging.join(&epub_name))?;
        let mut archive = zip::ZipArchive::new(file)?;

        // chapters in archive order; EPUB spines name files in reading order
        let mut chapters: Vec<String> = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
            .filter(|name| name.ends_with(".xhtml") || name.ends_with(".html"))
            .collect();
        chapters.sort();

        if chapters.is_empty() {
            return Err(IngestError::missing_field_in("XHTML chapters", epub_name));
        }

        let mut generated = Vec::new();
        for (index, chapter) in chapters.iter().enumerate() {
            let mut markup = String::new();
            archive.by_name(chapter)?.read_to_string(&mut markup)?;

            let text = markup_text(&markup);
            let out_name = format!("{:08}.txt", index + 1);
            std::fs::write(staging.join(&out_name), text)?;
            generated.push(out_name);
        }

        // the manifest must stay honest about files created after unpack
        if let Some(pattern) = volume.packagetype().checksum_file.clone() {
            let manifest = volume
                .all_directory_files()?
                .into_iter()
                .find(|f| pattern.is_match(f));
            if let Some(manifest) = manifest {
                let mut out = std::fs::OpenOptions::new()
                    .append(true)
                    .open(staging.join(&manifest))?;
                for name in &generated {
                    let digest = feed_common::checksum::md5_file(staging.join(name))?;
                    writeln!(out, "{}  {}", digest, name)?;
                }
            }
        }

        volume.refresh_file_caches();

        let outcome =
            EventOutcome::new("pass").with_note(format!("{} chapters extracted", chapters.len()));
        volume
            .record_premis_event("ocr_normalize", None, Some(&outcome.to_xml()))
            .await?;

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            chapters = chapters.len(),
            "OCR extracted"
        );
        Ok(())
    }
}

/// Concatenated text content of a markup document, one line per text node.
/// Lenient: extraction stops at the first parse error rather than failing
/// the stage over sloppy publisher markup.
fn markup_text(markup: &str) -> String {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(true);

    let mut out = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                if let Ok(text) = t.unescape() {
                    if !text.trim().is_empty() {
                        out.push_str(text.trim());
                        out.push('\n');
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markup_text_strips_tags() {
        let xhtml = r#"<html><body><h1>Chapter 1</h1><p>It was a <b>dark</b> night.</p></body></html>"#;
        let text = markup_text(xhtml);
        assert_eq!(text, "Chapter 1\nIt was a\ndark\nnight.\n");
    }

    #[test]
    fn test_markup_text_tolerates_truncation() {
        let text = markup_text("<html><p>kept</p><broken");
        assert!(text.contains("kept"));
    }
}
