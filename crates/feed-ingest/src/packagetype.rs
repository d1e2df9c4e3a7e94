//! Package type descriptors
//!
//! A package type declares everything the engine needs to know about one
//! content provider's SIP format: which files it may contain, how they
//! partition into logical filegroups, which stages run in which order, and
//! which PREMIS events the ingest generates or inherits from the source
//! METS. Descriptors are plain data, registered once at startup.

use crate::error::{IngestError, Result};
use crate::premis::EventConfig;
use crate::stage::status;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Volume subtype selector; picks behavior the descriptor alone can't
/// express (e.g. what counts as a page for a born-digital EPUB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeKind {
    #[default]
    Standard,
    Epub,
}

/// One logical filegroup within a SIP
#[derive(Debug, Clone)]
pub struct FileGroupSpec {
    /// Logical name: image, ocr, hocr, pdf, epub, ...
    pub name: String,
    /// File ID prefix in the assembled METS, e.g. `IMG`
    pub prefix: String,
    /// USE attribute on the METS fileGrp
    pub mets_use: String,
    /// Files belonging to this group
    pub file_pattern: Regex,
    /// SIP is rejected when a required group is empty
    pub required: bool,
    /// Group files are content (archived in the AIP zip)
    pub content: bool,
    /// Group files go through the external format validator
    pub jhove: bool,
    /// Group files must be valid UTF-8
    pub utf8: bool,
    /// Group participates in the physical struct map
    pub structmap: bool,
}

impl FileGroupSpec {
    fn new(name: &str, prefix: &str, mets_use: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            mets_use: mets_use.to_string(),
            file_pattern: re(pattern),
            required: true,
            content: true,
            jhove: false,
            utf8: false,
            structmap: true,
        }
    }

    fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn jhove(mut self) -> Self {
        self.jhove = true;
        self
    }

    fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    fn no_structmap(mut self) -> Self {
        self.structmap = false;
        self
    }
}

/// Declarative configuration for one content provider's SIP format
#[derive(Debug, Clone)]
pub struct PackageType {
    /// String primary key
    pub identifier: String,
    pub description: String,
    /// Volume subtype to instantiate
    pub volume_kind: VolumeKind,
    /// The union of filenames in a SIP must match this
    pub valid_file_pattern: Regex,
    /// Logical filegroups in declaration order
    pub filegroups: Vec<FileGroupSpec>,
    /// Identifies the source METS inside the SIP; exactly one file must match
    pub source_mets_file: Regex,
    /// Identifies the checksum manifest, when the provider ships one
    pub checksum_file: Option<Regex>,
    /// status -> stage identifier
    pub stage_map: BTreeMap<String, String>,
    /// Free key-value settings (layer 3 of the config resolver)
    pub config: BTreeMap<String, Value>,
    /// Validator parameter overrides, keyed by validator identifier
    pub validation: BTreeMap<String, BTreeMap<String, Value>>,
    /// Event codes generated during this ingest, in emission order
    pub premis_events: Vec<String>,
    /// Event codes carried over from the source METS, in emission order
    pub source_premis_events: Vec<String>,
    /// Event codes whose source events are also recorded in the database
    pub source_premis_events_extract: Vec<String>,
    /// Per-event overrides layered on the global catalog
    pub premis_overrides: BTreeMap<String, EventConfig>,
    /// printf-style template resolving to the SIP filename
    pub sip_filename_pattern: String,
    /// Extensions stored uncompressed in the AIP zip
    pub uncompressed_extensions: Vec<String>,
    /// Tolerate holes in the page sequence
    pub allow_sequence_gaps: bool,
    /// Unpack into the preingest area for remediation first
    pub use_preingest: bool,
    /// Stage oversized volumes on disk rather than the RAM staging root
    pub download_to_disk: bool,
}

impl PackageType {
    /// Resolve the SIP filename for an object identifier
    pub fn sip_filename(&self, objid: &str) -> String {
        self.sip_filename_pattern.replace("%s", objid)
    }

    /// The filegroup spec with the given logical name
    pub fn filegroup(&self, name: &str) -> Option<&FileGroupSpec> {
        self.filegroups.iter().find(|g| g.name == name)
    }

    /// Event configuration for a code: the global catalog entry overlaid
    /// with this package type's override, if any.
    pub fn get_event_configuration(
        &self,
        code: &str,
        catalog: &BTreeMap<String, EventConfig>,
    ) -> Result<EventConfig> {
        let base = catalog
            .get(code)
            .cloned()
            .ok_or_else(|| IngestError::config(format!("no PREMIS catalog entry for '{}'", code)))?;
        Ok(match self.premis_overrides.get(code) {
            Some(over) => base.merged_with(over),
            None => base,
        })
    }

    /// Startup validation: stage references resolve, filegroup names are
    /// unique, and every referenced event code exists in the catalog.
    pub fn validate(
        &self,
        stage_exists: &dyn Fn(&str) -> bool,
        event_exists: &dyn Fn(&str) -> bool,
    ) -> Result<()> {
        for (status, stage_id) in &self.stage_map {
            if !stage_exists(stage_id) {
                return Err(IngestError::unknown_subclass(
                    "Stage",
                    format!("{} (stage_map[{}] of {})", stage_id, status, self.identifier),
                ));
            }
        }

        let mut names = std::collections::BTreeSet::new();
        for group in &self.filegroups {
            if !names.insert(group.name.clone()) {
                return Err(IngestError::config(format!(
                    "duplicate filegroup '{}' in package type {}",
                    group.name, self.identifier
                )));
            }
        }

        for code in self
            .premis_events
            .iter()
            .chain(&self.source_premis_events)
            .chain(&self.source_premis_events_extract)
        {
            if !event_exists(code) {
                return Err(IngestError::config(format!(
                    "package type {} references unknown PREMIS event code '{}'",
                    self.identifier, code
                )));
            }
        }

        Ok(())
    }
}

fn re(pattern: &str) -> Regex {
    // Descriptor patterns are compile-time constants; a bad one is a
    // programmer error.
    Regex::new(pattern).expect("invalid descriptor regex")
}

fn base_stage_map() -> BTreeMap<String, String> {
    [
        (status::READY, "unpack"),
        (status::UNPACKED, "verify_manifest"),
        (status::MANIFEST_VERIFIED, "source_mets"),
        (status::SRC_METSED, "validate"),
        (status::VALIDATED, "pack"),
        (status::PACKED, "mets"),
        (status::METSED, "handle"),
        (status::HANDLED, "collate"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Package types shipped with the engine
pub fn builtins() -> Vec<PackageType> {
    vec![simple(), yale(), epub()]
}

/// Generic single-volume package: 8-digit sequence-numbered images with
/// matching plain-text OCR and a `mets.xml` manifest.
fn simple() -> PackageType {
    PackageType {
        identifier: "simple".to_string(),
        description: "Generic sequence-numbered page images with plain-text OCR".to_string(),
        volume_kind: VolumeKind::Standard,
        valid_file_pattern: re(r"^(mets\.xml|checksum\.md5|\d{8}\.(jp2|tif|txt))$"),
        filegroups: vec![
            FileGroupSpec::new("image", "IMG", "image", r"^\d{8}\.(jp2|tif)$").jhove(),
            FileGroupSpec::new("ocr", "OCR", "OCR", r"^\d{8}\.txt$").utf8(),
        ],
        source_mets_file: re(r"^mets\.xml$"),
        checksum_file: Some(re(r"^checksum\.md5$")),
        stage_map: base_stage_map(),
        config: BTreeMap::new(),
        validation: BTreeMap::new(),
        premis_events: vec![
            "package_validation".to_string(),
            "zip_compression".to_string(),
            "zip_md5_create".to_string(),
            "ingestion".to_string(),
        ],
        source_premis_events: vec!["capture".to_string(), "image_compression".to_string()],
        source_premis_events_extract: vec![],
        premis_overrides: BTreeMap::new(),
        sip_filename_pattern: "%s.zip".to_string(),
        uncompressed_extensions: vec!["jp2".to_string()],
        allow_sequence_gaps: false,
        use_preingest: false,
        download_to_disk: false,
    }
}

/// Yale submissions: `Yale_<objid>.xml` source METS beside
/// `<objid>_NNNNNN.{jp2,txt,xml}` page triples, remediated through the
/// preingest area.
fn yale() -> PackageType {
    let mut stage_map = base_stage_map();
    stage_map.insert(status::READY.to_string(), "unpack".to_string());
    stage_map.insert(status::UNPACKED.to_string(), "image_remediate".to_string());
    stage_map.insert(status::REMEDIATED.to_string(), "verify_manifest".to_string());

    PackageType {
        identifier: "yale".to_string(),
        description: "Yale University Library page images with OCR and coordinate OCR".to_string(),
        volume_kind: VolumeKind::Standard,
        valid_file_pattern: re(r"^(Yale_[A-Za-z0-9]+\.xml|[A-Za-z0-9]+_\d{6}\.(jp2|txt|xml))$"),
        filegroups: vec![
            FileGroupSpec::new("image", "IMG", "image", r"^[A-Za-z0-9]+_\d{6}\.jp2$").jhove(),
            FileGroupSpec::new("ocr", "OCR", "OCR", r"^[A-Za-z0-9]+_\d{6}\.txt$").utf8(),
            FileGroupSpec::new("hocr", "HTML", "coordOCR", r"^[A-Za-z0-9]+_\d{6}\.xml$")
                .optional()
                .utf8(),
        ],
        source_mets_file: re(r"^Yale_[A-Za-z0-9]+\.xml$"),
        checksum_file: None,
        stage_map,
        config: BTreeMap::new(),
        validation: BTreeMap::new(),
        premis_events: vec![
            "image_header_modification".to_string(),
            "package_validation".to_string(),
            "zip_compression".to_string(),
            "zip_md5_create".to_string(),
            "ingestion".to_string(),
        ],
        source_premis_events: vec!["capture".to_string(), "image_compression".to_string()],
        source_premis_events_extract: vec!["capture".to_string()],
        premis_overrides: BTreeMap::new(),
        sip_filename_pattern: "%s.zip".to_string(),
        uncompressed_extensions: vec!["jp2".to_string()],
        allow_sequence_gaps: false,
        use_preingest: true,
        download_to_disk: false,
    }
}

/// Born-digital EPUB submissions; OCR text is extracted from the
/// publisher markup rather than shipped in the SIP.
fn epub() -> PackageType {
    let mut stage_map = base_stage_map();
    stage_map.insert(status::UNPACKED.to_string(), "extract_ocr".to_string());
    stage_map.insert(
        status::OCR_EXTRACTED.to_string(),
        "verify_manifest".to_string(),
    );

    PackageType {
        identifier: "epub".to_string(),
        description: "Born-digital EPUB with extracted plain-text OCR".to_string(),
        volume_kind: VolumeKind::Epub,
        valid_file_pattern: re(r"^(mets\.xml|checksum\.md5|[A-Za-z0-9_-]+\.epub|\d{8}\.txt)$"),
        filegroups: vec![
            FileGroupSpec::new("epub", "EPUB", "EPUB", r"^[A-Za-z0-9_-]+\.epub$").no_structmap(),
            FileGroupSpec::new("ocr", "OCR", "OCR", r"^\d{8}\.txt$")
                .optional()
                .utf8(),
        ],
        source_mets_file: re(r"^mets\.xml$"),
        checksum_file: Some(re(r"^checksum\.md5$")),
        stage_map,
        config: BTreeMap::new(),
        validation: BTreeMap::new(),
        premis_events: vec![
            "ocr_normalize".to_string(),
            "package_validation".to_string(),
            "zip_compression".to_string(),
            "zip_md5_create".to_string(),
            "ingestion".to_string(),
        ],
        source_premis_events: vec![],
        source_premis_events_extract: vec![],
        premis_overrides: BTreeMap::new(),
        sip_filename_pattern: "%s.zip".to_string(),
        uncompressed_extensions: vec!["epub".to_string()],
        allow_sequence_gaps: true,
        use_preingest: false,
        download_to_disk: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_event_catalog;

    #[test]
    fn test_builtins_have_unique_identifiers() {
        let types = builtins();
        let mut seen = std::collections::BTreeSet::new();
        for pt in &types {
            assert!(seen.insert(pt.identifier.clone()));
        }
    }

    #[test]
    fn test_sip_filename_substitution() {
        let pt = simple();
        assert_eq!(pt.sip_filename("39015012345678"), "39015012345678.zip");
    }

    #[test]
    fn test_yale_patterns_partition_the_scenario_sip() {
        let pt = yale();
        let files = [
            "Yale_39002X.xml",
            "39002X_000001.jp2",
            "39002X_000001.txt",
            "39002X_000001.xml",
        ];
        for f in &files {
            assert!(pt.valid_file_pattern.is_match(f), "{} should be valid", f);
        }
        assert!(pt.source_mets_file.is_match("Yale_39002X.xml"));
        assert!(!pt.source_mets_file.is_match("39002X_000001.xml"));

        let hocr = pt.filegroup("hocr").unwrap();
        assert!(hocr.file_pattern.is_match("39002X_000001.xml"));
        assert!(!hocr.file_pattern.is_match("Yale_39002X.xml"));
    }

    #[test]
    fn test_event_configuration_merge() {
        let mut pt = simple();
        pt.premis_overrides.insert(
            "package_validation".to_string(),
            EventConfig {
                detail: Some("Validation with provider profile".to_string()),
                ..Default::default()
            },
        );

        let catalog = default_event_catalog();
        let merged = pt
            .get_event_configuration("package_validation", &catalog)
            .unwrap();
        assert_eq!(
            merged.detail.as_deref(),
            Some("Validation with provider profile")
        );
        // untouched fields come from the catalog
        assert_eq!(merged.event_type.as_deref(), Some("validation"));
    }

    #[test]
    fn test_validate_rejects_unknown_stage() {
        let mut pt = simple();
        pt.stage_map
            .insert("ready".to_string(), "no_such_stage".to_string());

        let result = pt.validate(&|id| id != "no_such_stage", &|_| true);
        assert!(matches!(
            result.unwrap_err(),
            IngestError::UnknownSubclass { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_event_code() {
        let pt = simple();
        let result = pt.validate(&|_| true, &|code| code == "ingestion");
        assert!(result.is_err());
    }
}
