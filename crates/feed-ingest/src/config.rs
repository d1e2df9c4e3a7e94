//! Configuration management
//!
//! `FeedConfig` is loaded once at startup from the YAML file named by the
//! `FEED_CONFIG` environment variable and validated before anything else
//! runs. Typed sections cover the keys the engine reads directly; the free
//! `globals` map is the lowest-priority layer of the config resolver.

use crate::error::{IngestError, Result};
use crate::premis::EventConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default worker count for the ingest pool
pub const DEFAULT_THREADS: usize = 4;

/// Default punt threshold: a volume failing this many times is released
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Default database URL for local development
pub const DEFAULT_DATABASE_URL: &str = "sqlite://feed.db";

/// Default handle prefix for minted handles
pub const DEFAULT_HANDLE_PREFIX: &str = "2027";

/// Top-level Feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub staging: StagingConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub handle: HandleConfig,
    /// JIRA ticketing endpoint; reconciliation runs out-of-process
    #[serde(default)]
    pub jira: Option<JiraConfig>,
    /// Path to the external XML validator; well-formedness is checked
    /// in-process when unset
    #[serde(default)]
    pub xerces: Option<String>,
    /// Public base URL minted handles resolve to
    #[serde(default = "default_repo_url_base")]
    pub repo_url_base: String,
    /// Global PREMIS event catalog, keyed by event code
    #[serde(default = "default_event_catalog")]
    pub premis: BTreeMap<String, EventConfig>,
    /// Free key-value map: layer 4 of the config resolver
    #[serde(default)]
    pub globals: BTreeMap<String, serde_json::Value>,
}

/// Staging area roots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Unpacked SIP contents and assembled METS files
    pub ingest: PathBuf,
    /// Pre-remediation unpack area for package types that need it
    pub preingest: PathBuf,
    /// Where provider SIP zips arrive
    pub download: PathBuf,
    /// Scratch area for remote fetches
    pub fetch: PathBuf,
    /// Assembled AIP zips awaiting collation
    pub zipfile: PathBuf,
    /// Disk-backed roots symlinked under the (RAM) staging roots for
    /// oversized volumes
    #[serde(default)]
    pub disk: DiskStagingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskStagingConfig {
    pub ingest: Option<PathBuf>,
    pub preingest: Option<PathBuf>,
}

/// Object store layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Canonical pairtree root
    pub obj_dir: PathBuf,
    /// Symlink tree root; equal to obj_dir when no link layer is wanted
    pub link_dir: PathBuf,
}

/// Runner policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Terminal states the scheduler never re-dispatches
    pub release_states: Vec<String>,
    /// Failure count at which a volume is punted regardless of the
    /// stage's declared failure state
    pub max_failures: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            release_states: vec!["collated".to_string(), "punted".to_string()],
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub threads: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
        }
    }
}

/// Database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("FEED_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
        }
    }
}

/// Handle service parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleConfig {
    pub prefix: String,
    pub root_admin: String,
    pub local_admin: String,
    #[serde(default)]
    pub database: Option<HandleDatabaseConfig>,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_HANDLE_PREFIX.to_string(),
            root_admin: "0.NA/2027".to_string(),
            local_admin: "200:0.NA/2027".to_string(),
            database: None,
        }
    }
}

/// Connection details for an external handle database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleDatabaseConfig {
    pub datasource: String,
    pub username: String,
    pub password: String,
}

/// JIRA ticketing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    pub wsdl: String,
    pub username: String,
    pub password: String,
}

fn default_repo_url_base() -> String {
    "https://babel.repository.example.edu/cgi/pt?id=".to_string()
}

impl FeedConfig {
    /// Load configuration from the file named by `FEED_CONFIG`
    pub fn load() -> Result<Self> {
        let path = std::env::var("FEED_CONFIG").map_err(|_| {
            IngestError::config("FEED_CONFIG is not set; point it at the feed YAML config")
        })?;
        Self::load_from(&path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("cannot read config file {}: {}", path, e))
        })?;
        let config: FeedConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dataset.threads == 0 {
            return Err(IngestError::config("dataset.threads must be greater than 0"));
        }
        if self.daemon.release_states.is_empty() {
            return Err(IngestError::config("daemon.release_states cannot be empty"));
        }
        if self.database.url.is_empty() {
            return Err(IngestError::config("database.url cannot be empty"));
        }
        for section in [
            ("staging.ingest", &self.staging.ingest),
            ("staging.download", &self.staging.download),
            ("staging.zipfile", &self.staging.zipfile),
        ] {
            if section.1.as_os_str().is_empty() {
                return Err(IngestError::config(format!("{} cannot be empty", section.0)));
            }
        }
        Ok(())
    }

    /// Config rooted under a single scratch directory; used by tests and
    /// local smoke runs.
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            staging: StagingConfig {
                ingest: root.join("ingest"),
                preingest: root.join("preingest"),
                download: root.join("download"),
                fetch: root.join("fetch"),
                zipfile: root.join("zipfile"),
                disk: DiskStagingConfig::default(),
            },
            repository: RepositoryConfig {
                obj_dir: root.join("obj"),
                link_dir: root.join("obj"),
            },
            daemon: DaemonConfig::default(),
            dataset: DatasetConfig::default(),
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            handle: HandleConfig::default(),
            jira: None,
            xerces: None,
            repo_url_base: default_repo_url_base(),
            premis: default_event_catalog(),
            globals: BTreeMap::new(),
        }
    }
}

fn catalog_entry(
    event_type: &str,
    detail: &str,
    executor: &str,
    tools: &[&str],
) -> EventConfig {
    EventConfig {
        event_type: Some(event_type.to_string()),
        detail: Some(detail.to_string()),
        executor: Some(executor.to_string()),
        executor_type: Some("MARC21 Code".to_string()),
        tools: tools.iter().map(|t| t.to_string()).collect(),
        eventid_override: None,
    }
}

/// Built-in PREMIS event catalog. A config file may extend or replace it.
pub fn default_event_catalog() -> BTreeMap<String, EventConfig> {
    let mut catalog = BTreeMap::new();

    catalog.insert(
        "ingestion".to_string(),
        catalog_entry(
            "ingestion",
            "Ingestion of digital object into the repository",
            "DLPS",
            &["FEED"],
        ),
    );
    catalog.insert(
        "zip_compression".to_string(),
        catalog_entry(
            "compression",
            "Compression of content files into zip archive",
            "DLPS",
            &["FEED", "ZIP"],
        ),
    );
    catalog.insert(
        "zip_md5_create".to_string(),
        catalog_entry(
            "message digest calculation",
            "Calculation of MD5 checksum for zip archive",
            "DLPS",
            &["FEED"],
        ),
    );
    catalog.insert(
        "package_validation".to_string(),
        catalog_entry(
            "validation",
            "Validation of technical characteristics of content files",
            "DLPS",
            &["FEED"],
        ),
    );
    catalog.insert(
        "package_inspection".to_string(),
        catalog_entry(
            "inspection",
            "Inspection of submitted package structure",
            "DLPS",
            &["FEED"],
        ),
    );
    catalog.insert(
        "image_header_modification".to_string(),
        catalog_entry(
            "image header modification",
            "Normalization of content file names and image headers",
            "DLPS",
            &["FEED"],
        ),
    );
    catalog.insert(
        "ocr_normalize".to_string(),
        catalog_entry(
            "ocr normalization",
            "Extraction of plain-text OCR from publisher markup",
            "DLPS",
            &["FEED"],
        ),
    );
    catalog.insert(
        "capture".to_string(),
        catalog_entry(
            "capture",
            "Initial capture of the physical item",
            crate::premis::VOLUME_ARTIST,
            &[],
        ),
    );
    catalog.insert(
        "image_compression".to_string(),
        catalog_entry(
            "image compression",
            "Conversion of captured images to JPEG2000",
            crate::premis::VOLUME_ARTIST,
            &[],
        ),
    );

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_covers_generated_events() {
        let catalog = default_event_catalog();
        for code in [
            "ingestion",
            "zip_compression",
            "zip_md5_create",
            "package_validation",
        ] {
            let entry = catalog.get(code).unwrap();
            assert!(entry.event_type.is_some());
            assert!(entry.detail.is_some());
            assert!(entry.executor.is_some());
        }
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let tmp = std::env::temp_dir();
        let mut config = FeedConfig::rooted_at(&tmp);
        config.dataset.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
staging:
  ingest: /htprep/ingest
  preingest: /htprep/preingest
  download: /htprep/download
  fetch: /htprep/fetch
  zipfile: /htprep/zipfile
repository:
  obj_dir: /sdr1/obj
  link_dir: /sdr1/obj
dataset:
  threads: 8
globals:
  artist: "Trigonix"
"#;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml).unwrap();

        let config = FeedConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.dataset.threads, 8);
        assert_eq!(config.daemon.max_failures, DEFAULT_MAX_FAILURES);
        assert_eq!(
            config.globals.get("artist").and_then(|v| v.as_str()),
            Some("Trigonix")
        );
        // built-in catalog still present when the file doesn't override it
        assert!(config.premis.contains_key("ingestion"));
    }
}
