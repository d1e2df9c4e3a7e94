//! Volume: the runtime object for one item being ingested
//!
//! A volume ties an immutable identifier to the resolved namespace and
//! package type descriptors and carries the lazy caches stages share: the
//! staging directory listing, materialized filegroups, parsed source and
//! repository METS, and the checksum table. Each parse happens at most
//! once per volume; jobs build a fresh volume per stage so caches never
//! outlive the filesystem state they describe.

use crate::db;
use crate::error::{IngestError, Result};
use crate::mets::{MarcFragment, MetsDocument, PageData};
use crate::packagetype::{PackageType, VolumeKind};
use crate::premis::premis_uuid;
use crate::registry::Engine;
use feed_common::pairtree::{id2ppath, s2ppchars};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// A materialized filegroup: the spec's flags plus the files that matched
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub name: String,
    pub prefix: String,
    pub mets_use: String,
    pub content: bool,
    pub jhove: bool,
    pub utf8: bool,
    pub structmap: bool,
    pub files: Vec<String>,
}

/// Trailing sequence number before the extension, e.g. `..._000001.jp2`
fn seq_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\.[A-Za-z0-9]+$").expect("valid pattern"))
}

#[derive(Debug)]
pub struct Volume {
    engine: Arc<Engine>,
    namespace: String,
    objid: String,
    pkg_type: String,
    // lazy caches, filled on first use
    dir_files: Option<Vec<String>>,
    groups: Option<Vec<FileGroup>>,
    source_mets: Option<Arc<MetsDocument>>,
    repos_mets: Option<Option<Arc<MetsDocument>>>,
    checksums: Option<HashMap<String, String>>,
}

impl Volume {
    /// Build a volume, resolving its descriptors. Unknown namespace or
    /// package type identifiers fail here; the volume cannot be
    /// meaningfully constructed without them.
    pub fn new(
        engine: Arc<Engine>,
        namespace: &str,
        pkg_type: &str,
        objid: &str,
    ) -> Result<Self> {
        engine.namespace(namespace)?;
        engine.packagetype(pkg_type)?;

        Ok(Self {
            engine,
            namespace: namespace.to_string(),
            objid: objid.to_string(),
            pkg_type: pkg_type.to_string(),
            dir_files: None,
            groups: None,
            source_mets: None,
            repos_mets: None,
            checksums: None,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn objid(&self) -> &str {
        &self.objid
    }

    pub fn pkg_type(&self) -> &str {
        &self.pkg_type
    }

    /// The full identifier, `namespace.objid`
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.namespace, self.objid)
    }

    /// Pairtree-cleaned object identifier
    pub fn pt_objid(&self) -> String {
        s2ppchars(&self.objid)
    }

    /// The resolved package type descriptor
    pub fn packagetype(&self) -> &PackageType {
        self.engine
            .packagetype(&self.pkg_type)
            .expect("descriptor resolved at construction")
    }

    // ------------------------------------------------------------------
    // Derived paths
    // ------------------------------------------------------------------

    pub fn staging_directory(&self) -> PathBuf {
        self.engine.config().staging.ingest.join(self.pt_objid())
    }

    pub fn preingest_directory(&self) -> PathBuf {
        self.engine.config().staging.preingest.join(self.pt_objid())
    }

    pub fn download_directory(&self) -> PathBuf {
        self.engine.config().staging.download.clone()
    }

    pub fn sip_filename(&self) -> String {
        self.packagetype().sip_filename(&self.objid)
    }

    pub fn sip_path(&self) -> PathBuf {
        self.download_directory().join(self.sip_filename())
    }

    pub fn mets_path(&self) -> PathBuf {
        self.engine
            .config()
            .staging
            .ingest
            .join(format!("{}.mets.xml", self.pt_objid()))
    }

    pub fn zip_path(&self) -> PathBuf {
        self.engine
            .config()
            .staging
            .zipfile
            .join(format!("{}.zip", self.pt_objid()))
    }

    /// Canonical object directory in the pairtree store
    pub fn object_directory(&self) -> PathBuf {
        self.engine
            .config()
            .repository
            .obj_dir
            .join(&self.namespace)
            .join(id2ppath(&self.objid))
            .join(self.pt_objid())
    }

    /// Object path under the symlink layer
    pub fn link_directory(&self) -> PathBuf {
        self.engine
            .config()
            .repository
            .link_dir
            .join(&self.namespace)
            .join(id2ppath(&self.objid))
            .join(self.pt_objid())
    }

    /// The symlink for this object, when a link layer is configured and
    /// the link actually exists
    pub fn repository_symlink(&self) -> Option<PathBuf> {
        let config = self.engine.config();
        if config.repository.link_dir == config.repository.obj_dir {
            return None;
        }
        let link = self.link_directory();
        match std::fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => Some(link),
            _ => None,
        }
    }

    fn repository_file(&self, suffix: &str) -> Option<PathBuf> {
        let name = format!("{}.{}", self.pt_objid(), suffix);
        let canonical = self.object_directory().join(&name);
        if canonical.is_file() {
            return Some(canonical);
        }
        // fall back through the symlink layer
        let link = self.repository_symlink()?;
        let target = std::fs::read_link(&link).ok()?;
        let candidate = target.join(&name);
        candidate.is_file().then_some(candidate)
    }

    /// The archived METS, when this object is already in the repository
    pub fn repository_mets_path(&self) -> Option<PathBuf> {
        self.repository_file("mets.xml")
    }

    /// The archived zip, when this object is already in the repository
    pub fn repository_zip_path(&self) -> Option<PathBuf> {
        self.repository_file("zip")
    }

    // ------------------------------------------------------------------
    // Directory listing and filegroups
    // ------------------------------------------------------------------

    /// Sorted listing of the staging directory; cached
    pub fn all_directory_files(&mut self) -> Result<Vec<String>> {
        if self.dir_files.is_none() {
            let dir = self.staging_directory();
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&dir).map_err(|e| {
                IngestError::operation_failed_on(
                    "read staging directory",
                    dir.display().to_string(),
                    e.to_string(),
                )
            })? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    files.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            files.sort();
            self.dir_files = Some(files);
        }
        Ok(self.dir_files.clone().unwrap_or_default())
    }

    /// Invalidate filesystem-derived caches after a stage changes the tree
    pub fn refresh_file_caches(&mut self) {
        self.dir_files = None;
        self.groups = None;
        self.checksums = None;
    }

    /// Directory files partitioned into logical groups, in the package
    /// type's declaration order; cached. Each file lands in the first
    /// group whose pattern matches.
    pub fn file_groups(&mut self) -> Result<Vec<FileGroup>> {
        if self.groups.is_none() {
            let files = self.all_directory_files()?;
            let specs = self.packagetype().filegroups.clone();

            let mut groups: Vec<FileGroup> = specs
                .iter()
                .map(|spec| FileGroup {
                    name: spec.name.clone(),
                    prefix: spec.prefix.clone(),
                    mets_use: spec.mets_use.clone(),
                    content: spec.content,
                    jhove: spec.jhove,
                    utf8: spec.utf8,
                    structmap: spec.structmap,
                    files: Vec::new(),
                })
                .collect();

            for file in &files {
                if let Some(index) = specs
                    .iter()
                    .position(|spec| spec.file_pattern.is_match(file))
                {
                    groups[index].files.push(file.clone());
                }
            }

            self.groups = Some(groups);
        }
        Ok(self.groups.clone().unwrap_or_default())
    }

    fn flagged_files(&mut self, flag: impl Fn(&FileGroup) -> bool) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for group in self.file_groups()? {
            if flag(&group) {
                out.extend(group.files);
            }
        }
        Ok(out)
    }

    /// Files archived in the AIP zip
    pub fn all_content_files(&mut self) -> Result<Vec<String>> {
        self.flagged_files(|g| g.content)
    }

    /// Files needing the external format validator
    pub fn jhove_files(&mut self) -> Result<Vec<String>> {
        self.flagged_files(|g| g.jhove)
    }

    /// Files that must be valid UTF-8
    pub fn utf8_files(&mut self) -> Result<Vec<String>> {
        self.flagged_files(|g| g.utf8)
    }

    pub fn file_count(&mut self) -> Result<usize> {
        Ok(self.all_content_files()?.len())
    }

    /// Pages in the volume. Standard volumes count the image filegroup
    /// and fail without one; EPUB volumes count extracted OCR chapters.
    pub fn page_count(&mut self) -> Result<usize> {
        let group_name = match self.packagetype().volume_kind {
            VolumeKind::Standard => "image",
            VolumeKind::Epub => "ocr",
        };
        let groups = self.file_groups()?;
        let group = groups
            .iter()
            .find(|g| g.name == group_name)
            .ok_or_else(|| IngestError::missing_field(format!("{} filegroup", group_name)))?;
        Ok(group.files.len())
    }

    /// Struct-map files keyed by sequence number, then by group name.
    /// Files in struct-map groups must end with a numeric sequence.
    pub fn file_groups_by_page(
        &mut self,
    ) -> Result<BTreeMap<u32, BTreeMap<String, Vec<String>>>> {
        let mut pages: BTreeMap<u32, BTreeMap<String, Vec<String>>> = BTreeMap::new();

        for group in self.file_groups()? {
            if !group.structmap {
                continue;
            }
            for file in &group.files {
                let captures = seq_regex()
                    .captures(file)
                    .ok_or_else(|| IngestError::bad_field("sequence_number", file.clone()))?;
                let sequence: u32 = captures[1].parse().map_err(|_| {
                    IngestError::bad_field_actual(
                        "sequence_number",
                        file.clone(),
                        captures[1].to_string(),
                    )
                })?;
                pages
                    .entry(sequence)
                    .or_default()
                    .entry(group.name.clone())
                    .or_default()
                    .push(file.clone());
            }
        }

        Ok(pages)
    }

    // ------------------------------------------------------------------
    // Source and repository METS
    // ------------------------------------------------------------------

    /// The single SIP file matching the package type's source METS pattern
    pub fn source_mets_file(&mut self) -> Result<String> {
        let pattern = self.packagetype().source_mets_file.clone();
        let matches: Vec<String> = self
            .all_directory_files()?
            .into_iter()
            .filter(|f| pattern.is_match(f))
            .collect();

        match matches.as_slice() {
            [single] => Ok(single.clone()),
            [] => Err(IngestError::missing_field_in(
                "source METS",
                self.staging_directory().display().to_string(),
            )),
            many => Err(IngestError::bad_field_actual(
                "source_mets",
                self.staging_directory().display().to_string(),
                many.join(", "),
            )),
        }
    }

    pub fn source_mets_path(&mut self) -> Result<PathBuf> {
        let name = self.source_mets_file()?;
        Ok(self.staging_directory().join(name))
    }

    /// Parsed source METS; parsed at most once per volume
    pub fn source_mets_xpc(&mut self) -> Result<Arc<MetsDocument>> {
        if self.source_mets.is_none() {
            let path = self.source_mets_path()?;
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                IngestError::operation_failed_on(
                    "read source METS",
                    path.display().to_string(),
                    e.to_string(),
                )
            })?;
            self.source_mets = Some(Arc::new(MetsDocument::parse(&raw)?));
        }
        Ok(self.source_mets.clone().expect("cache filled above"))
    }

    /// Parsed repository METS, or None when the object is not yet in the
    /// repository; parsed at most once per volume
    pub fn repos_mets_xpc(&mut self) -> Result<Option<Arc<MetsDocument>>> {
        if self.repos_mets.is_none() {
            let parsed = match self.repository_mets_path() {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)?;
                    let doc = MetsDocument::parse(&raw).map_err(|e| {
                        IngestError::InvalidRepositoryPremis(format!(
                            "repository METS {} is not well-formed: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    Some(Arc::new(doc))
                }
                None => None,
            };
            self.repos_mets = Some(parsed);
        }
        Ok(self.repos_mets.clone().unwrap_or(None))
    }

    /// The MARC descriptive fragment from the source METS
    pub fn marc_xml(&mut self) -> Result<MarcFragment> {
        let source_file = self.source_mets_file()?;
        self.source_mets_xpc()?
            .marc
            .clone()
            .ok_or_else(|| IngestError::missing_field_in("marcxml", source_file))
    }

    /// Page labels for a struct-map file, from the source METS
    pub fn page_data(&mut self, file: &str) -> Result<Option<PageData>> {
        Ok(self.source_mets_xpc()?.page_data.get(file).cloned())
    }

    /// MD5 table for the SIP: the checksum manifest when the provider
    /// ships one, else the source METS fileSec; cached
    pub fn checksums(&mut self) -> Result<HashMap<String, String>> {
        if self.checksums.is_none() {
            let manifest = match self.packagetype().checksum_file.clone() {
                Some(pattern) => self
                    .all_directory_files()?
                    .into_iter()
                    .find(|f| pattern.is_match(f)),
                None => None,
            };

            let table = match manifest {
                Some(name) => {
                    let path = self.staging_directory().join(&name);
                    let raw = std::fs::read_to_string(&path)?;
                    parse_checksum_manifest(&raw)
                }
                None => self.source_mets_xpc()?.checksums.clone(),
            };
            self.checksums = Some(table);
        }
        Ok(self.checksums.clone().unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // PREMIS events
    // ------------------------------------------------------------------

    /// Deterministic event UUID; stable across reingests
    pub fn make_premis_uuid(&self, eventtype: &str, date: &str) -> Uuid {
        premis_uuid(&self.namespace, &self.objid, eventtype, date)
    }

    /// Idempotently record a PREMIS event. The UUID derives from the event
    /// type and datetime, so recording twice at the same time replaces the
    /// row with an identical identifier.
    pub async fn record_premis_event(
        &self,
        code: &str,
        date: Option<&str>,
        outcome: Option<&str>,
    ) -> Result<Uuid> {
        let event_config = self
            .engine
            .event_configuration(&self.namespace, &self.pkg_type, code)?;
        let event_type = event_config
            .event_type
            .ok_or_else(|| IngestError::config(format!("event '{}' has no type", code)))?;

        let date = match date {
            Some(d) => d.to_string(),
            None => chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        };
        let uuid = self.make_premis_uuid(&event_type, &date);

        db::replace_premis_event(
            self.engine.pool(),
            &self.namespace,
            &self.objid,
            &uuid.to_string(),
            code,
            &date,
            outcome,
        )
        .await?;

        Ok(uuid)
    }

    /// The stored event row for a code, if one has been recorded
    pub async fn get_event_info(&self, code: &str) -> Result<Option<db::EventInfo>> {
        db::get_event_info(self.engine.pool(), &self.namespace, &self.objid, code).await
    }

    /// Drop all recorded events; run after they are committed to the
    /// archived METS
    pub async fn clear_premis_events(&self) -> Result<()> {
        db::clear_premis_events(self.engine.pool(), &self.namespace, &self.objid).await
    }

    // ------------------------------------------------------------------
    // Stage map and lifecycle
    // ------------------------------------------------------------------

    /// Ordered stage identifiers from a start status to a terminal state
    pub fn stages(&self, start_status: &str) -> Result<Vec<String>> {
        self.engine.stage_sequence(&self.pkg_type, start_status)
    }

    /// The configured digitization agent for this volume
    pub fn artist(&self) -> Result<String> {
        let value = self.engine.get(&self.namespace, &self.pkg_type, "artist")?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| IngestError::config("config key 'artist' is not a string"))
    }

    /// Create the staging directory, optionally disk-backed via symlink
    /// for package types staged outside the RAM root
    pub fn mk_staging_directory(&self) -> Result<PathBuf> {
        let target = self.staging_directory();
        let disk_root = self.engine.config().staging.disk.ingest.clone();

        if self.packagetype().download_to_disk {
            if let Some(disk_root) = disk_root {
                let backing = disk_root.join(self.pt_objid());
                std::fs::create_dir_all(&backing)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if std::fs::symlink_metadata(&target).is_err() {
                    #[cfg(unix)]
                    std::os::unix::fs::symlink(&backing, &target)?;
                }
                return Ok(target);
            }
        }

        std::fs::create_dir_all(&target)?;
        Ok(target)
    }

    /// Create the preingest directory
    pub fn mk_preingest_directory(&self) -> Result<PathBuf> {
        let dir = self.preingest_directory();
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the SIP from the download area
    pub fn remove_download(&self) -> Result<()> {
        remove_file_if_exists(&self.sip_path())
    }

    /// Remove everything staged for this volume: the staging and
    /// preingest directories, the assembled METS, and the zip
    pub fn clean_all(&self) -> Result<()> {
        remove_tree_if_exists(&self.staging_directory())?;
        remove_tree_if_exists(&self.preingest_directory())?;
        remove_file_if_exists(&self.mets_path())?;
        remove_file_if_exists(&self.zip_path())?;
        Ok(())
    }
}

/// Parse an md5sum-style manifest: `<hash> <filename>` per line
fn parse_checksum_manifest(raw: &str) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for line in raw.lines() {
        let mut parts = line.split_whitespace();
        let (Some(hash), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        let name = name.trim_start_matches('*');
        let name = name.rsplit('/').next().unwrap_or(name);
        table.insert(name.to_string(), hash.to_lowercase());
    }
    table
}

fn remove_file_if_exists(path: &std::path::Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove a directory tree; a symlinked staging directory removes both
/// the link and its disk-backed target
fn remove_tree_if_exists(path: &std::path::Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if meta.file_type().is_symlink() {
        if let Ok(target) = std::fs::read_link(path) {
            let _ = std::fs::remove_dir_all(target);
        }
        std::fs::remove_file(path)?;
    } else {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use tempfile::TempDir;

    async fn test_volume(root: &TempDir, objid: &str, pkg_type: &str) -> Volume {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        let config = FeedConfig::rooted_at(root.path());
        let engine = Arc::new(Engine::new(config, pool).unwrap());
        Volume::new(engine, "test", pkg_type, objid).unwrap()
    }

    fn stage_files(volume: &Volume, files: &[(&str, &str)]) {
        let dir = volume.staging_directory();
        std::fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
    }

    #[tokio::test]
    async fn test_unknown_descriptor_fails_construction() {
        let root = TempDir::new().unwrap();
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let config = FeedConfig::rooted_at(root.path());
        let engine = Arc::new(Engine::new(config, pool).unwrap());

        assert!(matches!(
            Volume::new(engine.clone(), "nosuch", "simple", "obj1").unwrap_err(),
            IngestError::UnknownSubclass { .. }
        ));
        assert!(matches!(
            Volume::new(engine, "test", "nosuch", "obj1").unwrap_err(),
            IngestError::UnknownSubclass { .. }
        ));
    }

    #[tokio::test]
    async fn test_identifier_and_paths() {
        let root = TempDir::new().unwrap();
        let volume = test_volume(&root, "39015012345678", "simple").await;

        assert_eq!(volume.identifier(), "test.39015012345678");
        assert_eq!(volume.pt_objid(), "39015012345678");
        assert_eq!(volume.sip_filename(), "39015012345678.zip");
        assert!(volume
            .object_directory()
            .ends_with("obj/test/39/01/50/12/34/56/78/39015012345678"));
        assert!(volume.mets_path().ends_with("39015012345678.mets.xml"));
    }

    #[tokio::test]
    async fn test_file_groups_partition() {
        let root = TempDir::new().unwrap();
        let mut volume = test_volume(&root, "obj1", "simple").await;
        stage_files(
            &volume,
            &[
                ("00000001.jp2", "img"),
                ("00000001.txt", "ocr"),
                ("00000002.jp2", "img"),
                ("00000002.txt", "ocr"),
                ("mets.xml", "<mets/>"),
            ],
        );

        let groups = volume.file_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "image");
        assert_eq!(groups[0].files, vec!["00000001.jp2", "00000002.jp2"]);
        assert_eq!(groups[1].name, "ocr");
        assert_eq!(groups[1].files.len(), 2);

        assert_eq!(volume.file_count().unwrap(), 4);
        assert_eq!(volume.page_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_file_groups_by_page() {
        let root = TempDir::new().unwrap();
        let mut volume = test_volume(&root, "obj1", "simple").await;
        stage_files(
            &volume,
            &[
                ("00000001.jp2", "img"),
                ("00000001.txt", "ocr"),
                ("00000002.jp2", "img"),
            ],
        );

        let pages = volume.file_groups_by_page().unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[&1]["image"], vec!["00000001.jp2"]);
        assert_eq!(pages[&1]["ocr"], vec!["00000001.txt"]);
        assert!(!pages[&2].contains_key("ocr"));
    }

    #[tokio::test]
    async fn test_page_count_requires_image_group() {
        let root = TempDir::new().unwrap();
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let config = FeedConfig::rooted_at(root.path());
        let mut engine = Engine::new(config, pool).unwrap();

        // a package type with no image group at all
        let mut pt = crate::packagetype::builtins()
            .into_iter()
            .find(|p| p.identifier == "simple")
            .unwrap();
        pt.identifier = "imageless".to_string();
        pt.filegroups.retain(|g| g.name != "image");
        engine.register_packagetype(pt).unwrap();

        let mut volume =
            Volume::new(Arc::new(engine), "test", "imageless", "obj1").unwrap();
        stage_files(&volume, &[("00000001.txt", "ocr")]);

        assert!(matches!(
            volume.page_count().unwrap_err(),
            IngestError::MissingField { .. }
        ));
    }

    #[tokio::test]
    async fn test_sequence_number_required_for_structmap_files() {
        let root = TempDir::new().unwrap();
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        let config = FeedConfig::rooted_at(root.path());
        let mut engine = Engine::new(config, pool).unwrap();

        let mut pt = crate::packagetype::builtins()
            .into_iter()
            .find(|p| p.identifier == "simple")
            .unwrap();
        pt.identifier = "loose".to_string();
        pt.filegroups[0].file_pattern = Regex::new(r"^.*\.jp2$").unwrap();
        engine.register_packagetype(pt).unwrap();

        let mut volume = Volume::new(Arc::new(engine), "test", "loose", "obj1").unwrap();
        stage_files(&volume, &[("cover.jp2", "img")]);

        let err = volume.file_groups_by_page().unwrap_err();
        assert!(matches!(err, IngestError::BadField { ref field, .. } if field == "sequence_number"));
    }

    #[tokio::test]
    async fn test_two_source_mets_files_fail() {
        let root = TempDir::new().unwrap();
        let mut volume = test_volume(&root, "obj1", "yale").await;
        stage_files(
            &volume,
            &[("Yale_obj1.xml", "<mets/>"), ("Yale_other.xml", "<mets/>")],
        );

        assert!(matches!(
            volume.source_mets_file().unwrap_err(),
            IngestError::BadField { .. }
        ));
    }

    #[tokio::test]
    async fn test_checksum_manifest_parsing() {
        let root = TempDir::new().unwrap();
        let mut volume = test_volume(&root, "obj1", "simple").await;
        stage_files(
            &volume,
            &[
                ("00000001.jp2", "img"),
                (
                    "checksum.md5",
                    "AABB11  00000001.jp2\nccdd22  *subdir/00000001.txt\n",
                ),
            ],
        );

        let checksums = volume.checksums().unwrap();
        assert_eq!(checksums["00000001.jp2"], "aabb11");
        assert_eq!(checksums["00000001.txt"], "ccdd22");
    }

    #[tokio::test]
    async fn test_record_and_get_premis_event() {
        let root = TempDir::new().unwrap();
        let volume = test_volume(&root, "obj1", "simple").await;

        let uuid1 = volume
            .record_premis_event("ingestion", Some("2024-01-01T00:00:00Z"), None)
            .await
            .unwrap();
        let uuid2 = volume
            .record_premis_event("ingestion", Some("2024-01-01T00:00:00Z"), Some("<o/>"))
            .await
            .unwrap();
        assert_eq!(uuid1, uuid2);

        let info = volume.get_event_info("ingestion").await.unwrap().unwrap();
        assert_eq!(info.eventid, uuid1.to_string());
        assert_eq!(info.date, "2024-01-01T00:00:00Z");
        assert_eq!(info.outcome.as_deref(), Some("<o/>"));

        volume.clear_premis_events().await.unwrap();
        assert!(volume.get_event_info("ingestion").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stages_walk() {
        let root = TempDir::new().unwrap();
        let volume = test_volume(&root, "obj1", "simple").await;
        let stages = volume.stages("ready").unwrap();
        assert_eq!(stages.first().map(String::as_str), Some("unpack"));
        assert_eq!(stages.last().map(String::as_str), Some("collate"));
    }

    #[tokio::test]
    async fn test_clean_all_is_idempotent() {
        let root = TempDir::new().unwrap();
        let volume = test_volume(&root, "obj1", "simple").await;
        stage_files(&volume, &[("00000001.jp2", "img")]);
        std::fs::create_dir_all(volume.zip_path().parent().unwrap()).unwrap();
        std::fs::write(volume.zip_path(), "zip").unwrap();

        volume.clean_all().unwrap();
        assert!(!volume.staging_directory().exists());
        assert!(!volume.zip_path().exists());

        // second pass over nothing
        volume.clean_all().unwrap();
    }
}
