//! Shared fixtures for pipeline integration tests

use async_trait::async_trait;
use feed_common::checksum::md5_hex;
use feed_ingest::config::FeedConfig;
use feed_ingest::error::Result;
use feed_ingest::registry::Engine;
use feed_ingest::runner::JobCallback;
use feed_ingest::db;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub struct TestContext {
    pub engine: Arc<Engine>,
    pub root: TempDir,
}

/// Engine over a scratch tree and an in-memory database
pub async fn context() -> TestContext {
    let root = TempDir::new().expect("tempdir");
    let pool = db::connect("sqlite::memory:").await.expect("pool");
    db::init_schema(&pool).await.expect("schema");

    let config = FeedConfig::rooted_at(root.path());
    let engine = Arc::new(Engine::new(config, pool).expect("engine"));

    TestContext { engine, root }
}

/// Callback that records every update it receives
#[derive(Default)]
pub struct RecordingCallback {
    pub updates: Mutex<Vec<(String, String, String, bool, bool)>>,
}

#[async_trait]
impl JobCallback for RecordingCallback {
    async fn update(
        &self,
        namespace: &str,
        objid: &str,
        new_status: &str,
        release: bool,
        failed: bool,
    ) -> Result<()> {
        self.updates.lock().expect("lock").push((
            namespace.to_string(),
            objid.to_string(),
            new_status.to_string(),
            release,
            failed,
        ));
        Ok(())
    }
}

/// Write a zip with the given entries
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    let file = std::fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(content).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

/// A Yale-style source METS: MARC record, one capture event, fileSec
/// checksums, and a labeled single-page struct map.
pub fn yale_source_mets(objid: &str, files: &[(&str, &[u8])], with_marc: bool) -> String {
    let marc = if with_marc {
        r#"  <METS:dmdSec ID="DMD1">
    <METS:mdWrap MDTYPE="MARC"><METS:xmlData>
      <record><leader>01142cam a2200301 a 4500</leader><controlfield tag="001">ocm12345</controlfield></record>
    </METS:xmlData></METS:mdWrap>
  </METS:dmdSec>
"#
        .to_string()
    } else {
        String::new()
    };

    let mut file_entries = String::new();
    let mut fptrs = String::new();
    for (index, (name, content)) in files.iter().enumerate() {
        file_entries.push_str(&format!(
            "      <METS:file ID=\"F{id}\" CHECKSUM=\"{md5}\" CHECKSUMTYPE=\"MD5\">\
<METS:FLocat LOCTYPE=\"OTHER\" xlink:href=\"{name}\"/></METS:file>\n",
            id = index + 1,
            md5 = md5_hex(content),
            name = name,
        ));
        fptrs.push_str(&format!("        <METS:fptr FILEID=\"F{}\"/>\n", index + 1));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<METS:mets xmlns:METS="http://www.loc.gov/METS/"
           xmlns:PREMIS="info:lc/xmlns/premis-v2"
           xmlns:xlink="http://www.w3.org/1999/xlink" OBJID="{objid}">
{marc}  <METS:amdSec ID="AMD1"><METS:digiprovMD ID="PR1"><METS:mdWrap MDTYPE="PREMIS"><METS:xmlData>
    <PREMIS:premis version="2.1">
      <PREMIS:event>
        <PREMIS:eventIdentifier>
          <PREMIS:eventIdentifierType>Yale</PREMIS:eventIdentifierType>
          <PREMIS:eventIdentifierValue>1</PREMIS:eventIdentifierValue>
        </PREMIS:eventIdentifier>
        <PREMIS:eventType>capture</PREMIS:eventType>
        <PREMIS:eventDateTime>2020-05-01T10:00:00</PREMIS:eventDateTime>
        <PREMIS:eventDetail>Image capture</PREMIS:eventDetail>
      </PREMIS:event>
    </PREMIS:premis>
  </METS:xmlData></METS:mdWrap></METS:digiprovMD></METS:amdSec>
  <METS:fileSec>
    <METS:fileGrp USE="image">
{file_entries}    </METS:fileGrp>
  </METS:fileSec>
  <METS:structMap TYPE="physical">
    <METS:div TYPE="volume">
      <METS:div TYPE="page" ORDER="1" ORDERLABEL="1" LABEL="Page 1">
{fptrs}      </METS:div>
    </METS:div>
  </METS:structMap>
</METS:mets>
"#,
        objid = objid,
        marc = marc,
        file_entries = file_entries,
        fptrs = fptrs,
    )
}

/// Stage a complete Yale SIP zip in the download area
pub fn stage_yale_sip(ctx: &TestContext, objid: &str, with_marc: bool, extra: &[(&str, &[u8])]) {
    let jp2: &[u8] = b"fake jp2 image data";
    let txt: &[u8] = b"Page one text\n";
    let hocr: &[u8] = b"<html><body><div class=\"ocr_page\">Page one text</div></body></html>\n";

    let image_name = format!("{}_000001.jp2", objid);
    let ocr_name = format!("{}_000001.txt", objid);
    let hocr_name = format!("{}_000001.xml", objid);
    let content: Vec<(&str, &[u8])> = vec![
        (image_name.as_str(), jp2),
        (ocr_name.as_str(), txt),
        (hocr_name.as_str(), hocr),
    ];

    let source_mets = yale_source_mets(objid, &content, with_marc);
    let mets_name = format!("Yale_{}.xml", objid);

    let mut entries: Vec<(&str, &[u8])> = vec![(mets_name.as_str(), source_mets.as_bytes())];
    entries.extend(content.iter().copied());
    entries.extend(extra.iter().copied());

    let sip = ctx
        .engine
        .config()
        .staging
        .download
        .join(format!("{}.zip", objid));
    write_zip(&sip, &entries);
}
