//! End-to-end pipeline tests over scratch trees and an in-memory database

mod common;

use common::{context, stage_yale_sip, write_zip, RecordingCallback};
use feed_ingest::db;
use feed_ingest::mets::MetsDocument;
use feed_ingest::runner::{QueueCallback, Runner};
use std::sync::Arc;

const OBJID: &str = "39002X";

#[tokio::test]
async fn test_yale_happy_path_collates() {
    let ctx = context().await;
    stage_yale_sip(&ctx, OBJID, true, &[]);

    db::enqueue(ctx.engine.pool(), "yale", OBJID, "yale", "ready")
        .await
        .unwrap();
    let runner = Runner::new(
        ctx.engine.clone(),
        Arc::new(QueueCallback::new(ctx.engine.pool().clone())),
    );
    runner.run_queue().await.unwrap();

    let row = db::queue_row(ctx.engine.pool(), "yale", OBJID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "collated");
    assert_eq!(row.failure_count, 0);

    // AIP lands at the pairtree path
    let object_dir = ctx
        .root
        .path()
        .join("obj/yale/39/00/2X")
        .join(OBJID);
    let mets_path = object_dir.join(format!("{}.mets.xml", OBJID));
    let zip_path = object_dir.join(format!("{}.zip", OBJID));
    assert!(mets_path.is_file(), "missing {}", mets_path.display());
    assert!(zip_path.is_file(), "missing {}", zip_path.display());

    // struct map: one page div with image, OCR, and coordinate OCR fptrs
    let mets = std::fs::read_to_string(&mets_path).unwrap();
    assert!(mets.contains("ORDER=\"1\""));
    assert!(mets.contains("ORDERLABEL=\"1\""));
    for fileid in ["IMG00000001", "OCR00000001", "HTML00000001"] {
        assert!(
            mets.contains(&format!("<METS:fptr FILEID=\"{}\"/>", fileid)),
            "missing fptr {}",
            fileid
        );
    }

    // provenance: generated events plus the re-identified source capture
    for event_type in [
        "ingestion",
        "compression",
        "message digest calculation",
        "validation",
        "image header modification",
    ] {
        assert!(
            mets.contains(&format!(
                "<PREMIS:eventType>{}</PREMIS:eventType>",
                event_type
            )),
            "missing event type {}",
            event_type
        );
    }
    assert!(mets.contains("<PREMIS:eventIdentifierValue>capture1</PREMIS:eventIdentifierValue>"));

    // round-trip: fileSec hrefs cover exactly the archived files
    let parsed = MetsDocument::parse(&mets).unwrap();
    let mut archived: Vec<&str> = parsed.checksums.keys().map(String::as_str).collect();
    archived.sort();
    assert_eq!(
        archived,
        vec![
            "39002X.zip",
            "39002X_000001.jp2",
            "39002X_000001.txt",
            "39002X_000001.xml",
        ]
    );

    // staging was torn down, the SIP consumed, events cleared
    assert!(!ctx.root.path().join("ingest").join(OBJID).exists());
    assert!(!ctx
        .root
        .path()
        .join("download")
        .join(format!("{}.zip", OBJID))
        .exists());
    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM premis_events")
        .fetch_one(ctx.engine.pool())
        .await
        .unwrap();
    assert_eq!(events, 0);

    // handle minted
    let handles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM handles")
        .fetch_one(ctx.engine.pool())
        .await
        .unwrap();
    assert_eq!(handles, 1);
}

#[tokio::test]
async fn test_reingest_preserves_archived_provenance() {
    let ctx = context().await;
    let runner = Runner::new(
        ctx.engine.clone(),
        Arc::new(QueueCallback::new(ctx.engine.pool().clone())),
    );

    // first ingest
    stage_yale_sip(&ctx, OBJID, true, &[]);
    db::enqueue(ctx.engine.pool(), "yale", OBJID, "yale", "ready")
        .await
        .unwrap();
    runner.run_queue().await.unwrap();

    let mets_path = ctx
        .root
        .path()
        .join("obj/yale/39/00/2X")
        .join(OBJID)
        .join(format!("{}.mets.xml", OBJID));
    let first = MetsDocument::parse(&std::fs::read_to_string(&mets_path).unwrap()).unwrap();
    let first_ingestion_uuid = first
        .premis_events
        .iter()
        .find(|e| e.event_type == "ingestion")
        .and_then(|e| e.identifier())
        .map(|(_, value)| value.to_string())
        .unwrap();

    // identical SIP again
    stage_yale_sip(&ctx, OBJID, true, &[]);
    db::enqueue(ctx.engine.pool(), "yale", OBJID, "yale", "ready")
        .await
        .unwrap();
    runner.run_queue().await.unwrap();

    let row = db::queue_row(ctx.engine.pool(), "yale", OBJID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "collated");

    let is_repeat: i64 =
        sqlx::query_scalar("SELECT is_repeat FROM ingest_log WHERE namespace = 'yale'")
            .fetch_one(ctx.engine.pool())
            .await
            .unwrap();
    assert_eq!(is_repeat, 1);

    let second = MetsDocument::parse(&std::fs::read_to_string(&mets_path).unwrap()).unwrap();

    // the unchanged source capture is not duplicated and keeps its
    // archived identifier
    let captures: Vec<_> = second
        .premis_events
        .iter()
        .filter(|e| e.event_type == "capture")
        .collect();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].identifier(), Some(("UM", "capture1")));

    // the first ingestion event survives with its original UUID
    let ingestion_uuids: Vec<_> = second
        .premis_events
        .iter()
        .filter(|e| e.event_type == "ingestion")
        .filter_map(|e| e.identifier())
        .map(|(_, value)| value.to_string())
        .collect();
    assert!(
        ingestion_uuids.contains(&first_ingestion_uuid),
        "archived ingestion UUID lost on reingest"
    );
}

#[tokio::test]
async fn test_missing_marc_punts_at_mets_stage() {
    let ctx = context().await;
    stage_yale_sip(&ctx, OBJID, false, &[]);

    let callback = Arc::new(RecordingCallback::default());
    let runner = Runner::new(ctx.engine.clone(), callback.clone());

    let final_status = runner
        .run_volume("yale", OBJID, "yale", "ready", 0)
        .await
        .unwrap();
    assert_eq!(final_status, "punted");

    let updates = callback.updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.2, "punted");
    assert!(last.3, "punt must release");
    assert!(last.4, "punt must be failed");

    // everything before the METS stage succeeded
    assert!(updates.iter().any(|u| u.2 == "packed"));

    let journal: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM errors WHERE stage = 'mets' AND operation = 'MissingField'",
    )
    .fetch_one(ctx.engine.pool())
    .await
    .unwrap();
    assert_eq!(journal, 1);
}

#[tokio::test]
async fn test_unexpected_file_fails_verify_manifest() {
    let ctx = context().await;
    stage_yale_sip(&ctx, OBJID, true, &[("surprise.foo", b"???")]);

    let callback = Arc::new(RecordingCallback::default());
    let runner = Runner::new(ctx.engine.clone(), callback.clone());

    let final_status = runner
        .run_volume("yale", OBJID, "yale", "ready", 0)
        .await
        .unwrap();
    assert_eq!(final_status, "punted");

    let updates = callback.updates.lock().unwrap();
    // unpack and remediation succeeded, verify_manifest failed, and no
    // further stages ran
    assert_eq!(updates[0].2, "unpacked");
    assert_eq!(updates[1].2, "remediated");
    assert_eq!(updates.last().unwrap().2, "punted");
    assert_eq!(updates.len(), 3);
}

#[tokio::test]
async fn test_epub_pipeline_extracts_chapters() {
    let ctx = context().await;

    // an EPUB with two chapters
    let epub_path = ctx.root.path().join("book.epub");
    write_zip(
        &epub_path,
        &[
            ("OEBPS/ch01.xhtml", b"<html><body><p>Call me Ishmael.</p></body></html>" as &[u8]),
            ("OEBPS/ch02.xhtml", b"<html><body><p>Some years ago.</p></body></html>"),
            ("mimetype", b"application/epub+zip"),
        ],
    );
    let epub_bytes = std::fs::read(&epub_path).unwrap();

    let source_mets = r#"<?xml version="1.0" encoding="UTF-8"?>
<METS:mets xmlns:METS="http://www.loc.gov/METS/" xmlns:xlink="http://www.w3.org/1999/xlink" OBJID="epub1">
  <METS:dmdSec ID="DMD1"><METS:mdWrap MDTYPE="MARC"><METS:xmlData>
    <record><leader>01142cam</leader></record>
  </METS:xmlData></METS:mdWrap></METS:dmdSec>
</METS:mets>
"#;
    let manifest = format!(
        "{}  book.epub\n",
        feed_common::checksum::md5_hex(&epub_bytes)
    );

    let sip = ctx.engine.config().staging.download.join("epub1.zip");
    write_zip(
        &sip,
        &[
            ("book.epub", epub_bytes.as_slice()),
            ("mets.xml", source_mets.as_bytes()),
            ("checksum.md5", manifest.as_bytes()),
        ],
    );

    db::enqueue(ctx.engine.pool(), "test", "epub1", "epub", "ready")
        .await
        .unwrap();
    let runner = Runner::new(
        ctx.engine.clone(),
        Arc::new(QueueCallback::new(ctx.engine.pool().clone())),
    );
    runner.run_queue().await.unwrap();

    let row = db::queue_row(ctx.engine.pool(), "test", "epub1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "collated");

    let mets_path = ctx
        .root
        .path()
        .join("obj/test/ep/ub/1/epub1/epub1.mets.xml");
    let mets = std::fs::read_to_string(&mets_path).unwrap();

    // one page div per extracted chapter, EPUB itself outside the map
    assert!(mets.contains("<METS:fptr FILEID=\"OCR00000001\"/>"));
    assert!(mets.contains("<METS:fptr FILEID=\"OCR00000002\"/>"));
    assert!(!mets.contains("<METS:fptr FILEID=\"EPUB00000001\"/>"));
    assert!(mets.contains("<PREMIS:eventType>ocr normalization</PREMIS:eventType>"));

    let parsed = MetsDocument::parse(&mets).unwrap();
    assert!(parsed.checksums.contains_key("book.epub"));
    assert!(parsed.checksums.contains_key("00000001.txt"));
}
