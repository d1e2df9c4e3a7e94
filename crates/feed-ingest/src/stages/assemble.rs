//! MetsAssembly: build the canonical AIP METS
//!
//! Provenance is merged from three places without duplication, in a
//! reingest-stable way:
//!
//! 1. events already archived in the repository copy of the METS, re-emitted
//!    as they stand;
//! 2. events carried in the source METS, re-identified under the `UM`
//!    scheme with per-type counters seeded from the repository copy;
//! 3. events generated during this ingest, read back from the event table.
//!
//! An event is only added when nothing of its type at the same or a later
//! datetime is already archived, so reingesting an unchanged SIP re-emits
//! exactly the archived provenance. Generated-event identifiers are the
//! stored deterministic UUIDs, identical across runs.

use crate::error::{IngestError, Result};
use crate::mets::{validate_xml_file, PageData, XmlBuilder};
use crate::premis::{parse_premis_date, LinkingAgent, PremisEvent, VOLUME_ARTIST};
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use feed_common::checksum::md5_file;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

const METS_NS: &str = "http://www.loc.gov/METS/";
const PREMIS_NS: &str = "info:lc/xmlns/premis-v2";
const MARC_NS: &str = "http://www.loc.gov/MARC21/slim";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.loc.gov/METS/ http://www.loc.gov/standards/mets/mets.xsd \
info:lc/xmlns/premis-v2 http://www.loc.gov/standards/premis/v2/premis-v2-1.xsd \
http://www.loc.gov/MARC21/slim http://www.loc.gov/standards/marcxml/schema/MARC21slim.xsd";

/// An event ready for emission. Generated events carry their stored
/// outcome XML verbatim; extracted events carry structured outcomes.
struct OutEvent {
    event: PremisEvent,
    raw_outcome: Option<String>,
}

pub struct MetsAssembly;

#[async_trait]
impl Stage for MetsAssembly {
    fn identifier(&self) -> &'static str {
        "mets"
    }

    fn description(&self) -> &'static str {
        "Assemble the AIP METS with merged PREMIS provenance"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::METSED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        // recorded before emission so it lands in this same METS
        volume.record_premis_event("ingestion", None, None).await?;

        let marc = volume.marc_xml()?;
        let events = merge_events(volume).await?;

        let file_count = volume.file_count()?;
        let page_count = volume.page_count()?;
        let groups = volume.file_groups()?;
        let pages = volume.file_groups_by_page()?;
        let page_labels = collect_page_labels(volume, &groups, &pages)?;

        let zip_path = volume.zip_path();
        let zip_md5 = md5_file(&zip_path)?;
        let zip_size = std::fs::metadata(&zip_path)?.len();
        let staging = volume.staging_directory();
        let objid = volume.identifier();

        let mut xml = XmlBuilder::new()?;
        let createdate = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        xml.open(
            "METS:mets",
            &[
                ("xmlns:METS", METS_NS),
                ("xmlns:PREMIS", PREMIS_NS),
                ("xmlns:MARC", MARC_NS),
                ("xmlns:xlink", XLINK_NS),
                ("xmlns:xsi", XSI_NS),
                ("xsi:schemaLocation", SCHEMA_LOCATION),
                ("OBJID", &objid),
            ],
        )?;

        // header
        xml.open(
            "METS:metsHdr",
            &[("CREATEDATE", createdate.as_str()), ("RECORDSTATUS", "NEW")],
        )?;
        xml.open("METS:agent", &[("ROLE", "CREATOR"), ("TYPE", "ORGANIZATION")])?;
        xml.leaf("METS:name", &[], "DLPS")?;
        xml.close()?;
        xml.close()?;

        // descriptive metadata: an item-scoped MARC reference, then the
        // remediated MARCXML itself
        xml.open("METS:dmdSec", &[("ID", "DMD1")])?;
        xml.empty(
            "METS:mdRef",
            &[
                ("LOCTYPE", "OTHER"),
                ("OTHERLOCTYPE", "Item ID stored as second call number in item record"),
                ("MDTYPE", "MARC"),
                ("xlink:href", &objid),
            ],
        )?;
        xml.close()?;

        xml.open("METS:dmdSec", &[("ID", "DMD2")])?;
        xml.open("METS:mdWrap", &[("MDTYPE", "MARC"), ("LABEL", "MARC record")])?;
        xml.open("METS:xmlData", &[])?;
        xml.raw(&marc.to_xml())?;
        xml.close()?;
        xml.close()?;
        xml.close()?;

        // provenance
        xml.open("METS:amdSec", &[("ID", "AMD1")])?;
        xml.open("METS:digiprovMD", &[("ID", "PREMIS1")])?;
        xml.open("METS:mdWrap", &[("MDTYPE", "PREMIS")])?;
        xml.open("METS:xmlData", &[])?;
        xml.open("PREMIS:premis", &[("version", "2.1")])?;

        write_premis_object(&mut xml, &objid, file_count, page_count)?;
        for out in &events {
            write_event(&mut xml, out)?;
        }

        xml.close()?;
        xml.close()?;
        xml.close()?;
        xml.close()?;
        xml.close()?;

        // file inventory: the zip itself, then each logical group in
        // declaration order
        let mut fileids: HashMap<String, String> = HashMap::new();
        xml.open("METS:fileSec", &[])?;
        xml.open("METS:fileGrp", &[("ID", "FG1"), ("USE", "zip archive")])?;
        let zip_name = format!("{}.zip", volume.pt_objid());
        let zip_size_str = zip_size.to_string();
        xml.open(
            "METS:file",
            &[
                ("ID", "ZIP00000001"),
                ("MIMETYPE", "application/zip"),
                ("CHECKSUM", zip_md5.as_str()),
                ("CHECKSUMTYPE", "MD5"),
                ("SIZE", zip_size_str.as_str()),
            ],
        )?;
        xml.empty(
            "METS:FLocat",
            &[
                ("LOCTYPE", "OTHER"),
                ("OTHERLOCTYPE", "SYSTEM"),
                ("xlink:href", zip_name.as_str()),
            ],
        )?;
        xml.close()?;
        xml.close()?;

        let mut group_index = 1usize;
        for group in &groups {
            if group.files.is_empty() {
                continue;
            }
            group_index += 1;
            let group_id = format!("FG{}", group_index);
            xml.open(
                "METS:fileGrp",
                &[("ID", group_id.as_str()), ("USE", group.mets_use.as_str())],
            )?;
            for (index, file) in group.files.iter().enumerate() {
                let file_id = format!("{}{:08}", group.prefix, index + 1);
                let digest = md5_file(staging.join(file))?;
                let size = std::fs::metadata(staging.join(file))?.len().to_string();
                xml.open(
                    "METS:file",
                    &[
                        ("ID", file_id.as_str()),
                        ("CHECKSUM", digest.as_str()),
                        ("CHECKSUMTYPE", "MD5"),
                        ("SIZE", size.as_str()),
                    ],
                )?;
                xml.empty(
                    "METS:FLocat",
                    &[
                        ("LOCTYPE", "OTHER"),
                        ("OTHERLOCTYPE", "SYSTEM"),
                        ("xlink:href", file.as_str()),
                    ],
                )?;
                xml.close()?;
                fileids.insert(file.clone(), file_id);
            }
            xml.close()?;
        }
        xml.close()?;

        // physical struct map, strictly ascending sequence
        xml.open("METS:structMap", &[("ID", "SM1"), ("TYPE", "physical")])?;
        xml.open("METS:div", &[("TYPE", "volume")])?;
        for (sequence, by_group) in &pages {
            let order = sequence.to_string();
            let mut attrs: Vec<(&str, &str)> = vec![("TYPE", "page"), ("ORDER", order.as_str())];
            let labels = page_labels.get(sequence);
            if let Some(orderlabel) = labels.and_then(|l| l.orderlabel.as_deref()) {
                attrs.push(("ORDERLABEL", orderlabel));
            }
            if let Some(label) = labels.and_then(|l| l.label.as_deref()) {
                attrs.push(("LABEL", label));
            }
            xml.open("METS:div", &attrs)?;
            for group in &groups {
                let Some(files) = by_group.get(&group.name) else {
                    continue;
                };
                for file in files {
                    if let Some(file_id) = fileids.get(file) {
                        xml.empty("METS:fptr", &[("FILEID", file_id.as_str())])?;
                    }
                }
            }
            xml.close()?;
        }
        xml.close()?;
        xml.close()?;

        xml.close()?;
        let output = xml.finish()?;

        let mets_path = volume.mets_path();
        if let Some(parent) = mets_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&mets_path, &output)?;

        let xerces = volume.engine().config().xerces.clone();
        validate_xml_file(xerces.as_deref(), &mets_path).await?;

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            events = events.len(),
            pages = pages.len(),
            mets = %mets_path.display(),
            "METS assembled"
        );
        Ok(())
    }
}

/// Merge repository, source, and generated events; see the module docs.
async fn merge_events(volume: &mut Volume) -> Result<Vec<OutEvent>> {
    let id_suffix = Regex::new(r"^(.*?)(\d+)$").expect("valid pattern");
    let mut eventids: HashMap<String, u32> = HashMap::new();
    let mut latest_by_type: HashMap<String, NaiveDateTime> = HashMap::new();
    let mut events: Vec<OutEvent> = Vec::new();

    // 1. re-emit archived events and seed the counters and high-water marks
    if let Some(repository) = volume.repos_mets_xpc()? {
        for event in &repository.premis_events {
            if event.event_type.trim().is_empty() {
                return Err(IngestError::InvalidRepositoryPremis(
                    "archived event has an empty eventType".to_string(),
                ));
            }
            let value = event
                .identifiers
                .iter()
                .map(|(_, value)| value)
                .find(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    IngestError::InvalidRepositoryPremis(format!(
                        "archived '{}' event has no eventIdentifierValue",
                        event.event_type
                    ))
                })?;

            if let Some(captures) = id_suffix.captures(value) {
                if let Ok(n) = captures[2].parse::<u32>() {
                    let counter = eventids.entry(captures[1].to_string()).or_insert(0);
                    *counter = (*counter).max(n);
                }
            }
            if let Some(date) = event.date_parsed() {
                latest_by_type
                    .entry(event.event_type.clone())
                    .and_modify(|current| {
                        if date > *current {
                            *current = date;
                        }
                    })
                    .or_insert(date);
            }

            events.push(OutEvent {
                event: event.clone(),
                raw_outcome: None,
            });
        }
    }

    // 2. source events, re-identified under the UM scheme
    let source = volume.source_mets_xpc()?;
    let grouped = source.events_by_type();
    let source_codes = volume.packagetype().source_premis_events.clone();

    for code in &source_codes {
        let config =
            volume
                .engine()
                .event_configuration(volume.namespace(), volume.pkg_type(), code)?;
        let Some(event_type) = config.event_type else {
            continue;
        };
        let Some(type_events) = grouped.get(&event_type) else {
            continue;
        };

        for event in type_events {
            let date = parse_premis_date(&event.date).ok_or_else(|| {
                IngestError::InvalidSourcePremis(format!(
                    "unparseable eventDateTime '{}' on '{}' event",
                    event.date, event_type
                ))
            })?;
            if !need_to_update_event(&latest_by_type, &event_type, &date) {
                continue;
            }
            if event.identifier().is_none() {
                return Err(IngestError::InvalidSourcePremis(format!(
                    "expected exactly one identifier on '{}' event, found {}",
                    event_type,
                    event.identifiers.len()
                )));
            }

            let counter = eventids.entry(event_type.clone()).or_insert(0);
            *counter += 1;
            let mut rewritten = (*event).clone();
            rewritten.identifiers = vec![("UM".to_string(), format!("{}{}", event_type, counter))];

            events.push(OutEvent {
                event: rewritten,
                raw_outcome: None,
            });
        }
    }

    // 3. events generated during this ingest
    let generated_codes = volume.packagetype().premis_events.clone();
    for code in &generated_codes {
        let info = volume.get_event_info(code).await?.ok_or_else(|| {
            IngestError::missing_field(format!("date for premis event '{}'", code))
        })?;
        let config =
            volume
                .engine()
                .event_configuration(volume.namespace(), volume.pkg_type(), code)?;

        let event_type = config
            .event_type
            .ok_or_else(|| IngestError::config(format!("event '{}' has no type", code)))?;
        let detail = config
            .detail
            .ok_or_else(|| IngestError::config(format!("event '{}' has no detail", code)))?;
        let mut executor = config
            .executor
            .ok_or_else(|| IngestError::config(format!("event '{}' has no executor", code)))?;
        if executor == VOLUME_ARTIST {
            executor = volume.artist()?;
        }
        let executor_type = config
            .executor_type
            .unwrap_or_else(|| "MARC21 Code".to_string());

        let date = parse_premis_date(&info.date).ok_or_else(|| {
            IngestError::config(format!(
                "stored event '{}' has unparseable date '{}'",
                code, info.date
            ))
        })?;
        if !need_to_update_event(&latest_by_type, &event_type, &date) {
            continue;
        }

        let identifier = match config.eventid_override {
            Some(fixed) => ("UM".to_string(), fixed),
            None => ("UUID".to_string(), info.eventid.clone()),
        };

        let mut agents = vec![LinkingAgent {
            agent_type: executor_type,
            value: executor,
            role: "Executor".to_string(),
        }];
        for tool in &config.tools {
            agents.push(LinkingAgent {
                agent_type: "tool".to_string(),
                value: tool.clone(),
                role: "software".to_string(),
            });
        }

        events.push(OutEvent {
            event: PremisEvent {
                event_type,
                identifiers: vec![identifier],
                date: info.date.clone(),
                detail: Some(detail),
                outcomes: Vec::new(),
                agents,
            },
            raw_outcome: info.outcome.clone(),
        });
    }

    Ok(events)
}

/// An event is added only when nothing of its type at the same or a later
/// datetime is already archived
fn need_to_update_event(
    latest_by_type: &HashMap<String, NaiveDateTime>,
    event_type: &str,
    date: &NaiveDateTime,
) -> bool {
    match latest_by_type.get(event_type) {
        Some(existing) => existing < date,
        None => true,
    }
}

/// Page labels per sequence: the first struct-map file that yields them,
/// in filegroup declaration order
fn collect_page_labels(
    volume: &mut Volume,
    groups: &[crate::volume::FileGroup],
    pages: &BTreeMap<u32, BTreeMap<String, Vec<String>>>,
) -> Result<BTreeMap<u32, PageData>> {
    let mut labels = BTreeMap::new();

    for (sequence, by_group) in pages {
        'page: for group in groups {
            let Some(files) = by_group.get(&group.name) else {
                continue;
            };
            for file in files {
                if let Some(data) = volume.page_data(file)? {
                    if data.orderlabel.is_some() || data.label.is_some() {
                        labels.insert(*sequence, data);
                        break 'page;
                    }
                }
            }
        }
    }

    Ok(labels)
}

fn write_premis_object(
    xml: &mut XmlBuilder,
    objid: &str,
    file_count: usize,
    page_count: usize,
) -> Result<()> {
    xml.open("PREMIS:object", &[("xsi:type", "PREMIS:representation")])?;

    xml.open("PREMIS:objectIdentifier", &[])?;
    xml.leaf("PREMIS:objectIdentifierType", &[], "ht:id")?;
    xml.leaf("PREMIS:objectIdentifierValue", &[], objid)?;
    xml.close()?;

    xml.open("PREMIS:preservationLevel", &[])?;
    xml.leaf("PREMIS:preservationLevelValue", &[], "1")?;
    xml.close()?;

    for (name, count) in [("file count", file_count), ("page count", page_count)] {
        xml.open("PREMIS:significantProperties", &[])?;
        xml.leaf("PREMIS:significantPropertiesType", &[], name)?;
        xml.leaf("PREMIS:significantPropertiesValue", &[], &count.to_string())?;
        xml.close()?;
    }

    xml.close()
}

fn write_event(xml: &mut XmlBuilder, out: &OutEvent) -> Result<()> {
    let event = &out.event;
    xml.open("PREMIS:event", &[])?;

    for (id_type, id_value) in &event.identifiers {
        xml.open("PREMIS:eventIdentifier", &[])?;
        xml.leaf("PREMIS:eventIdentifierType", &[], id_type)?;
        xml.leaf("PREMIS:eventIdentifierValue", &[], id_value)?;
        xml.close()?;
    }

    xml.leaf("PREMIS:eventType", &[], &event.event_type)?;
    xml.leaf("PREMIS:eventDateTime", &[], &event.date)?;
    if let Some(detail) = &event.detail {
        xml.leaf("PREMIS:eventDetail", &[], detail)?;
    }
    for outcome in &event.outcomes {
        xml.raw(&outcome.to_xml())?;
    }
    if let Some(raw) = &out.raw_outcome {
        xml.raw(raw)?;
    }
    for agent in &event.agents {
        xml.open("PREMIS:linkingAgentIdentifier", &[])?;
        xml.leaf("PREMIS:linkingAgentIdentifierType", &[], &agent.agent_type)?;
        xml.leaf("PREMIS:linkingAgentIdentifierValue", &[], &agent.value)?;
        xml.leaf("PREMIS:linkingAgentRole", &[], &agent.role)?;
        xml.close()?;
    }

    xml.close()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDateTime {
        parse_premis_date(s).unwrap()
    }

    #[test]
    fn test_need_to_update_event() {
        let mut latest = HashMap::new();
        latest.insert("capture".to_string(), date("2020-05-01T10:00:00"));

        // nothing archived for the type
        assert!(need_to_update_event(&latest, "ingestion", &date("2020-01-01T00:00:00")));
        // newer than the archived copy
        assert!(need_to_update_event(&latest, "capture", &date("2021-01-01T00:00:00")));
        // identical datetime is already covered
        assert!(!need_to_update_event(&latest, "capture", &date("2020-05-01T10:00:00")));
        // older is already covered
        assert!(!need_to_update_event(&latest, "capture", &date("2019-05-01T10:00:00")));
    }

    #[test]
    fn test_identifier_suffix_parse() {
        let re = Regex::new(r"^(.*?)(\d+)$").unwrap();

        let captures = re.captures("capture12").unwrap();
        assert_eq!(&captures[1], "capture");
        assert_eq!(&captures[2], "12");

        let captures = re.captures("image compression3").unwrap();
        assert_eq!(&captures[1], "image compression");

        // UUID identifiers don't feed the counter
        assert!(re
            .captures("7EF60F84-7EFB-11E0-8AB7-D5FDA5F0CA6E")
            .is_none());
    }
}
