//! METS extraction
//!
//! Pull-parses a METS document into the pieces the engine consumes:
//! PREMIS events, the fileSec checksum/href table, the MARC descriptive
//! fragment, and per-file page labels from the struct map. Matching is by
//! local name throughout; provider documents use inconsistent namespace
//! prefixes.

use crate::error::Result;
use crate::premis::{EventOutcome, LinkingAgent, PremisEvent};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};

/// The captured MARC descriptive record: element name, attributes, and the
/// raw inner markup, verbatim from the source document.
#[derive(Debug, Clone)]
pub struct MarcFragment {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub inner: String,
}

impl MarcFragment {
    /// Remediated serialization: prefix dropped, pinned to the MARC slim
    /// namespace, original attributes preserved.
    pub fn to_xml(&self) -> String {
        let mut xml = format!("<{} xmlns=\"http://www.loc.gov/MARC21/slim\"", self.name);
        for (key, value) in &self.attrs {
            xml.push_str(&format!(" {}=\"{}\"", key, escape_attr(value)));
        }
        if self.inner.is_empty() {
            xml.push_str("/>");
        } else {
            xml.push('>');
            xml.push_str(&self.inner);
            xml.push_str(&format!("</{}>", self.name));
        }
        xml
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Page labels for one file, from the struct map div that references it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageData {
    pub orderlabel: Option<String>,
    pub label: Option<String>,
}

/// Everything the engine extracts from a source or repository METS
#[derive(Debug, Clone, Default)]
pub struct MetsDocument {
    /// PREMIS events in document order
    pub premis_events: Vec<PremisEvent>,
    /// filename -> MD5, from `file/@CHECKSUM` + `FLocat/@xlink:href`
    pub checksums: HashMap<String, String>,
    /// file ID -> filename
    pub file_ids: HashMap<String, String>,
    /// First MARC `mdWrap` xmlData child, when present
    pub marc: Option<MarcFragment>,
    /// filename -> page labels, resolved through the struct map fptrs
    pub page_data: HashMap<String, PageData>,
}

impl MetsDocument {
    /// Parse a METS document. Fails only on malformed XML; structural
    /// problems (missing MARC, unusable events) surface at the call sites
    /// that care.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut doc = MetsDocument::default();
        let mut stack: Vec<String> = Vec::new();
        let mut marc_wrap_depth: Option<usize> = None;
        let mut current_file: Option<(Option<String>, Option<String>)> = None;
        let mut div_stack: Vec<PageData> = Vec::new();
        let mut fptrs: Vec<(String, PageData)> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = local(&e);

                    // first element child of a MARC mdWrap's xmlData
                    if doc.marc.is_none()
                        && marc_wrap_depth.is_some()
                        && stack.last().map(String::as_str) == Some("xmlData")
                    {
                        let attrs = plain_attrs(&e);
                        let inner = reader.read_text(e.name())?.into_owned();
                        doc.marc = Some(MarcFragment { name, attrs, inner });
                        continue;
                    }

                    if name == "event" && in_premis_context(&stack) {
                        doc.premis_events.push(parse_event(&mut reader)?);
                        continue;
                    }

                    match name.as_str() {
                        "mdWrap" => {
                            if attr_local(&e, "MDTYPE").as_deref() == Some("MARC") {
                                marc_wrap_depth = Some(stack.len());
                            }
                        }
                        "file" => {
                            current_file =
                                Some((attr_local(&e, "ID"), attr_local(&e, "CHECKSUM")));
                        }
                        "FLocat" => {
                            record_flocat(&e, &current_file, &mut doc);
                        }
                        "div" => {
                            div_stack.push(PageData {
                                orderlabel: attr_local(&e, "ORDERLABEL"),
                                label: attr_local(&e, "LABEL"),
                            });
                        }
                        "fptr" => {
                            if let Some(fileid) = attr_local(&e, "FILEID") {
                                fptrs.push((fileid, nearest_labels(&div_stack)));
                            }
                        }
                        _ => {}
                    }

                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = local(&e);
                    match name.as_str() {
                        "FLocat" => record_flocat(&e, &current_file, &mut doc),
                        "fptr" => {
                            if let Some(fileid) = attr_local(&e, "FILEID") {
                                fptrs.push((fileid, nearest_labels(&div_stack)));
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(_) => {
                    if let Some(name) = stack.pop() {
                        match name.as_str() {
                            "mdWrap" => {
                                if marc_wrap_depth == Some(stack.len()) {
                                    marc_wrap_depth = None;
                                }
                            }
                            "file" => current_file = None,
                            "div" => {
                                div_stack.pop();
                            }
                            _ => {}
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        // resolve struct map fptrs to filenames
        for (fileid, labels) in fptrs {
            if let Some(filename) = doc.file_ids.get(&fileid) {
                doc.page_data.insert(filename.clone(), labels);
            }
        }

        Ok(doc)
    }

    /// Events grouped by eventType, preserving document order within a type
    pub fn events_by_type(&self) -> BTreeMap<String, Vec<&PremisEvent>> {
        let mut grouped: BTreeMap<String, Vec<&PremisEvent>> = BTreeMap::new();
        for event in &self.premis_events {
            grouped
                .entry(event.event_type.clone())
                .or_default()
                .push(event);
        }
        grouped
    }
}

fn in_premis_context(stack: &[String]) -> bool {
    matches!(
        stack.last().map(String::as_str),
        Some("premis") | Some("xmlData")
    )
}

fn local(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().local_name().into_inner()).into_owned()
}

fn attr_local(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find_map(|a| {
        if a.key.local_name().into_inner() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// All attributes with their prefixes stripped, namespace declarations
/// dropped. Used for the MARC fragment, which is re-rooted on write.
fn plain_attrs(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .filter_map(|a| a.ok())
        .filter(|a| {
            let key = a.key.into_inner();
            key != b"xmlns" && !key.starts_with(b"xmlns:")
        })
        .filter_map(|a| {
            let key = String::from_utf8_lossy(a.key.local_name().into_inner()).into_owned();
            a.unescape_value()
                .ok()
                .map(|v| (key, v.into_owned()))
        })
        .collect()
}

fn record_flocat(
    e: &BytesStart<'_>,
    current_file: &Option<(Option<String>, Option<String>)>,
    doc: &mut MetsDocument,
) {
    let Some((id, checksum)) = current_file else {
        return;
    };
    let Some(href) = attr_local(e, "href") else {
        return;
    };
    let filename = href.rsplit('/').next().unwrap_or(&href).to_string();

    if let Some(id) = id {
        doc.file_ids.insert(id.clone(), filename.clone());
    }
    if let Some(checksum) = checksum {
        doc.checksums.insert(filename, checksum.to_lowercase());
    }
}

/// Innermost struct map div that actually carries labels
fn nearest_labels(div_stack: &[PageData]) -> PageData {
    div_stack
        .iter()
        .rev()
        .find(|d| d.orderlabel.is_some() || d.label.is_some())
        .cloned()
        .unwrap_or_default()
}

/// Parse one PREMIS event subtree. The caller has consumed the event's
/// start tag; this consumes through its end tag.
fn parse_event(reader: &mut Reader<&[u8]>) -> Result<PremisEvent> {
    let mut event = PremisEvent::default();
    let mut path: Vec<String> = Vec::new();
    let mut current_id: Option<(String, String)> = None;
    let mut current_outcome: Option<EventOutcome> = None;
    let mut current_agent: Option<LinkingAgent> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local(&e);
                match name.as_str() {
                    "eventIdentifier" => {
                        current_id = Some((String::new(), String::new()));
                    }
                    "eventOutcomeInformation" => {
                        current_outcome = Some(EventOutcome::default());
                    }
                    "linkingAgentIdentifier" => {
                        current_agent = Some(LinkingAgent {
                            agent_type: String::new(),
                            value: String::new(),
                            role: String::new(),
                        });
                    }
                    _ => {}
                }
                path.push(name);
            }
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                assign_text(
                    &mut event,
                    &mut current_id,
                    &mut current_outcome,
                    &mut current_agent,
                    path.last().map(String::as_str),
                    &text,
                );
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                assign_text(
                    &mut event,
                    &mut current_id,
                    &mut current_outcome,
                    &mut current_agent,
                    path.last().map(String::as_str),
                    &text,
                );
            }
            Event::End(_) => {
                let Some(name) = path.pop() else {
                    // the event's own end tag
                    return Ok(event);
                };
                match name.as_str() {
                    "eventIdentifier" => {
                        if let Some(pair) = current_id.take() {
                            event.identifiers.push(pair);
                        }
                    }
                    "eventOutcomeInformation" => {
                        if let Some(outcome) = current_outcome.take() {
                            event.outcomes.push(outcome);
                        }
                    }
                    "linkingAgentIdentifier" => {
                        if let Some(agent) = current_agent.take() {
                            event.agents.push(agent);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => {
                return Err(crate::error::IngestError::operation_failed(
                    "parse premis event",
                    "document ended inside a PREMIS event",
                ))
            }
            _ => {}
        }
    }
}

fn assign_text(
    event: &mut PremisEvent,
    current_id: &mut Option<(String, String)>,
    current_outcome: &mut Option<EventOutcome>,
    current_agent: &mut Option<LinkingAgent>,
    element: Option<&str>,
    text: &str,
) {
    match element {
        Some("eventType") => event.event_type.push_str(text),
        Some("eventDateTime") => event.date.push_str(text),
        Some("eventDetail") => {
            event
                .detail
                .get_or_insert_with(String::new)
                .push_str(text);
        }
        Some("eventIdentifierType") => {
            if let Some((id_type, _)) = current_id {
                id_type.push_str(text);
            }
        }
        Some("eventIdentifierValue") => {
            if let Some((_, id_value)) = current_id {
                id_value.push_str(text);
            }
        }
        Some("eventOutcome") => {
            if let Some(outcome) = current_outcome {
                outcome
                    .outcome
                    .get_or_insert_with(String::new)
                    .push_str(text);
            }
        }
        Some("eventOutcomeDetailNote") => {
            if let Some(outcome) = current_outcome {
                outcome.notes.push(text.to_string());
            }
        }
        Some("linkingAgentIdentifierType") => {
            if let Some(agent) = current_agent {
                agent.agent_type.push_str(text);
            }
        }
        Some("linkingAgentIdentifierValue") => {
            if let Some(agent) = current_agent {
                agent.value.push_str(text);
            }
        }
        Some("linkingAgentRole") => {
            if let Some(agent) = current_agent {
                agent.role.push_str(text);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<METS:mets xmlns:METS="http://www.loc.gov/METS/"
           xmlns:PREMIS="info:lc/xmlns/premis-v2"
           xmlns:xlink="http://www.w3.org/1999/xlink" OBJID="test.obj1">
  <METS:dmdSec ID="DMD2">
    <METS:mdWrap MDTYPE="MARC">
      <METS:xmlData>
        <record><leader>01142cam</leader><controlfield tag="001">12345</controlfield></record>
      </METS:xmlData>
    </METS:mdWrap>
  </METS:dmdSec>
  <METS:amdSec ID="AMD1">
    <METS:digiprovMD ID="PREMIS1">
      <METS:mdWrap MDTYPE="PREMIS">
        <METS:xmlData>
          <PREMIS:premis version="2.1">
            <PREMIS:event>
              <PREMIS:eventIdentifier>
                <PREMIS:eventIdentifierType>UM</PREMIS:eventIdentifierType>
                <PREMIS:eventIdentifierValue>capture1</PREMIS:eventIdentifierValue>
              </PREMIS:eventIdentifier>
              <PREMIS:eventType>capture</PREMIS:eventType>
              <PREMIS:eventDateTime>2020-05-01T10:00:00</PREMIS:eventDateTime>
              <PREMIS:eventDetail>Photographed</PREMIS:eventDetail>
              <PREMIS:eventOutcomeInformation>
                <PREMIS:eventOutcome>pass</PREMIS:eventOutcome>
              </PREMIS:eventOutcomeInformation>
              <PREMIS:linkingAgentIdentifier>
                <PREMIS:linkingAgentIdentifierType>MARC21 Code</PREMIS:linkingAgentIdentifierType>
                <PREMIS:linkingAgentIdentifierValue>CtY</PREMIS:linkingAgentIdentifierValue>
                <PREMIS:linkingAgentRole>Executor</PREMIS:linkingAgentRole>
              </PREMIS:linkingAgentIdentifier>
            </PREMIS:event>
          </PREMIS:premis>
        </METS:xmlData>
      </METS:mdWrap>
    </METS:digiprovMD>
  </METS:amdSec>
  <METS:fileSec>
    <METS:fileGrp USE="image">
      <METS:file ID="IMG00000001" CHECKSUM="AABBCC" CHECKSUMTYPE="MD5">
        <METS:FLocat LOCTYPE="OTHER" xlink:href="00000001.jp2"/>
      </METS:file>
    </METS:fileGrp>
  </METS:fileSec>
  <METS:structMap TYPE="physical">
    <METS:div TYPE="volume">
      <METS:div TYPE="page" ORDER="1" ORDERLABEL="i" LABEL="TITLE">
        <METS:fptr FILEID="IMG00000001"/>
      </METS:div>
    </METS:div>
  </METS:structMap>
</METS:mets>"#;

    #[test]
    fn test_parse_extracts_marc() {
        let doc = MetsDocument::parse(SAMPLE).unwrap();
        let marc = doc.marc.unwrap();
        assert_eq!(marc.name, "record");
        assert!(marc.inner.contains("<leader>01142cam</leader>"));

        let xml = marc.to_xml();
        assert!(xml.starts_with("<record xmlns=\"http://www.loc.gov/MARC21/slim\""));
        assert!(xml.contains("controlfield"));
    }

    #[test]
    fn test_parse_extracts_premis_event() {
        let doc = MetsDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.premis_events.len(), 1);

        let event = &doc.premis_events[0];
        assert_eq!(event.event_type, "capture");
        assert_eq!(event.identifier(), Some(("UM", "capture1")));
        assert_eq!(event.date, "2020-05-01T10:00:00");
        assert_eq!(event.detail.as_deref(), Some("Photographed"));
        assert_eq!(event.outcomes.len(), 1);
        assert_eq!(event.outcomes[0].outcome.as_deref(), Some("pass"));
        assert_eq!(event.agents.len(), 1);
        assert_eq!(event.agents[0].value, "CtY");
        assert_eq!(event.agents[0].role, "Executor");
    }

    #[test]
    fn test_parse_extracts_checksums_and_page_data() {
        let doc = MetsDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.checksums.get("00000001.jp2").map(String::as_str), Some("aabbcc"));
        assert_eq!(
            doc.file_ids.get("IMG00000001").map(String::as_str),
            Some("00000001.jp2")
        );

        let page = doc.page_data.get("00000001.jp2").unwrap();
        assert_eq!(page.orderlabel.as_deref(), Some("i"));
        assert_eq!(page.label.as_deref(), Some("TITLE"));
    }

    #[test]
    fn test_events_by_type_groups_in_document_order() {
        let xml = r#"<mets xmlns:P="info:lc/xmlns/premis-v2"><amdSec><mdWrap MDTYPE="PREMIS"><xmlData><P:premis>
            <P:event><P:eventType>capture</P:eventType><P:eventDateTime>2020-01-01T00:00:00</P:eventDateTime></P:event>
            <P:event><P:eventType>ingestion</P:eventType><P:eventDateTime>2021-01-01T00:00:00</P:eventDateTime></P:event>
            <P:event><P:eventType>capture</P:eventType><P:eventDateTime>2020-02-01T00:00:00</P:eventDateTime></P:event>
        </P:premis></xmlData></mdWrap></amdSec></mets>"#;

        let doc = MetsDocument::parse(xml).unwrap();
        let grouped = doc.events_by_type();
        assert_eq!(grouped["capture"].len(), 2);
        assert_eq!(grouped["capture"][0].date, "2020-01-01T00:00:00");
        assert_eq!(grouped["capture"][1].date, "2020-02-01T00:00:00");
        assert_eq!(grouped["ingestion"].len(), 1);
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(MetsDocument::parse("<mets><unclosed></mets>").is_err());
    }
}
