//! PREMIS event model
//!
//! Event configuration records (the global catalog plus per-package-type
//! overrides), deterministic event UUID minting, and the parsed form of
//! events extracted from source and repository METS documents.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace UUID for deterministic PREMIS event identifiers.
/// Reingests mint identical UUIDs for events at the same wall-clock time.
pub const FEED_UUID_NAMESPACE: Uuid = Uuid::from_u128(0x09a5dad6_3484_11e0_9d45_077bd5215a96);

/// Executor placeholder replaced with the volume's artist at emission time
pub const VOLUME_ARTIST: &str = "VOLUME_ARTIST";

/// Derive the stable UUIDv5 for an event on an object.
///
/// The name is `namespace-objid-eventtype-date`; two calls with the same
/// arguments always yield the same UUID.
pub fn premis_uuid(namespace: &str, objid: &str, eventtype: &str, date: &str) -> Uuid {
    let name = format!("{}-{}-{}-{}", namespace, objid, eventtype, date);
    Uuid::new_v5(&FEED_UUID_NAMESPACE, name.as_bytes())
}

/// Parse a PREMIS eventDateTime.
///
/// Provider METS disagree on whether dates carry a zone designator, so both
/// forms are accepted.
pub fn parse_premis_date(date: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S").ok()
}

/// Configuration for one event code, from the global catalog or an override
/// layer. Fields are optional so layers can be merged; `detail`, `executor`,
/// and `type` must be present by the time an event is emitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventConfig {
    /// PREMIS eventType, e.g. "ingestion", "message digest calculation"
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// eventDetail text
    pub detail: Option<String>,
    /// linkingAgent of role Executor; `VOLUME_ARTIST` substitutes the
    /// volume's artist
    pub executor: Option<String>,
    /// linkingAgentIdentifierType for the executor
    pub executor_type: Option<String>,
    /// software linking agents, one per tool
    #[serde(default)]
    pub tools: Vec<String>,
    /// fixed eventIdentifierValue instead of the derived one
    pub eventid_override: Option<String>,
}

impl EventConfig {
    /// Overlay `over` on top of self, field by field. Present fields in the
    /// higher layer win; absent fields fall through.
    pub fn merged_with(&self, over: &EventConfig) -> EventConfig {
        EventConfig {
            event_type: over.event_type.clone().or_else(|| self.event_type.clone()),
            detail: over.detail.clone().or_else(|| self.detail.clone()),
            executor: over.executor.clone().or_else(|| self.executor.clone()),
            executor_type: over
                .executor_type
                .clone()
                .or_else(|| self.executor_type.clone()),
            tools: if over.tools.is_empty() {
                self.tools.clone()
            } else {
                over.tools.clone()
            },
            eventid_override: over
                .eventid_override
                .clone()
                .or_else(|| self.eventid_override.clone()),
        }
    }
}

/// One linking agent on an emitted event
#[derive(Debug, Clone, PartialEq)]
pub struct LinkingAgent {
    pub agent_type: String,
    pub value: String,
    pub role: String,
}

/// Parsed eventOutcomeInformation block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventOutcome {
    pub outcome: Option<String>,
    pub notes: Vec<String>,
}

impl EventOutcome {
    pub fn new(outcome: impl Into<String>) -> Self {
        Self {
            outcome: Some(outcome.into()),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Canonical XML form, stored in the premis_events table and embedded
    /// into assembled METS documents.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<PREMIS:eventOutcomeInformation>");
        if let Some(ref outcome) = self.outcome {
            xml.push_str("<PREMIS:eventOutcome>");
            xml.push_str(&escape_text(outcome));
            xml.push_str("</PREMIS:eventOutcome>");
        }
        if !self.notes.is_empty() {
            xml.push_str("<PREMIS:eventOutcomeDetail>");
            for note in &self.notes {
                xml.push_str("<PREMIS:eventOutcomeDetailNote>");
                xml.push_str(&escape_text(note));
                xml.push_str("</PREMIS:eventOutcomeDetailNote>");
            }
            xml.push_str("</PREMIS:eventOutcomeDetail>");
        }
        xml.push_str("</PREMIS:eventOutcomeInformation>");
        xml
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// An event parsed from a source or repository METS
#[derive(Debug, Clone, Default)]
pub struct PremisEvent {
    pub event_type: String,
    /// (identifierType, identifierValue) pairs; exactly one is expected
    pub identifiers: Vec<(String, String)>,
    pub date: String,
    pub detail: Option<String>,
    pub outcomes: Vec<EventOutcome>,
    pub agents: Vec<LinkingAgent>,
}

impl PremisEvent {
    /// The single identifier pair, when the event is well-formed
    pub fn identifier(&self) -> Option<(&str, &str)> {
        match self.identifiers.as_slice() {
            [(t, v)] => Some((t.as_str(), v.as_str())),
            _ => None,
        }
    }

    pub fn date_parsed(&self) -> Option<NaiveDateTime> {
        parse_premis_date(&self.date)
    }
}
