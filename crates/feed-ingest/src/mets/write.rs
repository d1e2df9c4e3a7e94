//! Element-level XML builder over the quick-xml writer
//!
//! The METS assembler emits a deep, attribute-heavy tree; this wrapper
//! keeps an open-element stack so the assembler reads as push/pop pairs
//! and can't emit mismatched tags.

use crate::error::{IngestError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

pub struct XmlBuilder {
    writer: Writer<Vec<u8>>,
    open: Vec<String>,
}

impl XmlBuilder {
    /// Start a new document with an XML declaration
    pub fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self {
            writer,
            open: Vec::new(),
        })
    }

    /// Open an element with attributes
    pub fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for (key, value) in attrs {
            element.push_attribute((*key, *value));
        }
        self.writer.write_event(Event::Start(element))?;
        self.open.push(name.to_string());
        Ok(())
    }

    /// Close the innermost open element
    pub fn close(&mut self) -> Result<()> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| IngestError::operation_failed("xml build", "close without open"))?;
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// Write `<name attrs>text</name>`
    pub fn leaf(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.open(name, attrs)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.close()
    }

    /// Write a self-closing element
    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for (key, value) in attrs {
            element.push_attribute((*key, *value));
        }
        self.writer.write_event(Event::Empty(element))?;
        Ok(())
    }

    /// Embed already-serialized XML verbatim
    pub fn raw(&mut self, xml: &str) -> Result<()> {
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(xml)))?;
        Ok(())
    }

    /// Finish the document; all opened elements must be closed
    pub fn finish(self) -> Result<String> {
        if let Some(name) = self.open.last() {
            return Err(IngestError::operation_failed(
                "xml build",
                format!("unclosed element '{}'", name),
            ));
        }
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| IngestError::operation_failed("xml build", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_document() {
        let mut xml = XmlBuilder::new().unwrap();
        xml.open("METS:mets", &[("OBJID", "test.obj1")]).unwrap();
        xml.leaf("METS:name", &[], "DLPS").unwrap();
        xml.empty("METS:fptr", &[("FILEID", "IMG00000001")]).unwrap();
        xml.close().unwrap();

        let out = xml.finish().unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(out.contains("<METS:mets OBJID=\"test.obj1\">"));
        assert!(out.contains("<METS:name>DLPS</METS:name>"));
        assert!(out.contains("<METS:fptr FILEID=\"IMG00000001\"/>"));
        assert!(out.trim_end().ends_with("</METS:mets>"));
    }

    #[test]
    fn test_text_is_escaped_but_raw_is_not() {
        let mut xml = XmlBuilder::new().unwrap();
        xml.open("doc", &[]).unwrap();
        xml.leaf("a", &[], "x < y & z").unwrap();
        xml.raw("<b>verbatim</b>").unwrap();
        xml.close().unwrap();

        let out = xml.finish().unwrap();
        assert!(out.contains("x &lt; y &amp; z"));
        assert!(out.contains("<b>verbatim</b>"));
    }

    #[test]
    fn test_unbalanced_document_is_rejected() {
        let mut xml = XmlBuilder::new().unwrap();
        xml.open("doc", &[]).unwrap();
        assert!(xml.finish().is_err());
    }

    #[test]
    fn test_close_without_open_is_rejected() {
        let mut xml = XmlBuilder::new().unwrap();
        assert!(xml.close().is_err());
    }
}
