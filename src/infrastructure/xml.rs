// src/infrastructure/xml.rs
//! Feed document tree built from quick-xml events.
//!
//! The importer evaluates path expressions against a materialized tree, not
//! the event stream: one listing node is visited many times by the mapping
//! table. Namespace prefixes and the default namespace are stripped once at
//! parse time, so path expressions are namespace-agnostic.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::domain::document::DocumentNode;
use crate::domain::error::{DomainError, DomainResult};

/// One element of a parsed feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut el = Self::new(name);
        el.text = text.into();
        el
    }

    pub fn with_attributes(name: impl Into<String>, attributes: Vec<(String, String)>) -> Self {
        let mut el = Self::new(name);
        el.attributes = attributes;
        el
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((name.into(), value.into()));
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(child);
    }
}

impl DocumentNode for XmlElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn attributes(&self) -> Vec<(&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    fn children(&self) -> Vec<&Self> {
        self.children.iter().collect()
    }
}

/// Strips a namespace prefix from a qualified name.
fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

/// Parses a whole feed document into an element tree, returning the root.
///
/// Malformed XML is fatal for the whole file.
pub fn parse_document(xml: &str) -> DomainResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(element_from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let el = element_from_start(&e)?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(parent) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| DomainError::Other(format!("bad XML text: {}", err)))?;
                    parent.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .text
                        .push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::End(_)) => {
                let el = stack.pop().ok_or_else(|| {
                    DomainError::Other("unbalanced XML end tag".to_string())
                })?;
                attach(&mut stack, &mut root, el)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(DomainError::Other(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(DomainError::Other("truncated XML document".to_string()));
    }
    root.ok_or_else(|| DomainError::Other("empty XML document".to_string()))
}

/// Reads and parses one feed file.
pub fn parse_file(path: &Path) -> DomainResult<XmlElement> {
    debug!("Parsing feed document: {}", path.display());
    let xml = std::fs::read_to_string(path)
        .map_err(|e| DomainError::Other(format!("cannot read {}: {}", path.display(), e)))?;
    parse_document(&xml)
}

fn element_from_start(e: &quick_xml::events::BytesStart<'_>) -> DomainResult<XmlElement> {
    let name_raw = e.name();
    let name = std::str::from_utf8(name_raw.as_ref())
        .map_err(|_| DomainError::Other("non-UTF-8 element name".to_string()))?;
    let mut el = XmlElement::new(local_name(name));

    for attr in e.attributes() {
        let attr = attr.map_err(|err| DomainError::Other(format!("bad XML attribute: {}", err)))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|_| DomainError::Other("non-UTF-8 attribute name".to_string()))?;
        // Namespace declarations are dropped with the namespaces.
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|err| DomainError::Other(format!("bad XML attribute value: {}", err)))?;
        el.set_attribute(local_name(key), value.into_owned());
    }
    Ok(el)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    el: XmlElement,
) -> DomainResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(el);
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(DomainError::Other(
                    "multiple root elements in XML document".to_string(),
                ));
            }
            *root = Some(el);
            Ok(())
        }
    }
}
