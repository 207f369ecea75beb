// src/domain/mapping.rs
use std::collections::HashMap;

use crate::domain::path_expr::PathExpr;
use crate::domain::services::transforms::Transform;

/// Destination kind of a mapping rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Core listing field.
    Field,
    /// Taxonomy term assignment.
    Taxonomy,
    /// Custom attribute (unique key or grouped bucket).
    Attribute,
}

impl MappingKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "field" => Some(MappingKind::Field),
            "taxonomy" => Some(MappingKind::Taxonomy),
            "attribute" => Some(MappingKind::Attribute),
            _ => None,
        }
    }
}

/// Marker on attribute destinations selecting single-valued storage.
pub const UNIQUE_ATTRIBUTE_MARKER: char = '*';

/// One declarative mapping instruction, immutable once loaded.
///
/// Rules apply in document order of the mapping table; document order is
/// the tie-break when two rules share a destination.
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub kind: MappingKind,
    /// Original source string, combine marker stripped. Used for logging
    /// and for the zero/empty filter's exemption matching.
    pub source: String,
    pub path: PathExpr,
    pub destination: String,
    pub transform: Option<Transform>,
    /// lang -> term title overriding the raw value as the term name.
    pub multilingual_title: HashMap<String, String>,
    /// lang -> parent term name for hierarchical taxonomies.
    pub multilingual_parent: HashMap<String, String>,
    pub combine_multiple: bool,
    pub combine_divider: String,
}

impl MappingRule {
    /// True for attribute rules whose destination carries the unique marker.
    pub fn is_unique_attribute(&self) -> bool {
        self.kind == MappingKind::Attribute
            && self.destination.ends_with(UNIQUE_ATTRIBUTE_MARKER)
    }

    /// Destination with the unique marker stripped.
    pub fn attribute_key(&self) -> &str {
        self.destination
            .trim_end_matches(UNIQUE_ATTRIBUTE_MARKER)
    }

    pub fn title_for(&self, language: &str) -> Option<&str> {
        self.multilingual_title.get(language).map(String::as_str)
    }

    pub fn parent_for(&self, language: &str) -> Option<&str> {
        self.multilingual_parent.get(language).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: MappingKind, destination: &str) -> MappingRule {
        MappingRule {
            kind,
            source: "a->b".to_string(),
            path: PathExpr::parse("a->b").unwrap(),
            destination: destination.to_string(),
            transform: None,
            multilingual_title: HashMap::new(),
            multilingual_parent: HashMap::new(),
            combine_multiple: false,
            combine_divider: String::new(),
        }
    }

    #[test]
    fn unique_marker_detection() {
        let unique = rule(MappingKind::Attribute, "floor*");
        assert!(unique.is_unique_attribute());
        assert_eq!(unique.attribute_key(), "floor");

        let grouped = rule(MappingKind::Attribute, "details");
        assert!(!grouped.is_unique_attribute());
        assert_eq!(grouped.attribute_key(), "details");

        // Marker is only meaningful on attribute rules.
        let field = rule(MappingKind::Field, "title*");
        assert!(!field.is_unique_attribute());
    }

    #[test]
    fn kind_parsing_is_case_insensitive() {
        assert_eq!(MappingKind::parse("Taxonomy"), Some(MappingKind::Taxonomy));
        assert_eq!(MappingKind::parse("FIELD"), Some(MappingKind::Field));
        assert_eq!(MappingKind::parse("widget"), None);
    }
}
