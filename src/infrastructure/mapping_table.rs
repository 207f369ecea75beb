// src/infrastructure/mapping_table.rs
//! Loader for the delimited mapping table.
//!
//! First non-comment row holds case-insensitive column headers; every
//! further row declares one mapping rule. Rows beginning with `#` are
//! comments. The file must be valid UTF-8 or the whole load is rejected.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, instrument};

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::mapping::{MappingKind, MappingRule};
use crate::domain::path_expr::{split_combine_marker, PathExpr};
use crate::domain::services::transforms::{Transform, TransformContext};

/// Separator between arguments in the `transform_args` column.
const TRANSFORM_ARG_SEPARATOR: char = '|';

/// The ordered mapping rules of one feed run. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    pub rules: Vec<MappingRule>,
}

impl MappingTable {
    #[instrument(level = "debug", skip(ctx))]
    pub fn load(path: &Path, ctx: &TransformContext) -> DomainResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            DomainError::Other(format!("cannot read mapping table {}: {}", path.display(), e))
        })?;
        let text = String::from_utf8(bytes).map_err(|_| {
            DomainError::InvalidMappingRule(format!(
                "mapping table {} is not valid UTF-8",
                path.display()
            ))
        })?;
        Self::parse(&text, ctx)
    }

    pub fn parse(text: &str, ctx: &TransformContext) -> DomainResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DomainError::InvalidMappingRule(format!("bad header row: {}", e)))?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();

        let column = |name: &str| headers.iter().position(|h| h == name);
        let kind_col = column("kind")
            .ok_or_else(|| DomainError::InvalidMappingRule("missing 'kind' column".into()))?;
        let source_col = column("source")
            .ok_or_else(|| DomainError::InvalidMappingRule("missing 'source' column".into()))?;
        let dest_col = column("destination").ok_or_else(|| {
            DomainError::InvalidMappingRule("missing 'destination' column".into())
        })?;
        let transform_col = column("transform");
        let args_col = column("transform_args");

        // Any number of title:<lang> / parent:<lang> columns.
        let title_cols: Vec<(usize, String)> = lang_columns(&headers, "title:");
        let parent_cols: Vec<(usize, String)> = lang_columns(&headers, "parent:");

        let mut rules = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                DomainError::InvalidMappingRule(format!("row {}: {}", row_idx + 2, e))
            })?;
            let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

            if record.iter().all(|c| c.trim().is_empty()) {
                continue;
            }

            let kind = MappingKind::parse(cell(kind_col)).ok_or_else(|| {
                DomainError::InvalidMappingRule(format!(
                    "row {}: unknown kind '{}'",
                    row_idx + 2,
                    cell(kind_col)
                ))
            })?;

            let raw_source = cell(source_col);
            if raw_source.is_empty() {
                return Err(DomainError::InvalidMappingRule(format!(
                    "row {}: empty source",
                    row_idx + 2
                )));
            }
            let (source, divider) = split_combine_marker(raw_source);
            let path = PathExpr::parse(source)?;

            let destination = cell(dest_col).to_string();
            if destination.is_empty() {
                return Err(DomainError::InvalidMappingRule(format!(
                    "row {}: empty destination",
                    row_idx + 2
                )));
            }

            let transform = match transform_col.map(cell).filter(|t| !t.is_empty()) {
                Some(name) => {
                    let args: Vec<String> = args_col
                        .map(cell)
                        .filter(|a| !a.is_empty())
                        .map(|a| {
                            a.split(TRANSFORM_ARG_SEPARATOR)
                                .map(|p| p.trim().to_string())
                                .collect()
                        })
                        .unwrap_or_default();
                    Some(Transform::from_spec(name, &args, ctx)?)
                }
                None => None,
            };

            let multilingual_title = collect_lang_cells(&record, &title_cols);
            let multilingual_parent = collect_lang_cells(&record, &parent_cols);

            rules.push(MappingRule {
                kind,
                source: source.to_string(),
                path,
                destination,
                transform,
                multilingual_title,
                multilingual_parent,
                combine_multiple: divider.is_some(),
                combine_divider: divider.unwrap_or_default().to_string(),
            });
        }

        debug!("Loaded {} mapping rules", rules.len());
        Ok(Self { rules })
    }
}

fn lang_columns(headers: &[String], prefix: &str) -> Vec<(usize, String)> {
    headers
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| {
            h.strip_prefix(prefix)
                .map(|lang| (idx, lang.trim().to_string()))
        })
        .collect()
}

fn collect_lang_cells(
    record: &csv::StringRecord,
    cols: &[(usize, String)],
) -> HashMap<String, String> {
    cols.iter()
        .filter_map(|(idx, lang)| {
            let value = record.get(*idx).unwrap_or("").trim();
            if value.is_empty() {
                None
            } else {
                Some((lang.clone(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path_expr::FREETEXT_DIVIDER;

    fn ctx() -> TransformContext {
        TransformContext {
            default_currency: "EUR".to_string(),
            area_unit: "m²".to_string(),
            code_tables: HashMap::new(),
        }
    }

    const TABLE: &str = "\
kind,source,destination,transform,transform_args,title:de,title:en,parent:en
# core fields
field,geo->postcode,postcode,,,,,
field,texts->description#,description,,,,,
field,prices->purchase,price,currency,,,,
taxonomy,type->kind,property-type,,,Wohnung,Apartment,Residential
attribute,areas->floor,floor*,integer,,,,
attribute,features->extra,details,,,,,
";

    #[test]
    fn loads_rules_in_document_order() {
        let table = MappingTable::parse(TABLE, &ctx()).unwrap();
        assert_eq!(table.rules.len(), 6);
        assert_eq!(table.rules[0].destination, "postcode");
        assert_eq!(table.rules[0].kind, MappingKind::Field);
        assert!(table.rules[0].transform.is_none());
    }

    #[test]
    fn combine_marker_is_stripped_and_recorded() {
        let table = MappingTable::parse(TABLE, &ctx()).unwrap();
        let rule = &table.rules[1];
        assert_eq!(rule.source, "texts->description");
        assert!(rule.combine_multiple);
        assert_eq!(rule.combine_divider, FREETEXT_DIVIDER);
    }

    #[test]
    fn multilingual_columns_are_collected() {
        let table = MappingTable::parse(TABLE, &ctx()).unwrap();
        let rule = &table.rules[3];
        assert_eq!(rule.title_for("de"), Some("Wohnung"));
        assert_eq!(rule.title_for("en"), Some("Apartment"));
        assert_eq!(rule.parent_for("en"), Some("Residential"));
        assert_eq!(rule.parent_for("de"), None);
    }

    #[test]
    fn unique_attribute_marker_survives_loading() {
        let table = MappingTable::parse(TABLE, &ctx()).unwrap();
        assert!(table.rules[4].is_unique_attribute());
        assert!(!table.rules[5].is_unique_attribute());
    }

    #[test]
    fn headers_are_case_insensitive() {
        let text = "KIND,Source,DESTINATION\nfield,geo->city,city\n";
        let table = MappingTable::parse(text, &ctx()).unwrap();
        assert_eq!(table.rules[0].destination, "city");
    }

    #[test]
    fn unknown_kind_fails_the_load() {
        let text = "kind,source,destination\nwidget,geo->city,city\n";
        assert!(MappingTable::parse(text, &ctx()).is_err());
    }

    #[test]
    fn invalid_utf8_rejects_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.csv");
        std::fs::write(&path, [0x6b, 0x69, 0xff, 0xfe, 0x0a]).unwrap();
        assert!(MappingTable::load(&path, &ctx()).is_err());
    }
}
