// src/application/services/field_extractor.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{instrument, warn};

use crate::application::error::ApplicationResult;
use crate::domain::document::DocumentNode;
use crate::domain::listing::TermAssignment;
use crate::domain::mapping::{MappingKind, MappingRule};
use crate::domain::repositories::taxonomy_store::TaxonomyStore;
use crate::domain::services::path_resolver::{resolve, resolve_all};
use crate::domain::services::transforms::ValueFilter;
use crate::infrastructure::mapping_table::MappingTable;

/// Everything the mapping table extracts from one listing node. Pure data;
/// persisting it is the caller's job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedListing {
    pub fields: BTreeMap<String, String>,
    pub term_assignments: Vec<TermAssignment>,
    pub unique_attributes: BTreeMap<String, String>,
    pub attribute_buckets: BTreeMap<String, Vec<String>>,
}

/// Applies the mapping table to one listing document node.
#[derive(Debug)]
pub struct FieldExtractor {
    taxonomy_store: Arc<dyn TaxonomyStore>,
    value_filter: ValueFilter,
}

impl FieldExtractor {
    pub fn new(taxonomy_store: Arc<dyn TaxonomyStore>, value_filter: ValueFilter) -> Self {
        Self {
            taxonomy_store,
            value_filter,
        }
    }

    #[instrument(level = "debug", skip(self, node, table))]
    pub fn extract<N: DocumentNode>(
        &self,
        node: &N,
        table: &MappingTable,
        language: &str,
    ) -> ApplicationResult<ExtractedListing> {
        let mut out = ExtractedListing::default();

        for rule in &table.rules {
            let values = self.resolve_rule(node, rule);
            if values.is_empty() {
                continue;
            }

            match rule.kind {
                MappingKind::Field => self.apply_field(&mut out, rule, values),
                MappingKind::Taxonomy => {
                    self.apply_taxonomy(&mut out, rule, values, language)?
                }
                MappingKind::Attribute => self.apply_attribute(&mut out, rule, values),
            }
        }

        Ok(out)
    }

    /// Resolves and transforms one rule's value(s), applying the zero/empty
    /// post-filter. A transform failure skips the value, not the listing.
    fn resolve_rule<N: DocumentNode>(&self, node: &N, rule: &MappingRule) -> Vec<String> {
        let resolved = if rule.combine_multiple {
            resolve_all(node, &rule.path)
        } else {
            resolve(node, &rule.path).into_iter().collect()
        };

        resolved
            .into_iter()
            .filter_map(|r| match &rule.transform {
                Some(t) => match t.apply(&r.value, Some(r.node)) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(
                            "Transform failed for source '{}' value '{}': {}",
                            rule.source, r.value, e
                        );
                        None
                    }
                },
                None => Some(r.value),
            })
            .filter(|v| !self.value_filter.suppresses(&rule.source, v))
            .collect()
    }

    fn apply_field(&self, out: &mut ExtractedListing, rule: &MappingRule, values: Vec<String>) {
        let divider = if rule.combine_divider.is_empty() {
            " "
        } else {
            rule.combine_divider.as_str()
        };
        let joined = values.join(divider);
        if rule.combine_multiple {
            // Combine-flagged rules concatenate with an earlier value for
            // the same destination instead of overwriting it.
            out.fields
                .entry(rule.destination.clone())
                .and_modify(|existing| {
                    existing.push_str(divider);
                    existing.push_str(&joined);
                })
                .or_insert(joined);
        } else {
            out.fields.insert(rule.destination.clone(), joined);
        }
    }

    fn apply_taxonomy(
        &self,
        out: &mut ExtractedListing,
        rule: &MappingRule,
        values: Vec<String>,
        language: &str,
    ) -> ApplicationResult<()> {
        for value in values {
            // A configured multilingual title overrides the raw value as
            // the term name.
            let term_name = rule.title_for(language).unwrap_or(value.as_str());

            let parent_id = match rule.parent_for(language) {
                Some(parent_name) => Some(self.taxonomy_store.find_or_create_term(
                    parent_name,
                    &rule.destination,
                    None,
                )?),
                None => None,
            };

            let term_id =
                self.taxonomy_store
                    .find_or_create_term(term_name, &rule.destination, parent_id)?;

            let assignment = TermAssignment {
                term_id,
                taxonomy: rule.destination.clone(),
            };
            if !out.term_assignments.contains(&assignment) {
                out.term_assignments.push(assignment);
            }
        }
        Ok(())
    }

    fn apply_attribute(&self, out: &mut ExtractedListing, rule: &MappingRule, values: Vec<String>) {
        if rule.is_unique_attribute() {
            let key = rule.attribute_key().to_string();
            let divider = if rule.combine_divider.is_empty() {
                " "
            } else {
                rule.combine_divider.as_str()
            };
            let joined = values.join(divider);
            if rule.combine_multiple {
                out.unique_attributes
                    .entry(key)
                    .and_modify(|existing| {
                        existing.push_str(divider);
                        existing.push_str(&joined);
                    })
                    .or_insert(joined);
            } else {
                out.unique_attributes.insert(key, joined);
            }
        } else {
            out.attribute_buckets
                .entry(rule.destination.clone())
                .or_default()
                .extend(values);
        }
    }
}
