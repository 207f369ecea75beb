// src/domain/services/path_resolver.rs
use crate::domain::document::DocumentNode;
use crate::domain::path_expr::{PathExpr, Sentinel, ValuePredicate};

/// A resolved value together with the node it came from, so transforms can
/// consult the source node (e.g. a currency attribute).
#[derive(Debug)]
pub struct ResolvedValue<'a, N> {
    pub node: &'a N,
    pub value: String,
}

/// Evaluates a path expression against a document node, returning the first
/// match or `None` when nothing satisfies the expression.
///
/// Callers must distinguish "absent" (`None`) from "present but empty"
/// (`Some` with an empty value): downstream zero/empty filtering depends on
/// it. Sentinel predicates short-circuit to a boolean-like `"1"`/`"0"`
/// value instead of the node's text.
pub fn resolve<'a, N: DocumentNode>(node: &'a N, expr: &PathExpr) -> Option<ResolvedValue<'a, N>> {
    let candidates = descend(node, expr);

    if let Some(ValuePredicate::Sentinel(sentinel)) = &expr.value_predicate {
        let first = candidates.first().copied();
        let present = first.is_some();
        let empty = first.map(|n| n.text().trim().is_empty()).unwrap_or(true);
        let truth = match sentinel {
            Sentinel::Exists => present,
            Sentinel::Missing => !present,
            Sentinel::Empty => present && empty,
            Sentinel::NotEmpty => present && !empty,
            Sentinel::EmptyOrMissing => !present || empty,
        };
        return Some(ResolvedValue {
            node: first.unwrap_or(node),
            value: if truth { "1" } else { "0" }.to_string(),
        });
    }

    candidates
        .into_iter()
        .filter(|n| satisfies(*n, expr))
        .find_map(|n| value_of(n, expr).map(|value| ResolvedValue { node: n, value }))
}

/// Like [`resolve`], but returns every matching node's value in document
/// order. Used for combine-flagged mapping rules.
pub fn resolve_all<'a, N: DocumentNode>(
    node: &'a N,
    expr: &PathExpr,
) -> Vec<ResolvedValue<'a, N>> {
    if matches!(expr.value_predicate, Some(ValuePredicate::Sentinel(_))) {
        // Sentinels collapse to a single boolean-like value.
        return resolve(node, expr).into_iter().collect();
    }
    descend(node, expr)
        .into_iter()
        .filter(|n| satisfies(*n, expr))
        .filter_map(|n| value_of(n, expr).map(|value| ResolvedValue { node: n, value }))
        .collect()
}

/// Walks the segment chain from `node`, returning all endpoint nodes.
fn descend<'a, N: DocumentNode>(node: &'a N, expr: &PathExpr) -> Vec<&'a N> {
    let mut frontier = vec![node];
    for segment in &expr.segments {
        frontier = frontier
            .into_iter()
            .flat_map(|n| n.children_named(segment))
            .collect();
        if frontier.is_empty() {
            break;
        }
    }
    frontier
}

/// Applies the node-value predicate, then the attribute predicate, as
/// narrowing filters.
fn satisfies<N: DocumentNode>(node: &N, expr: &PathExpr) -> bool {
    if let Some(ValuePredicate::Compare(cmp, expected)) = &expr.value_predicate {
        if !cmp.matches(node.text().trim(), expected) {
            return false;
        }
    }
    if let Some(pred) = &expr.attribute_predicate {
        let attr_name = match expr.attribute.as_deref() {
            Some(a) => a,
            None => return true,
        };
        match node.attribute(attr_name) {
            Some(actual) => {
                if !pred.comparator.matches(actual, &pred.value) {
                    return false;
                }
            }
            // Wildcard ignores attribute-presence mismatch.
            None if expr.wildcard => {}
            None => return false,
        }
    }
    true
}

/// Extracts the value for a matched node: the attribute value when one is
/// selected (falling back to node text under the wildcard flag), the node
/// text otherwise. An attribute-value predicate selects the node, so the
/// node text is returned in that case.
fn value_of<N: DocumentNode>(node: &N, expr: &PathExpr) -> Option<String> {
    match (&expr.attribute, &expr.attribute_predicate) {
        (Some(_), Some(_)) => Some(node.text().to_string()),
        (Some(attr), None) => match node.attribute(attr) {
            Some(v) => Some(v.to_string()),
            None if expr.wildcard => Some(node.text().to_string()),
            None => None,
        },
        _ => Some(node.text().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::xml::XmlElement;

    fn sample() -> XmlElement {
        let mut root = XmlElement::new("property");
        let mut geo = XmlElement::new("geo");
        geo.push_child(XmlElement::with_text("postcode", "81667"));
        geo.push_child(XmlElement::with_text("city", "Munich"));
        root.push_child(geo);

        let mut prices = XmlElement::new("prices");
        let mut purchase = XmlElement::with_text("purchase", "250000");
        purchase.set_attribute("currency", "EUR");
        prices.push_child(purchase);
        root.push_child(prices);

        let mut features = XmlElement::new("features");
        let mut floor1 = XmlElement::with_text("flooring", "living room");
        floor1.set_attribute("kind", "parquet");
        features.push_child(floor1);
        let mut floor2 = XmlElement::with_text("flooring", "bathroom");
        floor2.set_attribute("kind", "tile");
        features.push_child(floor2);
        features.push_child(XmlElement::with_text("extra", "balcony"));
        features.push_child(XmlElement::with_text("extra", "cellar"));
        root.push_child(features);

        let mut areas = XmlElement::new("areas");
        areas.push_child(XmlElement::with_text("floor", ""));
        root.push_child(areas);
        root
    }

    fn resolve_str(node: &XmlElement, path: &str) -> Option<String> {
        let expr = crate::domain::path_expr::PathExpr::parse(path).unwrap();
        resolve(node, &expr).map(|r| r.value)
    }

    #[test]
    fn resolves_node_text() {
        let doc = sample();
        assert_eq!(resolve_str(&doc, "geo->postcode").as_deref(), Some("81667"));
    }

    #[test]
    fn absent_node_is_not_found_not_empty() {
        let doc = sample();
        assert_eq!(resolve_str(&doc, "geo->country"), None);
        // Present but empty stays distinguishable from absent.
        assert_eq!(resolve_str(&doc, "areas->floor").as_deref(), Some(""));
    }

    #[test]
    fn resolves_attribute_value() {
        let doc = sample();
        assert_eq!(
            resolve_str(&doc, "prices->purchase:currency").as_deref(),
            Some("EUR")
        );
        assert_eq!(resolve_str(&doc, "prices->purchase:missing_attr"), None);
    }

    #[test]
    fn attribute_value_predicate_selects_node_text() {
        let doc = sample();
        assert_eq!(
            resolve_str(&doc, "features->flooring:kind:tile").as_deref(),
            Some("bathroom")
        );
        // First matching node wins.
        assert_eq!(
            resolve_str(&doc, "features->flooring:kind:~par").as_deref(),
            Some("living room")
        );
        assert_eq!(resolve_str(&doc, "features->flooring:kind:stone"), None);
    }

    #[test]
    fn wildcard_ignores_attribute_absence() {
        let doc = sample();
        assert_eq!(resolve_str(&doc, "geo->city:kind"), None);
        assert_eq!(
            resolve_str(&doc, "geo->city*:kind").as_deref(),
            Some("Munich")
        );
    }

    #[test]
    fn sentinel_missing_and_empty_or_missing() {
        let doc = sample();
        assert_eq!(resolve_str(&doc, "geo->country=missing").as_deref(), Some("1"));
        assert_eq!(resolve_str(&doc, "geo->postcode=missing").as_deref(), Some("0"));
        assert_eq!(
            resolve_str(&doc, "geo->country=empty_or_missing").as_deref(),
            Some("1")
        );
        assert_eq!(
            resolve_str(&doc, "areas->floor=empty_or_missing").as_deref(),
            Some("1")
        );
        assert_eq!(
            resolve_str(&doc, "geo->postcode=empty_or_missing").as_deref(),
            Some("0")
        );
        assert_eq!(resolve_str(&doc, "geo->postcode=exists").as_deref(), Some("1"));
        assert_eq!(
            resolve_str(&doc, "areas->floor=not_empty").as_deref(),
            Some("0")
        );
    }

    #[test]
    fn node_value_predicate_filters() {
        let doc = sample();
        assert_eq!(
            resolve_str(&doc, "features->extra=cellar").as_deref(),
            Some("cellar")
        );
        assert_eq!(resolve_str(&doc, "features->extra=garage"), None);
        assert_eq!(
            resolve_str(&doc, "features->extra!=balcony").as_deref(),
            Some("cellar")
        );
    }

    #[test]
    fn resolve_all_returns_every_match() {
        let doc = sample();
        let expr = crate::domain::path_expr::PathExpr::parse("features->extra").unwrap();
        let values: Vec<String> = resolve_all(&doc, &expr).into_iter().map(|r| r.value).collect();
        assert_eq!(values, vec!["balcony", "cellar"]);
    }
}
