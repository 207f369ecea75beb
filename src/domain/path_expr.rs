// src/domain/path_expr.rs
use crate::domain::error::{DomainError, DomainResult};

/// Segment separator of the path mini-language.
pub const SEGMENT_SEPARATOR: &str = "->";

/// Divider used when a `#`-marked source combines free-text matches.
pub const FREETEXT_DIVIDER: &str = "\n\n";

/// Divider used when a `+`-marked source combines inline matches.
pub const INLINE_DIVIDER: &str = " ";

/// Comparison operator usable in node-value and attribute-value predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Contains,
    NotContains,
}

impl Comparator {
    pub fn matches(&self, actual: &str, expected: &str) -> bool {
        match self {
            Comparator::Eq => actual == expected,
            Comparator::Ne => actual != expected,
            Comparator::Contains => actual.contains(expected),
            Comparator::NotContains => !actual.contains(expected),
        }
    }
}

/// Sentinel keywords short-circuiting a node-value predicate to "1"/"0".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Exists,
    Missing,
    Empty,
    NotEmpty,
    EmptyOrMissing,
}

impl Sentinel {
    fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "exists" => Some(Sentinel::Exists),
            "missing" => Some(Sentinel::Missing),
            "empty" => Some(Sentinel::Empty),
            "not_empty" => Some(Sentinel::NotEmpty),
            "empty_or_missing" => Some(Sentinel::EmptyOrMissing),
            _ => None,
        }
    }
}

/// Node-value predicate attached to the last segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePredicate {
    Compare(Comparator, String),
    Sentinel(Sentinel),
}

/// Attribute-value predicate (`path:attr:value` form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePredicate {
    pub comparator: Comparator,
    pub value: String,
}

/// Parsed representation of one path expression.
///
/// Evaluation is pure: resolving a `PathExpr` never mutates the document it
/// is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    pub segments: Vec<String>,
    pub attribute: Option<String>,
    pub attribute_predicate: Option<AttributePredicate>,
    pub value_predicate: Option<ValuePredicate>,
    pub wildcard: bool,
}

/// Strips a trailing combine marker from a mapping source string.
///
/// `#` combines free-text matches with a blank line, `+` combines inline
/// matches with a single space. Returns the stripped source and the divider,
/// if any marker was present.
pub fn split_combine_marker(source: &str) -> (&str, Option<&'static str>) {
    if let Some(stripped) = source.strip_suffix('#') {
        (stripped, Some(FREETEXT_DIVIDER))
    } else if let Some(stripped) = source.strip_suffix('+') {
        (stripped, Some(INLINE_DIVIDER))
    } else {
        (source, None)
    }
}

impl PathExpr {
    /// Parses a path expression such as
    /// `prices->purchase:currency:EUR` or `areas->floor=exists`.
    ///
    /// Grammar: segments joined by `->`; on the last segment an optional
    /// node-value predicate (`=`, `!=`, `~`, `!~`, or a sentinel keyword),
    /// then optionally `:attribute[:attributeValue]` where the attribute
    /// value may carry a leading comparator. A trailing `*` on the last
    /// segment sets the wildcard flag.
    pub fn parse(source: &str) -> DomainResult<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(DomainError::InvalidPathExpr(
                "empty path expression".to_string(),
            ));
        }

        let mut segments: Vec<String> = source
            .split(SEGMENT_SEPARATOR)
            .map(|s| s.trim().to_string())
            .collect();

        let last = segments
            .pop()
            .ok_or_else(|| DomainError::InvalidPathExpr(source.to_string()))?;

        // The last raw segment may carry `:attr[:attrValue]` parts.
        let mut parts = last.splitn(3, ':');
        let mut last_segment = parts.next().unwrap_or_default().to_string();
        let attribute = parts.next().map(|a| a.trim().to_string());
        let attr_value_raw = parts.next().map(|v| v.trim().to_string());

        let mut wildcard = false;
        let mut value_predicate = None;

        if let Some(stripped) = last_segment.strip_suffix('*') {
            wildcard = true;
            last_segment = stripped.to_string();
        }

        // Node-value predicate inside the segment, longest operator first.
        for op in ["!=", "!~", "~", "="] {
            if let Some(idx) = last_segment.find(op) {
                let (name, rest) = last_segment.split_at(idx);
                let expected = rest[op.len()..].trim().to_string();
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(DomainError::InvalidPathExpr(format!(
                        "predicate without node name in '{}'",
                        source
                    )));
                }
                value_predicate = Some(if op == "=" {
                    match Sentinel::from_keyword(&expected) {
                        Some(s) => ValuePredicate::Sentinel(s),
                        None => ValuePredicate::Compare(Comparator::Eq, expected),
                    }
                } else {
                    let cmp = match op {
                        "!=" => Comparator::Ne,
                        "!~" => Comparator::NotContains,
                        "~" => Comparator::Contains,
                        _ => unreachable!(),
                    };
                    ValuePredicate::Compare(cmp, expected)
                });
                last_segment = name;
                break;
            }
        }

        if last_segment.is_empty() {
            return Err(DomainError::InvalidPathExpr(format!(
                "empty segment in '{}'",
                source
            )));
        }
        segments.push(last_segment);

        if segments.iter().any(|s| s.is_empty()) {
            return Err(DomainError::InvalidPathExpr(format!(
                "empty segment in '{}'",
                source
            )));
        }

        let attribute = match attribute {
            Some(a) if a.is_empty() => {
                return Err(DomainError::InvalidPathExpr(format!(
                    "empty attribute name in '{}'",
                    source
                )))
            }
            other => other,
        };

        let attribute_predicate = attr_value_raw.map(|raw| {
            for (op, cmp) in [
                ("!=", Comparator::Ne),
                ("!~", Comparator::NotContains),
                ("~", Comparator::Contains),
            ] {
                if let Some(rest) = raw.strip_prefix(op) {
                    return AttributePredicate {
                        comparator: cmp,
                        value: rest.trim().to_string(),
                    };
                }
            }
            AttributePredicate {
                comparator: Comparator::Eq,
                value: raw,
            }
        });

        Ok(PathExpr {
            segments,
            attribute,
            attribute_predicate,
            value_predicate,
            wildcard,
        })
    }
}
