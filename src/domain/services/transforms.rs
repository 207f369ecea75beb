// src/domain/services/transforms.rs
use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::domain::document::DocumentNode;
use crate::domain::error::{DomainError, DomainResult};

/// Lookup context handed to [`Transform::from_spec`] when the mapping table
/// is loaded. Code tables and unit defaults come from the configuration.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    pub default_currency: String,
    pub area_unit: String,
    pub code_tables: HashMap<String, HashMap<String, String>>,
}

/// Closed set of value transforms invokable from the mapping table.
///
/// Resolved once from its string spec at load time; applying a transform is
/// a pure function of the raw value, the source node, and the parameters
/// baked in at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Normalizes truthy/falsy markers to a yes/no label pair.
    Boolean { yes: String, no: String },
    /// Integer normalization, tolerant of grouping separators.
    Integer,
    /// Locale-aware decimal normalization (comma or point decimals).
    Float,
    /// Formats a number and appends a currency symbol taken from the source
    /// node's `currency` attribute, falling back to the configured default.
    Currency { default_symbol: String },
    /// Formats a number and appends the configured area unit.
    Area { unit: String },
    /// Date, accepting partial `MM/YYYY` values (normalized to the last day
    /// of that month).
    Date,
    /// Date with time of day.
    DateTime,
    /// Code-table lookup; unknown codes pass through unchanged.
    Lookup { table: HashMap<String, String> },
    /// Appends a literal unit, optionally number-formatting first.
    UnitSuffix { unit: String, format_number: bool },
}

impl Transform {
    /// Resolves a transform spec (`name` plus arguments) from the mapping
    /// table into a concrete variant. Unknown names are a load-time error.
    pub fn from_spec(name: &str, args: &[String], ctx: &TransformContext) -> DomainResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "boolean" => Ok(Transform::Boolean {
                yes: args.first().cloned().unwrap_or_else(|| "yes".to_string()),
                no: args.get(1).cloned().unwrap_or_else(|| "no".to_string()),
            }),
            "integer" => Ok(Transform::Integer),
            "float" => Ok(Transform::Float),
            "currency" => Ok(Transform::Currency {
                default_symbol: args
                    .first()
                    .cloned()
                    .unwrap_or_else(|| ctx.default_currency.clone()),
            }),
            "area" => Ok(Transform::Area {
                unit: args.first().cloned().unwrap_or_else(|| ctx.area_unit.clone()),
            }),
            "date" => Ok(Transform::Date),
            "datetime" => Ok(Transform::DateTime),
            "lookup" => {
                let table_name = args.first().ok_or_else(|| {
                    DomainError::InvalidMappingRule("lookup transform needs a table name".into())
                })?;
                let table = ctx.code_tables.get(table_name).cloned().ok_or_else(|| {
                    DomainError::UnknownTransform(format!("code table '{}'", table_name))
                })?;
                Ok(Transform::Lookup { table })
            }
            "unit" => {
                let unit = args.first().ok_or_else(|| {
                    DomainError::InvalidMappingRule("unit transform needs a unit literal".into())
                })?;
                let format_number = args
                    .get(1)
                    .map(|a| a.eq_ignore_ascii_case("format"))
                    .unwrap_or(false);
                Ok(Transform::UnitSuffix {
                    unit: unit.clone(),
                    format_number,
                })
            }
            other => Err(DomainError::UnknownTransform(other.to_string())),
        }
    }

    /// Applies the transform to a raw value. `node` is the document node the
    /// value was resolved from, used for document-driven lookups (currency).
    pub fn apply<N: DocumentNode>(&self, raw: &str, node: Option<&N>) -> DomainResult<String> {
        let raw = raw.trim();
        match self {
            Transform::Boolean { yes, no } => {
                let truthy = matches!(
                    raw.to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "y" | "ja"
                );
                Ok(if truthy { yes.clone() } else { no.clone() })
            }
            Transform::Integer => {
                let normalized = normalize_decimal(raw)?;
                let value = normalized.parse::<f64>().map_err(|_| {
                    DomainError::TransformFailed(format!("not an integer: '{}'", raw))
                })?;
                Ok(format!("{}", value.round() as i64))
            }
            Transform::Float => normalize_decimal(raw),
            Transform::Currency { default_symbol } => {
                let symbol = node
                    .and_then(|n| n.attribute("currency"))
                    .map(str::to_string)
                    .unwrap_or_else(|| default_symbol.clone());
                let amount = normalize_decimal(raw)?;
                Ok(format!("{} {}", group_thousands(&amount), symbol))
            }
            Transform::Area { unit } => {
                let amount = normalize_decimal(raw)?;
                Ok(format!("{} {}", group_thousands(&amount), unit))
            }
            Transform::Date => parse_feed_date(raw).map(|d| d.format("%Y-%m-%d").to_string()),
            Transform::DateTime => {
                parse_feed_datetime(raw).map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            }
            Transform::Lookup { table } => Ok(table
                .get(raw)
                .cloned()
                .unwrap_or_else(|| raw.to_string())),
            Transform::UnitSuffix {
                unit,
                format_number,
            } => {
                if *format_number {
                    let amount = normalize_decimal(raw)?;
                    Ok(format!("{} {}", group_thousands(&amount), unit))
                } else {
                    Ok(format!("{} {}", raw, unit))
                }
            }
        }
    }
}

/// Normalizes locale-dependent decimal notation to a plain `1234.56` form.
fn normalize_decimal(raw: &str) -> DomainResult<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Err(DomainError::TransformFailed("empty number".to_string()));
    }

    let last_comma = cleaned.rfind(',');
    let last_point = cleaned.rfind('.');
    let normalized = match (last_comma, last_point) {
        // Both present: the later one is the decimal separator.
        (Some(c), Some(p)) => {
            let (dec_idx, thou) = if c > p { (c, '.') } else { (p, ',') };
            let dec_char = cleaned.as_bytes()[dec_idx] as char;
            cleaned
                .chars()
                .filter(|&ch| ch != thou)
                .map(|ch| if ch == dec_char { '.' } else { ch })
                .collect::<String>()
        }
        // Comma only: decimal if it has 1-2 trailing digits, grouping otherwise.
        (Some(c), None) => {
            let frac_len = cleaned.len() - c - 1;
            if (1..=2).contains(&frac_len) {
                cleaned.replacen(',', ".", 1)
            } else {
                cleaned.replace(',', "")
            }
        }
        // Point only: decimal if 1-2 trailing digits, grouping otherwise.
        (None, Some(p)) => {
            let frac_len = cleaned.len() - p - 1;
            if (1..=2).contains(&frac_len) && cleaned.matches('.').count() == 1 {
                cleaned
            } else {
                cleaned.replace('.', "")
            }
        }
        (None, None) => cleaned,
    };

    normalized
        .parse::<f64>()
        .map_err(|_| DomainError::TransformFailed(format!("not a number: '{}'", raw)))?;
    Ok(normalized)
}

/// Groups the integer part of a normalized number with `,` separators.
fn group_thousands(normalized: &str) -> String {
    let (int_part, frac_part) = match normalized.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (normalized, None),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(d) => ("-", d),
        None => ("", int_part),
    };
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

/// Parses a feed date, accepting ISO dates, `DD.MM.YYYY`, and the partial
/// `MM/YYYY` form, which normalizes to the last day of that month.
pub fn parse_feed_date(raw: &str) -> DomainResult<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%d.%m.%Y") {
        return Ok(d);
    }
    if let Ok(dt) = parse_feed_datetime(raw) {
        return Ok(dt.date());
    }
    if let Some((month, year)) = raw.split_once('/') {
        let month: u32 = month.trim().parse().map_err(|_| {
            DomainError::TransformFailed(format!("bad partial date: '{}'", raw))
        })?;
        let year: i32 = year.trim().parse().map_err(|_| {
            DomainError::TransformFailed(format!("bad partial date: '{}'", raw))
        })?;
        return last_day_of_month(year, month)
            .ok_or_else(|| DomainError::TransformFailed(format!("bad partial date: '{}'", raw)));
    }
    Err(DomainError::TransformFailed(format!(
        "unrecognized date: '{}'",
        raw
    )))
}

fn parse_feed_datetime(raw: &str) -> DomainResult<NaiveDateTime> {
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    // Zone-suffixed timestamps: take the naive local part.
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    Err(DomainError::TransformFailed(format!(
        "unrecognized datetime: '{}'",
        raw
    )))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    next.pred_opt().filter(|d| d.month() == first.month())
}

/// Post-transform filter suppressing zero / empty / false-like values,
/// except for mapping sources on the configurable exemption list.
#[derive(Debug, Clone, Default)]
pub struct ValueFilter {
    pub enabled: bool,
    pub exempt_sources: Vec<String>,
}

impl ValueFilter {
    pub fn new(enabled: bool, exempt_sources: Vec<String>) -> Self {
        Self {
            enabled,
            exempt_sources,
        }
    }

    /// True when the value should be dropped for the given mapping source.
    pub fn suppresses(&self, source: &str, value: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self
            .exempt_sources
            .iter()
            .any(|prefix| source.starts_with(prefix.as_str()))
        {
            return false;
        }
        let v = value.trim();
        let dropped = v.is_empty()
            || v == "0"
            || v == "0.0"
            || v.eq_ignore_ascii_case("false")
            || v.eq_ignore_ascii_case("no");
        if dropped {
            debug!("Suppressing zero/empty value for source '{}'", source);
        }
        dropped
    }
}
