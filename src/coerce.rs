//! Value coercion - turning raw JSON into column values
//!
//! Every scalar column goes through [`Coercer::coerce`]. Missing and null
//! values become a skip (the column is left out of the row rather than
//! written as NULL). Values that cannot be converted are skipped with a
//! [`Diagnostic`]; the only hard failure is an over-long text value under
//! [`TruncationPolicy::Error`].

use crate::catalog::{Column, TargetType};
use crate::diagnostic::{preview, Diagnostic, DiagnosticKind};
use crate::error::CoercionError;
use crate::types::Datum;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

static COMPACT_DATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap());

static YEAR_MONTH_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());

/// Alternate layouts tried after the compact form, in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y"];

const TRUTHY: &[&str] = &["true", "yes", "y", "1", "t"];
const FALSY: &[&str] = &["false", "no", "n", "0", "f"];

/// What to do with a text value longer than its column's maximum length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TruncationPolicy {
    /// Keep the full value and log a warning
    #[default]
    Warn,
    /// Cut the value to the maximum length
    Truncate,
    /// Cut the value and log a warning
    Both,
    /// Refuse the value, failing the row it belongs to
    Error,
}

impl FromStr for TruncationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(TruncationPolicy::Warn),
            "truncate" => Ok(TruncationPolicy::Truncate),
            "both" | "truncate+warn" => Ok(TruncationPolicy::Both),
            "error" => Ok(TruncationPolicy::Error),
            other => Err(format!("unknown truncation policy `{}`", other)),
        }
    }
}

impl fmt::Display for TruncationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TruncationPolicy::Warn => "warn",
            TruncationPolicy::Truncate => "truncate",
            TruncationPolicy::Both => "both",
            TruncationPolicy::Error => "error",
        })
    }
}

/// Result of coercing one value; `value == None` means skip the column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coercion {
    pub value: Option<Datum>,
    pub diagnostic: Option<Diagnostic>,
}

impl Coercion {
    fn skip() -> Self {
        Coercion::default()
    }

    fn value(datum: Datum) -> Self {
        Coercion {
            value: Some(datum),
            diagnostic: None,
        }
    }

    fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }

    pub fn is_skip(&self) -> bool {
        self.value.is_none()
    }
}

/// Converts raw JSON values into [`Datum`]s for a column
#[derive(Debug, Clone, Copy, Default)]
pub struct Coercer {
    policy: TruncationPolicy,
}

impl Coercer {
    pub fn new(policy: TruncationPolicy) -> Self {
        Coercer { policy }
    }

    /// Coerce `raw` (already resolved from the record) for `column` of `table`
    pub fn coerce(&self, raw: Option<&Value>, column: &Column, table: &str) -> Result<Coercion, CoercionError> {
        let raw = match raw {
            None | Some(Value::Null) => return Ok(Coercion::skip()),
            Some(raw) => raw,
        };

        let unparseable = || {
            Coercion::skip().with_diagnostic(Diagnostic::new(
                table,
                Some(&column.name),
                DiagnosticKind::Unparseable {
                    target: column.target.name().to_string(),
                    preview: preview(&render_text(raw)),
                },
            ))
        };

        let coercion = match column.target {
            TargetType::Text => return self.coerce_text(render_text(raw), column, table),
            TargetType::Integer => to_integer(raw).map(|i| Coercion::value(Datum::Integer(i))),
            TargetType::Decimal => to_decimal(raw).map(|d| Coercion::value(Datum::Decimal(d))),
            TargetType::Boolean => to_boolean(raw).map(|b| Coercion::value(Datum::Boolean(b))),
            TargetType::Date => date_text(raw).map(|text| match normalize_date(&text) {
                Some(iso) => Coercion::value(Datum::Date(iso)),
                None => Coercion::value(Datum::Date(text.clone())).with_diagnostic(Diagnostic::new(
                    table,
                    Some(&column.name),
                    DiagnosticKind::DatePassthrough { raw: text },
                )),
            }),
            TargetType::Json => Some(Coercion::value(Datum::Json(to_json_text(raw)))),
        };

        Ok(coercion.unwrap_or_else(unparseable))
    }

    fn coerce_text(&self, text: String, column: &Column, table: &str) -> Result<Coercion, CoercionError> {
        let Some(max_length) = column.max_length else {
            return Ok(Coercion::value(Datum::Text(text)));
        };
        let original_length = text.chars().count();
        if original_length <= max_length {
            return Ok(Coercion::value(Datum::Text(text)));
        }

        let truncate = match self.policy {
            TruncationPolicy::Error => {
                return Err(CoercionError::TooLong {
                    table: table.to_string(),
                    field: column.name.clone(),
                    max: max_length,
                    actual: original_length,
                })
            }
            TruncationPolicy::Warn => false,
            TruncationPolicy::Truncate | TruncationPolicy::Both => true,
        };
        if matches!(self.policy, TruncationPolicy::Warn | TruncationPolicy::Both) {
            tracing::warn!(
                table,
                field = %column.name,
                max_length,
                original_length,
                "value exceeds maximum length"
            );
        }

        let diagnostic = Diagnostic::new(
            table,
            Some(&column.name),
            DiagnosticKind::OverLength {
                original_length,
                max_length,
                truncated: truncate,
                preview: preview(&text),
            },
        );
        let stored = if truncate {
            text.chars().take(max_length).collect()
        } else {
            text
        };
        Ok(Coercion::value(Datum::Text(stored)).with_diagnostic(diagnostic))
    }
}

/// Text form of any JSON value; composites are serialized as JSON
fn render_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => raw.to_string(),
    }
}

fn whole_f64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e18 {
        Some(f as i64)
    } else {
        None
    }
}

fn to_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole_f64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_f64))
        }
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

fn to_decimal(raw: &Value) -> Option<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn to_boolean(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let token = s.trim().to_ascii_lowercase();
            if TRUTHY.contains(&token.as_str()) {
                Some(true)
            } else if FALSY.contains(&token.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Text a date can be read from: strings and integral numbers (`20230115`)
fn date_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Normalize a date to ISO `YYYY-MM-DD`; `None` when no layout matches
pub fn normalize_date(text: &str) -> Option<String> {
    let trimmed = text.trim();
    // Date-times keep their date part
    let candidate = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);

    let date = if let Some(caps) = COMPACT_DATE_REGEX.captures(candidate) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    } else if let Some(caps) = YEAR_MONTH_REGEX.captures(candidate) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)
    } else {
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
    }?;

    Some(date.format("%Y-%m-%d").to_string())
}

fn to_json_text(raw: &Value) -> String {
    match raw {
        // Strings already holding a JSON document are stored as they are
        Value::String(s) if serde_json::from_str::<Value>(s).is_ok() => s.clone(),
        other => other.to_string(),
    }
}
