use serde::Serialize;
use std::fmt;

/// A non-fatal observation made while decomposing a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub table: String,
    /// Column or array field the observation concerns, if any
    pub field: Option<String>,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A text value was longer than the column allows
    OverLength {
        original_length: usize,
        max_length: usize,
        /// Whether the stored value was cut to `max_length`
        truncated: bool,
        preview: String,
    },
    /// The value could not be converted and was skipped
    Unparseable { target: String, preview: String },
    /// A date that matched no known format was stored as-is
    DatePassthrough { raw: String },
    /// An array field resolved to something other than a list
    NotAList { path: String },
    /// An array field has no child table in the catalog
    UnmappedArray { path: String },
    /// An element of an object array was not an object
    NonObjectElement { index: usize },
}

impl Diagnostic {
    pub fn new(table: impl Into<String>, field: Option<&str>, kind: DiagnosticKind) -> Self {
        Diagnostic {
            table: table.into(),
            field: field.map(str::to_string),
            kind,
        }
    }

    /// Short name of the diagnostic kind, used for summary counters
    pub fn label(&self) -> &'static str {
        match self.kind {
            DiagnosticKind::OverLength { truncated: true, .. } => "truncated",
            DiagnosticKind::OverLength { truncated: false, .. } => "over_length",
            DiagnosticKind::Unparseable { .. } => "unparseable",
            DiagnosticKind::DatePassthrough { .. } => "date_passthrough",
            DiagnosticKind::NotAList { .. } => "not_a_list",
            DiagnosticKind::UnmappedArray { .. } => "unmapped_array",
            DiagnosticKind::NonObjectElement { .. } => "non_object_element",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}: ", self.table, field)?,
            None => write!(f, "{}: ", self.table)?,
        }
        match &self.kind {
            DiagnosticKind::OverLength {
                original_length,
                max_length,
                truncated,
                ..
            } => write!(
                f,
                "length {} exceeds {}{}",
                original_length,
                max_length,
                if *truncated { " (truncated)" } else { "" }
            ),
            DiagnosticKind::Unparseable { target, preview } => {
                write!(f, "cannot convert `{}` to {}", preview, target)
            }
            DiagnosticKind::DatePassthrough { raw } => write!(f, "unrecognized date `{}` kept as-is", raw),
            DiagnosticKind::NotAList { path } => write!(f, "`{}` is not a list", path),
            DiagnosticKind::UnmappedArray { path } => write!(f, "no child table for array `{}`", path),
            DiagnosticKind::NonObjectElement { index } => write!(f, "element {} is not an object", index),
        }
    }
}

/// Shorten a value for display: the first 30 characters, with `...` when cut
pub(crate) fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 30;
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
