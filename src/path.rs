//! Path expressions for addressing values inside a JSON record
//!
//! A path is a dot-separated list of segments, each optionally followed by
//! bracketed indices: `event.device[0].brand_name`. Catalog generators also
//! emit element markers (`event.device[].brand_name`); a marker carries no
//! index and is ignored when resolving.
//!
//! Resolution never fails loudly. Anything that cannot be addressed (missing
//! key, index out of bounds, indexing into a non-list, malformed segment)
//! resolves to `None`.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Raised by [`PathExpr::parse_strict`] for segments the lenient parser
/// would silently turn into dead ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed segment `{segment}` in path `{path}`")]
pub struct PathError {
    pub path: String,
    pub segment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
    /// A segment that failed to parse; never matches anything
    Invalid(String),
}

/// A parsed path expression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathExpr {
    steps: Vec<Step>,
}

impl PathExpr {
    /// The empty path, which resolves to the value it is applied to
    pub fn root() -> Self {
        PathExpr::default()
    }

    /// Parse a path, turning malformed segments into steps that resolve to
    /// nothing.
    pub fn parse(text: &str) -> Self {
        let mut steps = Vec::new();
        for segment in text.split('.') {
            if segment.is_empty() {
                continue;
            }
            if parse_segment(segment, &mut steps).is_err() {
                steps.push(Step::Invalid(segment.to_string()));
            }
        }
        PathExpr { steps }
    }

    /// Parse a path, rejecting malformed segments
    pub fn parse_strict(text: &str) -> Result<Self, PathError> {
        let mut steps = Vec::new();
        for segment in text.split('.') {
            if segment.is_empty() {
                continue;
            }
            parse_segment(segment, &mut steps).map_err(|()| PathError {
                path: text.to_string(),
                segment: segment.to_string(),
            })?;
        }
        Ok(PathExpr { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_well_formed(&self) -> bool {
        !self.steps.iter().any(|s| matches!(s, Step::Invalid(_)))
    }

    /// Resolve this path against `root`.
    ///
    /// The empty path returns `root` itself. A path ending on a list without
    /// a trailing index returns the whole list.
    pub fn resolve<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let mut current = root;
        for step in &self.steps {
            current = match (step, current) {
                (Step::Key(key), Value::Object(map)) => map.get(key)?,
                (Step::Index(idx), Value::Array(items)) => items.get(*idx)?,
                (Step::Key(_), _) | (Step::Index(_), _) | (Step::Invalid(_), _) => return None,
            };
        }
        Some(current)
    }

    /// Normalized text form used for path equality (element markers dropped)
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            match step {
                Step::Key(key) | Step::Invalid(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                Step::Index(idx) => {
                    out.push('[');
                    out.push_str(&idx.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    /// The remainder of this path after `prefix`, if `prefix` leads it.
    ///
    /// Used to turn record-rooted field paths into paths relative to the
    /// element a child table is built from.
    pub fn strip_prefix(&self, prefix: &PathExpr) -> Option<PathExpr> {
        if self.steps.starts_with(&prefix.steps) {
            Some(PathExpr {
                steps: self.steps[prefix.steps.len()..].to_vec(),
            })
        } else {
            None
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Resolve a textual path against `root` in one call
pub fn resolve<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    PathExpr::parse(path).resolve(root)
}

/// Split one dot-delimited segment (`name`, `name[2]`, `name[]`, `[0]`,
/// `grid[1][0]`) into steps.
fn parse_segment(segment: &str, steps: &mut Vec<Step>) -> Result<(), ()> {
    let (key, mut rest) = match segment.find('[') {
        Some(pos) => segment.split_at(pos),
        None => (segment, ""),
    };
    if key.contains(']') {
        return Err(());
    }
    if !key.is_empty() {
        steps.push(Step::Key(key.to_string()));
    }

    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(());
        }
        let close = rest.find(']').ok_or(())?;
        let inner = &rest[1..close];
        if !inner.is_empty() {
            if !inner.bytes().all(|b| b.is_ascii_digit()) {
                return Err(());
            }
            let idx = inner.parse::<usize>().map_err(|_| ())?;
            steps.push(Step::Index(idx));
        }
        rest = &rest[close + 1..];
    }
    Ok(())
}
