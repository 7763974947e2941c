//! Reading input documents and splitting them into records
//!
//! A document is one of:
//! - an envelope object whose `results` member is a list of records
//! - a list of records
//! - a single record
//!
//! Files hold either one document (parsed with simd-json) or one document
//! per line (NDJSON), which is the fallback when whole-file parsing fails.

use crate::decompose::CancelToken;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions picked up when scanning directories
const INPUT_EXTENSIONS: &[&str] = &["json", "jsonl", "ndjson"];

/// Split one document into its records
pub fn split_records(document: Value) -> Vec<Value> {
    match document {
        Value::Object(mut map) if matches!(map.get("results"), Some(Value::Array(_))) => {
            match map.remove("results") {
                Some(Value::Array(records)) => records,
                _ => Vec::new(),
            }
        }
        Value::Array(records) => records,
        other => vec![other],
    }
}

/// Parse raw bytes into documents: one whole document if possible,
/// otherwise one per non-empty line
pub fn parse_documents(content: &[u8]) -> Result<Vec<Value>> {
    // simd-json parses in place and leaves the buffer scrambled on failure
    let mut scratch = content.to_vec();
    if let Ok(document) = simd_json::serde::from_slice::<Value>(&mut scratch) {
        return Ok(vec![document]);
    }

    let text = std::str::from_utf8(content).context("Input is not valid UTF-8")?;
    let mut documents = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).with_context(|| format!("Failed to parse JSON on line {}", idx + 1))?;
        documents.push(value);
    }
    Ok(documents)
}

/// Read every record from one file
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Value>> {
    let path = path.as_ref();
    let content = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let documents = parse_documents(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    let records: Vec<Value> = documents.into_iter().flat_map(split_records).collect();
    debug!(file = %path.display(), records = records.len(), "read input file");
    Ok(records)
}

/// Read records from `files` in order.
///
/// At most `per_file` records are taken from each file, and reading stops
/// once `total` records are collected or `cancel` fires.
pub fn read_all_records(
    files: &[PathBuf],
    per_file: Option<usize>,
    total: Option<usize>,
    cancel: &CancelToken,
) -> Result<Vec<Value>> {
    let mut records = Vec::new();
    for file in files {
        if cancel.is_cancelled() || total.is_some_and(|max| records.len() >= max) {
            break;
        }
        let mut file_records = read_records(file)?;
        if let Some(max) = per_file {
            file_records.truncate(max);
        }
        records.extend(file_records);
    }
    if let Some(max) = total {
        records.truncate(max);
    }
    Ok(records)
}

/// List input files under `dir`, sorted by path.
///
/// Only `.json`, `.jsonl` and `.ndjson` files are returned. Subdirectories
/// are searched when `recursive` is set; `max_files` caps the result.
pub fn discover_files<P: AsRef<Path>>(dir: P, recursive: bool, max_files: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files(dir.as_ref(), recursive, &mut files)?;
    files.sort();
    if let Some(max) = max_files {
        files.truncate(max);
    }
    Ok(files)
}

fn collect_files(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_files(&path, recursive, files)?;
            }
        } else if is_input_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_input_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| INPUT_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Expand a mix of files and directories into the list of files to read
pub fn resolve_inputs(inputs: &[PathBuf], recursive: bool, max_files: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(discover_files(input, recursive, None)?);
        } else {
            files.push(input.clone());
        }
    }
    if let Some(max) = max_files {
        files.truncate(max);
    }
    Ok(files)
}
