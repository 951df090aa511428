//! Row parsers for the delimited feeds the importer accepts.
//!
//! Every parser is a pure transform from raw bytes to typed rows. Files must be UTF-8 (a leading
//! byte-order mark is tolerated), comma delimited and `"` quoted.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod gloss;
pub mod review;
pub mod share;
pub mod survey;

pub use gloss::{GlossListParser, GlossListRow};
pub use review::{ManualReviewParser, ManualReviewRow};
pub use share::{ShareExportParser, ShareRow};
pub use survey::{SkippedResponse, SurveyAnswer, SurveyExport, SurveyExportParser, SurveyQuestion, SurveyResponse};

pub const CRATE_NAME: &str = "lexi-feeds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImporterKind {
    Share,
    GlossList,
    Survey,
    ManualReview,
}

impl ImporterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImporterKind::Share => "share",
            ImporterKind::GlossList => "gloss-list",
            ImporterKind::Survey => "survey",
            ImporterKind::ManualReview => "manual-review",
        }
    }
}

impl fmt::Display for ImporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("cannot read file: {0}")]
    Parse(String),
    /// `row` is the 1-based data row; 0 points at the header line.
    #[error("row {row}, column {column:?}: {message}")]
    Validation {
        row: usize,
        column: String,
        message: String,
    },
}

impl From<csv::Error> for FeedError {
    fn from(err: csv::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

pub trait FeedParser {
    type Output;

    fn kind(&self) -> ImporterKind;

    fn parse(&self, bytes: &[u8]) -> Result<Self::Output, FeedError>;
}

pub(crate) fn decode(bytes: &[u8]) -> Result<&str, FeedError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| FeedError::Parse(format!("file must be UTF-8 encoded ({err})")))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

pub(crate) fn reader(text: &str, flexible: bool) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .has_headers(true)
        .flexible(flexible)
        .from_reader(text.as_bytes())
}

/// Header name to column position.
#[derive(Debug, Clone)]
pub(crate) struct Columns {
    positions: HashMap<String, usize>,
}

impl Columns {
    pub(crate) fn new(headers: &csv::StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect();
        Self { positions }
    }

    /// Fails naming every absent column, not just the first.
    pub(crate) fn require(&self, names: &[&str]) -> Result<(), FeedError> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| !self.positions.contains_key(*name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FeedError::Validation {
                row: 0,
                column: missing.join(", "),
                message: "missing required columns".to_string(),
            })
        }
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub(crate) fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> &'r str {
        self.positions
            .get(name)
            .and_then(|idx| record.get(*idx))
            .unwrap_or("")
    }

    pub(crate) fn owned(&self, record: &csv::StringRecord, name: &str) -> String {
        self.get(record, name).trim().to_string()
    }
}

/// Empty cells count as zero; anything else must be a non-negative integer.
pub(crate) fn parse_count(value: &str, row: usize, column: &str) -> Result<i32, FeedError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    match value.parse::<i32>() {
        Ok(n) if n >= 0 => Ok(n),
        _ => Err(FeedError::Validation {
            row,
            column: column.to_string(),
            message: format!("expected a non-negative integer, found {value:?}"),
        }),
    }
}

/// Splits a `|`-separated cell, dropping blank fragments.
pub fn split_pipe(value: &str) -> Vec<&str> {
    value
        .split('|')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_strips_bom_and_rejects_latin1() {
        assert_eq!(decode(b"\xef\xbb\xbfid,word").expect("decode"), "id,word");
        assert!(matches!(decode(b"caf\xe9"), Err(FeedError::Parse(_))));
    }

    #[test]
    fn missing_columns_are_reported_together() {
        let headers = csv::StringRecord::from(vec!["group", "yes"]);
        let columns = Columns::new(&headers);
        let err = columns.require(&["group", "idgloss", "no"]).expect_err("missing columns");
        assert_eq!(
            err,
            FeedError::Validation {
                row: 0,
                column: "idgloss, no".into(),
                message: "missing required columns".into(),
            }
        );
    }

    #[test]
    fn counts_treat_blank_as_zero() {
        assert_eq!(parse_count(" ", 1, "agrees").expect("count"), 0);
        assert_eq!(parse_count("12", 1, "agrees").expect("count"), 12);
        assert!(parse_count("-1", 3, "agrees").is_err());
        assert!(parse_count("lots", 3, "agrees").is_err());
    }

    #[test]
    fn importer_kind_serializes_as_cli_name() {
        assert_eq!(
            serde_json::to_value(ImporterKind::ManualReview).expect("serialize"),
            "manual-review"
        );
        assert_eq!(ImporterKind::GlossList.to_string(), "gloss-list");
    }
}
