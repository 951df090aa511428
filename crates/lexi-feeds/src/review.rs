use lexi_core::EntryId;
use serde::{Deserialize, Serialize};

use crate::{decode, parse_count, reader, Columns, FeedError, FeedParser, ImporterKind};

pub const REVIEW_COLUMNS: &[&str] = &["group", "idgloss", "yes", "no", "abstain or not sure", "comments"];

/// One reviewer group's tally for a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualReviewRow {
    pub ordinal: usize,
    pub group: String,
    /// As written in the sheet, `"{word}:{entry id}"`.
    pub idgloss: String,
    pub entry_id: EntryId,
    pub yes: i32,
    pub no: i32,
    pub not_sure: i32,
    pub comments: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManualReviewParser;

impl FeedParser for ManualReviewParser {
    type Output = Vec<ManualReviewRow>;

    fn kind(&self) -> ImporterKind {
        ImporterKind::ManualReview
    }

    fn parse(&self, bytes: &[u8]) -> Result<Self::Output, FeedError> {
        let text = decode(bytes)?;
        let mut rdr = reader(text, false);
        let columns = Columns::new(rdr.headers()?);
        columns.require(REVIEW_COLUMNS)?;

        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let ordinal = idx + 1;
            let idgloss = columns.owned(&record, "idgloss");
            let entry_id = parse_entry_id(&idgloss).ok_or_else(|| FeedError::Validation {
                row: ordinal,
                column: "idgloss".to_string(),
                message: format!("expected \"word:id\", found {idgloss:?}"),
            })?;
            rows.push(ManualReviewRow {
                ordinal,
                group: columns.owned(&record, "group"),
                entry_id,
                yes: parse_count(columns.get(&record, "yes"), ordinal, "yes")?,
                no: parse_count(columns.get(&record, "no"), ordinal, "no")?,
                not_sure: parse_count(
                    columns.get(&record, "abstain or not sure"),
                    ordinal,
                    "abstain or not sure",
                )?,
                comments: columns.owned(&record, "comments"),
                idgloss,
            });
        }
        Ok(rows)
    }
}

fn parse_entry_id(idgloss: &str) -> Option<EntryId> {
    let (_, id) = idgloss.rsplit_once(':')?;
    id.trim().parse().ok()
}
