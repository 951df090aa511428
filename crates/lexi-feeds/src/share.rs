use serde::{Deserialize, Serialize};

use crate::{decode, parse_count, reader, split_pipe, Columns, FeedError, FeedParser, ImporterKind};

pub const SHARE_COLUMNS: &[&str] = &[
    "id",
    "word",
    "maori",
    "secondary",
    "notes",
    "created_at",
    "contributor_email",
    "contributor_username",
    "agrees",
    "disagrees",
    "topic_names",
    "videos",
    "illustrations",
    "usage_examples",
    "sign_comments",
];

/// One sign submitted through the partner dictionary's sharing site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRow {
    /// 1-based data row position; unique within a file.
    pub ordinal: usize,
    pub id: String,
    pub word: String,
    pub maori: String,
    pub secondary: String,
    pub notes: String,
    pub created_at: String,
    pub contributor_email: String,
    pub contributor_username: String,
    pub agrees: i32,
    pub disagrees: i32,
    pub topic_names: String,
    pub videos: String,
    pub illustrations: String,
    pub usage_examples: String,
    pub sign_comments: String,
}

impl ShareRow {
    pub fn external_id(&self) -> Option<&str> {
        Some(self.id.as_str()).filter(|id| !id.is_empty())
    }

    pub fn secondary(&self) -> Option<&str> {
        Some(self.secondary.as_str()).filter(|s| !s.is_empty())
    }

    pub fn main_video(&self) -> Option<&str> {
        Some(self.videos.as_str()).filter(|s| !s.is_empty())
    }

    pub fn illustration_urls(&self) -> Vec<&str> {
        split_pipe(&self.illustrations)
    }

    pub fn usage_example_urls(&self) -> Vec<&str> {
        split_pipe(&self.usage_examples)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShareExportParser;

impl FeedParser for ShareExportParser {
    type Output = Vec<ShareRow>;

    fn kind(&self) -> ImporterKind {
        ImporterKind::Share
    }

    fn parse(&self, bytes: &[u8]) -> Result<Self::Output, FeedError> {
        let text = decode(bytes)?;
        let mut rdr = reader(text, false);
        let columns = Columns::new(rdr.headers()?);
        columns.require(SHARE_COLUMNS)?;

        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let ordinal = idx + 1;
            let word = columns.owned(&record, "word");
            if word.is_empty() {
                return Err(FeedError::Validation {
                    row: ordinal,
                    column: "word".to_string(),
                    message: "word must not be empty".to_string(),
                });
            }
            rows.push(ShareRow {
                ordinal,
                id: columns.owned(&record, "id"),
                word,
                maori: columns.owned(&record, "maori"),
                secondary: columns.owned(&record, "secondary"),
                notes: columns.owned(&record, "notes"),
                created_at: columns.owned(&record, "created_at"),
                contributor_email: columns.owned(&record, "contributor_email"),
                contributor_username: columns.owned(&record, "contributor_username"),
                agrees: parse_count(columns.get(&record, "agrees"), ordinal, "agrees")?,
                disagrees: parse_count(columns.get(&record, "disagrees"), ordinal, "disagrees")?,
                topic_names: columns.owned(&record, "topic_names"),
                videos: columns.owned(&record, "videos"),
                illustrations: columns.owned(&record, "illustrations"),
                usage_examples: columns.owned(&record, "usage_examples"),
                sign_comments: columns.owned(&record, "sign_comments"),
            });
        }
        Ok(rows)
    }
}
