use serde::{Deserialize, Serialize};

use crate::{decode, reader, FeedError, FeedParser, ImporterKind};

/// A bare headword from a legacy gloss list: `idgloss` plus an optional secondary-language form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossListRow {
    pub ordinal: usize,
    pub idgloss: String,
    pub idgloss_mi: Option<String>,
}

/// Positional two-column format. The first line is a header and is skipped whatever it says.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlossListParser;

impl FeedParser for GlossListParser {
    type Output = Vec<GlossListRow>;

    fn kind(&self) -> ImporterKind {
        ImporterKind::GlossList
    }

    fn parse(&self, bytes: &[u8]) -> Result<Self::Output, FeedError> {
        let text = decode(bytes)?;
        let mut rdr = reader(text, true);
        let mut rows = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let idgloss = record.get(0).map(str::trim).unwrap_or_default();
            if idgloss.is_empty() {
                continue;
            }
            let idgloss_mi = record
                .get(1)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            rows.push(GlossListRow {
                ordinal: idx + 1,
                idgloss: idgloss.to_string(),
                idgloss_mi,
            });
        }
        Ok(rows)
    }
}
