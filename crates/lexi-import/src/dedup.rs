//! External-id deduplication: decides whether a feed row creates, revisits, or skips an entry.

use std::collections::{BTreeSet, HashMap};

use lexi_core::{EntryId, ExternalIdMatch};
use lexi_feeds::ShareRow;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub trait ExternallyKeyed {
    fn external_id(&self) -> Option<&str>;
}

impl ExternallyKeyed for ShareRow {
    fn external_id(&self) -> Option<&str> {
        ShareRow::external_id(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowClass {
    New,
    /// Already materialized with media.
    Skip { entry_id: EntryId },
    /// Entry exists but has no stored media yet.
    Reimport { entry_id: EntryId },
    Ambiguous { entry_ids: Vec<EntryId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    HasMedia,
    Ambiguous,
    /// An earlier row in the batch already revisits the same entry.
    DuplicateReimport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow<R> {
    pub row: R,
    pub reason: SkipReason,
    pub entry_ids: Vec<EntryId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReimportRow<R> {
    pub row: R,
    pub entry_id: EntryId,
}

/// Rows split by class, each list in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classified<R> {
    pub new: Vec<R>,
    pub reimport: Vec<ReimportRow<R>>,
    pub skipped: Vec<SkippedRow<R>>,
}

impl<R> Default for Classified<R> {
    fn default() -> Self {
        Self {
            new: Vec::new(),
            reimport: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExternalIdIndex {
    by_external_id: HashMap<String, Vec<ExternalIdMatch>>,
}

impl ExternalIdIndex {
    pub fn new(matches: Vec<ExternalIdMatch>) -> Self {
        let mut by_external_id: HashMap<String, Vec<ExternalIdMatch>> = HashMap::new();
        for m in matches {
            by_external_id.entry(m.external_id.clone()).or_default().push(m);
        }
        Self { by_external_id }
    }

    pub fn lookup(&self, external_id: &str) -> &[ExternalIdMatch] {
        self.by_external_id
            .get(external_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Any stored media at all makes an entry skip-eligible, even if only part of it arrived.
    pub fn classify(&self, external_id: Option<&str>) -> RowClass {
        let Some(external_id) = external_id.filter(|id| !id.is_empty()) else {
            return RowClass::New;
        };
        match self.lookup(external_id) {
            [] => RowClass::New,
            [single] if single.media_count > 0 => RowClass::Skip {
                entry_id: single.entry_id,
            },
            [single] => RowClass::Reimport {
                entry_id: single.entry_id,
            },
            many => RowClass::Ambiguous {
                entry_ids: many.iter().map(|m| m.entry_id).collect(),
            },
        }
    }
}

/// Distinct, non-empty external ids in first-seen order.
pub fn external_ids<R: ExternallyKeyed>(rows: &[R]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .filter_map(|row| row.external_id())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// Each entry is revisited at most once per batch; later rows for it are skipped.
pub fn classify<R: ExternallyKeyed>(rows: Vec<R>, index: &ExternalIdIndex) -> Classified<R> {
    let mut out = Classified::default();
    let mut revisited: BTreeSet<EntryId> = BTreeSet::new();
    for row in rows {
        match index.classify(row.external_id()) {
            RowClass::New => out.new.push(row),
            RowClass::Skip { entry_id } => out.skipped.push(SkippedRow {
                row,
                reason: SkipReason::HasMedia,
                entry_ids: vec![entry_id],
            }),
            RowClass::Reimport { entry_id } if !revisited.insert(entry_id) => {
                out.skipped.push(SkippedRow {
                    row,
                    reason: SkipReason::DuplicateReimport,
                    entry_ids: vec![entry_id],
                })
            }
            RowClass::Reimport { entry_id } => out.reimport.push(ReimportRow { row, entry_id }),
            RowClass::Ambiguous { entry_ids } => {
                warn!(
                    external_id = row.external_id().unwrap_or_default(),
                    ?entry_ids,
                    "external id matches several entries; skipping row"
                );
                out.skipped.push(SkippedRow {
                    row,
                    reason: SkipReason::Ambiguous,
                    entry_ids,
                });
            }
        }
    }
    out
}
