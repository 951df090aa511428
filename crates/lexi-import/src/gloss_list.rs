use std::collections::BTreeSet;

use lexi_core::{CollectionId, Entry, NewEntry};
use lexi_feeds::GlossListRow;
use lexi_storage::CatalogTransaction;

use crate::config::ImportConfig;
use crate::error::ImportError;

/// First occurrence of each headword not already present in `existing`.
pub fn select_new(rows: Vec<GlossListRow>, existing: &BTreeSet<String>) -> Vec<GlossListRow> {
    let mut seen = BTreeSet::new();
    rows.into_iter()
        .filter(|row| !existing.contains(&row.idgloss) && seen.insert(row.idgloss.clone()))
        .collect()
}

pub fn distinct_names(rows: &[GlossListRow]) -> Vec<String> {
    rows.iter()
        .map(|row| row.idgloss.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Creates the staged headwords that are still absent when the transaction runs.
pub async fn apply_gloss_list(
    tx: &mut dyn CatalogTransaction,
    config: &ImportConfig,
    collection_id: CollectionId,
    rows: Vec<GlossListRow>,
) -> Result<(Vec<Entry>, usize), ImportError> {
    let names = distinct_names(&rows);
    let existing: BTreeSet<String> = tx
        .entries_named(collection_id, &names)
        .await?
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    let staged = rows.len();
    let fresh = select_new(rows, &existing);
    let skipped = staged - fresh.len();
    if fresh.is_empty() {
        return Ok((Vec::new(), skipped));
    }

    let created = tx
        .insert_entries(
            fresh
                .into_iter()
                .map(|row| NewEntry {
                    collection_id,
                    name: row.idgloss,
                    secondary_name: row.idgloss_mi,
                    external_id: None,
                    created_by: config.import_user.clone(),
                    exclude_from_export: false,
                })
                .collect(),
        )
        .await?;
    Ok((created, skipped))
}
