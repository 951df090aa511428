//! Survey responses and manual review tallies. Same stage-then-confirm shape as the share import,
//! but keyed by media id or `(group, entry)` and with no media step.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use lexi_core::{EntryId, ManualAggregation, MediaId, TagAssociation, ValidationResponse};
use lexi_feeds::{ManualReviewRow, SurveyExport};
use lexi_storage::CatalogTransaction;
use serde::Serialize;
use tracing::debug;

use crate::config::ImportConfig;
use crate::error::ImportError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SurveySummary {
    pub responses: usize,
    pub skipped_responses: usize,
    pub validation_records: u64,
    pub entries: usize,
    /// Question number to media id for questions whose media no longer exists.
    pub missing: BTreeMap<String, MediaId>,
}

pub async fn apply_survey(
    tx: &mut dyn CatalogTransaction,
    config: &ImportConfig,
    export: &SurveyExport,
) -> Result<SurveySummary, ImportError> {
    let media_by_question: HashMap<&str, MediaId> = export
        .questions
        .iter()
        .map(|q| (q.number.as_str(), q.media_id))
        .collect();
    let media_ids: Vec<MediaId> = export.questions.iter().map(|q| q.media_id).collect();
    let owners = tx.media_owners(&media_ids).await?;

    let mut summary = SurveySummary {
        responses: export.responses.len(),
        skipped_responses: export.skipped.len(),
        ..Default::default()
    };
    let mut records = Vec::new();
    let mut entries: BTreeSet<EntryId> = BTreeSet::new();
    for response in &export.responses {
        for answer in &response.answers {
            let Some(media_id) = media_by_question.get(answer.question.as_str()).copied() else {
                continue;
            };
            let Some(entry_id) = owners.get(&media_id).copied() else {
                summary.missing.insert(answer.question.clone(), media_id);
                continue;
            };
            records.push(ValidationResponse {
                entry_id,
                sign_seen: answer.sign_seen,
                response_id: response.response_id.clone(),
                respondent_first_name: response.first_name.clone(),
                respondent_last_name: response.last_name.clone(),
                comment: answer.comment.clone(),
            });
            entries.insert(entry_id);
        }
    }

    summary.validation_records = tx.insert_validation_responses(records).await?;
    let touched: Vec<EntryId> = entries.into_iter().collect();
    tx.insert_tags(
        touched
            .iter()
            .map(|entry_id| TagAssociation {
                entry_id: *entry_id,
                tag: config.check_results_tag.clone(),
            })
            .collect(),
    )
    .await?;
    let removed = tx
        .remove_tags(&touched, &config.ready_for_validation_tag)
        .await?;
    debug!(entries = touched.len(), removed, "updated validation tags");
    summary.entries = touched.len();
    Ok(summary)
}

pub fn group_rows(rows: Vec<ManualReviewRow>) -> BTreeMap<String, Vec<ManualReviewRow>> {
    let mut groups: BTreeMap<String, Vec<ManualReviewRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.group.clone()).or_default().push(row);
    }
    groups
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManualReviewSummary {
    pub groups: usize,
    pub aggregations: u64,
    /// `(group, idgloss)` rows whose entry does not exist.
    pub missing: Vec<(String, String)>,
}

pub async fn apply_manual_review(
    tx: &mut dyn CatalogTransaction,
    groups: &BTreeMap<String, Vec<ManualReviewRow>>,
) -> Result<ManualReviewSummary, ImportError> {
    let ids: Vec<EntryId> = groups
        .values()
        .flatten()
        .map(|row| row.entry_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let found: BTreeSet<EntryId> = tx
        .entries_by_id(&ids)
        .await?
        .into_iter()
        .map(|entry| entry.id)
        .collect();

    let mut summary = ManualReviewSummary {
        groups: groups.len(),
        ..Default::default()
    };
    let mut aggregations = Vec::new();
    for (group, rows) in groups {
        for row in rows {
            if !found.contains(&row.entry_id) {
                summary.missing.push((group.clone(), row.idgloss.clone()));
                continue;
            }
            aggregations.push(ManualAggregation {
                entry_id: row.entry_id,
                group: group.clone(),
                sign_seen_yes: row.yes,
                sign_seen_no: row.no,
                sign_seen_not_sure: row.not_sure,
                comments: row.comments.clone(),
            });
        }
    }
    summary.aggregations = tx.insert_manual_aggregations(aggregations).await?;
    Ok(summary)
}
