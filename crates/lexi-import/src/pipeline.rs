//! Preview / confirm / cancel orchestration over a catalog, a staging store and a dispatcher.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use lexi_core::{CollectionId, Entry, EntryId};
use lexi_feeds::{
    FeedParser, GlossListParser, GlossListRow, ManualReviewParser, ShareExportParser, ShareRow,
    SkippedResponse, SurveyExportParser,
};
use lexi_storage::{Catalog, CatalogTransaction};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::dedup::{classify, external_ids, Classified, ExternalIdIndex, ReimportRow, SkippedRow};
use crate::dispatch::{DispatchHandle, MediaDispatcher};
use crate::error::ImportError;
use crate::gloss_list::{apply_gloss_list, distinct_names, select_new};
use crate::materialize::{materialize_share, DependentCounts, ShareOutcome};
use crate::staging::{
    SessionContext, StageToken, StagedGlossList, StagedPayload, StagedReview, StagedShare,
    StagingStore,
};
use crate::validation::{
    apply_manual_review, apply_survey, group_rows, ManualReviewSummary, SurveySummary,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Preview {
    Share {
        token: StageToken,
        collection_id: CollectionId,
        new: Vec<ShareRow>,
        reimport: Vec<ReimportRow<ShareRow>>,
        skipped: Vec<SkippedRow<ShareRow>>,
    },
    GlossList {
        token: StageToken,
        collection_id: CollectionId,
        new: Vec<GlossListRow>,
        existing: Vec<Entry>,
    },
    Survey {
        token: StageToken,
        questions: usize,
        responses: usize,
        skipped: Vec<SkippedResponse>,
    },
    ManualReview {
        token: StageToken,
        rows: usize,
        group_counts: BTreeMap<String, usize>,
    },
}

impl Preview {
    pub fn token(&self) -> StageToken {
        match self {
            Preview::Share { token, .. }
            | Preview::GlossList { token, .. }
            | Preview::Survey { token, .. }
            | Preview::ManualReview { token, .. } => *token,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareSummary {
    pub created: Vec<Entry>,
    pub reimported: Vec<EntryId>,
    pub skipped: Vec<SkippedRow<ShareRow>>,
    pub new_contributors: usize,
    pub counts: DependentCounts,
    pub media_dispatched: usize,
    pub dispatch_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlossListSummary {
    pub created: Vec<Entry>,
    pub already_present: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConfirmSummary {
    Share(ShareSummary),
    GlossList(GlossListSummary),
    Survey(SurveySummary),
    ManualReview(ManualReviewSummary),
}

#[derive(Debug)]
pub struct ConfirmOutcome {
    pub summary: ConfirmSummary,
    /// Only share imports retrieve media; other kinds carry an idle handle.
    pub dispatch: DispatchHandle,
}

pub struct ImportPipeline {
    config: ImportConfig,
    catalog: Arc<dyn Catalog>,
    dispatcher: Arc<dyn MediaDispatcher>,
    staging: StagingStore,
}

impl ImportPipeline {
    pub fn new(
        config: ImportConfig,
        catalog: Arc<dyn Catalog>,
        dispatcher: Arc<dyn MediaDispatcher>,
    ) -> Self {
        Self {
            config,
            catalog,
            dispatcher,
            staging: StagingStore::new(),
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    async fn require_collection(&self, collection_id: CollectionId) -> Result<(), ImportError> {
        match self.catalog.collection(collection_id).await? {
            Some(_) => Ok(()),
            None => Err(ImportError::UnknownCollection(collection_id)),
        }
    }

    pub async fn preview_share(
        &self,
        context: SessionContext,
        collection_id: CollectionId,
        bytes: &[u8],
    ) -> Result<Preview, ImportError> {
        let rows = ShareExportParser.parse(bytes)?;
        self.require_collection(collection_id).await?;
        let index = ExternalIdIndex::new(
            self.catalog
                .external_id_matches(&external_ids(&rows))
                .await?,
        );
        let classified = classify(rows, &index);
        info!(
            new = classified.new.len(),
            reimport = classified.reimport.len(),
            skipped = classified.skipped.len(),
            "share feed classified"
        );

        let preview = classified.clone();
        let token = self
            .staging
            .stage(
                context,
                StagedPayload::Share(StagedShare {
                    collection_id,
                    rows: classified,
                }),
            )
            .await;
        Ok(Preview::Share {
            token,
            collection_id,
            new: preview.new,
            reimport: preview.reimport,
            skipped: preview.skipped,
        })
    }

    pub async fn preview_gloss_list(
        &self,
        context: SessionContext,
        collection_id: CollectionId,
        bytes: &[u8],
    ) -> Result<Preview, ImportError> {
        let rows = GlossListParser.parse(bytes)?;
        self.require_collection(collection_id).await?;
        let existing = self
            .catalog
            .entries_named(collection_id, &distinct_names(&rows))
            .await?;
        let existing_names: BTreeSet<String> = existing.iter().map(|e| e.name.clone()).collect();
        let new = select_new(rows, &existing_names);

        let token = self
            .staging
            .stage(
                context,
                StagedPayload::GlossList(StagedGlossList {
                    collection_id,
                    rows: new.clone(),
                }),
            )
            .await;
        Ok(Preview::GlossList {
            token,
            collection_id,
            new,
            existing,
        })
    }

    pub async fn preview_survey(
        &self,
        context: SessionContext,
        bytes: &[u8],
    ) -> Result<Preview, ImportError> {
        let export = SurveyExportParser.parse(bytes)?;
        let (questions, responses, skipped) = (
            export.questions.len(),
            export.responses.len(),
            export.skipped.clone(),
        );
        let token = self
            .staging
            .stage(context, StagedPayload::Survey(export))
            .await;
        Ok(Preview::Survey {
            token,
            questions,
            responses,
            skipped,
        })
    }

    pub async fn preview_manual_review(
        &self,
        context: SessionContext,
        bytes: &[u8],
    ) -> Result<Preview, ImportError> {
        let rows = ManualReviewParser.parse(bytes)?;
        let total = rows.len();
        let groups = group_rows(rows);
        let group_counts = groups
            .iter()
            .map(|(group, rows)| (group.clone(), rows.len()))
            .collect();
        let token = self
            .staging
            .stage(context, StagedPayload::ManualReview(StagedReview { groups }))
            .await;
        Ok(Preview::ManualReview {
            token,
            rows: total,
            group_counts,
        })
    }

    /// Consumes the staged batch and applies it in one transaction. On failure nothing is written
    /// and the batch is put back so the session can retry or cancel.
    pub async fn confirm(
        &self,
        context: &SessionContext,
        token: StageToken,
    ) -> Result<ConfirmOutcome, ImportError> {
        let batch = self.staging.take(context, token).await?;
        let result = self.apply_payload(batch.payload.clone()).await;
        if let Err(err) = &result {
            warn!(error = %err, kind = %batch.payload.kind(), "confirm failed; nothing was written");
            self.staging.restore(batch).await;
        }
        result
    }

    async fn apply_payload(&self, payload: StagedPayload) -> Result<ConfirmOutcome, ImportError> {
        match payload {
            StagedPayload::Share(staged) => self.confirm_share(staged).await,
            StagedPayload::GlossList(staged) => self.confirm_gloss_list(staged).await,
            StagedPayload::Survey(export) => {
                let mut tx = self.catalog.begin().await?;
                let result = apply_survey(tx.as_mut(), &self.config, &export).await;
                let summary = finish(tx, result).await?;
                info!(records = summary.validation_records, entries = summary.entries, "survey committed");
                Ok(ConfirmOutcome {
                    summary: ConfirmSummary::Survey(summary),
                    dispatch: DispatchHandle::idle(),
                })
            }
            StagedPayload::ManualReview(staged) => {
                let mut tx = self.catalog.begin().await?;
                let result = apply_manual_review(tx.as_mut(), &staged.groups).await;
                let summary = finish(tx, result).await?;
                info!(aggregations = summary.aggregations, missing = summary.missing.len(), "manual review committed");
                Ok(ConfirmOutcome {
                    summary: ConfirmSummary::ManualReview(summary),
                    dispatch: DispatchHandle::idle(),
                })
            }
        }
    }

    pub async fn cancel(&self, context: &SessionContext, token: StageToken) -> Result<(), ImportError> {
        let batch = self.staging.take(context, token).await?;
        info!(kind = %batch.payload.kind(), %token, "staged batch cancelled");
        Ok(())
    }

    async fn confirm_share(&self, staged: StagedShare) -> Result<ConfirmOutcome, ImportError> {
        let StagedShare { collection_id, rows } = staged;
        let span = info_span!(
            "confirm_share",
            collection_id,
            new = rows.new.len(),
            reimport = rows.reimport.len()
        );
        async move {
            let mut tx = self.catalog.begin().await?;
            let result = self.reclassify_and_materialize(tx.as_mut(), collection_id, rows).await;
            let (outcome, skipped) = finish(tx, result).await?;
            info!(
                created = outcome.created.len(),
                reimported = outcome.reimported.len(),
                media = outcome.media.len(),
                "share import committed"
            );

            let media_dispatched = outcome.media.len();
            let dispatch = self.dispatcher.dispatch(outcome.media);
            Ok(ConfirmOutcome {
                summary: ConfirmSummary::Share(ShareSummary {
                    created: outcome.created,
                    reimported: outcome.reimported,
                    skipped,
                    new_contributors: outcome.new_contributors,
                    counts: outcome.counts,
                    media_dispatched,
                    dispatch_id: dispatch.dispatch_id(),
                }),
                dispatch,
            })
        }
        .instrument(span)
        .await
    }

    /// New and Reimport rows are classified again against the transaction's view, so an import
    /// or media retrieval that landed after the preview turns them into skips instead of
    /// duplicates or repeat downloads.
    async fn reclassify_and_materialize(
        &self,
        tx: &mut dyn CatalogTransaction,
        collection_id: CollectionId,
        rows: Classified<ShareRow>,
    ) -> Result<(ShareOutcome, Vec<SkippedRow<ShareRow>>), ImportError> {
        let Classified {
            new,
            reimport,
            mut skipped,
        } = rows;
        let mut pending = new;
        pending.extend(reimport.into_iter().map(|r| r.row));
        pending.sort_by_key(|row| row.ordinal);

        let index = ExternalIdIndex::new(tx.external_id_matches(&external_ids(&pending)).await?);
        let recheck = classify(pending, &index);
        skipped.extend(recheck.skipped);

        let outcome = materialize_share(
            tx,
            &self.config,
            collection_id,
            recheck.new,
            recheck.reimport,
            Utc::now(),
        )
        .await?;
        Ok((outcome, skipped))
    }

    async fn confirm_gloss_list(&self, staged: StagedGlossList) -> Result<ConfirmOutcome, ImportError> {
        let mut tx = self.catalog.begin().await?;
        let result = apply_gloss_list(tx.as_mut(), &self.config, staged.collection_id, staged.rows).await;
        let (created, already_present) = finish(tx, result).await?;
        info!(created = created.len(), already_present, "gloss list committed");
        Ok(ConfirmOutcome {
            summary: ConfirmSummary::GlossList(GlossListSummary {
                created,
                already_present,
            }),
            dispatch: DispatchHandle::idle(),
        })
    }
}

/// Commits on success, rolls back otherwise.
async fn finish<T>(
    tx: Box<dyn CatalogTransaction>,
    result: Result<T, ImportError>,
) -> Result<T, ImportError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
