//! Preview-to-confirm holding area. One slot per session; staging again replaces the slot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use lexi_core::CollectionId;
use lexi_feeds::{GlossListRow, ImporterKind, ManualReviewRow, ShareRow, SurveyExport};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::dedup::Classified;
use crate::error::ImportError;

/// Identifies whoever owns a staged slot (a user session, a CLI run).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionContext(String);

impl SessionContext {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageToken(Uuid);

impl StageToken {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedShare {
    pub collection_id: CollectionId,
    pub rows: Classified<ShareRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedGlossList {
    pub collection_id: CollectionId,
    pub rows: Vec<GlossListRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedReview {
    pub groups: BTreeMap<String, Vec<ManualReviewRow>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StagedPayload {
    Share(StagedShare),
    GlossList(StagedGlossList),
    Survey(SurveyExport),
    ManualReview(StagedReview),
}

impl StagedPayload {
    pub fn kind(&self) -> ImporterKind {
        match self {
            StagedPayload::Share(_) => ImporterKind::Share,
            StagedPayload::GlossList(_) => ImporterKind::GlossList,
            StagedPayload::Survey(_) => ImporterKind::Survey,
            StagedPayload::ManualReview(_) => ImporterKind::ManualReview,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedBatch {
    pub token: StageToken,
    pub context: SessionContext,
    pub staged_at: DateTime<Utc>,
    pub payload: StagedPayload,
}

#[derive(Debug, Default)]
pub struct StagingStore {
    slots: Mutex<HashMap<SessionContext, StagedBatch>>,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stage(&self, context: SessionContext, payload: StagedPayload) -> StageToken {
        let token = StageToken::generate();
        let batch = StagedBatch {
            token,
            context: context.clone(),
            staged_at: Utc::now(),
            payload,
        };
        let mut slots = self.slots.lock().await;
        if let Some(previous) = slots.insert(context, batch) {
            debug!(token = %previous.token, kind = %previous.payload.kind(), "replaced staged batch");
        }
        token
    }

    pub async fn get(
        &self,
        context: &SessionContext,
        token: StageToken,
    ) -> Result<StagedBatch, ImportError> {
        self.slots
            .lock()
            .await
            .get(context)
            .filter(|batch| batch.token == token)
            .cloned()
            .ok_or(ImportError::StagedBatchNotFound)
    }

    /// Removes and returns the batch; a second call with the same token fails.
    pub async fn take(
        &self,
        context: &SessionContext,
        token: StageToken,
    ) -> Result<StagedBatch, ImportError> {
        let mut slots = self.slots.lock().await;
        match slots.get(context) {
            Some(batch) if batch.token == token => {
                slots.remove(context).ok_or(ImportError::StagedBatchNotFound)
            }
            _ => Err(ImportError::StagedBatchNotFound),
        }
    }

    /// Puts a taken batch back unless the session has staged something newer meanwhile.
    pub async fn restore(&self, batch: StagedBatch) -> bool {
        let mut slots = self.slots.lock().await;
        if slots.contains_key(&batch.context) {
            return false;
        }
        slots.insert(batch.context.clone(), batch);
        true
    }

    pub async fn clear(&self, context: &SessionContext) -> bool {
        self.slots.lock().await.remove(context).is_some()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gloss_payload(name: &str) -> StagedPayload {
        StagedPayload::GlossList(StagedGlossList {
            collection_id: 1,
            rows: vec![GlossListRow {
                ordinal: 1,
                idgloss: name.into(),
                idgloss_mi: None,
            }],
        })
    }

    #[tokio::test]
    async fn restaging_replaces_the_previous_slot() {
        let store = StagingStore::new();
        let ctx = SessionContext::new("alice");
        let first = store.stage(ctx.clone(), gloss_payload("a")).await;
        let second = store.stage(ctx.clone(), gloss_payload("b")).await;

        assert_eq!(store.len().await, 1);
        assert!(matches!(
            store.get(&ctx, first).await,
            Err(ImportError::StagedBatchNotFound)
        ));
        assert_eq!(store.get(&ctx, second).await.expect("staged batch").payload, gloss_payload("b"));
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let store = StagingStore::new();
        let ctx = SessionContext::new("alice");
        let token = store.stage(ctx.clone(), gloss_payload("a")).await;

        assert!(store.take(&ctx, token).await.is_ok());
        assert!(matches!(
            store.take(&ctx, token).await,
            Err(ImportError::StagedBatchNotFound)
        ));
    }

    #[tokio::test]
    async fn tokens_are_scoped_to_their_session() {
        let store = StagingStore::new();
        let alice = SessionContext::new("alice");
        let bob = SessionContext::new("bob");
        let token = store.stage(alice.clone(), gloss_payload("a")).await;

        assert!(store.take(&bob, token).await.is_err());
        assert!(store.clear(&alice).await);
        assert!(!store.clear(&alice).await);
    }

    #[tokio::test]
    async fn restore_does_not_clobber_newer_batches() {
        let store = StagingStore::new();
        let ctx = SessionContext::new("alice");
        let token = store.stage(ctx.clone(), gloss_payload("a")).await;
        let taken = store.take(&ctx, token).await.expect("take");

        let newer = store.stage(ctx.clone(), gloss_payload("b")).await;
        assert!(!store.restore(taken.clone()).await);
        assert!(store.get(&ctx, newer).await.is_ok());

        store.clear(&ctx).await;
        assert!(store.restore(taken).await);
        assert!(store.get(&ctx, token).await.is_ok());
    }
}
