//! Persistence contract used by the import pipeline.

use std::collections::HashMap;

use async_trait::async_trait;
use lexi_core::{
    AggregationCount, Annotation, Collection, CollectionId, ContributorIdentity, Entry,
    EntryFinalize, EntryId, ExternalIdMatch, FieldAssociation, FieldMapping, ManualAggregation,
    MediaId, NewContributor, NewEntry, NewStoredMedia, StoredMedia, TagAssociation, Translation,
    ValidationResponse,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("missing reference: {0}")]
    MissingReference(String),
    #[error("unknown tag {0:?}")]
    UnknownTag(String),
    #[error("injected failure during {0}")]
    Injected(&'static str),
    #[error("unexpected column value: {0}")]
    Decode(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Read access outside a transaction plus the entry point for atomic writes.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn collection(&self, id: CollectionId) -> Result<Option<Collection>, StoreError>;

    /// Entries carrying any of `external_ids`, across all collections, with their media counts.
    async fn external_id_matches(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<ExternalIdMatch>, StoreError>;

    async fn entries_named(
        &self,
        collection_id: CollectionId,
        names: &[String],
    ) -> Result<Vec<Entry>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, StoreError>;

    /// Persists a stored-media row. Used by the dispatcher after the import has committed.
    async fn record_media(&self, media: NewStoredMedia) -> Result<StoredMedia, StoreError>;
}

/// One all-or-nothing unit of work. Dropping without `commit` discards every write.
#[async_trait]
pub trait CatalogTransaction: Send {
    async fn external_id_matches(
        &mut self,
        external_ids: &[String],
    ) -> Result<Vec<ExternalIdMatch>, StoreError>;

    async fn entries_named(
        &mut self,
        collection_id: CollectionId,
        names: &[String],
    ) -> Result<Vec<Entry>, StoreError>;

    async fn entries_by_id(&mut self, ids: &[EntryId]) -> Result<Vec<Entry>, StoreError>;

    /// Maps stored-media ids to the entry each belongs to; unknown ids are absent.
    async fn media_owners(
        &mut self,
        media_ids: &[MediaId],
    ) -> Result<HashMap<MediaId, EntryId>, StoreError>;

    async fn contributors(&mut self) -> Result<Vec<ContributorIdentity>, StoreError>;

    async fn field_mappings(&mut self, domain: &str) -> Result<Vec<FieldMapping>, StoreError>;

    /// Bulk insert; returned entries carry generated ids, in no guaranteed order.
    async fn insert_entries(&mut self, entries: Vec<NewEntry>) -> Result<Vec<Entry>, StoreError>;

    async fn finalize_entries(&mut self, updates: Vec<EntryFinalize>) -> Result<(), StoreError>;

    async fn insert_contributors(
        &mut self,
        contributors: Vec<NewContributor>,
    ) -> Result<Vec<ContributorIdentity>, StoreError>;

    async fn insert_translations(&mut self, rows: Vec<Translation>) -> Result<u64, StoreError>;

    async fn insert_annotations(&mut self, rows: Vec<Annotation>) -> Result<u64, StoreError>;

    async fn insert_aggregations(&mut self, rows: Vec<AggregationCount>)
        -> Result<u64, StoreError>;

    async fn insert_field_associations(
        &mut self,
        rows: Vec<FieldAssociation>,
    ) -> Result<u64, StoreError>;

    /// Existing associations are left alone; returns the number newly added.
    async fn insert_tags(&mut self, rows: Vec<TagAssociation>) -> Result<u64, StoreError>;

    async fn remove_tags(&mut self, entry_ids: &[EntryId], tag: &str) -> Result<u64, StoreError>;

    /// Rows duplicating an existing `(entry_id, response_id)` pair are ignored.
    async fn insert_validation_responses(
        &mut self,
        rows: Vec<ValidationResponse>,
    ) -> Result<u64, StoreError>;

    async fn insert_manual_aggregations(
        &mut self,
        rows: Vec<ManualAggregation>,
    ) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
