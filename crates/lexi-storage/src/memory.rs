//! In-process catalog. Transactions work on a copy of the state and hold the catalog lock
//! until they commit or drop, so concurrent transactions are serialized.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use lexi_core::{
    AggregationCount, Annotation, Collection, CollectionId, ContributorId, ContributorIdentity,
    Entry, EntryFinalize, EntryId, ExternalIdMatch, FieldAssociation, FieldMapping,
    ManualAggregation, MappingId, MediaId, MediaVariant, NewContributor, NewEntry,
    NewStoredMedia, StoredMedia, TagAssociation, Translation, ValidationResponse,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::catalog::{Catalog, CatalogTransaction, StoreError};

/// Write operations that can be made to fail for rollback testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOp {
    InsertEntries,
    FinalizeEntries,
    InsertContributors,
    InsertTranslations,
    InsertAnnotations,
    InsertAggregations,
    InsertFieldAssociations,
    InsertTags,
    RemoveTags,
    InsertValidationResponses,
    InsertManualAggregations,
    RecordMedia,
}

impl CatalogOp {
    fn label(self) -> &'static str {
        match self {
            CatalogOp::InsertEntries => "insert_entries",
            CatalogOp::FinalizeEntries => "finalize_entries",
            CatalogOp::InsertContributors => "insert_contributors",
            CatalogOp::InsertTranslations => "insert_translations",
            CatalogOp::InsertAnnotations => "insert_annotations",
            CatalogOp::InsertAggregations => "insert_aggregations",
            CatalogOp::InsertFieldAssociations => "insert_field_associations",
            CatalogOp::InsertTags => "insert_tags",
            CatalogOp::RemoveTags => "remove_tags",
            CatalogOp::InsertValidationResponses => "insert_validation_responses",
            CatalogOp::InsertManualAggregations => "insert_manual_aggregations",
            CatalogOp::RecordMedia => "record_media",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    pub collections: BTreeMap<CollectionId, Collection>,
    pub entries: BTreeMap<EntryId, Entry>,
    pub contributors: Vec<ContributorIdentity>,
    pub field_mappings: Vec<FieldMapping>,
    pub translations: Vec<Translation>,
    pub annotations: Vec<Annotation>,
    pub aggregations: Vec<AggregationCount>,
    pub field_associations: Vec<FieldAssociation>,
    pub tags: BTreeSet<String>,
    pub tag_associations: BTreeSet<(EntryId, String)>,
    pub validation_responses: Vec<ValidationResponse>,
    pub manual_aggregations: Vec<ManualAggregation>,
    pub media: Vec<StoredMedia>,
    last_id: i64,
}

impl CatalogState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn add_collection(&mut self, name: &str) -> CollectionId {
        let id = self.next_id();
        self.collections.insert(
            id,
            Collection {
                id,
                name: name.to_string(),
            },
        );
        id
    }

    pub fn add_entry(
        &mut self,
        collection_id: CollectionId,
        name: &str,
        external_id: Option<&str>,
    ) -> EntryId {
        let id = self.next_id();
        self.entries.insert(
            id,
            Entry {
                id,
                collection_id,
                name: name.to_string(),
                secondary_name: None,
                external_id: external_id.map(str::to_string),
                contributor_id: None,
                created_by: "seed".to_string(),
                exclude_from_export: false,
            },
        );
        id
    }

    pub fn add_contributor(&mut self, name: &str, code: i32) -> ContributorId {
        let id = self.next_id();
        self.contributors.push(ContributorIdentity {
            id,
            name: name.to_string(),
            code,
        });
        id
    }

    pub fn add_field_mapping(&mut self, domain: &str, name: &str) -> MappingId {
        let id = self.next_id();
        self.field_mappings.push(FieldMapping {
            id,
            domain: domain.to_string(),
            name: name.to_string(),
        });
        id
    }

    pub fn add_tag(&mut self, name: &str) {
        self.tags.insert(name.to_string());
    }

    pub fn add_media(&mut self, entry_id: EntryId, variant: MediaVariant) -> MediaId {
        self.insert_media(NewStoredMedia {
            entry_id,
            file_path: format!("{entry_id}/seed-{variant}"),
            variant,
            ordinal: 0,
            content_hash: String::new(),
            byte_size: 0,
        })
        .id
    }

    pub fn media_for(&self, entry_id: EntryId) -> Vec<&StoredMedia> {
        self.media.iter().filter(|m| m.entry_id == entry_id).collect()
    }

    pub fn tags_for(&self, entry_id: EntryId) -> Vec<&str> {
        self.tag_associations
            .iter()
            .filter(|(id, _)| *id == entry_id)
            .map(|(_, tag)| tag.as_str())
            .collect()
    }

    pub fn entries_in(&self, collection_id: CollectionId) -> Vec<&Entry> {
        self.entries
            .values()
            .filter(|e| e.collection_id == collection_id)
            .collect()
    }

    fn insert_media(&mut self, media: NewStoredMedia) -> StoredMedia {
        let stored = StoredMedia {
            id: self.next_id(),
            entry_id: media.entry_id,
            file_path: media.file_path,
            variant: media.variant,
            ordinal: media.ordinal,
            content_hash: media.content_hash,
            byte_size: media.byte_size,
            is_public: false,
        };
        self.media.push(stored.clone());
        stored
    }

    fn external_id_matches(&self, external_ids: &[String]) -> Vec<ExternalIdMatch> {
        let wanted: HashSet<&str> = external_ids.iter().map(String::as_str).collect();
        self.entries
            .values()
            .filter_map(|entry| {
                let external_id = entry.external_id.as_deref()?;
                if !wanted.contains(external_id) {
                    return None;
                }
                Some(ExternalIdMatch {
                    external_id: external_id.to_string(),
                    entry_id: entry.id,
                    media_count: self.media_for(entry.id).len() as i64,
                })
            })
            .collect()
    }

    fn entries_named(&self, collection_id: CollectionId, names: &[String]) -> Vec<Entry> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        self.entries
            .values()
            .filter(|e| e.collection_id == collection_id && wanted.contains(e.name.as_str()))
            .cloned()
            .collect()
    }

    fn ensure_entries<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a EntryId>,
    ) -> Result<(), StoreError> {
        for id in ids {
            if !self.entries.contains_key(id) {
                return Err(StoreError::MissingReference(format!("entry {id}")));
            }
        }
        Ok(())
    }

    fn ensure_unique_names(entries: &BTreeMap<EntryId, Entry>) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for entry in entries.values() {
            if !seen.insert((entry.collection_id, entry.name.as_str())) {
                return Err(StoreError::UniqueViolation(format!(
                    "entry name {:?} in collection {}",
                    entry.name, entry.collection_id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
    fail_on: Option<CatalogOp>,
}

impl MemoryCatalog {
    pub fn new(state: CatalogState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            fail_on: None,
        }
    }

    /// Every transaction (and `record_media`) fails when it reaches `op`.
    pub fn failing_on(mut self, op: CatalogOp) -> Self {
        self.fail_on = Some(op);
        self
    }

    pub async fn snapshot(&self) -> CatalogState {
        self.state.lock().await.clone()
    }

    pub async fn seed<T>(&self, f: impl FnOnce(&mut CatalogState) -> T) -> T {
        let mut state = self.state.lock().await;
        f(&mut state)
    }
}

fn check(fail_on: Option<CatalogOp>, op: CatalogOp) -> Result<(), StoreError> {
    if fail_on == Some(op) {
        return Err(StoreError::Injected(op.label()));
    }
    Ok(())
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn collection(&self, id: CollectionId) -> Result<Option<Collection>, StoreError> {
        Ok(self.state.lock().await.collections.get(&id).cloned())
    }

    async fn external_id_matches(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<ExternalIdMatch>, StoreError> {
        Ok(self.state.lock().await.external_id_matches(external_ids))
    }

    async fn entries_named(
        &self,
        collection_id: CollectionId,
        names: &[String],
    ) -> Result<Vec<Entry>, StoreError> {
        Ok(self.state.lock().await.entries_named(collection_id, names))
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            fail_on: self.fail_on,
        }))
    }

    async fn record_media(&self, media: NewStoredMedia) -> Result<StoredMedia, StoreError> {
        check(self.fail_on, CatalogOp::RecordMedia)?;
        let mut state = self.state.lock().await;
        state.ensure_entries([&media.entry_id])?;
        Ok(state.insert_media(media))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<CatalogState>,
    working: CatalogState,
    fail_on: Option<CatalogOp>,
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction {
    async fn external_id_matches(
        &mut self,
        external_ids: &[String],
    ) -> Result<Vec<ExternalIdMatch>, StoreError> {
        Ok(self.working.external_id_matches(external_ids))
    }

    async fn entries_named(
        &mut self,
        collection_id: CollectionId,
        names: &[String],
    ) -> Result<Vec<Entry>, StoreError> {
        Ok(self.working.entries_named(collection_id, names))
    }

    async fn entries_by_id(&mut self, ids: &[EntryId]) -> Result<Vec<Entry>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.entries.get(id).cloned())
            .collect())
    }

    async fn media_owners(
        &mut self,
        media_ids: &[MediaId],
    ) -> Result<HashMap<MediaId, EntryId>, StoreError> {
        let wanted: HashSet<MediaId> = media_ids.iter().copied().collect();
        Ok(self
            .working
            .media
            .iter()
            .filter(|m| wanted.contains(&m.id))
            .map(|m| (m.id, m.entry_id))
            .collect())
    }

    async fn contributors(&mut self) -> Result<Vec<ContributorIdentity>, StoreError> {
        Ok(self.working.contributors.clone())
    }

    async fn field_mappings(&mut self, domain: &str) -> Result<Vec<FieldMapping>, StoreError> {
        Ok(self
            .working
            .field_mappings
            .iter()
            .filter(|m| m.domain == domain)
            .cloned()
            .collect())
    }

    async fn insert_entries(&mut self, entries: Vec<NewEntry>) -> Result<Vec<Entry>, StoreError> {
        check(self.fail_on, CatalogOp::InsertEntries)?;
        if !entries
            .iter()
            .all(|e| self.working.collections.contains_key(&e.collection_id))
        {
            return Err(StoreError::MissingReference("collection".to_string()));
        }
        let mut candidate = self.working.entries.clone();
        let mut created = Vec::with_capacity(entries.len());
        for new_entry in entries {
            let id = self.working.next_id();
            let entry = Entry {
                id,
                collection_id: new_entry.collection_id,
                name: new_entry.name,
                secondary_name: new_entry.secondary_name,
                external_id: new_entry.external_id,
                contributor_id: None,
                created_by: new_entry.created_by,
                exclude_from_export: new_entry.exclude_from_export,
            };
            candidate.insert(id, entry.clone());
            created.push(entry);
        }
        CatalogState::ensure_unique_names(&candidate)?;
        self.working.entries = candidate;
        Ok(created)
    }

    async fn finalize_entries(&mut self, updates: Vec<EntryFinalize>) -> Result<(), StoreError> {
        check(self.fail_on, CatalogOp::FinalizeEntries)?;
        let mut candidate = self.working.entries.clone();
        for update in updates {
            let entry = candidate
                .get_mut(&update.entry_id)
                .ok_or_else(|| StoreError::MissingReference(format!("entry {}", update.entry_id)))?;
            entry.name = update.name;
            entry.secondary_name = update.secondary_name;
            entry.contributor_id = update.contributor_id;
        }
        CatalogState::ensure_unique_names(&candidate)?;
        self.working.entries = candidate;
        Ok(())
    }

    async fn insert_contributors(
        &mut self,
        contributors: Vec<NewContributor>,
    ) -> Result<Vec<ContributorIdentity>, StoreError> {
        check(self.fail_on, CatalogOp::InsertContributors)?;
        let mut created = Vec::with_capacity(contributors.len());
        for new in contributors {
            if self
                .working
                .contributors
                .iter()
                .any(|c| c.code == new.code || c.name == new.name)
            {
                return Err(StoreError::UniqueViolation(format!(
                    "contributor {:?} / code {}",
                    new.name, new.code
                )));
            }
            let id = self.working.add_contributor(&new.name, new.code);
            created.push(ContributorIdentity {
                id,
                name: new.name,
                code: new.code,
            });
        }
        Ok(created)
    }

    async fn insert_translations(&mut self, rows: Vec<Translation>) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::InsertTranslations)?;
        self.working.ensure_entries(rows.iter().map(|r| &r.entry_id))?;
        for row in &rows {
            if self
                .working
                .translations
                .iter()
                .any(|t| t.entry_id == row.entry_id && t.language == row.language)
            {
                return Err(StoreError::UniqueViolation(format!(
                    "translation {} for entry {}",
                    row.language, row.entry_id
                )));
            }
        }
        let count = rows.len() as u64;
        self.working.translations.extend(rows);
        Ok(count)
    }

    async fn insert_annotations(&mut self, rows: Vec<Annotation>) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::InsertAnnotations)?;
        self.working.ensure_entries(rows.iter().map(|r| &r.entry_id))?;
        let count = rows.len() as u64;
        self.working.annotations.extend(rows);
        Ok(count)
    }

    async fn insert_aggregations(
        &mut self,
        rows: Vec<AggregationCount>,
    ) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::InsertAggregations)?;
        self.working.ensure_entries(rows.iter().map(|r| &r.entry_id))?;
        let count = rows.len() as u64;
        self.working.aggregations.extend(rows);
        Ok(count)
    }

    async fn insert_field_associations(
        &mut self,
        rows: Vec<FieldAssociation>,
    ) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::InsertFieldAssociations)?;
        self.working.ensure_entries(rows.iter().map(|r| &r.entry_id))?;
        for row in &rows {
            if self.working.field_associations.contains(row) {
                return Err(StoreError::UniqueViolation(format!(
                    "mapping {} for entry {}",
                    row.mapping_id, row.entry_id
                )));
            }
            if !self.working.field_mappings.iter().any(|m| m.id == row.mapping_id) {
                return Err(StoreError::MissingReference(format!(
                    "field mapping {}",
                    row.mapping_id
                )));
            }
        }
        let count = rows.len() as u64;
        self.working.field_associations.extend(rows);
        Ok(count)
    }

    async fn insert_tags(&mut self, rows: Vec<TagAssociation>) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::InsertTags)?;
        self.working.ensure_entries(rows.iter().map(|r| &r.entry_id))?;
        if let Some(unknown) = rows.iter().find(|r| !self.working.tags.contains(&r.tag)) {
            return Err(StoreError::UnknownTag(unknown.tag.clone()));
        }
        let mut added = 0;
        for row in rows {
            if self.working.tag_associations.insert((row.entry_id, row.tag)) {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn remove_tags(&mut self, entry_ids: &[EntryId], tag: &str) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::RemoveTags)?;
        let before = self.working.tag_associations.len();
        let ids: HashSet<EntryId> = entry_ids.iter().copied().collect();
        self.working
            .tag_associations
            .retain(|(id, t)| !(t == tag && ids.contains(id)));
        Ok((before - self.working.tag_associations.len()) as u64)
    }

    async fn insert_validation_responses(
        &mut self,
        rows: Vec<ValidationResponse>,
    ) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::InsertValidationResponses)?;
        self.working.ensure_entries(rows.iter().map(|r| &r.entry_id))?;
        let mut added = 0;
        for row in rows {
            let duplicate = self
                .working
                .validation_responses
                .iter()
                .any(|r| r.entry_id == row.entry_id && r.response_id == row.response_id);
            if !duplicate {
                self.working.validation_responses.push(row);
                added += 1;
            }
        }
        Ok(added)
    }

    async fn insert_manual_aggregations(
        &mut self,
        rows: Vec<ManualAggregation>,
    ) -> Result<u64, StoreError> {
        check(self.fail_on, CatalogOp::InsertManualAggregations)?;
        self.working.ensure_entries(rows.iter().map(|r| &r.entry_id))?;
        let count = rows.len() as u64;
        self.working.manual_aggregations.extend(rows);
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(collection_id: CollectionId, name: &str) -> NewEntry {
        NewEntry {
            collection_id,
            name: name.to_string(),
            secondary_name: None,
            external_id: None,
            created_by: "test".to_string(),
            exclude_from_export: true,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let catalog = MemoryCatalog::default();
        let collection = catalog.seed(|s| s.add_collection("NZSL")).await;

        let mut tx = catalog.begin().await.expect("begin");
        tx.insert_entries(vec![new_entry(collection, "hello_row1")])
            .await
            .expect("insert");
        drop(tx);

        assert!(catalog.snapshot().await.entries.is_empty());
    }

    #[tokio::test]
    async fn committed_entries_get_ids_and_names_stay_unique() {
        let catalog = MemoryCatalog::default();
        let collection = catalog.seed(|s| s.add_collection("NZSL")).await;

        let mut tx = catalog.begin().await.expect("begin");
        let created = tx
            .insert_entries(vec![
                new_entry(collection, "hello_row1"),
                new_entry(collection, "hello_row2"),
            ])
            .await
            .expect("insert");
        let err = tx
            .finalize_entries(
                created
                    .iter()
                    .map(|e| EntryFinalize {
                        entry_id: e.id,
                        name: "hello".to_string(),
                        secondary_name: None,
                        contributor_id: None,
                    })
                    .collect(),
            )
            .await
            .expect_err("duplicate final names");
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        tx.commit().await.expect("commit");

        let state = catalog.snapshot().await;
        assert_eq!(state.entries.len(), 2);
    }

    #[tokio::test]
    async fn external_id_index_reports_media_counts() {
        let catalog = MemoryCatalog::default();
        let (with_media, without_media) = catalog
            .seed(|s| {
                let c = s.add_collection("NZSL");
                let a = s.add_entry(c, "a:1", Some("100"));
                let b = s.add_entry(c, "b:2", Some("200"));
                s.add_media(a, MediaVariant::Main);
                (a, b)
            })
            .await;

        let mut matches = catalog
            .external_id_matches(&["100".to_string(), "200".to_string(), "300".to_string()])
            .await
            .expect("matches");
        matches.sort_by_key(|m| m.entry_id);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].entry_id, matches[0].media_count), (with_media, 1));
        assert_eq!((matches[1].entry_id, matches[1].media_count), (without_media, 0));
    }

    #[tokio::test]
    async fn duplicate_tags_and_validation_responses_are_ignored() {
        let catalog = MemoryCatalog::default();
        let entry = catalog
            .seed(|s| {
                let c = s.add_collection("NZSL");
                s.add_tag("validation:check-results");
                s.add_entry(c, "a:1", None)
            })
            .await;

        let mut tx = catalog.begin().await.expect("begin");
        let tag = TagAssociation {
            entry_id: entry,
            tag: "validation:check-results".to_string(),
        };
        assert_eq!(tx.insert_tags(vec![tag.clone(), tag]).await.expect("tags"), 1);
        let unknown = tx
            .insert_tags(vec![TagAssociation {
                entry_id: entry,
                tag: "nope".to_string(),
            }])
            .await
            .expect_err("unknown tag");
        assert!(matches!(unknown, StoreError::UnknownTag(_)));

        let response = ValidationResponse {
            entry_id: entry,
            sign_seen: lexi_core::SignSeen::Yes,
            response_id: "R_1".to_string(),
            respondent_first_name: String::new(),
            respondent_last_name: String::new(),
            comment: String::new(),
        };
        let added = tx
            .insert_validation_responses(vec![response.clone(), response])
            .await
            .expect("responses");
        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_store_error() {
        let catalog = MemoryCatalog::default().failing_on(CatalogOp::InsertAnnotations);
        let mut tx = catalog.begin().await.expect("begin");
        let err = tx.insert_annotations(Vec::new()).await.expect_err("injected");
        assert!(matches!(err, StoreError::Injected("insert_annotations")));
    }
}
