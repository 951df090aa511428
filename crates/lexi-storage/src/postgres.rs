//! Postgres-backed catalog (sqlx). Bulk writes use multi-row `VALUES` lists with `RETURNING`.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use lexi_core::{
    AggregationCount, Annotation, Collection, CollectionId, ContributorIdentity, Entry,
    EntryFinalize, EntryId, ExternalIdMatch, FieldAssociation, FieldMapping, ManualAggregation,
    MediaId, MediaVariant, NewContributor, NewEntry, NewStoredMedia, StoredMedia, TagAssociation,
    Translation, ValidationResponse,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogTransaction, StoreError};

/// Rows per statement; keeps bind counts well under the protocol limit.
const BULK_CHUNK: usize = 1_000;

const ENTRY_COLUMNS: &str =
    "id, collection_id, name, secondary_name, external_id, contributor_id, created_by, exclude_from_export";

#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("catalog migrations applied");
        Ok(())
    }
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::UniqueViolation(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            return StoreError::MissingReference(db.message().to_string());
        }
    }
    StoreError::Database(err)
}

fn entry_from_row(row: &PgRow) -> Result<Entry, StoreError> {
    Ok(Entry {
        id: row.try_get("id")?,
        collection_id: row.try_get("collection_id")?,
        name: row.try_get("name")?,
        secondary_name: row.try_get("secondary_name")?,
        external_id: row.try_get("external_id")?,
        contributor_id: row.try_get("contributor_id")?,
        created_by: row.try_get("created_by")?,
        exclude_from_export: row.try_get("exclude_from_export")?,
    })
}

fn media_from_row(row: &PgRow) -> Result<StoredMedia, StoreError> {
    let variant: String = row.try_get("variant")?;
    Ok(StoredMedia {
        id: row.try_get("id")?,
        entry_id: row.try_get("entry_id")?,
        file_path: row.try_get("file_path")?,
        variant: MediaVariant::parse(&variant)
            .ok_or_else(|| StoreError::Decode(format!("media variant {variant:?}")))?,
        ordinal: row.try_get("ordinal")?,
        content_hash: row.try_get("content_hash")?,
        byte_size: row.try_get("byte_size")?,
        is_public: row.try_get("is_public")?,
    })
}

async fn fetch_collection<'e>(
    executor: impl PgExecutor<'e>,
    id: CollectionId,
) -> Result<Option<Collection>, StoreError> {
    let row = sqlx::query("SELECT id, name FROM collections WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.map(|row| {
        Ok(Collection {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    })
    .transpose()
}

async fn fetch_external_id_matches<'e>(
    executor: impl PgExecutor<'e>,
    external_ids: &[String],
) -> Result<Vec<ExternalIdMatch>, StoreError> {
    if external_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        "SELECT e.external_id, e.id AS entry_id, COUNT(m.id) AS media_count
         FROM entries e
         LEFT JOIN stored_media m ON m.entry_id = e.id
         WHERE e.external_id = ANY($1)
         GROUP BY e.id, e.external_id",
    )
    .bind(external_ids)
    .fetch_all(executor)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(ExternalIdMatch {
                external_id: row.try_get("external_id")?,
                entry_id: row.try_get("entry_id")?,
                media_count: row.try_get("media_count")?,
            })
        })
        .collect()
}

async fn fetch_entries_named<'e>(
    executor: impl PgExecutor<'e>,
    collection_id: CollectionId,
    names: &[String],
) -> Result<Vec<Entry>, StoreError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE collection_id = $1 AND name = ANY($2)"
    );
    let rows = sqlx::query(&sql)
        .bind(collection_id)
        .bind(names)
        .fetch_all(executor)
        .await?;
    rows.iter().map(entry_from_row).collect()
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn collection(&self, id: CollectionId) -> Result<Option<Collection>, StoreError> {
        fetch_collection(&self.pool, id).await
    }

    async fn external_id_matches(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<ExternalIdMatch>, StoreError> {
        fetch_external_id_matches(&self.pool, external_ids).await
    }

    async fn entries_named(
        &self,
        collection_id: CollectionId,
        names: &[String],
    ) -> Result<Vec<Entry>, StoreError> {
        fetch_entries_named(&self.pool, collection_id, names).await
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn record_media(&self, media: NewStoredMedia) -> Result<StoredMedia, StoreError> {
        let row = sqlx::query(
            "INSERT INTO stored_media
                (entry_id, file_path, variant, video_type, ordinal, content_hash, byte_size)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, entry_id, file_path, variant, ordinal, content_hash, byte_size, is_public",
        )
        .bind(media.entry_id)
        .bind(&media.file_path)
        .bind(media.variant.to_string())
        .bind(media.variant.video_type())
        .bind(media.ordinal)
        .bind(&media.content_hash)
        .bind(media.byte_size)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;
        media_from_row(&row)
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTransaction for PgTransaction {
    async fn external_id_matches(
        &mut self,
        external_ids: &[String],
    ) -> Result<Vec<ExternalIdMatch>, StoreError> {
        fetch_external_id_matches(&mut *self.tx, external_ids).await
    }

    async fn entries_named(
        &mut self,
        collection_id: CollectionId,
        names: &[String],
    ) -> Result<Vec<Entry>, StoreError> {
        fetch_entries_named(&mut *self.tx, collection_id, names).await
    }

    async fn entries_by_id(&mut self, ids: &[EntryId]) -> Result<Vec<Entry>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn media_owners(
        &mut self,
        media_ids: &[MediaId],
    ) -> Result<HashMap<MediaId, EntryId>, StoreError> {
        if media_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query("SELECT id, entry_id FROM stored_media WHERE id = ANY($1)")
            .bind(media_ids)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("entry_id")?)))
            .collect()
    }

    async fn contributors(&mut self) -> Result<Vec<ContributorIdentity>, StoreError> {
        let rows = sqlx::query("SELECT id, name, code FROM contributors")
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ContributorIdentity {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    code: row.try_get("code")?,
                })
            })
            .collect()
    }

    async fn field_mappings(&mut self, domain: &str) -> Result<Vec<FieldMapping>, StoreError> {
        let rows = sqlx::query("SELECT id, domain, name FROM field_mappings WHERE domain = $1")
            .bind(domain)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(FieldMapping {
                    id: row.try_get("id")?,
                    domain: row.try_get("domain")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn insert_entries(&mut self, entries: Vec<NewEntry>) -> Result<Vec<Entry>, StoreError> {
        let mut created = Vec::with_capacity(entries.len());
        for chunk in entries.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO entries (collection_id, name, secondary_name, external_id, created_by, exclude_from_export) ",
            );
            qb.push_values(chunk, |mut b, e| {
                b.push_bind(e.collection_id)
                    .push_bind(e.name.clone())
                    .push_bind(e.secondary_name.clone())
                    .push_bind(e.external_id.clone())
                    .push_bind(e.created_by.clone())
                    .push_bind(e.exclude_from_export);
            });
            qb.push(" RETURNING ");
            qb.push(ENTRY_COLUMNS);
            let rows = qb
                .build()
                .fetch_all(&mut *self.tx)
                .await
                .map_err(map_db_error)?;
            for row in &rows {
                created.push(entry_from_row(row)?);
            }
        }
        debug!(count = created.len(), "inserted entries");
        Ok(created)
    }

    async fn finalize_entries(&mut self, updates: Vec<EntryFinalize>) -> Result<(), StoreError> {
        for chunk in updates.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "UPDATE entries AS e
                 SET name = v.name, secondary_name = v.secondary_name, contributor_id = v.contributor_id
                 FROM (",
            );
            qb.push_values(chunk, |mut b, u| {
                b.push_bind(u.entry_id).push_unseparated("::bigint");
                b.push_bind(u.name.clone()).push_unseparated("::text");
                b.push_bind(u.secondary_name.clone()).push_unseparated("::text");
                b.push_bind(u.contributor_id).push_unseparated("::bigint");
            });
            qb.push(") AS v(id, name, secondary_name, contributor_id) WHERE e.id = v.id");
            let result = qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?;
            if result.rows_affected() != chunk.len() as u64 {
                return Err(StoreError::MissingReference(format!(
                    "finalized {} of {} entries",
                    result.rows_affected(),
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    async fn insert_contributors(
        &mut self,
        contributors: Vec<NewContributor>,
    ) -> Result<Vec<ContributorIdentity>, StoreError> {
        let mut created = Vec::with_capacity(contributors.len());
        for chunk in contributors.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new("INSERT INTO contributors (name, code) ");
            qb.push_values(chunk, |mut b, c| {
                b.push_bind(c.name.clone()).push_bind(c.code);
            });
            qb.push(" RETURNING id, name, code");
            let rows = qb
                .build()
                .fetch_all(&mut *self.tx)
                .await
                .map_err(map_db_error)?;
            for row in &rows {
                created.push(ContributorIdentity {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    code: row.try_get("code")?,
                });
            }
        }
        Ok(created)
    }

    async fn insert_translations(&mut self, rows: Vec<Translation>) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for chunk in rows.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO translations (entry_id, language, text, secondary_text) ",
            );
            qb.push_values(chunk, |mut b, t| {
                b.push_bind(t.entry_id)
                    .push_bind(t.language.clone())
                    .push_bind(t.text.clone())
                    .push_bind(t.secondary_text.clone());
            });
            inserted += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_annotations(&mut self, rows: Vec<Annotation>) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for chunk in rows.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO annotations (entry_id, author, body, is_public, submitted_at) ",
            );
            qb.push_values(chunk, |mut b, a| {
                b.push_bind(a.entry_id)
                    .push_bind(a.author.clone())
                    .push_bind(a.body.clone())
                    .push_bind(a.is_public)
                    .push_bind(a.submitted_at);
            });
            inserted += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_aggregations(
        &mut self,
        rows: Vec<AggregationCount>,
    ) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for chunk in rows.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new("INSERT INTO aggregation_counts (entry_id, agrees, disagrees) ");
            qb.push_values(chunk, |mut b, a| {
                b.push_bind(a.entry_id)
                    .push_bind(a.agrees)
                    .push_bind(a.disagrees);
            });
            inserted += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_field_associations(
        &mut self,
        rows: Vec<FieldAssociation>,
    ) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for chunk in rows.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new("INSERT INTO entry_field_mappings (entry_id, mapping_id) ");
            qb.push_values(chunk, |mut b, a| {
                b.push_bind(a.entry_id).push_bind(a.mapping_id);
            });
            inserted += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_tags(&mut self, rows: Vec<TagAssociation>) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let wanted: Vec<String> = rows
            .iter()
            .map(|r| r.tag.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let known: BTreeSet<String> = sqlx::query_scalar("SELECT name FROM tags WHERE name = ANY($1)")
            .bind(&wanted)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .collect();
        if let Some(missing) = wanted.iter().find(|t| !known.contains(*t)) {
            return Err(StoreError::UnknownTag(missing.clone()));
        }

        let mut inserted = 0;
        for chunk in rows.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO entry_tags (entry_id, tag_id) SELECT v.entry_id, t.id FROM (",
            );
            qb.push_values(chunk, |mut b, a| {
                b.push_bind(a.entry_id).push_unseparated("::bigint");
                b.push_bind(a.tag.clone()).push_unseparated("::text");
            });
            qb.push(") AS v(entry_id, tag) JOIN tags t ON t.name = v.tag ON CONFLICT DO NOTHING");
            inserted += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn remove_tags(&mut self, entry_ids: &[EntryId], tag: &str) -> Result<u64, StoreError> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM entry_tags USING tags
             WHERE entry_tags.tag_id = tags.id AND tags.name = $1 AND entry_tags.entry_id = ANY($2)",
        )
        .bind(tag)
        .bind(entry_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_validation_responses(
        &mut self,
        rows: Vec<ValidationResponse>,
    ) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for chunk in rows.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO validation_responses
                    (entry_id, sign_seen, response_id, respondent_first_name, respondent_last_name, comment) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.entry_id)
                    .push_bind(r.sign_seen.as_str())
                    .push_bind(r.response_id.clone())
                    .push_bind(r.respondent_first_name.clone())
                    .push_bind(r.respondent_last_name.clone())
                    .push_bind(r.comment.clone());
            });
            qb.push(" ON CONFLICT ON CONSTRAINT unique_entry_response_pair DO NOTHING");
            inserted += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_manual_aggregations(
        &mut self,
        rows: Vec<ManualAggregation>,
    ) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for chunk in rows.chunks(BULK_CHUNK) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO manual_aggregations
                    (entry_id, review_group, sign_seen_yes, sign_seen_no, sign_seen_not_sure, comments) ",
            );
            qb.push_values(chunk, |mut b, m| {
                b.push_bind(m.entry_id)
                    .push_bind(m.group.clone())
                    .push_bind(m.sign_seen_yes)
                    .push_bind(m.sign_seen_no)
                    .push_bind(m.sign_seen_not_sure)
                    .push_bind(m.comments.clone());
            });
            inserted += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(map_db_error)?
                .rows_affected();
        }
        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
