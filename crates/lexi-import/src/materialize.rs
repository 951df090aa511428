//! Two-pass bulk materialization of share rows.
//!
//! Entry names must embed the entry's own id, which does not exist until the insert returns.
//! Pass one inserts every new entry under a placeholder name that is unique within the batch
//! (`"{word}_row{ordinal}"`); pass two renames them to `"{word}:{id}"` in a single bulk update
//! and builds all dependent rows against the final ids. Both passes run inside the caller's
//! transaction.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use lexi_core::{
    AggregationCount, Annotation, CollectionId, Entry, EntryFinalize, EntryId, FieldAssociation,
    MediaReference, MediaVariant, NewEntry, TagAssociation, Translation,
};
use lexi_feeds::{split_pipe, ShareRow};
use lexi_storage::CatalogTransaction;
use serde::Serialize;
use tracing::debug;

use crate::config::ImportConfig;
use crate::contributors::{register_contributors, CodeAllocator, ContributorRegistry};
use crate::dedup::ReimportRow;
use crate::error::ImportError;
use crate::mapping::FieldMappingResolver;

const UNKNOWN_AUTHOR: &str = "Unknown";
const DEFAULT_EXTENSION: &str = "bin";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependentCounts {
    pub translations: u64,
    pub annotations: u64,
    pub aggregations: u64,
    pub field_associations: u64,
    pub tags: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ShareOutcome {
    /// Newly created entries with their final names, in file order.
    pub created: Vec<Entry>,
    pub reimported: Vec<EntryId>,
    pub new_contributors: usize,
    pub counts: DependentCounts,
    pub media: Vec<MediaReference>,
}

pub fn placeholder_name(word: &str, ordinal: usize) -> String {
    format!("{word}_row{ordinal}")
}

/// Splits on the last `_row` so words that contain `_row` themselves still round-trip.
pub fn parse_placeholder(name: &str) -> Option<(&str, usize)> {
    let (word, ordinal) = name.rsplit_once("_row")?;
    Some((word, ordinal.parse().ok()?))
}

pub fn final_name(word: &str, entry_id: EntryId) -> String {
    format!("{word}:{entry_id}")
}

/// Text after the last `.` of the URL's final path segment.
pub fn media_extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => DEFAULT_EXTENSION,
    }
}

/// Position of the `idx`-th illustration or usage example as stored in the `ordinal` column.
pub fn media_ordinal(word: &str, idx: usize) -> Result<i32, ImportError> {
    i32::try_from(idx).map_err(|_| ImportError::TooManyMedia {
        word: word.to_string(),
    })
}

/// Media descriptors for a row attached to `entry_id`, with deterministic file names.
pub fn media_references(entry_id: EntryId, row: &ShareRow) -> Result<Vec<MediaReference>, ImportError> {
    let word = &row.word;
    let mut refs = Vec::new();

    if let Some(url) = row.main_video() {
        refs.push(MediaReference {
            url: url.to_string(),
            file_name: format!("{entry_id}-{word}.{entry_id}_video.{}", media_extension(url)),
            entry_id,
            variant: MediaVariant::Main,
            ordinal: 0,
        });
    }

    for (idx, url) in row.illustration_urls().into_iter().enumerate() {
        let ordinal = media_ordinal(word, idx)?;
        refs.push(MediaReference {
            url: url.to_string(),
            file_name: format!(
                "{entry_id}-{word}.{entry_id}_illustration_{}.{}",
                idx + 1,
                media_extension(url)
            ),
            entry_id,
            variant: MediaVariant::Illustration,
            ordinal,
        });
    }

    for (idx, url) in row.usage_example_urls().into_iter().enumerate() {
        let ordinal = media_ordinal(word, idx)?;
        let n = ordinal.unsigned_abs() + 1;
        refs.push(MediaReference {
            url: url.to_string(),
            file_name: format!(
                "{entry_id}-{word}.{entry_id}_usageexample_{n}.{}",
                media_extension(url)
            ),
            entry_id,
            variant: MediaVariant::UsageExample(n),
            ordinal,
        });
    }

    Ok(refs)
}

pub fn translations_for(entry_id: EntryId, row: &ShareRow, config: &ImportConfig) -> Vec<Translation> {
    let mut out = vec![Translation {
        entry_id,
        language: config.primary_language.clone(),
        text: row.word.clone(),
        secondary_text: row.secondary().map(str::to_string),
    }];
    let mut secondary_words = row.maori.split(", ").filter(|w| !w.trim().is_empty());
    if let Some(first) = secondary_words.next() {
        let rest: Vec<&str> = secondary_words.collect();
        out.push(Translation {
            entry_id,
            language: config.secondary_language.clone(),
            text: first.trim().to_string(),
            secondary_text: (!rest.is_empty()).then(|| rest.join(", ")),
        });
    }
    out
}

/// The row's notes always become one annotation; each `sign_comments` fragment adds another.
pub fn annotations_for(entry_id: EntryId, row: &ShareRow, submitted_at: DateTime<Utc>) -> Vec<Annotation> {
    let mut out = vec![Annotation {
        entry_id,
        author: row.contributor_username.clone(),
        body: row.notes.clone(),
        is_public: false,
        submitted_at,
    }];
    for fragment in split_pipe(&row.sign_comments) {
        let (author, body) = match fragment.split_once(':') {
            Some((author, body)) => (author.trim(), body.trim()),
            None => (UNKNOWN_AUTHOR, fragment),
        };
        out.push(Annotation {
            entry_id,
            author: author.to_string(),
            body: body.to_string(),
            is_public: false,
            submitted_at,
        });
    }
    out
}

fn secondary_name(row: &ShareRow, entry_id: EntryId) -> Option<String> {
    row.maori
        .split(", ")
        .map(str::trim)
        .find(|w| !w.is_empty())
        .map(|first| final_name(first, entry_id))
}

#[derive(Default)]
struct Dependents {
    finalize: Vec<EntryFinalize>,
    translations: Vec<Translation>,
    annotations: Vec<Annotation>,
    aggregations: Vec<AggregationCount>,
    field_associations: Vec<FieldAssociation>,
    tags: Vec<TagAssociation>,
}

/// Writes `new_rows` as entries plus dependents and collects media for both row sets.
/// Any error leaves the transaction for the caller to roll back.
pub async fn materialize_share(
    tx: &mut dyn CatalogTransaction,
    config: &ImportConfig,
    collection_id: CollectionId,
    new_rows: Vec<ShareRow>,
    reimport: Vec<ReimportRow<ShareRow>>,
    submitted_at: DateTime<Utc>,
) -> Result<ShareOutcome, ImportError> {
    let mut outcome = ShareOutcome::default();

    if !new_rows.is_empty() {
        let names: BTreeSet<String> = new_rows
            .iter()
            .map(|row| row.contributor_username.clone())
            .filter(|name| !name.is_empty())
            .collect();
        let (registry, new_contributors) =
            register_contributors(tx, &names, CodeAllocator::default()).await?;
        outcome.new_contributors = new_contributors;

        let placeholders = new_rows
            .iter()
            .map(|row| NewEntry {
                collection_id,
                name: placeholder_name(&row.word, row.ordinal),
                secondary_name: Some(row.maori.clone()).filter(|m| !m.is_empty()),
                external_id: row.external_id().map(str::to_string),
                created_by: config.import_user.clone(),
                exclude_from_export: true,
            })
            .collect();
        let inserted = tx.insert_entries(placeholders).await?;
        if inserted.len() != new_rows.len() {
            return Err(ImportError::Transaction(format!(
                "inserted {} of {} entries",
                inserted.len(),
                new_rows.len()
            )));
        }
        debug!(count = inserted.len(), "inserted placeholder entries");

        let resolver = FieldMappingResolver::new(
            &config.mapping_domain,
            &config.fallback_category,
            tx.field_mappings(&config.mapping_domain).await?,
        );
        let by_ordinal: HashMap<usize, &ShareRow> =
            new_rows.iter().map(|row| (row.ordinal, row)).collect();

        let mut deps = Dependents::default();
        let mut created = Vec::with_capacity(inserted.len());
        for mut entry in inserted {
            let row = parse_placeholder(&entry.name)
                .and_then(|(_, ordinal)| by_ordinal.get(&ordinal).copied())
                .ok_or_else(|| {
                    ImportError::Transaction(format!(
                        "cannot correlate inserted entry {:?} with a feed row",
                        entry.name
                    ))
                })?;
            build_dependents(&mut deps, &mut entry, row, &registry, &resolver, config, submitted_at)?;
            outcome.media.extend(media_references(entry.id, row)?);
            created.push((row.ordinal, entry));
        }

        tx.finalize_entries(deps.finalize).await?;
        outcome.counts = DependentCounts {
            translations: tx.insert_translations(deps.translations).await?,
            annotations: tx.insert_annotations(deps.annotations).await?,
            aggregations: tx.insert_aggregations(deps.aggregations).await?,
            field_associations: tx.insert_field_associations(deps.field_associations).await?,
            tags: tx.insert_tags(deps.tags).await?,
        };

        created.sort_by_key(|(ordinal, _)| *ordinal);
        outcome.created = created.into_iter().map(|(_, entry)| entry).collect();
    }

    for ReimportRow { row, entry_id } in &reimport {
        outcome.media.extend(media_references(*entry_id, row)?);
        outcome.reimported.push(*entry_id);
    }

    Ok(outcome)
}

fn build_dependents(
    deps: &mut Dependents,
    entry: &mut Entry,
    row: &ShareRow,
    registry: &ContributorRegistry,
    resolver: &FieldMappingResolver,
    config: &ImportConfig,
    submitted_at: DateTime<Utc>,
) -> Result<(), ImportError> {
    let id = entry.id;
    entry.name = final_name(&row.word, id);
    entry.secondary_name = secondary_name(row, id);
    entry.contributor_id = registry.get(&row.contributor_username).map(|c| c.id);

    deps.finalize.push(EntryFinalize {
        entry_id: id,
        name: entry.name.clone(),
        secondary_name: entry.secondary_name.clone(),
        contributor_id: entry.contributor_id,
    });
    deps.translations.extend(translations_for(id, row, config));
    deps.annotations.extend(annotations_for(id, row, submitted_at));
    deps.aggregations.push(AggregationCount {
        entry_id: id,
        agrees: row.agrees,
        disagrees: row.disagrees,
    });
    deps.field_associations.extend(resolver.resolve(id, &row.topic_names)?);
    for tag in [&config.provenance_tag, &config.visibility_tag] {
        deps.tags.push(TagAssociation {
            entry_id: id,
            tag: tag.clone(),
        });
    }
    Ok(())
}
