use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lexi_core::{CollectionId, EntryId, MappingId, MediaReference, MediaVariant, SignSeen};
use lexi_feeds::share::SHARE_COLUMNS;
use lexi_import::{
    BackgroundDispatcher, ConfirmSummary, DispatchHandle, ImportConfig, ImportError,
    ImportPipeline, MediaDispatcher, Preview, SessionContext, SkipReason,
};
use lexi_storage::{CatalogOp, CatalogState, FetchError, MediaSource, MediaStore, MemoryCatalog};
use uuid::Uuid;

#[derive(Default)]
struct RecordingDispatcher {
    batches: Mutex<Vec<Vec<MediaReference>>>,
}

impl RecordingDispatcher {
    fn batches(&self) -> Vec<Vec<MediaReference>> {
        self.batches.lock().expect("dispatch log lock").clone()
    }
}

impl MediaDispatcher for RecordingDispatcher {
    fn dispatch(&self, refs: Vec<MediaReference>) -> DispatchHandle {
        self.batches.lock().expect("dispatch log lock").push(refs);
        DispatchHandle::idle()
    }
}

struct EchoSource;

#[async_trait]
impl MediaSource for EchoSource {
    async fn fetch(&self, _dispatch_id: Uuid, url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(url.as_bytes().to_vec())
    }
}

struct Seeded {
    state: CatalogState,
    collection: CollectionId,
    animals: MappingId,
    misc: MappingId,
}

fn seeded() -> Seeded {
    let mut state = CatalogState::default();
    let collection = state.add_collection("NZSL");
    for tag in [
        "nzsl-share",
        "not public",
        "validation:check-results",
        "ready-for-validation",
    ] {
        state.add_tag(tag);
    }
    let animals = state.add_field_mapping("semantic_field", "Animals");
    let misc = state.add_field_mapping("semantic_field", "Miscellaneous");
    Seeded {
        state,
        collection,
        animals,
        misc,
    }
}

fn pipeline(catalog: &MemoryCatalog, dispatcher: Arc<dyn MediaDispatcher>) -> ImportPipeline {
    ImportPipeline::new(ImportConfig::default(), Arc::new(catalog.clone()), dispatcher)
}

fn share_line(id: &str, word: &str, username: &str, topics: &str, comments: &str) -> String {
    format!(
        "{id},{word},,,first sighting,2024-05-01,{username}@example.com,{username},3,1,{topics},/videos/{id}.mp4,,,{comments}"
    )
}

fn share_csv(lines: &[String]) -> Vec<u8> {
    let mut text = SHARE_COLUMNS.join(",");
    for line in lines {
        text.push('\n');
        text.push_str(line);
    }
    text.push('\n');
    text.into_bytes()
}

fn share_summary(summary: ConfirmSummary) -> lexi_import::pipeline::ShareSummary {
    match summary {
        ConfirmSummary::Share(summary) => summary,
        other => panic!("expected a share summary, got {other:?}"),
    }
}

async fn import_one(
    catalog: &MemoryCatalog,
    collection: CollectionId,
    line: String,
) -> (EntryId, Arc<RecordingDispatcher>) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let pipeline = pipeline(catalog, dispatcher.clone());
    let ctx = SessionContext::new("admin");
    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[line]))
        .await
        .expect("preview");
    let outcome = pipeline.confirm(&ctx, preview.token()).await.expect("confirm");
    let summary = share_summary(outcome.summary);
    assert_eq!(summary.created.len(), 1);
    (summary.created[0].id, dispatcher)
}

#[tokio::test]
async fn entries_with_media_are_skipped_and_new_rows_are_materialized() {
    let Seeded {
        mut state,
        collection,
        animals,
        ..
    } = seeded();
    let existing = state.add_entry(collection, "apple:1", Some("100"));
    state.add_media(existing, MediaVariant::Main);
    let catalog = MemoryCatalog::new(state);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let pipeline = pipeline(&catalog, dispatcher.clone());
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(
            ctx.clone(),
            collection,
            &share_csv(&[
                share_line("100", "apple", "aroha", "", ""),
                share_line("200", "kea", "aroha", "Animals", ""),
            ]),
        )
        .await
        .expect("preview");
    let Preview::Share { new, skipped, reimport, .. } = &preview else {
        panic!("expected a share preview");
    };
    assert_eq!(new.len(), 1);
    assert_eq!(new[0].id, "200");
    assert!(reimport.is_empty());
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].row.id, "100");
    assert!(matches!(skipped[0].reason, SkipReason::HasMedia));

    let outcome = pipeline.confirm(&ctx, preview.token()).await.expect("confirm");
    let summary = share_summary(outcome.summary);
    assert_eq!(summary.created.len(), 1);
    assert_eq!(summary.skipped.len(), 1);
    let entry = &summary.created[0];
    assert_eq!(entry.name, format!("kea:{}", entry.id));
    assert_eq!(entry.external_id.as_deref(), Some("200"));

    let state = catalog.snapshot().await;
    assert_eq!(state.entries.len(), 2);
    let translations: Vec<_> = state
        .translations
        .iter()
        .filter(|t| t.entry_id == entry.id)
        .collect();
    assert_eq!(translations.len(), 1);
    assert_eq!((translations[0].language.as_str(), translations[0].text.as_str()), ("English", "kea"));
    let annotations: Vec<_> = state
        .annotations
        .iter()
        .filter(|a| a.entry_id == entry.id)
        .collect();
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].author, "aroha");
    assert_eq!(annotations[0].body, "first sighting");
    assert_eq!(state.aggregations.len(), 1);
    assert_eq!((state.aggregations[0].agrees, state.aggregations[0].disagrees), (3, 1));
    let mappings: Vec<MappingId> = state
        .field_associations
        .iter()
        .map(|a| a.mapping_id)
        .collect();
    assert_eq!(mappings, vec![animals]);
    assert_eq!(state.tags_for(entry.id), vec!["not public", "nzsl-share"]);

    let batches = dispatcher.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    let media = &batches[0][0];
    assert_eq!(media.entry_id, entry.id);
    assert_eq!(media.variant, MediaVariant::Main);
    assert_eq!(media.file_name, format!("{id}-kea.{id}_video.mp4", id = entry.id));
}

#[tokio::test]
async fn unmapped_topics_fall_back_once() {
    let Seeded {
        state,
        collection,
        misc,
        ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let (entry, _) = import_one(
        &catalog,
        collection,
        share_line("200", "kea", "aroha", "Not-a-real-topic|Also-fake", ""),
    )
    .await;

    let state = catalog.snapshot().await;
    let mappings: Vec<MappingId> = state
        .field_associations
        .iter()
        .filter(|a| a.entry_id == entry)
        .map(|a| a.mapping_id)
        .collect();
    assert_eq!(mappings, vec![misc]);
}

#[tokio::test]
async fn sign_comments_without_an_author_are_attributed_to_unknown() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let (entry, _) = import_one(
        &catalog,
        collection,
        share_line("200", "kea", "aroha", "", "Comment without colon|kahu: nice sign"),
    )
    .await;

    let state = catalog.snapshot().await;
    let comments: Vec<(&str, &str)> = state
        .annotations
        .iter()
        .filter(|a| a.entry_id == entry)
        .skip(1)
        .map(|a| (a.author.as_str(), a.body.as_str()))
        .collect();
    assert_eq!(
        comments,
        vec![("Unknown", "Comment without colon"), ("kahu", "nice sign")]
    );
}

#[tokio::test]
async fn reimport_attaches_media_to_the_existing_entry() {
    let Seeded {
        mut state,
        collection,
        ..
    } = seeded();
    let existing = state.add_entry(collection, "kea:1", Some("150"));
    let catalog = MemoryCatalog::new(state);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let pipeline = pipeline(&catalog, dispatcher.clone());
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[share_line("150", "kea", "aroha", "", "")]))
        .await
        .expect("preview");
    let summary = share_summary(pipeline.confirm(&ctx, preview.token()).await.expect("confirm").summary);

    assert!(summary.created.is_empty());
    assert_eq!(summary.reimported, vec![existing]);
    let state = catalog.snapshot().await;
    assert_eq!(state.entries.len(), 1);
    assert!(state.translations.is_empty());
    let batches = dispatcher.batches();
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].entry_id, existing);
}

#[tokio::test]
async fn confirming_twice_fails_without_writing_again() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[share_line("200", "kea", "aroha", "", "")]))
        .await
        .expect("preview");
    pipeline.confirm(&ctx, preview.token()).await.expect("confirm");
    let err = pipeline.confirm(&ctx, preview.token()).await.expect_err("confirm error");

    assert!(matches!(err, ImportError::StagedBatchNotFound));
    assert_eq!(catalog.snapshot().await.entries.len(), 1);
}

#[tokio::test]
async fn failed_confirm_rolls_back_and_keeps_the_batch() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state).failing_on(CatalogOp::InsertTags);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let pipeline = pipeline(&catalog, dispatcher.clone());
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[share_line("200", "kea", "aroha", "", "")]))
        .await
        .expect("preview");
    let err = pipeline.confirm(&ctx, preview.token()).await.expect_err("confirm error");

    assert!(matches!(err, ImportError::Store(_)));
    let state = catalog.snapshot().await;
    assert!(state.entries.is_empty());
    assert!(state.contributors.is_empty());
    assert!(state.translations.is_empty());
    assert!(state.annotations.is_empty());
    assert!(dispatcher.batches().is_empty());
    assert!(pipeline.staging().get(&ctx, preview.token()).await.is_ok());
}

#[tokio::test]
async fn cancel_discards_the_batch() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[share_line("200", "kea", "aroha", "", "")]))
        .await
        .expect("preview");
    pipeline.cancel(&ctx, preview.token()).await.expect("cancel");

    let err = pipeline.confirm(&ctx, preview.token()).await.expect_err("confirm error");
    assert!(matches!(err, ImportError::StagedBatchNotFound));
    assert!(catalog.snapshot().await.entries.is_empty());
    assert_eq!(pipeline.staging().len().await, 0);
}

#[tokio::test]
async fn token_from_another_session_is_rejected() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));

    let preview = pipeline
        .preview_share(
            SessionContext::new("admin"),
            collection,
            &share_csv(&[share_line("200", "kea", "aroha", "", "")]),
        )
        .await
        .expect("preview");
    let err = pipeline
        .confirm(&SessionContext::new("someone-else"), preview.token())
        .await
        .expect_err("confirm error");

    assert!(matches!(err, ImportError::StagedBatchNotFound));
    assert_eq!(pipeline.staging().len().await, 1);
}

#[tokio::test]
async fn new_contributors_get_distinct_codes() {
    let Seeded {
        mut state,
        collection,
        ..
    } = seeded();
    let known = state.add_contributor("aroha", 12_345);
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(
            ctx.clone(),
            collection,
            &share_csv(&[
                share_line("201", "kea", "aroha", "", ""),
                share_line("202", "tui", "kahu", "", ""),
                share_line("203", "weka", "tui", "", ""),
                share_line("204", "ruru", "kahu", "", ""),
            ]),
        )
        .await
        .expect("preview");
    let summary = share_summary(pipeline.confirm(&ctx, preview.token()).await.expect("confirm").summary);

    assert_eq!(summary.new_contributors, 2);
    let state = catalog.snapshot().await;
    assert_eq!(state.contributors.len(), 3);
    let codes: BTreeSet<i32> = state.contributors.iter().map(|c| c.code).collect();
    assert_eq!(codes.len(), 3);
    assert_eq!(summary.created[0].contributor_id, Some(known));
    assert_eq!(summary.created[1].contributor_id, summary.created[3].contributor_id);
    assert_ne!(summary.created[1].contributor_id, summary.created[2].contributor_id);
}

#[tokio::test]
async fn repeated_words_get_unique_names() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(
            ctx.clone(),
            collection,
            &share_csv(&[
                share_line("301", "kea", "aroha", "", ""),
                share_line("302", "kea", "kahu", "", ""),
            ]),
        )
        .await
        .expect("preview");
    let summary = share_summary(pipeline.confirm(&ctx, preview.token()).await.expect("confirm").summary);

    let names: Vec<String> = summary.created.iter().map(|e| e.name.clone()).collect();
    let expected: Vec<String> = summary
        .created
        .iter()
        .map(|e| format!("kea:{}", e.id))
        .collect();
    assert_eq!(names, expected);
    assert_ne!(names[0], names[1]);
}

#[tokio::test]
async fn rows_imported_after_preview_are_not_duplicated() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let pipeline = pipeline(&catalog, dispatcher.clone());
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[share_line("300", "kea", "aroha", "", "")]))
        .await
        .expect("preview");
    catalog
        .seed(|s| {
            let entry = s.add_entry(collection, "kea:99", Some("300"));
            s.add_media(entry, MediaVariant::Main);
        })
        .await;
    let summary = share_summary(pipeline.confirm(&ctx, preview.token()).await.expect("confirm").summary);

    assert!(summary.created.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(catalog.snapshot().await.entries.len(), 1);
    assert!(dispatcher.batches().iter().all(Vec::is_empty));
}

#[tokio::test]
async fn reimports_whose_entry_gained_media_before_confirm_are_skipped() {
    let Seeded {
        mut state,
        collection,
        ..
    } = seeded();
    let existing = state.add_entry(collection, "kea:1", Some("150"));
    let catalog = MemoryCatalog::new(state);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let pipeline = pipeline(&catalog, dispatcher.clone());
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[share_line("150", "kea", "aroha", "", "")]))
        .await
        .expect("preview");
    let Preview::Share { reimport, .. } = &preview else {
        panic!("expected a share preview");
    };
    assert_eq!(reimport.len(), 1);
    catalog
        .seed(|s| {
            s.add_media(existing, MediaVariant::Main);
        })
        .await;
    let summary = share_summary(
        pipeline
            .confirm(&ctx, preview.token())
            .await
            .expect("confirm")
            .summary,
    );

    assert!(summary.reimported.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert!(matches!(summary.skipped[0].reason, SkipReason::HasMedia));
    assert_eq!(summary.skipped[0].entry_ids, vec![existing]);
    assert!(dispatcher.batches().iter().all(Vec::is_empty));
}

#[tokio::test]
async fn an_entry_is_revisited_once_per_batch() {
    let Seeded {
        mut state,
        collection,
        ..
    } = seeded();
    let existing = state.add_entry(collection, "kea:1", Some("150"));
    let catalog = MemoryCatalog::new(state);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let pipeline = pipeline(&catalog, dispatcher.clone());
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(
            ctx.clone(),
            collection,
            &share_csv(&[
                share_line("150", "kea", "aroha", "", ""),
                share_line("150", "kea", "kahu", "", ""),
            ]),
        )
        .await
        .expect("preview");
    let summary = share_summary(
        pipeline
            .confirm(&ctx, preview.token())
            .await
            .expect("confirm")
            .summary,
    );

    assert_eq!(summary.reimported, vec![existing]);
    assert_eq!(summary.skipped.len(), 1);
    assert!(matches!(summary.skipped[0].reason, SkipReason::DuplicateReimport));
    let batches = dispatcher.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].entry_id, existing);
}

#[tokio::test]
async fn invalid_input_stages_nothing() {
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let err = pipeline
        .preview_share(ctx.clone(), collection, b"id,word\n1,kea\n")
        .await
        .expect_err("preview error");
    assert!(matches!(err, ImportError::Feed(_)));

    let err = pipeline
        .preview_share(ctx, 9_999, &share_csv(&[share_line("200", "kea", "aroha", "", "")]))
        .await
        .expect_err("preview error");
    assert!(matches!(err, ImportError::UnknownCollection(9_999)));
    assert_eq!(pipeline.staging().len().await, 0);
}

#[tokio::test]
async fn media_is_stored_after_commit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Seeded {
        state, collection, ..
    } = seeded();
    let catalog = MemoryCatalog::new(state);
    let dispatcher = BackgroundDispatcher::new(
        Arc::new(EchoSource),
        MediaStore::new(dir.path()),
        Arc::new(catalog.clone()),
    )
    .with_base_url(Some("https://share.example".into()));
    let pipeline = pipeline(&catalog, Arc::new(dispatcher));
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_share(ctx.clone(), collection, &share_csv(&[share_line("200", "kea", "aroha", "", "")]))
        .await
        .expect("preview");
    let outcome = pipeline.confirm(&ctx, preview.token()).await.expect("confirm");
    let report = outcome.dispatch.wait().await.expect("dispatch task");
    let summary = share_summary(outcome.summary);

    assert_eq!(report.attempted, 1);
    assert!(report.failures.is_empty());
    assert_eq!(report.dispatch_id, summary.dispatch_id);
    let entry = summary.created[0].id;
    let state = catalog.snapshot().await;
    let media = state.media_for(entry);
    assert_eq!(media.len(), 1);
    let bytes = std::fs::read(dir.path().join(&media[0].file_path)).expect("stored media file");
    assert_eq!(bytes, b"https://share.example/videos/200.mp4");
}

#[tokio::test]
async fn gloss_list_creates_only_absent_headwords() {
    let Seeded {
        mut state,
        collection,
        ..
    } = seeded();
    state.add_entry(collection, "hello", None);
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let preview = pipeline
        .preview_gloss_list(
            ctx.clone(),
            collection,
            b"idgloss,idgloss_mi\nhello,kia ora\nbye,\nbye,\ntree,rakau\n",
        )
        .await
        .expect("preview");
    let Preview::GlossList { new, existing, .. } = &preview else {
        panic!("expected a gloss list preview");
    };
    assert_eq!(new.len(), 2);
    assert_eq!(existing.len(), 1);

    let outcome = pipeline.confirm(&ctx, preview.token()).await.expect("confirm");
    let ConfirmSummary::GlossList(summary) = outcome.summary else {
        panic!("expected a gloss list summary");
    };
    let names: Vec<&str> = summary.created.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["bye", "tree"]);
    assert_eq!(summary.created[1].secondary_name.as_deref(), Some("rakau"));
    assert_eq!(catalog.snapshot().await.entries.len(), 3);
}

#[tokio::test]
async fn survey_responses_are_recorded_against_media_owners() {
    let Seeded {
        mut state,
        collection,
        ..
    } = seeded();
    let entry = state.add_entry(collection, "kea:1", None);
    let media = state.add_media(entry, MediaVariant::Main);
    state.tag_associations.insert((entry, "ready-for-validation".into()));
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let csv = format!(
        "Status,ResponseId,RecipientFirstName,RecipientLastName,1_Q1_1,1_Q2_5_TEXT\n\
         Response Type,Response ID,First,Last,https://share.example/video/signed_url/abc/{media}/,Comment\n\
         status,responseId,first,last,q1,q1c\n\
         IP Address,R_1,Ana,Smith,Yes,seen it\n\
         Survey Preview,R_2,Test,User,No,\n"
    );
    let preview = pipeline.preview_survey(ctx.clone(), csv.as_bytes()).await.expect("preview");
    let Preview::Survey { questions, responses, skipped, .. } = &preview else {
        panic!("expected a survey preview");
    };
    assert_eq!((*questions, *responses, skipped.len()), (1, 1, 1));

    let outcome = pipeline.confirm(&ctx, preview.token()).await.expect("confirm");
    let ConfirmSummary::Survey(summary) = outcome.summary else {
        panic!("expected a survey summary");
    };
    assert_eq!(summary.validation_records, 1);
    assert!(summary.missing.is_empty());

    let state = catalog.snapshot().await;
    let response = &state.validation_responses[0];
    assert_eq!(response.entry_id, entry);
    assert_eq!(response.sign_seen, SignSeen::Yes);
    assert_eq!(response.comment, "seen it");
    assert_eq!(state.tags_for(entry), vec!["validation:check-results"]);
}

#[tokio::test]
async fn manual_review_tallies_are_stored_per_group() {
    let Seeded {
        mut state,
        collection,
        ..
    } = seeded();
    let entry = state.add_entry(collection, "kea:1", None);
    let catalog = MemoryCatalog::new(state);
    let pipeline = pipeline(&catalog, Arc::new(RecordingDispatcher::default()));
    let ctx = SessionContext::new("admin");

    let csv = format!(
        "group,idgloss,yes,no,abstain or not sure,comments\n\
         Deaf club,kea:{entry},5,1,,looks right\n\
         Whanau,kea:{entry},2,0,1,\n\
         Whanau,gone:9999,1,1,1,\n"
    );
    let preview = pipeline
        .preview_manual_review(ctx.clone(), csv.as_bytes())
        .await
        .expect("preview");
    let Preview::ManualReview { rows, group_counts, .. } = &preview else {
        panic!("expected a manual review preview");
    };
    assert_eq!(*rows, 3);
    assert_eq!(group_counts.get("Whanau"), Some(&2));

    let outcome = pipeline.confirm(&ctx, preview.token()).await.expect("confirm");
    let ConfirmSummary::ManualReview(summary) = outcome.summary else {
        panic!("expected a manual review summary");
    };
    assert_eq!(summary.aggregations, 2);
    assert_eq!(summary.missing, vec![("Whanau".to_string(), "gone:9999".to_string())]);

    let state = catalog.snapshot().await;
    let deaf_club = state
        .manual_aggregations
        .iter()
        .find(|a| a.group == "Deaf club")
        .expect("deaf club tally");
    assert_eq!(
        (deaf_club.sign_seen_yes, deaf_club.sign_seen_no, deaf_club.sign_seen_not_sure),
        (5, 1, 0)
    );
}
