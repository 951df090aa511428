//! Post-commit media retrieval on a detached task.

use std::sync::Arc;

use anyhow::Context;
use lexi_core::{EntryId, MediaReference, NewStoredMedia, StoredMedia};
use lexi_storage::{Catalog, MediaSource, MediaStore};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchFailure {
    pub entry_id: EntryId,
    pub url: String,
    pub file_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub dispatch_id: Uuid,
    pub attempted: usize,
    pub stored: Vec<StoredMedia>,
    pub failures: Vec<DispatchFailure>,
}

/// Handle on a running dispatch. Dropping it leaves the task running.
#[derive(Debug)]
pub struct DispatchHandle {
    dispatch_id: Uuid,
    task: Option<JoinHandle<DispatchReport>>,
}

impl DispatchHandle {
    pub fn spawned(dispatch_id: Uuid, task: JoinHandle<DispatchReport>) -> Self {
        Self {
            dispatch_id,
            task: Some(task),
        }
    }

    /// Nothing to retrieve.
    pub fn idle() -> Self {
        Self {
            dispatch_id: Uuid::nil(),
            task: None,
        }
    }

    pub fn dispatch_id(&self) -> Uuid {
        self.dispatch_id
    }

    pub async fn wait(self) -> Result<DispatchReport, JoinError> {
        match self.task {
            Some(task) => task.await,
            None => Ok(DispatchReport {
                dispatch_id: self.dispatch_id,
                ..Default::default()
            }),
        }
    }
}

pub trait MediaDispatcher: Send + Sync {
    /// Must not block; retrieval happens after this returns.
    fn dispatch(&self, refs: Vec<MediaReference>) -> DispatchHandle;
}

#[derive(Clone)]
pub struct BackgroundDispatcher {
    source: Arc<dyn MediaSource>,
    store: MediaStore,
    catalog: Arc<dyn Catalog>,
    base_url: Option<String>,
}

impl BackgroundDispatcher {
    pub fn new(source: Arc<dyn MediaSource>, store: MediaStore, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            source,
            store,
            catalog,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }

    async fn retrieve(&self, dispatch_id: Uuid, reference: &MediaReference) -> anyhow::Result<StoredMedia> {
        let url = self.resolve_url(&reference.url);
        let bytes = self
            .source
            .fetch(dispatch_id, &url)
            .await
            .with_context(|| format!("fetching {url}"))?;
        let file = self
            .store
            .store_bytes(reference.entry_id, &reference.file_name, &bytes)
            .await?;
        let stored = self
            .catalog
            .record_media(NewStoredMedia {
                entry_id: reference.entry_id,
                file_path: file.relative_path.to_string_lossy().into_owned(),
                variant: reference.variant,
                ordinal: reference.ordinal,
                content_hash: file.content_hash,
                byte_size: i64::try_from(file.byte_size).unwrap_or(i64::MAX),
            })
            .await
            .context("recording stored media")?;
        Ok(stored)
    }

    async fn run(self, dispatch_id: Uuid, refs: Vec<MediaReference>) -> DispatchReport {
        let mut report = DispatchReport {
            dispatch_id,
            attempted: refs.len(),
            ..Default::default()
        };
        for reference in refs {
            match self.retrieve(dispatch_id, &reference).await {
                Ok(stored) => report.stored.push(stored),
                Err(err) => {
                    warn!(
                        entry_id = reference.entry_id,
                        url = %reference.url,
                        error = %format!("{err:#}"),
                        "media retrieval failed"
                    );
                    report.failures.push(DispatchFailure {
                        entry_id: reference.entry_id,
                        url: reference.url,
                        file_name: reference.file_name,
                        error: format!("{err:#}"),
                    });
                }
            }
        }
        info!(
            stored = report.stored.len(),
            failed = report.failures.len(),
            "media dispatch finished"
        );
        report
    }
}

impl MediaDispatcher for BackgroundDispatcher {
    fn dispatch(&self, refs: Vec<MediaReference>) -> DispatchHandle {
        if refs.is_empty() {
            return DispatchHandle::idle();
        }
        let dispatch_id = Uuid::new_v4();
        let span = info_span!("media_dispatch", %dispatch_id, count = refs.len());
        let task = tokio::spawn(self.clone().run(dispatch_id, refs).instrument(span));
        DispatchHandle::spawned(dispatch_id, task)
    }
}
