//! Staged import pipeline: classify feed rows, hold them between preview and confirm, then
//! materialize them in one transaction and hand media retrieval off to a background dispatcher.

pub mod config;
pub mod contributors;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod gloss_list;
pub mod mapping;
pub mod materialize;
pub mod pipeline;
pub mod staging;
pub mod validation;

pub use config::ImportConfig;
pub use contributors::{register_contributors, CodeAllocator, ContributorRegistry};
pub use dedup::{classify, Classified, ExternalIdIndex, ExternallyKeyed, ReimportRow, RowClass, SkipReason, SkippedRow};
pub use dispatch::{BackgroundDispatcher, DispatchFailure, DispatchHandle, DispatchReport, MediaDispatcher};
pub use error::ImportError;
pub use mapping::FieldMappingResolver;
pub use materialize::{materialize_share, media_references, ShareOutcome};
pub use pipeline::{ConfirmOutcome, ConfirmSummary, ImportPipeline, Preview};
pub use staging::{SessionContext, StageToken, StagedBatch, StagedPayload, StagingStore};

pub const CRATE_NAME: &str = "lexi-import";
