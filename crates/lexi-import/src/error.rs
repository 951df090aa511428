use lexi_core::CollectionId;
use lexi_feeds::FeedError;
use lexi_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no staged batch for this session and token")]
    StagedBatchNotFound,
    #[error("collection {0} does not exist")]
    UnknownCollection(CollectionId),
    #[error("fallback category {name:?} is missing from mapping domain {domain:?}")]
    MissingFallback { domain: String, name: String },
    #[error("could not allocate a contributor code for {0:?}")]
    CodeSpaceExhausted(String),
    #[error("row for {word:?} lists more media than an ordinal can hold")]
    TooManyMedia { word: String },
    #[error("materialization aborted: {0}")]
    Transaction(String),
}
