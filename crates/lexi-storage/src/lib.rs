//! Persistence, media storage and HTTP retrieval collaborators for the importer.

pub mod catalog;
pub mod fetch;
pub mod media;
pub mod memory;
pub mod postgres;

pub use catalog::{Catalog, CatalogTransaction, StoreError};
pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, MediaSource, RetryDisposition,
};
pub use media::{MediaStore, StoredFile};
pub use memory::{CatalogOp, CatalogState, MemoryCatalog};
pub use postgres::PgCatalog;

pub const CRATE_NAME: &str = "lexi-storage";
