pub mod aggregation;
pub mod bucket;
pub mod config;
pub mod document;
pub mod error;
pub mod ingest;
pub mod observability;
pub mod query;
pub mod query_validation;
pub mod record;
pub mod response;
pub mod server;
pub mod storage;
pub mod timeutils;
pub mod validation;

pub use aggregation::{GroupNode, QueryOutput, nested_merge};
pub use bucket::Bucket;
pub use config::Config;
pub use document::{Document, FieldValue};
pub use error::{BucketError, Result, StoreError};
pub use query::{Period, Query, QueryKind, RequestParams, SortBy, SortDirection};
pub use query_validation::{ValidationContext, ValidationResult, validate_query_args};
pub use record::Record;
pub use storage::{DocumentStore, MemoryStore, SqliteStore};
