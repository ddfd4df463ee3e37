use std::sync::Arc;

use tracing::debug;

use crate::{
    aggregation::{self, QueryOutput},
    error::{BucketError, Result},
    observability,
    query::{Query, RequestParams},
    query_validation::ValidationContext,
    record::Record,
    response::QueryResponse,
    storage::{self, DEFAULT_WRITE_ATTEMPTS, DocumentStore},
    validation,
};

/// A named collection of records backed by a [`DocumentStore`].
#[derive(Clone)]
pub struct Bucket {
    store: Arc<dyn DocumentStore>,
    name: String,
    allow_raw_queries: bool,
    write_attempts: usize,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("allow_raw_queries", &self.allow_raw_queries)
            .field("write_attempts", &self.write_attempts)
            .finish()
    }
}

impl Bucket {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        name: impl Into<String>,
        allow_raw_queries: bool,
    ) -> Result<Self> {
        let name = name.into();
        if !validation::bucket_name_is_valid(&name) {
            return Err(BucketError::InvalidBucket(format!(
                "Bucket name \"{name}\" is not valid"
            )));
        }
        Ok(Self {
            store,
            name,
            allow_raw_queries,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
        })
    }

    pub fn with_write_attempts(mut self, attempts: usize) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allows_raw_queries(&self) -> bool {
        self.allow_raw_queries
    }

    pub fn validation_context(&self) -> ValidationContext {
        ValidationContext::new(self.allow_raw_queries)
    }

    /// Validates and parses request parameters under this bucket's policy.
    pub fn parse_query(&self, params: &RequestParams) -> Result<Query> {
        Query::parse(params, &self.validation_context())
    }

    /// Stamps each record with the write time and saves it. Stops at the
    /// first record whose write fails; earlier records stay stored.
    pub fn store<I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut stored = 0;
        for record in records {
            let document = record.add_updated_at().to_storage_representation();
            let outcome =
                storage::save_with_retry(self.store.as_ref(), &self.name, document, self.write_attempts);
            if let Err(err) = outcome {
                observability::record_stored(&self.name, stored);
                return Err(err.into());
            }
            stored += 1;
        }
        observability::record_stored(&self.name, stored);
        debug!(bucket = %self.name, records = stored, "stored records");
        Ok(stored)
    }

    pub fn query(&self, query: &Query) -> Result<QueryOutput> {
        if query.is_raw_query() && !self.allow_raw_queries {
            return Err(BucketError::Validation(
                "querying for raw data is not allowed".into(),
            ));
        }
        let kind = query.kind();
        debug!(bucket = %self.name, kind = kind.as_str(), "querying bucket");
        observability::record_query(&self.name, kind.as_str());
        aggregation::execute(self.store.as_ref(), &self.name, query)
    }

    /// Runs `query` and shapes the result for its classification.
    pub fn query_response(&self, query: &Query) -> Result<QueryResponse> {
        let output = self.query(query)?;
        Ok(QueryResponse::build(query, output))
    }
}
