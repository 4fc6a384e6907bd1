//! Batch Orchestrator
//!
//! Accepts a JSON array of metrics URIs and answers with one envelope per URI,
//! in input order:
//!
//! ```text
//! POST ["collect/bytes/apps/myapp?count=5", "process/busyness/myapp/flows/f1?count=5"]
//!
//! [
//!   { "path": "collect/bytes/apps/myapp?count=5", "result": { "start": ..., "data": [...] }, "error": null },
//!   { "path": "process/busyness/myapp/flows/f1?count=5", "result": { ... }, "error": null }
//! ]
//! ```
//!
//! Envelope failures (wrong content type, undecodable body, too many URIs)
//! fail the whole call. What a failing item does depends on the
//! [`BatchFailurePolicy`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics;
use crate::query::{MetricsQueryEngine, QueryOutput, RequestParser};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The only accepted envelope media type
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Default number of items executed concurrently within one batch
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default limit on URIs per envelope
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// What a failing item does to the rest of its batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// The item carries its error; every other item is still answered
    #[default]
    Isolate,
    /// The first failing item, in input order, fails the whole call
    #[serde(rename = "abort")]
    AbortBatch,
}

/// Answer envelope for one batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemResult {
    /// The URI exactly as submitted
    pub path: String,
    /// Query answer, `null` on failure
    pub result: Option<QueryOutput>,
    /// Failure message, `null` on success
    pub error: Option<String>,
}

impl BatchItemResult {
    /// Envelope for a successful item
    pub fn success(path: String, result: QueryOutput) -> Self {
        Self {
            path,
            result: Some(result),
            error: None,
        }
    }

    /// Envelope for a failed item
    pub fn failure(path: String, error: &Error) -> Self {
        Self {
            path,
            result: None,
            error: Some(error.to_string()),
        }
    }

    /// Whether the item failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs batches of metrics URIs through the parser and the engine
pub struct BatchMetricsHandler {
    parser: RequestParser,
    engine: Arc<MetricsQueryEngine>,
    policy: BatchFailurePolicy,
    parallelism: usize,
    max_items: usize,
}

impl BatchMetricsHandler {
    /// Create a handler with the default parser and batch settings
    pub fn new(engine: Arc<MetricsQueryEngine>) -> Self {
        Self {
            parser: RequestParser::default(),
            engine,
            policy: BatchFailurePolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }

    /// Create a handler from the `[query]` and `[batch]` sections
    pub fn from_config(engine: Arc<MetricsQueryEngine>, config: &Config) -> Self {
        Self::new(engine)
            .with_parser(
                RequestParser::new(config.query.second_delay)
                    .with_max_count(config.query.max_count),
            )
            .with_policy(config.batch.failure_policy)
            .with_parallelism(config.batch.parallelism)
            .with_max_items(config.batch.max_items)
    }

    /// Use a specific parser
    pub fn with_parser(mut self, parser: RequestParser) -> Self {
        self.parser = parser;
        self
    }

    /// Set the failure policy
    pub fn with_policy(mut self, policy: BatchFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set how many items run concurrently (at least one)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the limit on URIs per envelope
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// The failure policy in effect
    pub fn policy(&self) -> BatchFailurePolicy {
        self.policy
    }

    /// The parser used for every item
    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    /// The shared query engine
    pub fn engine(&self) -> &Arc<MetricsQueryEngine> {
        &self.engine
    }

    /// Decode a request body into its list of URIs
    ///
    /// The content type must be `application/json`, parameters allowed, and
    /// the body a JSON array of strings no longer than the item limit.
    pub fn decode_envelope(&self, content_type: Option<&str>, body: &[u8]) -> Result<Vec<String>> {
        let content_type = content_type.unwrap_or_default();
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if !media_type.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
            let shown = if content_type.is_empty() { "<none>" } else { content_type };
            return Err(Error::UnsupportedEncoding(shown.to_string()));
        }

        let uris: Vec<String> = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

        if uris.len() > self.max_items {
            return Err(Error::MalformedEnvelope(format!(
                "{} items exceed the limit of {}",
                uris.len(),
                self.max_items
            )));
        }
        Ok(uris)
    }

    /// Decode an envelope and answer every URI in it
    pub async fn handle_request(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Vec<BatchItemResult>> {
        let uris = self.decode_envelope(content_type, body)?;
        self.handle(uris).await
    }

    /// Answer every URI, in input order
    pub async fn handle(&self, uris: Vec<String>) -> Result<Vec<BatchItemResult>> {
        let total = uris.len();
        metrics::BATCH_ITEMS.observe(total as f64);
        debug!(items = total, policy = ?self.policy, "Handling metrics batch");

        // `buffered` yields in input order whatever order items finish in.
        let outcomes = stream::iter(uris)
            .map(|uri| async move {
                let outcome = self.query(&uri).await;
                if let Err(e) = &outcome {
                    warn!(uri = %uri, error = %e, "Batch item failed");
                }
                (uri, outcome)
            })
            .buffered(self.parallelism);

        let results: Vec<BatchItemResult> = match self.policy {
            BatchFailurePolicy::Isolate => {
                outcomes
                    .map(|(uri, outcome)| match outcome {
                        Ok(output) => BatchItemResult::success(uri, output),
                        Err(e) => BatchItemResult::failure(uri, &e),
                    })
                    .collect()
                    .await
            },
            BatchFailurePolicy::AbortBatch => {
                outcomes
                    .map(|(uri, outcome)| outcome.map(|output| BatchItemResult::success(uri, output)))
                    .try_collect()
                    .await?
            },
        };

        let failures = results.iter().filter(|r| r.is_error()).count();
        info!(items = total, failures, "Handled metrics batch");
        Ok(results)
    }

    /// Parse and execute a single URI
    pub async fn query(&self, uri: &str) -> Result<QueryOutput> {
        let query = self.parser.parse(uri)?;
        self.engine.execute(&query).await
    }
}
