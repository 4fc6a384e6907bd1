//! Path Grammar Parser
//!
//! Maps a REST-style metrics URI onto a [`QueryDescriptor`].
//!
//! # Grammar
//!
//! The first path segment picks the context type, the second is the metric
//! name, and the rest depends on the context type:
//!
//! ```text
//! collect/<metric>/apps/<app>
//! collect/<metric>/streams/<stream>[/<app>/<programType>/<program>]
//! process/<metric>/<app>[/<programType>/<program>[/<sub>...]]
//! query/<metric>/<app>[/<programType>/<program>[/<sub>...]]
//! store/<metric>/apps/<app>[/<programType>/<program>[/<flowlet>|/<mappers|reducers>][/datasets/<ds>]]
//! store/<metric>/datasets/<ds>[/<app>/<programType>/<program>]
//! ```
//!
//! Program types become short codes inside the dotted context, so
//! `myapp/flows/flow1` becomes `myapp.f.flow1`. Any path may end right after
//! the metric name, leaving the context unset. Store paths may also leave the
//! metric name out entirely (`store/apps/<app>/...`), which reads every metric.
//!
//! The query string then picks the query kind:
//!
//! - `count=N` makes a time-series query of `N` buckets, with optional
//!   `start`/`end` seconds. A missing `end` defaults to now minus the ingestion
//!   delay, a missing `start` to `end - N`. `N` is capped by the parser's
//!   maximum bucket count; timestamps are not range-checked and wrap on
//!   64-bit overflow.
//! - Otherwise the first true flag among `time_series`, `aggregate` wins.
//!
//! `run_id` filters by execution instance in either kind.
//!
//! Path segments are split on `/` and percent-decoded one by one, with no
//! dot-segment resolution. A `.` or `..` segment is rejected instead of being
//! resolved against its parent.
//!
//! # Example
//!
//! ```rust
//! use kuba_metrics_query::query::parser::RequestParser;
//! use kuba_metrics_query::query::QueryKind;
//!
//! let parser = RequestParser::new(2);
//! let query = parser
//!     .parse_at("process/reads/myapp/flows/flow1/flowlet1/tuples.read?aggregate=true", 0)
//!     .unwrap();
//! assert_eq!(query.kind, QueryKind::Aggregate);
//! assert_eq!(query.context_prefix.as_deref(), Some("myapp.f.flow1.flowlet1"));
//! assert_eq!(query.metric_prefix(), "reads.tuples.read");
//! ```

use super::request::{QueryDescriptor, QueryDescriptorBuilder, QueryKind};
use crate::config::{QUERY_MAX_COUNT, QUERY_SECOND_DELAY};
use crate::error::{Error, Result};
use chrono::Utc;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use url::form_urlencoded;

const COUNT: &str = "count";
const START_TIME: &str = "start";
const END_TIME: &str = "end";
const RUN_ID: &str = "run_id";

/// Grammar-level failure, turned into [`Error::MalformedQuery`] at the top
type GrammarResult<T> = std::result::Result<T, String>;

// =============================================================================
// Token Tables
// =============================================================================

/// First path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextType {
    /// Ingestion: applications and streams
    Collect,
    /// Processing: programs and their components
    Process,
    /// Storage: applications and datasets
    Store,
    /// Query serving: programs and their components
    Query,
}

/// Kind of program inside an application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    /// Streaming flow
    Flows,
    /// Batch (map/reduce) job
    Batch,
    /// Query procedure
    Procedures,
}

/// Phase of a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSubtype {
    /// Map phase
    Mappers,
    /// Reduce phase
    Reducers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectType {
    Apps,
    Streams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreType {
    Apps,
    Datasets,
}

const CONTEXT_TYPE_TOKENS: &[(&str, ContextType)] = &[
    ("collect", ContextType::Collect),
    ("process", ContextType::Process),
    ("store", ContextType::Store),
    ("query", ContextType::Query),
];

const PROGRAM_TYPE_TOKENS: &[(&str, ProgramType)] = &[
    ("flows", ProgramType::Flows),
    ("batch", ProgramType::Batch),
    ("mapreduce", ProgramType::Batch),
    ("procedures", ProgramType::Procedures),
];

const PROGRAM_TYPE_CODES: &[(ProgramType, &str)] = &[
    (ProgramType::Flows, "f"),
    (ProgramType::Batch, "b"),
    (ProgramType::Procedures, "p"),
];

const BATCH_SUBTYPE_TOKENS: &[(&str, BatchSubtype)] = &[
    ("mappers", BatchSubtype::Mappers),
    ("reducers", BatchSubtype::Reducers),
];

const BATCH_SUBTYPE_CODES: &[(BatchSubtype, &str)] =
    &[(BatchSubtype::Mappers, "m"), (BatchSubtype::Reducers, "r")];

const COLLECT_TYPE_TOKENS: &[(&str, CollectType)] =
    &[("apps", CollectType::Apps), ("streams", CollectType::Streams)];

const STORE_TYPE_TOKENS: &[(&str, StoreType)] =
    &[("apps", StoreType::Apps), ("datasets", StoreType::Datasets)];

fn lookup_token<T: Copy>(table: &[(&str, T)], token: &str) -> Option<T> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(token))
        .map(|&(_, value)| value)
}

fn lookup_code<T: Copy + PartialEq>(table: &[(T, &'static str)], value: T) -> &'static str {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map(|&(_, code)| code)
        .unwrap_or_default()
}

fn expect_token<T: Copy>(table: &[(&str, T)], token: &str, what: &str) -> GrammarResult<T> {
    lookup_token(table, token).ok_or_else(|| format!("unknown {} '{}'", what, token))
}

impl ContextType {
    /// Parse a context type token
    pub fn from_token(token: &str) -> Option<Self> {
        lookup_token(CONTEXT_TYPE_TOKENS, token)
    }
}

impl ProgramType {
    /// Parse a program type token
    pub fn from_token(token: &str) -> Option<Self> {
        lookup_token(PROGRAM_TYPE_TOKENS, token)
    }

    /// Short code used inside dotted contexts
    pub fn code(self) -> &'static str {
        lookup_code(PROGRAM_TYPE_CODES, self)
    }
}

impl BatchSubtype {
    /// Parse a batch subtype token
    pub fn from_token(token: &str) -> Option<Self> {
        lookup_token(BATCH_SUBTYPE_TOKENS, token)
    }

    /// Short code used inside dotted contexts
    pub fn code(self) -> &'static str {
        lookup_code(BATCH_SUBTYPE_CODES, self)
    }
}

// =============================================================================
// Path Segments
// =============================================================================

/// Remaining, non-empty, percent-decoded path segments
struct PathParts {
    parts: Vec<String>,
    pos: usize,
}

impl PathParts {
    fn from_path(path: &str) -> GrammarResult<Self> {
        let mut parts = Vec::new();
        for raw in path.split('/') {
            if raw.is_empty() {
                continue;
            }
            let decoded = percent_decode_str(raw)
                .decode_utf8()
                .map_err(|_| format!("path segment '{}' is not valid UTF-8", raw))?;
            if decoded == "." || decoded == ".." {
                return Err(format!("invalid path segment '{}'", raw));
            }
            parts.push(decoded.into_owned());
        }
        Ok(Self { parts, pos: 0 })
    }

    fn has_next(&self) -> bool {
        self.pos < self.parts.len()
    }

    /// Segment `ahead` positions past the next one, without consuming
    fn peek_at(&self, ahead: usize) -> Option<&str> {
        self.parts.get(self.pos + ahead).map(String::as_str)
    }

    fn peek(&self) -> Option<&str> {
        self.peek_at(0)
    }

    fn next(&mut self) -> Option<String> {
        let part = self.parts.get(self.pos).cloned();
        if part.is_some() {
            self.pos += 1;
        }
        part
    }

    fn required(&mut self, what: &str) -> GrammarResult<String> {
        self.next().ok_or_else(|| format!("missing {}", what))
    }

    fn required_token<T: Copy>(&mut self, table: &[(&str, T)], what: &str) -> GrammarResult<T> {
        let token = self.required(what)?;
        expect_token(table, &token, what)
    }

    fn finish(&mut self) -> GrammarResult<()> {
        match self.next() {
            Some(extra) => Err(format!("unexpected path segment '{}'", extra)),
            None => Ok(()),
        }
    }
}

fn program_context(app_id: &str, program_type: ProgramType, program_id: &str) -> String {
    format!("{}.{}.{}", app_id, program_type.code(), program_id)
}

// =============================================================================
// Parser
// =============================================================================

/// Stateless parser from metrics URIs to [`QueryDescriptor`]s
#[derive(Debug, Clone, Copy)]
pub struct RequestParser {
    second_delay: i64,
    max_count: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(QUERY_SECOND_DELAY)
    }
}

impl RequestParser {
    /// Create a parser with the given ingestion delay, in seconds
    pub fn new(second_delay: i64) -> Self {
        Self {
            second_delay,
            max_count: QUERY_MAX_COUNT,
        }
    }

    /// Set the largest `count` a time-series query may ask for
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    /// Ingestion delay subtracted from "now" for a default end time
    pub fn second_delay(&self) -> i64 {
        self.second_delay
    }

    /// Largest accepted `count`
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Parse a URI against the current wall clock
    pub fn parse(&self, uri: &str) -> Result<QueryDescriptor> {
        self.parse_at(uri, Utc::now().timestamp())
    }

    /// Parse a URI as if the wall clock read `now_secs`
    pub fn parse_at(&self, uri: &str, now_secs: i64) -> Result<QueryDescriptor> {
        self.parse_inner(uri, now_secs)
            .map_err(|reason| Error::malformed_query(uri, reason))
    }

    fn parse_inner(&self, uri: &str, now_secs: i64) -> GrammarResult<QueryDescriptor> {
        let (path, query) = split_uri(uri);
        let mut parts = PathParts::from_path(path)?;

        let context_type = parts.required_token(CONTEXT_TYPE_TOKENS, "context type")?;
        let metric = if context_type == ContextType::Store && is_metricless_store(&parts) {
            String::new()
        } else {
            parts.required("metric name")?
        };

        let mut builder = QueryDescriptorBuilder::new(uri);
        builder.metric(metric.clone());

        if parts.has_next() {
            match context_type {
                ContextType::Collect => parse_collect(&mut parts, &mut builder)?,
                ContextType::Process | ContextType::Query => {
                    parse_program(metric, &mut parts, &mut builder)?
                },
                ContextType::Store => parse_store(&mut parts, &mut builder)?,
            }
        }

        self.parse_query_string(query, now_secs, &mut builder)?;
        builder
            .build()
            .ok_or_else(|| "unknown query type".to_string())
    }

    fn parse_query_string(
        &self,
        query: &str,
        now_secs: i64,
        builder: &mut QueryDescriptorBuilder,
    ) -> GrammarResult<()> {
        // First value wins for repeated keys.
        let mut params: HashMap<String, String> = HashMap::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }

        if let Some(run_id) = params.get(RUN_ID).filter(|r| !r.is_empty()) {
            builder.run_id(run_id.clone());
        }

        if let Some(count) = params.get(COUNT) {
            let count: usize = count
                .trim()
                .parse()
                .map_err(|_| format!("invalid count '{}'", count))?;
            if count > self.max_count {
                return Err(format!(
                    "count {} exceeds the maximum of {}",
                    count, self.max_count
                ));
            }
            // Timestamps are not range-checked; defaults wrap like the stored values do.
            let end_time = match params.get(END_TIME) {
                Some(end) => parse_seconds(END_TIME, end)?,
                None => now_secs.wrapping_sub(self.second_delay),
            };
            let start_time = match params.get(START_TIME) {
                Some(start) => parse_seconds(START_TIME, start)?,
                None => end_time.wrapping_sub(count as i64),
            };
            builder.time_series(start_time, end_time, count);
            return Ok(());
        }

        let kind = QueryKind::ALL.into_iter().find(|kind| {
            params
                .get(kind.flag())
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        });
        match kind {
            Some(kind) => {
                builder.kind(kind);
                Ok(())
            },
            None => Err("unknown query type".to_string()),
        }
    }
}

/// Parse a URI with the default ingestion delay and the current wall clock
pub fn parse(uri: &str) -> Result<QueryDescriptor> {
    RequestParser::default().parse(uri)
}

/// `store/apps/<app>...` and `store/datasets/<ds>...` may omit the metric name,
/// reading every metric. `store/apps/apps/<app>` still names metric `apps`.
fn is_metricless_store(parts: &PathParts) -> bool {
    let is_store_token = |part: Option<&str>| part.and_then(|p| lookup_token(STORE_TYPE_TOKENS, p));
    is_store_token(parts.peek()).is_some()
        && parts.peek_at(1).is_some()
        && is_store_token(parts.peek_at(1)).is_none()
}

/// Split a URI into its raw path and query string, dropping any fragment
fn split_uri(uri: &str) -> (&str, &str) {
    let uri = uri.trim();
    let uri = uri.split_once('#').map_or(uri, |(before, _)| before);
    uri.split_once('?').unwrap_or((uri, ""))
}

fn parse_seconds(name: &str, value: &str) -> GrammarResult<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid {} '{}'", name, value))
}

// =============================================================================
// Context-Type Branches
// =============================================================================

/// `apps/<app>` or `streams/<stream>[/<app>/<programType>/<program>]`
fn parse_collect(parts: &mut PathParts, builder: &mut QueryDescriptorBuilder) -> GrammarResult<()> {
    match parts.required_token(COLLECT_TYPE_TOKENS, "collect type")? {
        CollectType::Apps => {
            builder.context(parts.required("application id")?);
        },
        CollectType::Streams => {
            builder.tag(parts.required("stream id")?);
            if parts.has_next() {
                let app_id = parts.required("application id")?;
                let program_type = parts.required_token(PROGRAM_TYPE_TOKENS, "program type")?;
                let program_id = parts.required("program id")?;
                builder.context(program_context(&app_id, program_type, &program_id));
            }
        },
    }
    parts.finish()
}

/// `<app>[/<programType>/<program>[/<sub>...]]` for process and query
fn parse_program(
    mut metric: String,
    parts: &mut PathParts,
    builder: &mut QueryDescriptorBuilder,
) -> GrammarResult<()> {
    let mut context = parts.required("application id")?;

    let Some(token) = parts.next() else {
        builder.context(context);
        return Ok(());
    };
    let program_type = expect_token(PROGRAM_TYPE_TOKENS, &token, "program type")?;
    let program_id = parts.required("program id")?;
    context = program_context(&context, program_type, &program_id);

    let Some(part) = parts.next() else {
        builder.context(context);
        return Ok(());
    };

    if program_type == ProgramType::Batch {
        let subtype = expect_token(BATCH_SUBTYPE_TOKENS, &part, "batch subtype")?;
        context.push('.');
        context.push_str(subtype.code());
        if let Some(subtype_id) = parts.next() {
            context.push('.');
            context.push_str(&subtype_id);
        }
        parts.finish()?;
    } else if parts.has_next() {
        // Component id, then metric-name suffix.
        context.push('.');
        context.push_str(&part);
        while let Some(suffix) = parts.next() {
            metric.push('.');
            metric.push_str(&suffix);
        }
    } else {
        metric.push('.');
        metric.push_str(&part);
    }

    builder.context(context).metric(metric);
    Ok(())
}

/// `apps/<app>[...][/datasets/<ds>]` or `datasets/<ds>[/<app>/<programType>/<program>]`
fn parse_store(parts: &mut PathParts, builder: &mut QueryDescriptorBuilder) -> GrammarResult<()> {
    let store_type = parts.required_token(STORE_TYPE_TOKENS, "store type")?;
    let id = parts.required(match store_type {
        StoreType::Apps => "application id",
        StoreType::Datasets => "dataset id",
    })?;

    if !parts.has_next() {
        match store_type {
            StoreType::Apps => builder.context(id),
            StoreType::Datasets => builder.tag(id),
        };
        return Ok(());
    }

    if store_type == StoreType::Datasets {
        builder.tag(id);
        let app_id = parts.required("application id")?;
        let program_type = parts.required_token(PROGRAM_TYPE_TOKENS, "program type")?;
        let program_id = parts.required("program id")?;
        builder.context(program_context(&app_id, program_type, &program_id));
        return parts.finish();
    }

    let program_type = parts.required_token(PROGRAM_TYPE_TOKENS, "program type")?;
    let program_id = parts.required("program id")?;
    let mut context = program_context(&id, program_type, &program_id);

    match program_type {
        ProgramType::Flows => {
            let is_dataset_marker =
                parts.peek().and_then(|p| lookup_token(STORE_TYPE_TOKENS, p)) == Some(StoreType::Datasets);
            if !is_dataset_marker {
                if let Some(flowlet_id) = parts.next() {
                    context.push('.');
                    context.push_str(&flowlet_id);
                }
            }
        },
        ProgramType::Batch => {
            if let Some(subtype) = parts.peek().and_then(BatchSubtype::from_token) {
                parts.next();
                context.push('.');
                context.push_str(subtype.code());
            }
        },
        ProgramType::Procedures => {},
    }

    if parts.has_next() {
        let marker = parts.required_token(STORE_TYPE_TOKENS, "dataset marker")?;
        if marker != StoreType::Datasets {
            return Err("expected 'datasets'".to_string());
        }
        builder.tag(parts.required("dataset id")?);
    }

    builder.context(context);
    parts.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::request::MetricSelector;

    const NOW: i64 = 1_700_000_000;

    fn parse_ok(uri: &str) -> QueryDescriptor {
        RequestParser::new(2)
            .parse_at(uri, NOW)
            .unwrap_or_else(|e| panic!("{} failed to parse: {}", uri, e))
    }

    fn parse_err(uri: &str) -> String {
        match RequestParser::new(2).parse_at(uri, NOW) {
            Ok(q) => panic!("{} unexpectedly parsed: {:?}", uri, q),
            Err(Error::MalformedQuery { reason, .. }) => reason,
            Err(other) => panic!("{} failed with wrong error: {}", uri, other),
        }
    }

    #[test]
    fn test_collect_apps_with_count_defaults() {
        let q = parse_ok("collect/bytes/apps/myapp?count=5");
        assert_eq!(q.kind, QueryKind::TimeSeries);
        assert_eq!(q.context_prefix.as_deref(), Some("myapp"));
        assert_eq!(q.metric_prefix(), "bytes");
        assert_eq!(q.count, 5);
        assert_eq!(q.end_time, NOW - 2);
        assert_eq!(q.start_time, NOW - 2 - 5);
        assert_eq!(q.source_uri, "collect/bytes/apps/myapp?count=5");
    }

    #[test]
    fn test_collect_streams() {
        let q = parse_ok("/collect/events/streams/clicks?aggregate=true");
        assert_eq!(q.kind, QueryKind::Aggregate);
        assert_eq!(q.tag_prefix.as_deref(), Some("clicks"));
        assert!(q.context_prefix.is_none());

        let q = parse_ok("collect/events/streams/clicks/myapp/flows/flow1?aggregate=true");
        assert_eq!(q.tag_prefix.as_deref(), Some("clicks"));
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.f.flow1"));
    }

    #[test]
    fn test_process_flowlet_and_metric_suffix() {
        let q = parse_ok("process/reads/myapp/flows/flow1/flowlet1/tuples.read?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.f.flow1.flowlet1"));
        assert_eq!(q.metric_prefix(), "reads.tuples.read");

        let q = parse_ok("process/reads/myapp/flows/flow1/flowlet1/tuples/read?aggregate=true");
        assert_eq!(q.metric_prefix(), "reads.tuples.read");
    }

    #[test]
    fn test_process_single_trailing_segment_is_metric_suffix() {
        let q = parse_ok("query/requests/myapp/procedures/proc1/failed?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.p.proc1"));
        assert_eq!(q.metric_prefix(), "requests.failed");
    }

    #[test]
    fn test_process_context_levels() {
        assert_eq!(
            parse_ok("process/busyness/myapp?aggregate=true").context_prefix.as_deref(),
            Some("myapp")
        );
        assert_eq!(
            parse_ok("process/busyness/myapp/flows/flow1?aggregate=true")
                .context_prefix
                .as_deref(),
            Some("myapp.f.flow1")
        );
    }

    #[test]
    fn test_process_batch_subtypes() {
        let q = parse_ok("process/records/myapp/mapreduce/job1/mappers?count=10");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.b.job1.m"));
        assert_eq!(q.metric_prefix(), "records");

        let q = parse_ok("process/records/myapp/batch/job1/reducers/task3?count=10");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.b.job1.r.task3"));

        assert!(parse_err("process/records/myapp/batch/job1/combiners?count=1")
            .contains("batch subtype"));
    }

    #[test]
    fn test_store_apps_grammar() {
        let q = parse_ok("store/apps/myapp/mapreduce/job1/mappers/datasets/ds1?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.b.job1.m"));
        assert_eq!(q.tag_prefix.as_deref(), Some("ds1"));

        let q = parse_ok("store/bytes/apps/myapp/flows/flow1/flowlet1/datasets/ds1?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.f.flow1.flowlet1"));
        assert_eq!(q.tag_prefix.as_deref(), Some("ds1"));
        assert_eq!(q.metric_prefix(), "bytes");

        let q = parse_ok("store/bytes/apps/myapp/flows/flow1/datasets/ds1?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.f.flow1"));
        assert_eq!(q.tag_prefix.as_deref(), Some("ds1"));

        let q = parse_ok("store/bytes/apps/myapp/procedures/p1/datasets/ds1?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.p.p1"));

        let q = parse_ok("store/bytes/apps/myapp?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp"));
        assert!(q.tag_prefix.is_none());
    }

    #[test]
    fn test_store_metric_name_is_optional() {
        let q = parse_ok("store/apps/myapp?aggregate=true");
        assert_eq!(q.metric_prefix(), "");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp"));

        let q = parse_ok("store/apps/apps/myapp?aggregate=true");
        assert_eq!(q.metric_prefix(), "apps");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp"));

        let q = parse_ok("store/datasets/ds1/myapp/flows/flow1?aggregate=true");
        assert_eq!(q.metric_prefix(), "");
        assert_eq!(q.tag_prefix.as_deref(), Some("ds1"));
    }

    #[test]
    fn test_store_datasets_grammar() {
        let q = parse_ok("store/bytes/datasets/ds1?aggregate=true");
        assert_eq!(q.tag_prefix.as_deref(), Some("ds1"));
        assert!(q.context_prefix.is_none());

        let q = parse_ok("store/bytes/datasets/ds1/myapp/flows/flow1?aggregate=true");
        assert_eq!(q.tag_prefix.as_deref(), Some("ds1"));
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.f.flow1"));
    }

    #[test]
    fn test_store_requires_datasets_marker() {
        let reason = parse_err("store/bytes/apps/myapp/procedures/p1/apps/ds1?aggregate=true");
        assert!(reason.contains("datasets"));
    }

    #[test]
    fn test_unknown_tokens_fail() {
        assert!(parse_err("collect/bytes/apps/myapp/workers/w1?count=1").contains("unexpected"));
        assert!(parse_err("process/reads/myapp/workflows/w1?count=1").contains("program type"));
        assert!(parse_err("observe/reads/myapp?count=1").contains("context type"));
        assert!(parse_err("collect/bytes/tables/t1?count=1").contains("collect type"));
    }

    #[test]
    fn test_missing_segments_fail() {
        assert!(parse_err("?count=1").contains("context type"));
        assert!(parse_err("collect?count=1").contains("metric name"));
        assert!(parse_err("collect/bytes/apps?count=1").contains("application id"));
        assert!(parse_err("process/reads/myapp/flows?count=1").contains("program id"));
        assert!(parse_err("store/bytes/apps/myapp/flows/f1/fl1/datasets?count=1")
            .contains("dataset id"));
    }

    #[test]
    fn test_tokens_are_case_insensitive() {
        let q = parse_ok("Process/reads/myapp/FLOWS/flow1?aggregate=TRUE");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.f.flow1"));
        assert_eq!(q.kind, QueryKind::Aggregate);
    }

    #[test]
    fn test_query_type_selection() {
        assert_eq!(
            parse_ok("collect/bytes?time_series=true&aggregate=true").kind,
            QueryKind::TimeSeries
        );
        assert_eq!(
            parse_ok("collect/bytes?time_series=false&aggregate=true").kind,
            QueryKind::Aggregate
        );
        assert_eq!(parse_err("collect/bytes/apps/myapp"), "unknown query type");
        assert_eq!(parse_err("collect/bytes?aggregate=yes"), "unknown query type");
    }

    #[test]
    fn test_explicit_time_range() {
        let q = parse_ok("collect/bytes?count=60&start=1000&end=1059");
        assert_eq!((q.start_time, q.end_time, q.count), (1000, 1059, 60));

        let q = parse_ok("collect/bytes?count=10&end=500");
        assert_eq!((q.start_time, q.end_time), (490, 500));
    }

    #[test]
    fn test_invalid_numbers_fail() {
        assert!(parse_err("collect/bytes?count=abc").contains("count"));
        assert!(parse_err("collect/bytes?count=-5").contains("count"));
        assert!(parse_err("collect/bytes?count=5&start=x").contains("start"));
        assert!(parse_err("collect/bytes?count=5&end=1.5").contains("end"));
    }

    #[test]
    fn test_run_id_and_repeated_params() {
        let q = parse_ok("process/records/myapp/batch/job1?aggregate=true&run_id=r-42");
        assert_eq!(q.run_id.as_deref(), Some("r-42"));

        let q = parse_ok("collect/bytes?count=3&count=9&end=100");
        assert_eq!(q.count, 3);
    }

    #[test]
    fn test_busyness_selector() {
        let q = parse_ok("process/busyness/myapp/flows/flow1?count=5");
        assert_eq!(q.metric, MetricSelector::Busyness);
        assert_eq!(q.context_prefix.as_deref(), Some("myapp.f.flow1"));
        let q = parse_ok("process/busyness/myapp/flows/flow1/flowlet1?count=5");
        assert_eq!(q.metric, MetricSelector::Named("busyness.flowlet1".to_string()));
        let q = parse_ok("process/busyness/myapp/flows/flow1/flowlet1/x?count=5");
        assert_eq!(q.metric, MetricSelector::Named("busyness.x".to_string()));
    }

    #[test]
    fn test_percent_encoded_segments_and_empty_segments() {
        let q = parse_ok("collect//bytes/apps/my%20app?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("my app"));
        let q = parse_ok("//collect/bytes/apps/myapp?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("myapp"));
    }

    #[test]
    fn test_dot_segments_are_not_resolved() {
        assert!(parse_err("collect/bytes/apps/..?aggregate=true").contains("'..'"));
        assert!(parse_err("process/reads/myapp/flows/flow1/%2E%2E/x?aggregate=true")
            .contains("invalid path segment"));
        assert!(parse_err("collect/./bytes/apps/myapp?aggregate=true").contains("'.'"));

        // Dots inside a segment are ordinary characters.
        let q = parse_ok("collect/bytes/apps/my..app?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("my..app"));
    }

    #[test]
    fn test_backslash_is_part_of_segment() {
        let q = parse_ok("collect/bytes/apps/my\\app?aggregate=true");
        assert_eq!(q.context_prefix.as_deref(), Some("my\\app"));
    }

    #[test]
    fn test_query_string_decoding_and_fragment() {
        let q = parse_ok("collect/bytes/apps/myapp?count=2&end=100&run_id=run%201#ignored");
        assert_eq!(q.run_id.as_deref(), Some("run 1"));
        assert_eq!(q.end_time, 100);

        let q = parse_ok("collect/bytes/apps/myapp?aggregate=true&run_id=a+b");
        assert_eq!(q.run_id.as_deref(), Some("a b"));
    }

    #[test]
    fn test_count_limit() {
        let q = parse_ok(&format!("collect/bytes?count={}&end=100", QUERY_MAX_COUNT));
        assert_eq!(q.count, QUERY_MAX_COUNT);

        let reason = parse_err("collect/bytes?count=100000000000&end=100");
        assert!(reason.contains("exceeds the maximum"));

        let parser = RequestParser::new(2).with_max_count(10);
        assert_eq!(parser.max_count(), 10);
        assert!(parser.parse_at("collect/bytes?count=10", NOW).is_ok());
        assert!(matches!(
            parser.parse_at("collect/bytes?count=11", NOW),
            Err(Error::MalformedQuery { .. })
        ));
    }

    #[test]
    fn test_extreme_times_pass_through() {
        let q = parse_ok("collect/bytes?count=5&end=-9223372036854775807");
        assert_eq!(q.end_time, i64::MIN + 1);
        assert_eq!(q.start_time, (i64::MIN + 1).wrapping_sub(5));
        assert_eq!(q.count, 5);

        let q = parse_ok("collect/bytes?count=3&start=9223372036854775807&end=9223372036854775807");
        assert_eq!(q.start_time, i64::MAX);
        assert_eq!(q.end_time, i64::MAX);

        let q = RequestParser::new(2)
            .parse_at("collect/bytes?count=1", i64::MIN)
            .unwrap();
        assert_eq!(q.end_time, i64::MIN.wrapping_sub(2));
    }

    #[test]
    fn test_program_codes() {
        assert_eq!(ProgramType::Flows.code(), "f");
        assert_eq!(ProgramType::Batch.code(), "b");
        assert_eq!(ProgramType::Procedures.code(), "p");
        assert_eq!(ProgramType::from_token("mapreduce"), Some(ProgramType::Batch));
        assert_eq!(BatchSubtype::Mappers.code(), "m");
        assert_eq!(BatchSubtype::Reducers.code(), "r");
        assert_eq!(ContextType::from_token("query"), Some(ContextType::Query));
        assert_eq!(ContextType::from_token("nope"), None);
    }
}
