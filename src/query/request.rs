//! Query descriptor produced by the path grammar
//!
//! A [`QueryDescriptor`] is the immutable, canonical form of one metrics
//! request URI. It carries no behaviour; the executor interprets it.

use std::fmt;

/// Metric name that selects the derived busyness ratio
pub const BUSYNESS: &str = "busyness";

/// What kind of answer a query wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Dense per-second series
    TimeSeries,
    /// Single summed value
    Aggregate,
}

impl QueryKind {
    /// All kinds, in the order query-string flags are tested
    pub const ALL: [QueryKind; 2] = [QueryKind::TimeSeries, QueryKind::Aggregate];

    /// Query-string flag that selects this kind
    pub fn flag(&self) -> &'static str {
        match self {
            QueryKind::TimeSeries => "time_series",
            QueryKind::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Which metric a query reads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricSelector {
    /// A stored metric, by dotted name prefix
    Named(String),
    /// Percentage of tuples read over events processed
    Busyness,
}

impl MetricSelector {
    /// Classify a parsed metric name
    pub fn from_name(name: String) -> Self {
        if name == BUSYNESS {
            MetricSelector::Busyness
        } else {
            MetricSelector::Named(name)
        }
    }

    /// Dotted metric name as requested
    pub fn name(&self) -> &str {
        match self {
            MetricSelector::Named(name) => name,
            MetricSelector::Busyness => BUSYNESS,
        }
    }

    /// Whether this is the derived busyness metric
    pub fn is_busyness(&self) -> bool {
        matches!(self, MetricSelector::Busyness)
    }
}

/// Canonical, parsed form of a metrics request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Original request URI, echoed back in batch responses
    pub source_uri: String,
    /// Kind of answer wanted
    pub kind: QueryKind,
    /// Dotted context prefix (application, program, component)
    pub context_prefix: Option<String>,
    /// Requested metric
    pub metric: MetricSelector,
    /// Secondary dimension such as a stream or dataset
    pub tag_prefix: Option<String>,
    /// Execution instance filter
    pub run_id: Option<String>,
    /// Inclusive start, seconds (time series only)
    pub start_time: i64,
    /// Inclusive end, seconds (time series only)
    pub end_time: i64,
    /// Number of one-second buckets (time series only)
    pub count: usize,
}

impl QueryDescriptor {
    /// Dotted metric name as requested
    pub fn metric_prefix(&self) -> &str {
        self.metric.name()
    }

    /// Context prefix as a string slice
    pub fn context(&self) -> Option<&str> {
        self.context_prefix.as_deref()
    }

    /// Tag prefix as a string slice
    pub fn tag(&self) -> Option<&str> {
        self.tag_prefix.as_deref()
    }
}

/// Accumulates descriptor fields while the grammar is walked
#[derive(Debug, Clone)]
pub(crate) struct QueryDescriptorBuilder {
    source_uri: String,
    kind: Option<QueryKind>,
    context_prefix: Option<String>,
    metric_prefix: String,
    tag_prefix: Option<String>,
    run_id: Option<String>,
    start_time: i64,
    end_time: i64,
    count: usize,
}

impl QueryDescriptorBuilder {
    pub(crate) fn new(source_uri: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            kind: None,
            context_prefix: None,
            metric_prefix: String::new(),
            tag_prefix: None,
            run_id: None,
            start_time: 0,
            end_time: 0,
            count: 0,
        }
    }

    pub(crate) fn context(&mut self, context: impl Into<String>) -> &mut Self {
        self.context_prefix = Some(context.into());
        self
    }

    pub(crate) fn metric(&mut self, metric: impl Into<String>) -> &mut Self {
        self.metric_prefix = metric.into();
        self
    }

    pub(crate) fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tag_prefix = Some(tag.into());
        self
    }

    pub(crate) fn run_id(&mut self, run_id: impl Into<String>) -> &mut Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub(crate) fn time_series(&mut self, start_time: i64, end_time: i64, count: usize) -> &mut Self {
        self.kind = Some(QueryKind::TimeSeries);
        self.start_time = start_time;
        self.end_time = end_time;
        self.count = count;
        self
    }

    pub(crate) fn kind(&mut self, kind: QueryKind) -> &mut Self {
        self.kind = Some(kind);
        self
    }

    /// Finish, or `None` if no query kind was chosen
    pub(crate) fn build(self) -> Option<QueryDescriptor> {
        let kind = self.kind?;
        Some(QueryDescriptor {
            source_uri: self.source_uri,
            kind,
            context_prefix: self.context_prefix,
            metric: MetricSelector::from_name(self.metric_prefix),
            tag_prefix: self.tag_prefix,
            run_id: self.run_id,
            start_time: self.start_time,
            end_time: self.end_time,
            count: self.count,
        })
    }
}
