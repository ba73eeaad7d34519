//! In-memory metric family model
//!
//! A batch of metrics is a `Vec<MetricFamily>`. Batches are created fresh for
//! every forwarding cycle, flow through the transformer chain, and are
//! discarded after the push except for the snapshot kept for inspection.

use std::collections::BTreeMap;
use std::fmt;

/// Ordered label name/value mapping. Label names are unique by construction.
pub type LabelSet = BTreeMap<String, String>;

/// Metric family type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(MetricType::Counter),
            "gauge" => Some(MetricType::Gauge),
            "histogram" => Some(MetricType::Histogram),
            "summary" => Some(MetricType::Summary),
            "untyped" => Some(MetricType::Untyped),
            _ => None,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named group of time-series samples sharing a type.
///
/// Invariant: `name` is unique within a batch after packing; all samples
/// carry values matching `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricType,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, kind: MetricType) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            kind,
            samples: Vec::new(),
        }
    }
}

/// One time-series sample: a label set identifying the series, a value, and
/// an optional timestamp in milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: LabelSet,
    pub value: SampleValue,
    pub timestamp_ms: Option<i64>,
}

impl Sample {
    pub fn new(labels: LabelSet, value: SampleValue) -> Self {
        Self {
            labels,
            value,
            timestamp_ms: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}

/// Sample value: a plain float for counter/gauge/untyped families, a
/// structured value for histogram and summary families.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Value(f64),
    Histogram(HistogramValue),
    Summary(SummaryValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramValue {
    pub sum: f64,
    pub count: f64,
    /// Cumulative bucket counts, ordered by upper bound.
    pub buckets: Vec<HistogramBucket>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBucket {
    pub upper_bound: f64,
    pub cumulative: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryValue {
    pub sum: f64,
    pub count: f64,
    pub quantiles: Vec<SummaryQuantile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryQuantile {
    pub quantile: f64,
    pub value: f64,
}

/// Build a label set from name/value pairs.
pub fn label_set(pairs: &[(&str, &str)]) -> LabelSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
