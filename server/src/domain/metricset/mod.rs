//! Metric family model and exposition codec

pub mod exposition;
pub mod model;

pub use model::{
    HistogramBucket, HistogramValue, LabelSet, MetricFamily, MetricType, Sample, SampleValue,
    SummaryQuantile, SummaryValue,
};
