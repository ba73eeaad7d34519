//! Deterministic batch ordering
//!
//! Sorts families by name and samples within a family by their full label
//! set, so equal inputs always encode to byte-identical output.

use async_trait::async_trait;

use super::{Transform, TransformError};
use crate::domain::metricset::MetricFamily;

pub struct SortMetrics;

#[async_trait]
impl Transform for SortMetrics {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError> {
        batch.sort_by(|a, b| a.name.cmp(&b.name));
        for family in batch {
            // BTreeMap label sets compare lexicographically over their pairs
            family.samples.sort_by(|a, b| a.labels.cmp(&b.labels));
        }
        Ok(())
    }
}
