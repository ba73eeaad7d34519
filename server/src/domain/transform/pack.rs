//! Metric family packing
//!
//! Retrieval fragments may carry the same family name more than once. Packing
//! merges those fragments into a single family entry per distinct name,
//! preserving every sample, and drops families left without samples.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{Transform, TransformError};
use crate::domain::metricset::MetricFamily;

pub struct PackMetrics;

#[async_trait]
impl Transform for PackMetrics {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError> {
        let mut packed: Vec<MetricFamily> = Vec::with_capacity(batch.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for family in batch.drain(..) {
            if family.samples.is_empty() {
                continue;
            }
            match index.get(&family.name) {
                Some(&at) => packed[at].samples.extend(family.samples),
                None => {
                    index.insert(family.name.clone(), packed.len());
                    packed.push(family);
                }
            }
        }

        *batch = packed;
        Ok(())
    }
}
