//! Label value anonymization
//!
//! Replaces the values of configured labels with a salted one-way hash. The
//! salt is operator-supplied and never transmitted; equal (salt, value)
//! inputs always hash to the same output so grouping behavior is preserved.
//! Config validation rejects a missing salt before this stage can run.

use async_trait::async_trait;

use super::{Transform, TransformError};
use crate::domain::metricset::MetricFamily;
use crate::utils::crypto::salted_hash;

pub struct AnonymizeLabels {
    salt: String,
    labels: Vec<String>,
}

impl AnonymizeLabels {
    pub fn new(salt: String, labels: Vec<String>) -> Self {
        Self { salt, labels }
    }
}

#[async_trait]
impl Transform for AnonymizeLabels {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError> {
        for family in batch {
            for sample in &mut family.samples {
                for name in &self.labels {
                    if let Some(value) = sample.labels.get_mut(name) {
                        *value = salted_hash(&self.salt, value);
                    }
                }
            }
        }
        Ok(())
    }
}
