//! Metric family renaming
//!
//! Exact-match rename of family names per an old → new mapping; unmapped
//! names pass through unchanged.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{Transform, TransformError};
use crate::domain::metricset::MetricFamily;

pub struct RenameMetrics {
    names: HashMap<String, String>,
}

impl RenameMetrics {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl Transform for RenameMetrics {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError> {
        for family in batch {
            if let Some(new_name) = self.names.get(&family.name) {
                family.name = new_name.clone();
            }
        }
        Ok(())
    }
}
