//! Label injection
//!
//! Applies a fixed label set to every sample in the batch. When a label
//! source is present (the rotating authorization client), its labels are
//! merged in and win over static labels on collision; this is how
//! collector-assigned labels reach outgoing samples.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Transform, TransformError};
use crate::domain::metricset::{LabelSet, MetricFamily};

/// Capability for retrieving collector-assigned labels.
#[async_trait]
pub trait LabelSource: Send + Sync {
    async fn labels(&self) -> anyhow::Result<LabelSet>;
}

pub struct InjectLabels {
    static_labels: LabelSet,
    source: Option<Arc<dyn LabelSource>>,
}

impl InjectLabels {
    pub fn new(static_labels: LabelSet, source: Option<Arc<dyn LabelSource>>) -> Self {
        Self {
            static_labels,
            source,
        }
    }
}

#[async_trait]
impl Transform for InjectLabels {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError> {
        let mut merged = self.static_labels.clone();
        if let Some(source) = &self.source {
            let required = source
                .labels()
                .await
                .map_err(TransformError::LabelRetrieval)?;
            merged.extend(required);
        }
        if merged.is_empty() {
            return Ok(());
        }

        for family in batch {
            for sample in &mut family.samples {
                for (name, value) in &merged {
                    sample.labels.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}
