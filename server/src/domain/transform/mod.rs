//! Metric batch transformers
//!
//! A transformer mutates a batch of metric families in place or fails the
//! cycle. Transformers compose into a [`TransformChain`] that runs its stages
//! in the order they were declared; the chain itself satisfies the same
//! contract. The canonical stage order for forwarding is label injection,
//! anonymization, renaming, staleness drop, packing, deterministic ordering
//! (see `ClientConfig::transforms`).

mod anonymize;
mod label;
mod order;
mod pack;
mod rename;
mod staleness;

use async_trait::async_trait;
use thiserror::Error;

use super::metricset::MetricFamily;

pub use anonymize::AnonymizeLabels;
pub use label::{InjectLabels, LabelSource};
pub use order::SortMetrics;
pub use pack::PackMetrics;
pub use rename::RenameMetrics;
pub use staleness::DropStaleSamples;

#[derive(Debug, Error)]
pub enum TransformError {
    /// The label source (the rotating authorization client) could not supply
    /// the required labels. Fatal to the current cycle.
    #[error("label retrieval failed: {0}")]
    LabelRetrieval(#[source] anyhow::Error),
}

/// A single transformation over a batch of metric families.
///
/// An error aborts the remaining chain and the current cycle; the batch is
/// abandoned rather than partially pushed.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError>;
}

/// Ordered list of transformers, applied front to back.
#[derive(Default)]
pub struct TransformChain {
    stages: Vec<Box<dyn Transform>>,
}

impl TransformChain {
    pub fn push(&mut self, stage: impl Transform + 'static) {
        self.stages.push(Box::new(stage));
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[async_trait]
impl Transform for TransformChain {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError> {
        for stage in &self.stages {
            stage.apply(batch).await?;
        }
        Ok(())
    }
}
