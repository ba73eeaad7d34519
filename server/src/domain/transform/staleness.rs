//! Stale sample dropping
//!
//! A federation source may return stale last-known values; forwarding them
//! corrupts downstream time-series continuity. Samples timestamped before
//! the look-back cutoff are dropped; samples without a timestamp are treated
//! as fresh. The cutoff is computed from "now" each time the stage runs.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{Transform, TransformError};
use crate::domain::metricset::MetricFamily;

pub struct DropStaleSamples {
    window: Duration,
}

impl DropStaleSamples {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

#[async_trait]
impl Transform for DropStaleSamples {
    async fn apply(&self, batch: &mut Vec<MetricFamily>) -> Result<(), TransformError> {
        let cutoff_ms = (Utc::now() - self.window).timestamp_millis();
        for family in batch {
            family
                .samples
                .retain(|sample| sample.timestamp_ms.is_none_or(|ts| ts >= cutoff_ms));
        }
        Ok(())
    }
}
