//! Baseline resolution: stored value, median of history, or bootstrap.

use crate::error::StoreError;
use crate::event::EntityRef;
use crate::metrics::BASELINES_TOTAL;
use crate::records::Baseline;
use crate::store::EmissionsStore;
use std::sync::Arc;
use tracing::info;

/// Outcome of resolving an entity's baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// A baseline was already persisted.
    Stored(f64),
    /// Computed from history and persisted just now.
    Computed(f64),
    /// History too thin; the caller establishes the baseline from the current prediction.
    Bootstrap,
}

impl Resolution {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Stored(v) | Self::Computed(v) => Some(*v),
            Self::Bootstrap => None,
        }
    }

    pub fn should_bootstrap(&self) -> bool {
        matches!(self, Self::Bootstrap)
    }
}

pub struct BaselineResolver {
    store: Arc<dyn EmissionsStore>,
    history_limit: usize,
    min_history: usize,
}

impl BaselineResolver {
    pub fn new(
        store: Arc<dyn EmissionsStore>,
        history_limit: usize,
        min_history: usize,
    ) -> Self {
        Self {
            store,
            history_limit,
            min_history,
        }
    }

    pub async fn resolve(&self, entity: &EntityRef) -> Result<Resolution, StoreError> {
        if let Some(stored) = self.store.baseline(entity).await? {
            return Ok(Resolution::Stored(stored.baseline_value));
        }

        let history = self
            .store
            .predictions_by_entity(&entity.name, self.history_limit)
            .await?;
        if history.len() < self.min_history {
            info!(
                entity = %entity,
                predictions = history.len(),
                "Insufficient history for baseline"
            );
            return Ok(Resolution::Bootstrap);
        }

        let values: Vec<f64> = history
            .iter()
            .map(|p| p.predicted_co2)
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();
        let Some(value) = median(&values) else {
            return Ok(Resolution::Bootstrap);
        };

        self.store
            .upsert_baseline(Baseline::new(entity, value))
            .await?;
        BASELINES_TOTAL.with_label_values(&["computed"]).inc();
        info!(
            entity = %entity,
            baseline = value,
            samples = values.len(),
            "Calculated baseline from history"
        );
        Ok(Resolution::Computed(value))
    }

    /// Persists the first observation as the entity's baseline.
    pub async fn bootstrap(&self, entity: &EntityRef, value: f64) -> Result<Baseline, StoreError> {
        let baseline = Baseline::new(entity, value);
        self.store.upsert_baseline(baseline.clone()).await?;
        BASELINES_TOTAL.with_label_values(&["bootstrapped"]).inc();
        info!(entity = %entity, baseline = value, "Established baseline from first observation");
        Ok(baseline)
    }
}

/// Median; even-length input averages the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
