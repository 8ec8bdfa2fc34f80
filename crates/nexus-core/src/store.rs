//! Persistence and event-source seams, plus the in-memory backend.
//!
//! The engine only talks to [`EventSource`] and [`EmissionsStore`]. The
//! in-memory [`MemoryStore`] backs the standalone server and the tests.

use crate::error::StoreError;
use crate::event::{EntityRef, Event};
use crate::records::{Alert, Baseline, Hotspot, Prediction, Recommendation, RecommendationStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Oldest-first window of events that have no prediction yet.
    async fn events_without_predictions(&self, limit: usize) -> Result<Vec<Event>, StoreError>;

    /// Newest-first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>, StoreError>;
}

#[async_trait]
pub trait EmissionsStore: Send + Sync {
    async fn baseline(&self, entity: &EntityRef) -> Result<Option<Baseline>, StoreError>;

    /// Full replace keyed on (entity, entity_type).
    async fn upsert_baseline(&self, baseline: Baseline) -> Result<(), StoreError>;

    /// Newest-first, at most `limit`.
    async fn predictions_by_entity(
        &self,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError>;

    async fn insert_prediction(&self, prediction: Prediction) -> Result<(), StoreError>;

    /// `Ok(None)` means the store declined the record without failing.
    async fn insert_hotspot(&self, hotspot: Hotspot) -> Result<Option<Hotspot>, StoreError>;

    async fn insert_alert(&self, alert: Alert) -> Result<Option<Alert>, StoreError>;

    async fn recommendations_by_entity(
        &self,
        entity: &str,
        status: RecommendationStatus,
    ) -> Result<Vec<Recommendation>, StoreError>;

    async fn insert_recommendation(&self, recommendation: Recommendation) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    events: Vec<Event>,
    event_ids: HashSet<String>,
    predicted_events: HashSet<String>,
    predictions: Vec<Prediction>,
    baselines: HashMap<EntityRef, Baseline>,
    hotspots: Vec<Hotspot>,
    alerts: Vec<Alert>,
    recommendations: Vec<Recommendation>,
}

/// Row counts, served by `/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub events: usize,
    pub predictions: usize,
    pub baselines: usize,
    pub hotspots: usize,
    pub alerts: usize,
    pub recommendations: usize,
}

/// Process-local store. Insertion order is preserved for events.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Appends events, ignoring ids already present. Returns how many were new.
    pub fn insert_events(
        &self,
        events: impl IntoIterator<Item = Event>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables()?;
        let mut inserted = 0;
        for event in events {
            if tables.event_ids.insert(event.id.clone()) {
                tables.events.push(event);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let tables = self.tables()?;
        Ok(StoreCounts {
            events: tables.events.len(),
            predictions: tables.predictions.len(),
            baselines: tables.baselines.len(),
            hotspots: tables.hotspots.len(),
            alerts: tables.alerts.len(),
            recommendations: tables.recommendations.len(),
        })
    }

    pub fn hotspots(&self) -> Result<Vec<Hotspot>, StoreError> {
        Ok(self.tables()?.hotspots.clone())
    }

    pub fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self.tables()?.alerts.clone())
    }

    pub fn predictions(&self) -> Result<Vec<Prediction>, StoreError> {
        Ok(self.tables()?.predictions.clone())
    }

    pub fn baselines(&self) -> Result<Vec<Baseline>, StoreError> {
        Ok(self.tables()?.baselines.values().cloned().collect())
    }
}

#[async_trait]
impl EventSource for MemoryStore {
    async fn events_without_predictions(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .events
            .iter()
            .filter(|e| !tables.predicted_events.contains(&e.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables()?;
        Ok(tables.events.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl EmissionsStore for MemoryStore {
    async fn baseline(&self, entity: &EntityRef) -> Result<Option<Baseline>, StoreError> {
        Ok(self.tables()?.baselines.get(entity).cloned())
    }

    async fn upsert_baseline(&self, baseline: Baseline) -> Result<(), StoreError> {
        self.tables()?.baselines.insert(baseline.key(), baseline);
        Ok(())
    }

    async fn predictions_by_entity(
        &self,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .predictions
            .iter()
            .rev()
            .filter(|p| p.entity == entity)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_prediction(&self, prediction: Prediction) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        tables.predicted_events.insert(prediction.event_id.clone());
        tables.predictions.push(prediction);
        Ok(())
    }

    async fn insert_hotspot(&self, hotspot: Hotspot) -> Result<Option<Hotspot>, StoreError> {
        self.tables()?.hotspots.push(hotspot.clone());
        Ok(Some(hotspot))
    }

    async fn insert_alert(&self, alert: Alert) -> Result<Option<Alert>, StoreError> {
        self.tables()?.alerts.push(alert.clone());
        Ok(Some(alert))
    }

    async fn recommendations_by_entity(
        &self,
        entity: &str,
        status: RecommendationStatus,
    ) -> Result<Vec<Recommendation>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .recommendations
            .iter()
            .filter(|r| r.entity == entity && r.status == status)
            .cloned()
            .collect())
    }

    async fn insert_recommendation(
        &self,
        recommendation: Recommendation,
    ) -> Result<(), StoreError> {
        self.tables()?.recommendations.push(recommendation);
        Ok(())
    }
}
