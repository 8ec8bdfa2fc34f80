//! Persisted records produced by the detection workflow.

use crate::event::{EntityRef, EntityType, EventType, Features};
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One oracle output for one event. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub event_id: String,
    pub entity: String,
    pub prediction_type: EventType,
    pub predicted_co2: f64,
    pub confidence_score: f64,
    pub model_version: String,
    pub features: Features,
    pub created_at: DateTime<Utc>,
}

/// Expected CO2 for an entity. One per (entity, entity_type); replaced on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub entity: String,
    pub entity_type: EntityType,
    pub baseline_value: f64,
    pub updated_at: DateTime<Utc>,
}

impl Baseline {
    pub fn new(entity: &EntityRef, baseline_value: f64) -> Self {
        Self {
            entity: entity.name.clone(),
            entity_type: entity.kind,
            baseline_value,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> EntityRef {
        EntityRef::new(self.entity.clone(), self.entity_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HotspotStatus {
    #[default]
    Active,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub id: Uuid,
    pub entity: String,
    pub entity_type: EntityType,
    pub predicted_co2: f64,
    pub baseline_co2: f64,
    pub percent_above: f64,
    pub severity: Severity,
    pub status: HotspotStatus,
    pub event_id: String,
    pub created_at: DateTime<Utc>,
}

impl Hotspot {
    /// Human-readable reason handed to the recommendation generator.
    pub fn reason(&self) -> String {
        format!("Emissions {:.1}% above baseline", self.percent_above)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub level: Severity,
    pub message: String,
    pub hotspot_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn for_hotspot(hotspot: &Hotspot) -> Self {
        Self {
            id: Uuid::new_v4(),
            level: hotspot.severity,
            message: format!(
                "{} exceeded emissions by {:.1}%",
                hotspot.entity, hotspot.percent_above
            ),
            hotspot_id: hotspot.id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Implemented,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub entity: String,
    #[serde(default)]
    pub hotspot_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub co2_reduction: Option<f64>,
    #[serde(default)]
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn pending(
        entity: impl Into<String>,
        hotspot_id: Option<Uuid>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity: entity.into(),
            hotspot_id,
            title: title.into(),
            description: String::new(),
            co2_reduction: None,
            status: RecommendationStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
