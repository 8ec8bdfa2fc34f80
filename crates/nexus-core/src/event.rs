//! Normalized emissions events and per-type feature extraction.
//!
//! Events arrive from the ingestion pipeline already normalized; the core only
//! reads them. Each event type has its own feature set, and an event is only
//! worth sending to the oracle once its required fields are strictly positive.

use crate::error::OracleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Entity name used when an event carries neither a supplier nor a route.
pub const UNKNOWN_ENTITY: &str = "Unknown";

/// The four event profiles the oracle knows how to score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Logistics,
    Factory,
    Warehouse,
    Delivery,
}

impl EventType {
    /// Case-insensitive parse of the raw `event_type` column.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "logistics" => Some(Self::Logistics),
            "factory" => Some(Self::Factory),
            "warehouse" => Some(Self::Warehouse),
            "delivery" => Some(Self::Delivery),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logistics => "logistics",
            Self::Factory => "factory",
            Self::Warehouse => "warehouse",
            Self::Delivery => "delivery",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Supplier,
    Route,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier",
            Self::Route => "route",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit baselines and hotspots are tracked per.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub name: String,
    pub kind: EntityType,
}

impl EntityRef {
    pub fn new(name: impl Into<String>, kind: EntityType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn supplier(name: impl Into<String>) -> Self {
        Self::new(name, EntityType::Supplier)
    }

    pub fn route(name: impl Into<String>) -> Self {
        Self::new(name, EntityType::Route)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// A normalized observation. `event_type` stays raw so that unrecognized
/// types survive ingestion and are skipped at detection time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    // logistics / delivery
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub load_kg: Option<f64>,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub stop_events: Option<f64>,
    #[serde(default)]
    pub traffic_score: Option<f64>,
    #[serde(default)]
    pub delivery_count: Option<f64>,

    // factory / warehouse
    #[serde(default)]
    pub energy_kwh: Option<f64>,
    #[serde(default)]
    pub shift_hours: Option<f64>,
    #[serde(default)]
    pub furnace_usage: Option<f64>,
    #[serde(default)]
    pub cooling_load: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub refrigeration_load: Option<f64>,
    #[serde(default)]
    pub inventory_volume: Option<f64>,
}

impl Event {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    /// Supplier wins over route; an event with neither is attributed to
    /// [`UNKNOWN_ENTITY`] as a route.
    pub fn entity(&self) -> EntityRef {
        match (non_empty(&self.supplier_id), non_empty(&self.route_id)) {
            (Some(supplier), _) => EntityRef::supplier(supplier),
            (None, Some(route)) => EntityRef::route(route),
            (None, None) => EntityRef::route(UNKNOWN_ENTITY),
        }
    }

    pub fn parsed_type(&self) -> Option<EventType> {
        EventType::from_raw(&self.event_type)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Absent or zero falls back to the default.
fn or_default(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v != 0.0 && v.is_finite() => v,
        _ => default,
    }
}

fn or_default_count(value: Option<f64>, default: i64) -> i64 {
    match value {
        Some(v) if v.is_finite() && v.trunc() != 0.0 => v.trunc() as i64,
        _ => default,
    }
}

fn or_default_label(value: &Option<String>, default: &str) -> String {
    non_empty(value).unwrap_or(default).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticsFeatures {
    pub distance_km: f64,
    pub load_kg: f64,
    pub vehicle_type: String,
    pub fuel_type: String,
    pub avg_speed: f64,
    pub stop_events: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactoryFeatures {
    pub energy_kwh: f64,
    pub shift_hours: f64,
    pub machine_runtime_hours: f64,
    pub furnace_usage: f64,
    pub cooling_load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseFeatures {
    pub temperature: f64,
    pub energy_kwh: f64,
    pub refrigeration_load: f64,
    pub inventory_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFeatures {
    pub route_length: f64,
    pub vehicle_type: String,
    pub traffic_score: i64,
    pub delivery_count: i64,
}

/// Oracle input, one variant per event profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Features {
    Logistics(LogisticsFeatures),
    Factory(FactoryFeatures),
    Warehouse(WarehouseFeatures),
    Delivery(DeliveryFeatures),
}

/// Why an event produced no prediction. Skips are expected and never
/// surface as errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("unknown event type {0:?}")]
    UnknownEventType(String),
    #[error("{event_type} event has invalid {field}: {value}")]
    InvalidField {
        event_type: EventType,
        field: &'static str,
        value: f64,
    },
    #[error("oracle could not score event: {0}")]
    Oracle(OracleError),
}

impl SkipReason {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownEventType(_) => "unknown_event_type",
            Self::InvalidField { .. } => "invalid_field",
            Self::Oracle(_) => "oracle",
        }
    }
}

fn required(
    event_type: EventType,
    field: &'static str,
    value: Option<f64>,
) -> Result<f64, SkipReason> {
    let value = value.unwrap_or(0.0);
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(SkipReason::InvalidField {
            event_type,
            field,
            value,
        })
    }
}

impl Features {
    /// Build the oracle input for an event, or say why it cannot be scored.
    pub fn from_event(event: &Event) -> Result<Self, SkipReason> {
        let Some(event_type) = event.parsed_type() else {
            return Err(SkipReason::UnknownEventType(event.event_type.clone()));
        };

        let features = match event_type {
            EventType::Logistics => {
                let distance_km = required(event_type, "distance_km", event.distance_km)?;
                let load_kg = required(event_type, "load_kg", event.load_kg)?;
                Self::Logistics(LogisticsFeatures {
                    distance_km,
                    load_kg,
                    vehicle_type: or_default_label(&event.vehicle_type, "truck"),
                    fuel_type: or_default_label(&event.fuel_type, "diesel"),
                    avg_speed: or_default(event.speed, 50.0),
                    stop_events: or_default_count(event.stop_events, 0),
                })
            }
            EventType::Factory => {
                let energy_kwh = required(event_type, "energy_kwh", event.energy_kwh)?;
                let shift_hours = required(event_type, "shift_hours", event.shift_hours)?;
                Self::Factory(FactoryFeatures {
                    energy_kwh,
                    shift_hours,
                    machine_runtime_hours: shift_hours,
                    furnace_usage: or_default(event.furnace_usage, 0.0),
                    cooling_load: or_default(event.cooling_load, 0.0),
                })
            }
            EventType::Warehouse => Self::Warehouse(WarehouseFeatures {
                temperature: or_default(event.temperature, 20.0),
                energy_kwh: or_default(event.energy_kwh, 0.0),
                refrigeration_load: or_default(event.refrigeration_load, 0.0),
                inventory_volume: or_default(event.inventory_volume, 0.0),
            }),
            EventType::Delivery => {
                let route_length = required(event_type, "distance_km", event.distance_km)?;
                Self::Delivery(DeliveryFeatures {
                    route_length,
                    vehicle_type: or_default_label(&event.vehicle_type, "truck"),
                    traffic_score: or_default_count(event.traffic_score, 3),
                    delivery_count: or_default_count(event.delivery_count, 1),
                })
            }
        };

        Ok(features)
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Logistics(_) => EventType::Logistics,
            Self::Factory(_) => EventType::Factory,
            Self::Warehouse(_) => EventType::Warehouse,
            Self::Delivery(_) => EventType::Delivery,
        }
    }
}
