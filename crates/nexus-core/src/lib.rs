//! Carbon Nexus hotspot engine.
//!
//! Scores supply-chain events through a prediction oracle, keeps a per-entity
//! emissions baseline, flags hotspots when predictions run above it, and fans
//! the results out to alerts, recommendations and live notifications.

pub mod api;
pub mod baseline;
pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod journal;
pub mod metrics;
pub mod notify;
pub mod oracle;
pub mod recommend;
pub mod records;
pub mod scanner;
pub mod severity;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::NexusConfig;
pub use detector::{Detection, HotspotDetector};
pub use error::{DetectError, ScanError, StoreError};
pub use event::{EntityRef, EntityType, Event, EventType, Features, SkipReason};
pub use notify::{Channel, NotificationHub, NotificationSink};
pub use records::{Alert, Baseline, Hotspot, Prediction, Recommendation};
pub use scanner::{BatchScanner, ScanReport};
pub use severity::{HotspotClassifier, Severity, Thresholds};
pub use store::{EmissionsStore, EventSource, MemoryStore};
