//! End-to-end scan over the in-memory store with a fake oracle and generator.

use async_trait::async_trait;
use nexus_core::config::DetectionConfig;
use nexus_core::error::{OracleError, RecommendError};
use nexus_core::event::{DeliveryFeatures, FactoryFeatures, LogisticsFeatures, WarehouseFeatures};
use nexus_core::oracle::{OracleEstimate, PredictionOracle};
use nexus_core::recommend::{RecommendationGenerator, RecommendationRequest};
use nexus_core::records::RecommendationStatus;
use nexus_core::{
    BatchScanner, Channel, EmissionsStore, Event, HotspotDetector, MemoryStore, NotificationHub,
    Recommendation, Severity,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scores by distance for logistics and by energy for factories.
struct LinearOracle;

#[async_trait]
impl PredictionOracle for LinearOracle {
    async fn predict_logistics(
        &self,
        f: &LogisticsFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        Ok(OracleEstimate::value(f.distance_km * f.load_kg / 1000.0))
    }
    async fn predict_factory(&self, f: &FactoryFeatures) -> Result<OracleEstimate, OracleError> {
        Ok(OracleEstimate::value(f.energy_kwh * 0.4))
    }
    async fn predict_warehouse(
        &self,
        _: &WarehouseFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        Err(OracleError::Status(500))
    }
    async fn predict_delivery(&self, f: &DeliveryFeatures) -> Result<OracleEstimate, OracleError> {
        Ok(OracleEstimate::value(f.route_length * 0.2))
    }
}

#[derive(Default)]
struct Advisor {
    calls: AtomicUsize,
}

#[async_trait]
impl RecommendationGenerator for Advisor {
    async fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Option<Recommendation>, RecommendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Recommendation::pending(
            request.supplier.clone(),
            Some(request.hotspot_id),
            "Consolidate shipments",
        )))
    }
}

fn logistics(id: &str, supplier: &str, distance_km: f64) -> Event {
    Event {
        supplier_id: Some(supplier.into()),
        distance_km: Some(distance_km),
        load_kg: Some(1000.0),
        ..Event::new(id, "LOGISTICS")
    }
}

fn factory(id: &str, supplier: &str, energy_kwh: f64) -> Event {
    Event {
        supplier_id: Some(supplier.into()),
        energy_kwh: Some(energy_kwh),
        shift_hours: Some(8.0),
        ..Event::new(id, "factory")
    }
}

#[tokio::test]
async fn test_mixed_batch_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(NotificationHub::new(256));
    let advisor = Arc::new(Advisor::default());
    let mut hotspot_feed = hub.subscribe(&[Channel::Hotspots]);

    let detector = Arc::new(HotspotDetector::new(
        &DetectionConfig::default(),
        store.clone(),
        Arc::new(LinearOracle),
        advisor.clone(),
        hub.clone(),
    ));
    let scanner = BatchScanner::new(store.clone(), detector, 10);

    store
        .insert_events([
            logistics("l1", "Acme", 100.0),  // bootstrap at 100
            logistics("l2", "Acme", 110.0),  // 1.1 normal
            logistics("l3", "Acme", 160.0),  // 1.6 warn
            logistics("l4", "Acme", 0.0),    // invalid, skipped
            factory("f1", "Forge", 500.0),   // bootstrap at 200
            factory("f2", "Forge", 1000.0),  // 2.0 critical
            Event::new("w1", "warehouse"),   // oracle error, skipped
            logistics("l5", "Acme", 300.0),  // 3.0 critical, pending rec reused
        ])
        .unwrap();

    let report = scanner.scan(200).await.unwrap();
    assert_eq!(report.events_fetched, 8);
    assert_eq!(report.predictions_generated, 6);
    assert_eq!(report.failures, 0);

    let severities: Vec<(String, Severity)> = report
        .hotspots
        .iter()
        .map(|h| (h.event_id.clone(), h.severity))
        .collect();
    assert_eq!(
        severities,
        [
            ("l3".to_string(), Severity::Warn),
            ("f2".to_string(), Severity::Critical),
            ("l5".to_string(), Severity::Critical),
        ]
    );

    assert_eq!(store.alerts().unwrap().len(), 3);
    assert_eq!(advisor.calls.load(Ordering::SeqCst), 2);
    let pending = store
        .recommendations_by_entity("Acme", RecommendationStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let mut events = Vec::new();
    while let Some(n) = hotspot_feed.try_recv() {
        events.push(n.event);
    }
    assert_eq!(events.len(), 6);

    // Skipped events stay unprocessed; everything else is done.
    let second = scanner.scan(200).await.unwrap();
    assert_eq!(second.events_fetched, 2);
    assert!(second.hotspots.is_empty());
}
