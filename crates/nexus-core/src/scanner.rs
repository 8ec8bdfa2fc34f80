//! Batch scanning of events that have no prediction yet.

use crate::detector::HotspotDetector;
use crate::error::ScanError;
use crate::metrics::{DETECTION_FAILURES, EVENTS_SCANNED, SCAN_DURATION};
use crate::records::Hotspot;
use crate::store::EventSource;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub events_fetched: usize,
    pub events_processed: usize,
    pub predictions_generated: usize,
    pub failures: usize,
    pub hotspots: Vec<Hotspot>,
}

#[derive(Debug, Default)]
struct Totals {
    scans: AtomicU64,
    events: AtomicU64,
    predictions: AtomicU64,
    hotspots: AtomicU64,
    failures: AtomicU64,
}

/// Lifetime counters, served by `/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanTotals {
    pub scans: u64,
    pub events: u64,
    pub predictions: u64,
    pub hotspots: u64,
    pub failures: u64,
}

pub struct BatchScanner {
    source: Arc<dyn EventSource>,
    detector: Arc<HotspotDetector>,
    progress_every: usize,
    // Sequential in-process scans; cross-process exclusion is not provided.
    running: Mutex<()>,
    totals: Totals,
}

impl BatchScanner {
    pub fn new(
        source: Arc<dyn EventSource>,
        detector: Arc<HotspotDetector>,
        progress_every: usize,
    ) -> Self {
        Self {
            source,
            detector,
            progress_every: progress_every.max(1),
            running: Mutex::new(()),
            totals: Totals::default(),
        }
    }

    pub fn totals(&self) -> ScanTotals {
        ScanTotals {
            scans: self.totals.scans.load(Ordering::Relaxed),
            events: self.totals.events.load(Ordering::Relaxed),
            predictions: self.totals.predictions.load(Ordering::Relaxed),
            hotspots: self.totals.hotspots.load(Ordering::Relaxed),
            failures: self.totals.failures.load(Ordering::Relaxed),
        }
    }

    /// Runs the detector over up to `limit` unprocessed events, one at a time,
    /// in the order the source returns them. A failing event is logged and
    /// counted; only failing to fetch the window fails the scan.
    pub async fn scan(&self, limit: usize) -> Result<ScanReport, ScanError> {
        let _guard = self.running.lock().await;
        let timer = SCAN_DURATION.start_timer();

        let events = self
            .source
            .events_without_predictions(limit)
            .await
            .map_err(ScanError::EventSource)?;

        let mut report = ScanReport {
            events_fetched: events.len(),
            ..Default::default()
        };
        if events.is_empty() {
            info!("No unprocessed events");
            timer.observe_duration();
            return Ok(report);
        }

        info!(events = events.len(), "Analyzing events for hotspots");

        for event in &events {
            EVENTS_SCANNED.inc();
            report.events_processed += 1;

            match self.detector.evaluate(event).await {
                Ok(detection) => {
                    if detection.has_prediction() {
                        report.predictions_generated += 1;
                    }
                    if let Some(hotspot) = detection.into_hotspot() {
                        report.hotspots.push(hotspot);
                    }
                }
                Err(e) => {
                    DETECTION_FAILURES.inc();
                    report.failures += 1;
                    warn!(event_id = %event.id, error = %e, "Detection failed, continuing");
                }
            }

            if report.events_processed % self.progress_every == 0 {
                info!(
                    processed = report.events_processed,
                    total = events.len(),
                    hotspots = report.hotspots.len(),
                    "Scan progress"
                );
            }
        }

        timer.observe_duration();
        self.record(&report);
        info!(
            processed = report.events_processed,
            predictions = report.predictions_generated,
            hotspots = report.hotspots.len(),
            failures = report.failures,
            "Scan complete"
        );
        Ok(report)
    }

    fn record(&self, report: &ScanReport) {
        self.totals.scans.fetch_add(1, Ordering::Relaxed);
        self.totals
            .events
            .fetch_add(report.events_processed as u64, Ordering::Relaxed);
        self.totals
            .predictions
            .fetch_add(report.predictions_generated as u64, Ordering::Relaxed);
        self.totals
            .hotspots
            .fetch_add(report.hotspots.len() as u64, Ordering::Relaxed);
        self.totals
            .failures
            .fetch_add(report.failures as u64, Ordering::Relaxed);
    }
}

/// Periodic scans every `every` until `stop` flips. The first scan runs one
/// period after start.
pub fn spawn_scheduler(
    scanner: Arc<BatchScanner>,
    every: Duration,
    limit: usize,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            every_secs = every.as_secs(),
            limit,
            "Scan scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = scanner.scan(limit).await {
                        error!(error = %e, "Scheduled scan failed");
                    }
                }
                _ = stop.changed() => break,
            }
        }

        info!("Scan scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::error::{OracleError, StoreError};
    use crate::event::Event;
    use crate::notify::NotificationHub;
    use crate::store::MemoryStore;
    use crate::testing::{CountingGenerator, FlakyStore, ScriptedOracle, warehouse_event};
    use async_trait::async_trait;

    fn scanner_over(store: Arc<MemoryStore>, oracle: ScriptedOracle) -> BatchScanner {
        let detector = HotspotDetector::new(
            &DetectionConfig::default(),
            store.clone(),
            Arc::new(oracle),
            Arc::new(CountingGenerator::default()),
            Arc::new(NotificationHub::new(16)),
        );
        BatchScanner::new(store, Arc::new(detector), 10)
    }

    #[tokio::test]
    async fn test_empty_window_returns_empty_report() {
        let store = Arc::new(MemoryStore::new());
        let report = scanner_over(store, ScriptedOracle::constant(1.0))
            .scan(200)
            .await
            .unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[tokio::test]
    async fn test_same_entity_events_see_earlier_baseline() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events([warehouse_event("e1", "S1"), warehouse_event("e2", "S1")])
            .unwrap();
        let scanner = scanner_over(store.clone(), ScriptedOracle::values(&[50.0, 100.0]));

        let report = scanner.scan(200).await.unwrap();
        assert_eq!(report.events_processed, 2);
        assert_eq!(report.predictions_generated, 2);
        assert_eq!(report.hotspots.len(), 1);
        assert_eq!(report.hotspots[0].event_id, "e2");
        assert_eq!(report.hotspots[0].baseline_co2, 50.0);
    }

    #[tokio::test]
    async fn test_hotspots_bounded_by_predictions() {
        let store = Arc::new(MemoryStore::new());
        let mut events: Vec<Event> = (0..6)
            .map(|i| warehouse_event(&format!("w{i}"), "S1"))
            .collect();
        events.push(Event::new("bad", "teleport"));
        events.push(Event {
            supplier_id: Some("S2".into()),
            ..Event::new("f1", "factory")
        });
        store.insert_events(events).unwrap();

        let scanner = scanner_over(
            store.clone(),
            ScriptedOracle::values(&[10.0, 30.0, 31.0, 9.0, 40.0, 10.5]),
        );
        let report = scanner.scan(200).await.unwrap();

        assert_eq!(report.events_fetched, 8);
        assert_eq!(report.predictions_generated, 6);
        assert!(report.hotspots.len() <= report.predictions_generated);
        assert!(report.predictions_generated <= report.events_fetched);
        assert_eq!(report.hotspots.len(), 3);
    }

    #[tokio::test]
    async fn test_limit_bounds_window_and_rescan_picks_up_rest() {
        let store = Arc::new(MemoryStore::new());
        let events = (0..5).map(|i| warehouse_event(&format!("e{i}"), &format!("S{i}")));
        store.insert_events(events).unwrap();
        let scanner = scanner_over(store.clone(), ScriptedOracle::constant(5.0));

        assert_eq!(scanner.scan(3).await.unwrap().events_processed, 3);
        assert_eq!(scanner.scan(3).await.unwrap().events_processed, 2);
        assert_eq!(scanner.scan(3).await.unwrap().events_processed, 0);
        assert_eq!(scanner.totals().scans, 2);
        assert_eq!(scanner.totals().events, 5);
    }

    #[tokio::test]
    async fn test_failing_event_does_not_abort_batch() {
        let flaky = Arc::new(FlakyStore::default());
        flaky
            .inner
            .insert_events([warehouse_event("e1", "S1"), warehouse_event("e2", "S2")])
            .unwrap();
        let oracle = ScriptedOracle::constant(5.0);
        oracle.push(Err(OracleError::Transport("reset".into())));
        flaky.fail_baselines.store(true, Ordering::SeqCst);

        let detector = HotspotDetector::new(
            &DetectionConfig::default(),
            flaky.clone(),
            Arc::new(oracle),
            Arc::new(CountingGenerator::default()),
            Arc::new(NotificationHub::new(4)),
        );
        let scanner = BatchScanner::new(flaky.inner.clone(), Arc::new(detector), 10);

        let report = scanner.scan(10).await.unwrap();
        assert_eq!(report.events_processed, 2);
        assert_eq!(report.failures, 1);
        assert!(report.hotspots.is_empty());
    }

    struct BrokenSource;

    #[async_trait]
    impl EventSource for BrokenSource {
        async fn events_without_predictions(&self, _: usize) -> Result<Vec<Event>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn recent_events(&self, _: usize) -> Result<Vec<Event>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_window_fetch_failure_fails_scan() {
        let store = Arc::new(MemoryStore::new());
        let detector = HotspotDetector::new(
            &DetectionConfig::default(),
            store,
            Arc::new(ScriptedOracle::constant(1.0)),
            Arc::new(CountingGenerator::default()),
            Arc::new(NotificationHub::new(4)),
        );
        let scanner = BatchScanner::new(Arc::new(BrokenSource), Arc::new(detector), 10);
        let err = scanner.scan(10).await.unwrap_err();
        assert!(matches!(err, ScanError::EventSource(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_scans_until_stopped() {
        let store = Arc::new(MemoryStore::new());
        store.insert_events([warehouse_event("e1", "S1")]).unwrap();
        let scanner = Arc::new(scanner_over(store.clone(), ScriptedOracle::constant(5.0)));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_scheduler(scanner.clone(), Duration::from_secs(30), 50, stop_rx);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(scanner.totals().events, 1);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
