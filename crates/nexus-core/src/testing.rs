//! In-memory fakes shared by unit tests.

use crate::error::{OracleError, RecommendError, StoreError};
use crate::event::{
    DeliveryFeatures, EntityRef, Event, FactoryFeatures, LogisticsFeatures, WarehouseFeatures,
};
use crate::oracle::{OracleEstimate, PredictionOracle};
use crate::recommend::{RecommendationGenerator, RecommendationRequest};
use crate::records::{Alert, Baseline, Hotspot, Prediction, Recommendation, RecommendationStatus};
use crate::store::{EmissionsStore, MemoryStore};
use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub fn warehouse_event(id: &str, supplier: &str) -> Event {
    Event {
        supplier_id: Some(supplier.into()),
        ..Event::new(id, "warehouse")
    }
}

/// Answers from a queue of values, then repeats `fallback`.
#[derive(Default)]
pub struct ScriptedOracle {
    queue: Mutex<VecDeque<Result<OracleEstimate, OracleError>>>,
    fallback: f64,
    pub calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn constant(value: f64) -> Self {
        Self {
            fallback: value,
            ..Default::default()
        }
    }

    pub fn values(values: &[f64]) -> Self {
        let oracle = Self::default();
        for v in values {
            oracle.push(Ok(OracleEstimate::value(*v)));
        }
        oracle
    }

    pub fn push(&self, answer: Result<OracleEstimate, OracleError>) {
        self.queue.lock().unwrap().push_back(answer);
    }

    fn answer(&self) -> Result<OracleEstimate, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(OracleEstimate::value(self.fallback)))
    }
}

#[async_trait]
impl PredictionOracle for ScriptedOracle {
    async fn predict_logistics(
        &self,
        _: &LogisticsFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        self.answer()
    }
    async fn predict_factory(&self, _: &FactoryFeatures) -> Result<OracleEstimate, OracleError> {
        self.answer()
    }
    async fn predict_warehouse(
        &self,
        _: &WarehouseFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        self.answer()
    }
    async fn predict_delivery(&self, _: &DeliveryFeatures) -> Result<OracleEstimate, OracleError> {
        self.answer()
    }
}

/// Wraps a [`MemoryStore`] with switchable failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub fail_baselines: AtomicBool,
    pub fail_alerts: AtomicBool,
    pub fail_recommendations: AtomicBool,
    pub decline_hotspots: AtomicBool,
}

fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        Err(StoreError::Unavailable(format!("{what} offline")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl EmissionsStore for FlakyStore {
    async fn baseline(&self, entity: &EntityRef) -> Result<Option<Baseline>, StoreError> {
        check(&self.fail_baselines, "baselines")?;
        self.inner.baseline(entity).await
    }

    async fn upsert_baseline(&self, baseline: Baseline) -> Result<(), StoreError> {
        check(&self.fail_baselines, "baselines")?;
        self.inner.upsert_baseline(baseline).await
    }

    async fn predictions_by_entity(
        &self,
        entity: &str,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError> {
        self.inner.predictions_by_entity(entity, limit).await
    }

    async fn insert_prediction(&self, prediction: Prediction) -> Result<(), StoreError> {
        self.inner.insert_prediction(prediction).await
    }

    async fn insert_hotspot(&self, hotspot: Hotspot) -> Result<Option<Hotspot>, StoreError> {
        if self.decline_hotspots.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.insert_hotspot(hotspot).await
    }

    async fn insert_alert(&self, alert: Alert) -> Result<Option<Alert>, StoreError> {
        check(&self.fail_alerts, "alerts")?;
        self.inner.insert_alert(alert).await
    }

    async fn recommendations_by_entity(
        &self,
        entity: &str,
        status: RecommendationStatus,
    ) -> Result<Vec<Recommendation>, StoreError> {
        check(&self.fail_recommendations, "recommendations")?;
        self.inner.recommendations_by_entity(entity, status).await
    }

    async fn insert_recommendation(
        &self,
        recommendation: Recommendation,
    ) -> Result<(), StoreError> {
        check(&self.fail_recommendations, "recommendations")?;
        self.inner.insert_recommendation(recommendation).await
    }
}

/// Always proposes one pending recommendation unless `empty`.
#[derive(Default)]
pub struct CountingGenerator {
    pub calls: AtomicUsize,
    pub empty: bool,
}

#[async_trait]
impl RecommendationGenerator for CountingGenerator {
    async fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Option<Recommendation>, RecommendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.empty {
            return Ok(None);
        }
        Ok(Some(Recommendation::pending(
            request.supplier.clone(),
            Some(request.hotspot_id),
            "Switch to rail freight",
        )))
    }
}

#[derive(Clone)]
struct ServiceScript {
    hits: Arc<AtomicUsize>,
    replies: Arc<Vec<(StatusCode, Value)>>,
}

async fn scripted_reply(State(script): State<ServiceScript>) -> (StatusCode, Json<Value>) {
    let n = script.hits.fetch_add(1, Ordering::SeqCst);
    let (status, body) = &script.replies[n.min(script.replies.len() - 1)];
    (*status, Json(body.clone()))
}

/// Local HTTP service answering POSTs on `path` with `replies` in order, the
/// last one repeating. Returns the base URL and a hit counter.
pub async fn spawn_service(
    path: &str,
    replies: Vec<(StatusCode, Value)>,
) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(path, post(scripted_reply))
        .with_state(ServiceScript {
            hits: hits.clone(),
            replies: Arc::new(replies),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}
