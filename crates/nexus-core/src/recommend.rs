//! Recommendation generation behind a per-entity cache gate.
//!
//! Generation is expensive, so while an entity still has a pending
//! recommendation no new one is requested. Pending ones may go stale; that
//! is accepted.

use crate::config::ServiceConfig;
use crate::error::RecommendError;
use crate::metrics::RECOMMENDATION_CACHE_HITS;
use crate::notify::{NotificationSink, emit_recommendation};
use crate::records::{Hotspot, Recommendation, RecommendationStatus};
use crate::store::EmissionsStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input handed to the generator for one hotspot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRequest {
    pub supplier: String,
    pub predicted: f64,
    pub baseline: f64,
    pub hotspot_reason: String,
    pub hotspot_id: Uuid,
}

impl RecommendationRequest {
    pub fn for_hotspot(hotspot: &Hotspot) -> Self {
        Self {
            supplier: hotspot.entity.clone(),
            predicted: hotspot.predicted_co2,
            baseline: hotspot.baseline_co2,
            hotspot_reason: hotspot.reason(),
            hotspot_id: hotspot.id,
        }
    }
}

#[async_trait]
pub trait RecommendationGenerator: Send + Sync {
    async fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Option<Recommendation>, RecommendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Pending recommendations already exist; generator not called.
    Cached { pending: usize },
    Generated(Recommendation),
    /// Generator ran but had nothing to say.
    Empty,
}

pub struct RecommendationGate {
    store: Arc<dyn EmissionsStore>,
    generator: Arc<dyn RecommendationGenerator>,
    notifier: Arc<dyn NotificationSink>,
}

impl RecommendationGate {
    pub fn new(
        store: Arc<dyn EmissionsStore>,
        generator: Arc<dyn RecommendationGenerator>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            generator,
            notifier,
        }
    }

    pub async fn recommend_for(&self, hotspot: &Hotspot) -> Result<GateOutcome, RecommendError> {
        let pending = self
            .store
            .recommendations_by_entity(&hotspot.entity, RecommendationStatus::Pending)
            .await?;
        if !pending.is_empty() {
            RECOMMENDATION_CACHE_HITS.inc();
            info!(
                entity = %hotspot.entity,
                pending = pending.len(),
                "Using cached recommendations"
            );
            return Ok(GateOutcome::Cached {
                pending: pending.len(),
            });
        }

        let request = RecommendationRequest::for_hotspot(hotspot);
        let Some(recommendation) = self.generator.generate_recommendations(&request).await? else {
            debug!(entity = %hotspot.entity, "Generator returned no recommendation");
            return Ok(GateOutcome::Empty);
        };

        self.store
            .insert_recommendation(recommendation.clone())
            .await?;
        info!(
            entity = %hotspot.entity,
            hotspot = %hotspot.id,
            recommendation = %recommendation.id,
            "Recommendation generated"
        );

        if let Err(e) = emit_recommendation(self.notifier.as_ref(), &recommendation) {
            debug!(error = %e, "Recommendation notification not delivered");
        }
        Ok(GateOutcome::Generated(recommendation))
    }
}

/// What the recommendation service sends back.
#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    recommendation: Option<GeneratedRecommendation>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeneratedRecommendation {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    co2_reduction: Option<f64>,
}

/// Client for `POST {url}/api/v1/recommendations/generate`.
pub struct HttpRecommendationClient {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl HttpRecommendationClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, RecommendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RecommendError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: format!(
                "{}/api/v1/recommendations/generate",
                config.url.trim_end_matches('/')
            ),
            max_retries: config.max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
        })
    }
}

#[async_trait]
impl RecommendationGenerator for HttpRecommendationClient {
    async fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Option<Recommendation>, RecommendError> {
        let mut last_error = RecommendError::Transport("no attempt made".into());

        for attempt in 0..=self.max_retries {
            match self.client.post(&self.url).json(request).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response
                        .json::<GenerateResponse>()
                        .await
                        .map_err(|e| RecommendError::InvalidResponse(e.to_string()))?;
                    return Ok(body.recommendation.map(|g| Recommendation {
                        id: Uuid::new_v4(),
                        entity: request.supplier.clone(),
                        hotspot_id: Some(request.hotspot_id),
                        title: g.title,
                        description: g.description,
                        co2_reduction: g.co2_reduction,
                        status: RecommendationStatus::Pending,
                        created_at: Utc::now(),
                    }));
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(attempt, status = %status, "Recommendation service returned error");
                    last_error = RecommendError::Status(status.as_u16());
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Err(last_error);
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to reach recommendation service");
                    last_error = RecommendError::Transport(e.to_string());
                }
            }

            if attempt < self.max_retries {
                let delay = self.retry_base_delay_ms * (1 << attempt);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(last_error)
    }
}
