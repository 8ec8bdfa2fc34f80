//! Prediction oracle seam and its HTTP client for the ML engine.

use crate::config::ServiceConfig;
use crate::error::OracleError;
use crate::event::{
    DeliveryFeatures, FactoryFeatures, Features, LogisticsFeatures, WarehouseFeatures,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// What the oracle says about one event. Confidence and model version are
/// optional; the detector fills configured defaults when they are absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OracleEstimate {
    pub predicted_co2: f64,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub model_version: Option<String>,
}

impl OracleEstimate {
    pub fn value(predicted_co2: f64) -> Self {
        Self {
            predicted_co2,
            confidence_score: None,
            model_version: None,
        }
    }
}

#[async_trait]
pub trait PredictionOracle: Send + Sync {
    async fn predict_logistics(
        &self,
        features: &LogisticsFeatures,
    ) -> Result<OracleEstimate, OracleError>;
    async fn predict_factory(
        &self,
        features: &FactoryFeatures,
    ) -> Result<OracleEstimate, OracleError>;
    async fn predict_warehouse(
        &self,
        features: &WarehouseFeatures,
    ) -> Result<OracleEstimate, OracleError>;
    async fn predict_delivery(
        &self,
        features: &DeliveryFeatures,
    ) -> Result<OracleEstimate, OracleError>;
}

/// Dispatches to the profile matching the feature variant and rejects
/// non-finite outputs.
pub async fn predict(
    oracle: &dyn PredictionOracle,
    features: &Features,
) -> Result<OracleEstimate, OracleError> {
    let estimate = match features {
        Features::Logistics(f) => oracle.predict_logistics(f).await?,
        Features::Factory(f) => oracle.predict_factory(f).await?,
        Features::Warehouse(f) => oracle.predict_warehouse(f).await?,
        Features::Delivery(f) => oracle.predict_delivery(f).await?,
    };

    if !estimate.predicted_co2.is_finite() {
        return Err(OracleError::NonFinite(estimate.predicted_co2));
    }
    Ok(estimate)
}

/// Client for the ML engine's `/api/v1/predict/{type}` endpoints.
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl HttpOracle {
    pub fn new(config: &ServiceConfig) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        profile: &str,
        features: &T,
    ) -> Result<OracleEstimate, OracleError> {
        let url = format!("{}/api/v1/predict/{}", self.base_url, profile);
        let mut last_error = OracleError::Transport("no attempt made".into());

        for attempt in 0..=self.max_retries {
            match self.client.post(&url).json(features).send().await {
                Ok(response) if response.status().is_success() => {
                    let estimate = response
                        .json::<OracleEstimate>()
                        .await
                        .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
                    debug!(
                        profile,
                        predicted_co2 = estimate.predicted_co2,
                        "Oracle prediction"
                    );
                    return Ok(estimate);
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(attempt, profile, status = %status, "ML engine returned error");
                    last_error = OracleError::Status(status.as_u16());
                    // Client errors other than 429 are final.
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Err(last_error);
                    }
                }
                Err(e) => {
                    warn!(attempt, profile, error = %e, "Failed to reach ML engine");
                    last_error = OracleError::Transport(e.to_string());
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

#[async_trait]
impl PredictionOracle for HttpOracle {
    async fn predict_logistics(
        &self,
        features: &LogisticsFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        self.post("logistics", features).await
    }

    async fn predict_factory(
        &self,
        features: &FactoryFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        self.post("factory", features).await
    }

    async fn predict_warehouse(
        &self,
        features: &WarehouseFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        self.post("warehouse", features).await
    }

    async fn predict_delivery(
        &self,
        features: &DeliveryFeatures,
    ) -> Result<OracleEstimate, OracleError> {
        self.post("delivery", features).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_service;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct RecordingOracle {
        calls: Mutex<Vec<&'static str>>,
        value: f64,
    }

    impl RecordingOracle {
        fn record(&self, profile: &'static str) -> Result<OracleEstimate, OracleError> {
            self.calls.lock().unwrap().push(profile);
            Ok(OracleEstimate::value(self.value))
        }
    }

    #[async_trait]
    impl PredictionOracle for RecordingOracle {
        async fn predict_logistics(
            &self,
            _: &LogisticsFeatures,
        ) -> Result<OracleEstimate, OracleError> {
            self.record("logistics")
        }
        async fn predict_factory(
            &self,
            _: &FactoryFeatures,
        ) -> Result<OracleEstimate, OracleError> {
            self.record("factory")
        }
        async fn predict_warehouse(
            &self,
            _: &WarehouseFeatures,
        ) -> Result<OracleEstimate, OracleError> {
            self.record("warehouse")
        }
        async fn predict_delivery(
            &self,
            _: &DeliveryFeatures,
        ) -> Result<OracleEstimate, OracleError> {
            self.record("delivery")
        }
    }

    #[tokio::test]
    async fn test_dispatch_follows_variant() {
        let oracle = RecordingOracle {
            value: 12.5,
            ..Default::default()
        };
        let features = Features::Delivery(DeliveryFeatures {
            route_length: 10.0,
            vehicle_type: "van".into(),
            traffic_score: 3,
            delivery_count: 1,
        });

        let estimate = predict(&oracle, &features).await.unwrap();
        assert_eq!(estimate.predicted_co2, 12.5);
        assert_eq!(*oracle.calls.lock().unwrap(), ["delivery"]);
    }

    #[tokio::test]
    async fn test_non_finite_output_is_rejected() {
        let oracle = RecordingOracle {
            value: f64::NAN,
            ..Default::default()
        };
        let features = Features::Warehouse(WarehouseFeatures {
            temperature: 20.0,
            energy_kwh: 0.0,
            refrigeration_load: 0.0,
            inventory_volume: 0.0,
        });
        assert!(matches!(
            predict(&oracle, &features).await,
            Err(OracleError::NonFinite(_))
        ));
    }

    #[test]
    fn test_estimate_accepts_minimal_body() {
        let estimate: OracleEstimate =
            serde_json::from_str(r#"{"predicted_co2": 41.2}"#).unwrap();
        assert_eq!(estimate, OracleEstimate::value(41.2));
    }

    const WAREHOUSE_PATH: &str = "/api/v1/predict/warehouse";

    fn warehouse() -> WarehouseFeatures {
        WarehouseFeatures {
            temperature: 4.0,
            energy_kwh: 120.0,
            refrigeration_load: 30.0,
            inventory_volume: 500.0,
        }
    }

    fn http_oracle(url: String) -> HttpOracle {
        HttpOracle::new(&ServiceConfig {
            retry_base_delay_ms: 1,
            ..ServiceConfig::new(url)
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_oracle_parses_estimate() {
        let body = json!({
            "predicted_co2": 41.2,
            "confidence_score": 0.9,
            "model_version": "xgb-3"
        });
        let (url, hits) = spawn_service(WAREHOUSE_PATH, vec![(StatusCode::OK, body)]).await;

        let estimate = http_oracle(url)
            .predict_warehouse(&warehouse())
            .await
            .unwrap();
        assert_eq!(estimate.predicted_co2, 41.2);
        assert_eq!(estimate.confidence_score, Some(0.9));
        assert_eq!(estimate.model_version.as_deref(), Some("xgb-3"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_oracle_client_error_is_final() {
        let replies = vec![(StatusCode::UNPROCESSABLE_ENTITY, json!({}))];
        let (url, hits) = spawn_service(WAREHOUSE_PATH, replies).await;
        let err = http_oracle(url)
            .predict_warehouse(&warehouse())
            .await
            .unwrap_err();
        assert_eq!(err, OracleError::Status(422));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_oracle_retries_server_errors_and_throttling() {
        let replies = vec![
            (StatusCode::INTERNAL_SERVER_ERROR, json!({})),
            (StatusCode::TOO_MANY_REQUESTS, json!({})),
            (StatusCode::OK, json!({ "predicted_co2": 7.5 })),
        ];
        let (url, hits) = spawn_service(WAREHOUSE_PATH, replies).await;
        let estimate = http_oracle(url)
            .predict_warehouse(&warehouse())
            .await
            .unwrap();
        assert_eq!(estimate, OracleEstimate::value(7.5));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_http_oracle_malformed_body() {
        let body = json!({ "co2": "lots" });
        let (url, _) = spawn_service(WAREHOUSE_PATH, vec![(StatusCode::OK, body)]).await;
        let err = http_oracle(url)
            .predict_warehouse(&warehouse())
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse(_)));
    }
}
