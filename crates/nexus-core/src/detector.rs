//! Per-event hotspot detection.
//!
//! predict -> persist prediction -> resolve baseline -> classify -> persist
//! hotspot -> alert, notify, recommend. Every step before the hotspot insert
//! can end the workflow early; the steps after it are independent side effects
//! whose failures are logged and counted but never returned.

use crate::baseline::BaselineResolver;
use crate::config::DetectionConfig;
use crate::error::{DetectError, NotifyError};
use crate::event::{EntityRef, Event, Features, SkipReason};
use crate::metrics::{HOTSPOTS_TOTAL, PREDICTIONS_TOTAL, SIDE_EFFECT_FAILURES, SKIPPED_TOTAL};
use crate::notify::{NotificationSink, emit_alert, emit_hotspot};
use crate::oracle::{self, PredictionOracle};
use crate::recommend::{GateOutcome, RecommendationGate, RecommendationGenerator};
use crate::records::{Alert, Hotspot, HotspotStatus, Prediction};
use crate::severity::{HotspotClassifier, Severity};
use crate::store::EmissionsStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How one event's detection ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// No prediction could be obtained; nothing was written.
    Skipped(SkipReason),
    /// First observation for the entity became its baseline.
    Bootstrapped { predicted: f64 },
    Normal { predicted: f64, baseline: f64 },
    /// Store did not keep the hotspot.
    Declined { predicted: f64, severity: Severity },
    Hotspot(Hotspot),
}

impl Detection {
    /// Whether a prediction was recorded for the event.
    pub fn has_prediction(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }

    pub fn hotspot(&self) -> Option<&Hotspot> {
        match self {
            Self::Hotspot(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_hotspot(self) -> Option<Hotspot> {
        match self {
            Self::Hotspot(h) => Some(h),
            _ => None,
        }
    }
}

pub struct HotspotDetector {
    store: Arc<dyn EmissionsStore>,
    oracle: Arc<dyn PredictionOracle>,
    notifier: Arc<dyn NotificationSink>,
    resolver: BaselineResolver,
    classifier: HotspotClassifier,
    recommendations: RecommendationGate,
    default_confidence_score: f64,
    default_model_version: String,
}

impl HotspotDetector {
    pub fn new(
        config: &DetectionConfig,
        store: Arc<dyn EmissionsStore>,
        oracle: Arc<dyn PredictionOracle>,
        generator: Arc<dyn RecommendationGenerator>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            resolver: BaselineResolver::new(
                store.clone(),
                config.baseline_history_limit,
                config.baseline_min_history,
            ),
            classifier: HotspotClassifier::new(config.thresholds),
            recommendations: RecommendationGate::new(store.clone(), generator, notifier.clone()),
            store,
            oracle,
            notifier,
            default_confidence_score: config.default_confidence_score,
            default_model_version: config.default_model_version.clone(),
        }
    }

    pub fn classifier(&self) -> &HotspotClassifier {
        &self.classifier
    }

    pub async fn detect(&self, event: &Event) -> Result<Option<Hotspot>, DetectError> {
        Ok(self.evaluate(event).await?.into_hotspot())
    }

    pub async fn evaluate(&self, event: &Event) -> Result<Detection, DetectError> {
        let entity = event.entity();

        let features = match Features::from_event(event) {
            Ok(features) => features,
            Err(reason) => return Ok(skip(event, &entity, reason)),
        };
        let estimate = match oracle::predict(self.oracle.as_ref(), &features).await {
            Ok(estimate) => estimate,
            Err(e) => return Ok(skip(event, &entity, SkipReason::Oracle(e))),
        };

        let prediction_type = features.event_type();
        let predicted = estimate.predicted_co2;
        self.store
            .insert_prediction(Prediction {
                id: Uuid::new_v4(),
                event_id: event.id.clone(),
                entity: entity.name.clone(),
                prediction_type,
                predicted_co2: predicted,
                confidence_score: estimate
                    .confidence_score
                    .unwrap_or(self.default_confidence_score),
                model_version: estimate
                    .model_version
                    .unwrap_or_else(|| self.default_model_version.clone()),
                features,
                created_at: Utc::now(),
            })
            .await?;
        PREDICTIONS_TOTAL
            .with_label_values(&[prediction_type.as_str()])
            .inc();
        debug!(event_id = %event.id, entity = %entity, predicted, "Prediction recorded");

        let resolution = self.resolver.resolve(&entity).await?;
        let Some(baseline) = resolution.value() else {
            self.resolver.bootstrap(&entity, predicted).await?;
            return Ok(Detection::Bootstrapped { predicted });
        };

        let severity = self.classifier.classify(predicted, baseline);
        if !severity.is_hotspot() {
            debug!(entity = %entity, predicted, baseline, "Within baseline");
            return Ok(Detection::Normal {
                predicted,
                baseline,
            });
        }

        let candidate = Hotspot {
            id: Uuid::new_v4(),
            entity: entity.name.clone(),
            entity_type: entity.kind,
            predicted_co2: predicted,
            baseline_co2: baseline,
            percent_above: HotspotClassifier::percent_above(predicted, baseline),
            severity,
            status: HotspotStatus::Active,
            event_id: event.id.clone(),
            created_at: Utc::now(),
        };
        let Some(hotspot) = self.store.insert_hotspot(candidate).await? else {
            warn!(entity = %entity, %severity, "Store declined hotspot");
            return Ok(Detection::Declined {
                predicted,
                severity,
            });
        };

        HOTSPOTS_TOTAL.with_label_values(&[severity.as_str()]).inc();
        if severity == Severity::Critical {
            warn!(
                entity = %entity,
                predicted,
                baseline,
                percent_above = hotspot.percent_above,
                "CRITICAL HOTSPOT: {}",
                hotspot.reason()
            );
        } else {
            info!(
                entity = %entity,
                %severity,
                percent_above = hotspot.percent_above,
                "Hotspot detected"
            );
        }

        self.raise_alert(&hotspot).await;
        report_notification("hotspot", emit_hotspot(self.notifier.as_ref(), &hotspot));
        self.recommend(&hotspot).await;

        Ok(Detection::Hotspot(hotspot))
    }

    async fn raise_alert(&self, hotspot: &Hotspot) {
        match self.store.insert_alert(Alert::for_hotspot(hotspot)).await {
            Ok(Some(alert)) => {
                report_notification("alert", emit_alert(self.notifier.as_ref(), &alert));
            }
            Ok(None) => debug!(hotspot = %hotspot.id, "Store declined alert"),
            Err(e) => {
                SIDE_EFFECT_FAILURES.with_label_values(&["alert"]).inc();
                warn!(hotspot = %hotspot.id, error = %e, "Failed to persist alert");
            }
        }
    }

    async fn recommend(&self, hotspot: &Hotspot) {
        match self.recommendations.recommend_for(hotspot).await {
            Ok(GateOutcome::Cached { pending }) => {
                debug!(entity = %hotspot.entity, pending, "Recommendation generation skipped");
            }
            Ok(_) => {}
            Err(e) => {
                SIDE_EFFECT_FAILURES
                    .with_label_values(&["recommendation"])
                    .inc();
                warn!(entity = %hotspot.entity, error = %e, "Recommendation generation failed");
            }
        }
    }
}

fn skip(event: &Event, entity: &EntityRef, reason: SkipReason) -> Detection {
    SKIPPED_TOTAL.with_label_values(&[reason.label()]).inc();
    warn!(event_id = %event.id, entity = %entity, reason = %reason, "Skipping event");
    Detection::Skipped(reason)
}

/// Nobody listening is normal; anything else counts as a failure.
fn report_notification(kind: &str, result: Result<crate::notify::Delivery, NotifyError>) {
    match result {
        Ok(delivery) => debug!(
            kind,
            subscribers = delivery.subscribers,
            "Notification emitted"
        ),
        Err(NotifyError::NoSubscribers(channel)) => {
            debug!(kind, %channel, "No subscribers for notification");
        }
        Err(e) => {
            SIDE_EFFECT_FAILURES
                .with_label_values(&["notification"])
                .inc();
            warn!(kind, error = %e, "Failed to emit notification");
        }
    }
}
