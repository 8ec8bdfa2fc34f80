//! Severity tiers and the hotspot classifier.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity levels, ascending in concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Normal,
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
        }
    }

    pub fn is_hotspot(&self) -> bool {
        *self != Self::Normal
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ratio thresholds (predicted / baseline) at which each tier starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub info: f64,
    pub warn: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            info: 1.2,
            warn: 1.5,
            critical: 1.8,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let all = [self.info, self.warn, self.critical];
        if all.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "thresholds must be positive and finite, got {self:?}"
            )));
        }
        if !(self.info <= self.warn && self.warn <= self.critical) {
            return Err(ConfigError::Invalid(format!(
                "thresholds must ascend info <= warn <= critical, got {self:?}"
            )));
        }
        Ok(())
    }
}

/// Maps a prediction and its baseline to a severity tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotspotClassifier {
    thresholds: Thresholds,
}

impl HotspotClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// A zero baseline is itself anomalous and always classifies as critical.
    pub fn classify(&self, predicted: f64, baseline: f64) -> Severity {
        if baseline == 0.0 {
            return Severity::Critical;
        }

        let ratio = predicted / baseline;
        if ratio >= self.thresholds.critical {
            Severity::Critical
        } else if ratio >= self.thresholds.warn {
            Severity::Warn
        } else if ratio >= self.thresholds.info {
            Severity::Info
        } else {
            Severity::Normal
        }
    }

    /// Percentage above baseline; `100.0` is the sentinel for a zero baseline.
    pub fn percent_above(predicted: f64, baseline: f64) -> f64 {
        if baseline == 0.0 {
            return 100.0;
        }
        (predicted - baseline) / baseline * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_with_default_thresholds() {
        let c = HotspotClassifier::default();
        assert_eq!(c.classify(100.0, 50.0), Severity::Critical);
        assert_eq!(c.classify(80.0, 50.0), Severity::Warn);
        assert_eq!(c.classify(60.0, 50.0), Severity::Info);
        assert_eq!(c.classify(55.0, 50.0), Severity::Normal);
        assert_eq!(c.classify(10.0, 50.0), Severity::Normal);
    }

    #[test]
    fn test_threshold_boundaries_are_inclusive() {
        let c = HotspotClassifier::new(Thresholds {
            info: 1.25,
            warn: 1.5,
            critical: 2.0,
        });
        assert_eq!(c.classify(125.0, 100.0), Severity::Info);
        assert_eq!(c.classify(150.0, 100.0), Severity::Warn);
        assert_eq!(c.classify(200.0, 100.0), Severity::Critical);
    }

    #[test]
    fn test_zero_baseline_is_critical() {
        let c = HotspotClassifier::default();
        for predicted in [-5.0, 0.0, 0.001, 50.0, 1e9] {
            assert_eq!(c.classify(predicted, 0.0), Severity::Critical);
        }
        assert_eq!(HotspotClassifier::percent_above(42.0, 0.0), 100.0);
    }

    #[test]
    fn test_percent_above() {
        assert_eq!(HotspotClassifier::percent_above(100.0, 50.0), 100.0);
        assert_eq!(HotspotClassifier::percent_above(55.0, 50.0), 10.0);
        assert_eq!(HotspotClassifier::percent_above(25.0, 50.0), -50.0);
    }

    #[test]
    fn test_classification_is_monotonic_in_ratio() {
        let c = HotspotClassifier::default();
        let mut previous = Severity::Normal;
        for step in 0..400 {
            let ratio = step as f64 * 0.01;
            let severity = c.classify(ratio * 40.0, 40.0);
            assert!(severity >= previous, "ratio {ratio} dropped to {severity}");
            previous = severity;
        }
        assert_eq!(previous, Severity::Critical);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Thresholds::default().validate().is_ok());
        let descending = Thresholds {
            info: 2.0,
            warn: 1.5,
            critical: 1.2,
        };
        assert!(descending.validate().is_err());
        let zero = Thresholds {
            info: 0.0,
            ..Thresholds::default()
        };
        assert!(zero.validate().is_err());
    }
}
