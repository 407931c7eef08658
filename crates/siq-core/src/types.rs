//! Common types used across the Spend-IQ insight pipeline

use serde::{Deserialize, Serialize};

/// Kinds of insight requests served by the pipeline.
///
/// The cache keys entries by request kind so that, for example, an
/// `enhance` response is never served for a `deep_analysis` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Augment precomputed dashboard statistics with narrative insights
    Enhance,
    /// Review of a single candidate insight
    SingleInsight,
    /// Full multi-insight analysis over an organization's spend
    DeepAnalysis,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Enhance => "enhance",
            RequestKind::SingleInsight => "single_insight",
            RequestKind::DeepAnalysis => "deep_analysis",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a validation finding. Ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// A single issue found while validating a generated response.
///
/// Produced transiently per validation call and never persisted; callers
/// may log the findings they care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFinding {
    /// Path of the offending field, e.g. `insights[2].estimated_savings`
    pub field: String,
    /// Human-readable description of the issue
    pub issue: String,
    pub severity: Severity,
    /// The value the response claimed, when numeric
    pub claimed: Option<f64>,
    /// The bound the claim was checked against, when numeric
    pub bound: Option<f64>,
}

impl ValidationFinding {
    pub fn new(
        field: impl Into<String>,
        issue: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
            severity,
            claimed: None,
            bound: None,
        }
    }

    pub fn with_values(mut self, claimed: f64, bound: f64) -> Self {
        self.claimed = Some(claimed);
        self.bound = Some(bound);
        self
    }
}

/// Outcome of validating one generated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
    /// True when there are no critical or error findings
    pub validated: bool,
    /// Confidence the response claimed (or the 0.8 default)
    pub original_confidence: f64,
    /// Confidence after the severity penalty, clamped to [0, 1]
    pub adjusted_confidence: f64,
}

impl ValidationReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

/// Per-backend state tracked by the orchestrator.
///
/// Constructed once per orchestrator instance from configuration, mutated
/// only by call outcomes, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub name: String,
    pub available: bool,
    pub last_error: Option<String>,
    pub last_success: bool,
}

impl ProviderState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            last_error: None,
            last_success: false,
        }
    }
}

/// Result of a backend health probe. Health checks never fail; failures
/// are folded into the status itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_round_trip() {
        assert_eq!(RequestKind::Enhance.as_str(), "enhance");
        assert_eq!(RequestKind::SingleInsight.as_str(), "single_insight");
        assert_eq!(RequestKind::DeepAnalysis.as_str(), "deep_analysis");

        let json = serde_json::to_string(&RequestKind::DeepAnalysis).unwrap();
        assert_eq!(json, "\"deep_analysis\"");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
    }

    #[test]
    fn test_report_counts() {
        let report = ValidationReport {
            findings: vec![
                ValidationFinding::new("a", "x", Severity::Warning),
                ValidationFinding::new("b", "y", Severity::Critical),
                ValidationFinding::new("c", "z", Severity::Warning),
            ],
            validated: false,
            original_confidence: 0.8,
            adjusted_confidence: 0.5,
        };
        assert_eq!(report.count(Severity::Warning), 2);
        assert_eq!(report.count(Severity::Critical), 1);
        assert_eq!(report.count(Severity::Error), 0);
    }

    #[test]
    fn test_provider_state_initial() {
        let state = ProviderState::new("openai");
        assert!(state.available);
        assert!(!state.last_success);
        assert!(state.last_error.is_none());
    }
}
