//! Response validator
//!
//! Runs a fixed battery of independent checks against a generated
//! payload and the organization's ground truth: monetary bounds, entity
//! existence, date ranges, percentage ranges, and an aggregate savings
//! cross-check. Data issues never raise; absent fields simply yield
//! zero findings for their check.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use siq_core::{Severity, ValidationFinding, ValidationReport};

/// Confidence assumed when the payload claims none, or claims one
/// outside [0, 1].
const DEFAULT_CONFIDENCE: f64 = 0.8;

const CRITICAL_PENALTY: f64 = 0.30;
const ERROR_PENALTY: f64 = 0.15;
const WARNING_PENALTY: f64 = 0.05;

/// Ground truth for one organization, sourced from spend aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgFacts {
    pub org_id: i64,
    pub total_spend: f64,
    pub supplier_names: Vec<String>,
    pub category_names: Vec<String>,
    pub earliest_transaction: Option<NaiveDate>,
    pub latest_transaction: Option<NaiveDate>,
    /// Per-insight savings previously predicted by the candidate engine
    pub predicted_insight_savings: Vec<f64>,
}

/// The structured payload shape backends are asked to produce. Every
/// field is optional so a partially honored schema still validates
/// field by field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsightPayload {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub total_savings: Option<f64>,
    #[serde(default)]
    pub insights: Vec<InsightClaim>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsightClaim {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub suppliers: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub estimated_savings: Option<f64>,
    #[serde(default)]
    pub savings_percent: Option<f64>,
    #[serde(default)]
    pub roi_percent: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionClaim>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionClaim {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_savings: Option<f64>,
}

/// Stateless validator; construct once, use for any organization.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a whole generated response against organizational ground
    /// truth. Always returns a report; malformed payloads fall back to a
    /// recursive name scan for the entity check only.
    pub fn validate_response(
        &self,
        payload: &serde_json::Value,
        facts: &OrgFacts,
    ) -> ValidationReport {
        let mut findings = Vec::new();

        match serde_json::from_value::<InsightPayload>(payload.clone()) {
            Ok(parsed) => {
                self.check_monetary(&parsed, facts, &mut findings);
                self.check_entities(&parsed, facts, &mut findings);
                self.check_dates(&parsed, facts, &mut findings);
                self.check_percentages(&parsed, &mut findings);
                self.check_aggregate_savings(&parsed, facts, &mut findings);
            }
            Err(e) => {
                // Legacy payload shape: harvest name claims from the raw
                // JSON so the entity check still runs
                debug!(error = %e, "Payload did not match insight schema, using legacy scan");
                self.legacy_entity_scan(payload, facts, &mut findings);
            }
        }

        self.build_report(payload, findings)
    }

    /// Lighter per-item review: monetary bound and entity existence only.
    pub fn validate_single_insight(
        &self,
        claim: &serde_json::Value,
        facts: &OrgFacts,
    ) -> ValidationReport {
        let mut findings = Vec::new();

        match serde_json::from_value::<InsightClaim>(claim.clone()) {
            Ok(parsed) => {
                if let Some(value) = parsed.estimated_savings {
                    self.check_amount(value, "estimated_savings", facts, &mut findings);
                }
                self.check_claim_entities(&parsed, "", facts, &mut findings);
            }
            Err(_) => {
                self.legacy_entity_scan(claim, facts, &mut findings);
            }
        }

        self.build_report(claim, findings)
    }

    fn build_report(
        &self,
        payload: &serde_json::Value,
        findings: Vec<ValidationFinding>,
    ) -> ValidationReport {
        let original = claimed_confidence(payload);

        let criticals = findings.iter().filter(|f| f.severity == Severity::Critical).count();
        let errors = findings.iter().filter(|f| f.severity == Severity::Error).count();
        let warnings = findings.iter().filter(|f| f.severity == Severity::Warning).count();

        let penalty = criticals as f64 * CRITICAL_PENALTY
            + errors as f64 * ERROR_PENALTY
            + warnings as f64 * WARNING_PENALTY;
        let adjusted = (original * (1.0 - penalty)).clamp(0.0, 1.0);

        ValidationReport {
            validated: criticals == 0 && errors == 0,
            original_confidence: original,
            adjusted_confidence: adjusted,
            findings,
        }
    }

    /// Monetary bound: no claimed figure may exceed total observed spend.
    fn check_monetary(
        &self,
        payload: &InsightPayload,
        facts: &OrgFacts,
        findings: &mut Vec<ValidationFinding>,
    ) {
        if let Some(value) = payload.total_savings {
            self.check_amount(value, "total_savings", facts, findings);
        }
        for (i, insight) in payload.insights.iter().enumerate() {
            if let Some(value) = insight.estimated_savings {
                self.check_amount(
                    value,
                    &format!("insights[{}].estimated_savings", i),
                    facts,
                    findings,
                );
            }
            for (j, action) in insight.actions.iter().enumerate() {
                if let Some(value) = action.estimated_savings {
                    self.check_amount(
                        value,
                        &format!("insights[{}].actions[{}].estimated_savings", i, j),
                        facts,
                        findings,
                    );
                }
            }
        }
    }

    fn check_amount(
        &self,
        value: f64,
        field: &str,
        facts: &OrgFacts,
        findings: &mut Vec<ValidationFinding>,
    ) {
        if facts.total_spend <= 0.0 {
            return;
        }
        if value > facts.total_spend {
            findings.push(
                ValidationFinding::new(
                    field,
                    "Claimed amount exceeds total organizational spend",
                    Severity::Critical,
                )
                .with_values(value, facts.total_spend),
            );
        } else if value > facts.total_spend * 0.5 {
            findings.push(
                ValidationFinding::new(
                    field,
                    "Claimed amount exceeds 50% of total spend, verify accuracy",
                    Severity::Warning,
                )
                .with_values(value, facts.total_spend * 0.5),
            );
        }
    }

    /// Entity existence: every referenced supplier/category name must
    /// match an active record, case-insensitive. Unmatched names are
    /// unverifiable, not necessarily wrong.
    fn check_entities(
        &self,
        payload: &InsightPayload,
        facts: &OrgFacts,
        findings: &mut Vec<ValidationFinding>,
    ) {
        for (i, insight) in payload.insights.iter().enumerate() {
            self.check_claim_entities(insight, &format!("insights[{}].", i), facts, findings);
        }
    }

    fn check_claim_entities(
        &self,
        claim: &InsightClaim,
        prefix: &str,
        facts: &OrgFacts,
        findings: &mut Vec<ValidationFinding>,
    ) {
        let mut suppliers: Vec<&str> = claim.suppliers.iter().map(String::as_str).collect();
        if let Some(name) = claim.supplier.as_deref() {
            suppliers.push(name);
        }
        for name in suppliers {
            if !matches_ignore_case(&facts.supplier_names, name) {
                findings.push(ValidationFinding::new(
                    format!("{}supplier", prefix),
                    format!("Supplier '{}' does not match any active supplier", name),
                    Severity::Warning,
                ));
            }
        }
        if let Some(name) = claim.category.as_deref() {
            if !matches_ignore_case(&facts.category_names, name) {
                findings.push(ValidationFinding::new(
                    format!("{}category", prefix),
                    format!("Category '{}' does not match any active category", name),
                    Severity::Warning,
                ));
            }
        }
    }

    /// Date sanity: inverted ranges are errors, dates outside the known
    /// transaction window are warnings. Unparseable date strings are
    /// ignored.
    fn check_dates(
        &self,
        payload: &InsightPayload,
        facts: &OrgFacts,
        findings: &mut Vec<ValidationFinding>,
    ) {
        for (i, insight) in payload.insights.iter().enumerate() {
            let start = insight.start_date.as_deref().and_then(parse_date);
            let end = insight.end_date.as_deref().and_then(parse_date);

            if let (Some(start), Some(end)) = (start, end) {
                if start > end {
                    findings.push(ValidationFinding::new(
                        format!("insights[{}].start_date", i),
                        "Start date is after end date",
                        Severity::Error,
                    ));
                }
            }

            for (suffix, date) in [("start_date", start), ("end_date", end)] {
                let Some(date) = date else { continue };
                let before = facts.earliest_transaction.is_some_and(|b| date < b);
                let after = facts.latest_transaction.is_some_and(|b| date > b);
                if before || after {
                    findings.push(ValidationFinding::new(
                        format!("insights[{}].{}", i, suffix),
                        "Date falls outside the known transaction range",
                        Severity::Warning,
                    ));
                }
            }
        }
    }

    /// Percentage range: outside [0, 100] is an error; above 50 draws a
    /// verification warning.
    fn check_percentages(&self, payload: &InsightPayload, findings: &mut Vec<ValidationFinding>) {
        for (i, insight) in payload.insights.iter().enumerate() {
            for (suffix, value) in [
                ("savings_percent", insight.savings_percent),
                ("roi_percent", insight.roi_percent),
            ] {
                let Some(value) = value else { continue };
                let field = format!("insights[{}].{}", i, suffix);
                if !(0.0..=100.0).contains(&value) {
                    findings.push(
                        ValidationFinding::new(
                            field,
                            "Percentage is outside the valid range [0, 100]",
                            Severity::Error,
                        )
                        .with_values(value, 100.0),
                    );
                } else if value > 50.0 {
                    findings.push(
                        ValidationFinding::new(
                            field,
                            "Percentage above 50% is unusually high, verify accuracy",
                            Severity::Warning,
                        )
                        .with_values(value, 50.0),
                    );
                }
            }
        }
    }

    /// Aggregate cross-check: claimed per-action savings should not wildly
    /// exceed what the candidate engine predicted. A warning, not an
    /// error, since aggregation assumptions can legitimately differ.
    fn check_aggregate_savings(
        &self,
        payload: &InsightPayload,
        facts: &OrgFacts,
        findings: &mut Vec<ValidationFinding>,
    ) {
        let predicted: f64 = facts.predicted_insight_savings.iter().sum();
        if predicted <= 0.0 {
            return;
        }
        let claimed: f64 = payload
            .insights
            .iter()
            .flat_map(|insight| insight.actions.iter())
            .filter_map(|action| action.estimated_savings)
            .sum();
        if claimed > predicted * 2.0 {
            findings.push(
                ValidationFinding::new(
                    "insights.actions.estimated_savings",
                    "Sum of claimed action savings exceeds twice the predicted total",
                    Severity::Warning,
                )
                .with_values(claimed, predicted * 2.0),
            );
        }
    }

    /// Recursive walk for legacy payload shapes: any string value under a
    /// key naming a supplier or category is checked against the active
    /// records.
    fn legacy_entity_scan(
        &self,
        value: &serde_json::Value,
        facts: &OrgFacts,
        findings: &mut Vec<ValidationFinding>,
    ) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, child) in map {
                    let lower = key.to_lowercase();
                    if let Some(name) = child.as_str() {
                        if lower.contains("supplier")
                            && !matches_ignore_case(&facts.supplier_names, name)
                        {
                            findings.push(ValidationFinding::new(
                                key.clone(),
                                format!("Supplier '{}' does not match any active supplier", name),
                                Severity::Warning,
                            ));
                        } else if lower.contains("category")
                            && !matches_ignore_case(&facts.category_names, name)
                        {
                            findings.push(ValidationFinding::new(
                                key.clone(),
                                format!("Category '{}' does not match any active category", name),
                                Severity::Warning,
                            ));
                        }
                    }
                    self.legacy_entity_scan(child, facts, findings);
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.legacy_entity_scan(item, facts, findings);
                }
            }
            _ => {}
        }
    }
}

fn matches_ignore_case(names: &[String], candidate: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(candidate.trim()))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

/// Confidence claimed by the payload, defaulting to 0.8 when absent or
/// out of [0, 1].
fn claimed_confidence(payload: &serde_json::Value) -> f64 {
    match payload.get("confidence").and_then(|v| v.as_f64()) {
        Some(value) if (0.0..=1.0).contains(&value) => value,
        _ => DEFAULT_CONFIDENCE,
    }
}
