// Validation report: verdict aggregation and confidence

use serde::{Deserialize, Serialize};

use crate::analyzer::CandidateReference;
use crate::indexer::model::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Outcome of checking one reference
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid {
        /// Module, class or ancestor that provides the name
        supplied_by: Option<String>,
        inherited: bool,
    },
    Hallucination {
        reason: String,
        severity: Severity,
        suggestion: Option<String>,
    },
    SignatureMismatch {
        reason: String,
        supplied_by: Option<String>,
    },
    Unverifiable {
        reason: String,
    },
}

impl Verdict {
    pub fn valid(supplied_by: impl Into<String>) -> Self {
        Verdict::Valid {
            supplied_by: Some(supplied_by.into()),
            inherited: false,
        }
    }

    pub fn unverifiable(reason: impl Into<String>) -> Self {
        Verdict::Unverifiable { reason: reason.into() }
    }

    pub fn hallucination(reason: impl Into<String>, severity: Severity, suggestion: Option<String>) -> Self {
        Verdict::Hallucination {
            reason: reason.into(),
            severity,
            suggestion,
        }
    }
}

/// A hallucination or signature mismatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub name: String,
    /// `call`, `attribute` or `import`
    pub kind: String,
    pub expression: String,
    pub location: Location,
    pub reason: String,
    pub suggested_fix: Option<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidReference {
    pub name: String,
    pub kind: String,
    pub location: Location,
    pub supplied_by: Option<String>,
    pub inherited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnverifiableReference {
    pub name: String,
    pub kind: String,
    pub location: Location,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub overall_confidence: f64,
    pub checked: usize,
    pub valid: usize,
    pub hallucinations: Vec<Finding>,
    pub signature_mismatches: Vec<Finding>,
    pub unverifiable_count: usize,
    pub valid_references: Vec<ValidReference>,
    pub unverifiable: Vec<UnverifiableReference>,
    pub repositories: Vec<String>,
    /// RFC 3339 timestamp
    pub generated_at: String,
}

impl ValidationReport {
    /// References that could be checked against the graph
    pub fn checkable(&self) -> usize {
        self.checked - self.unverifiable_count
    }

    pub fn is_clean(&self) -> bool {
        self.hallucinations.is_empty() && self.signature_mismatches.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Share of checkable references that are valid; 1.0 when nothing is checkable
pub fn confidence(valid: usize, hallucinations: usize, mismatches: usize) -> f64 {
    let denominator = valid + hallucinations + mismatches;
    if denominator == 0 {
        return 1.0;
    }
    valid as f64 / denominator as f64
}

/// Display name of a reference: `receiver.member`, or the import origin
pub fn reference_name(reference: &CandidateReference) -> String {
    if let Some(import) = &reference.import {
        return import.origin();
    }
    let receiver = reference.receiver.to_string();
    if receiver.is_empty() {
        reference.member.clone()
    } else {
        format!("{}.{}", receiver, reference.member)
    }
}

/// Collects verdicts in source order
pub struct ReportBuilder {
    repositories: Vec<String>,
    valid: Vec<ValidReference>,
    hallucinations: Vec<Finding>,
    mismatches: Vec<Finding>,
    unverifiable: Vec<UnverifiableReference>,
}

impl ReportBuilder {
    pub fn new(repositories: Vec<String>) -> Self {
        Self {
            repositories,
            valid: Vec::new(),
            hallucinations: Vec::new(),
            mismatches: Vec::new(),
            unverifiable: Vec::new(),
        }
    }

    pub fn record(&mut self, reference: &CandidateReference, verdict: Verdict) {
        let name = reference_name(reference);
        let kind = reference.kind.category().to_string();

        match verdict {
            Verdict::Valid { supplied_by, inherited } => self.valid.push(ValidReference {
                name,
                kind,
                location: reference.location,
                supplied_by,
                inherited,
            }),
            Verdict::Hallucination {
                reason,
                severity,
                suggestion,
            } => self.hallucinations.push(Finding {
                name,
                kind,
                expression: reference.expression.clone(),
                location: reference.location,
                reason,
                suggested_fix: suggestion,
                severity,
            }),
            Verdict::SignatureMismatch { reason, .. } => self.mismatches.push(Finding {
                name,
                kind,
                expression: reference.expression.clone(),
                location: reference.location,
                reason,
                suggested_fix: None,
                severity: Severity::Medium,
            }),
            Verdict::Unverifiable { reason } => self.unverifiable.push(UnverifiableReference {
                name,
                kind,
                location: reference.location,
                reason,
            }),
        }
    }

    pub fn finish(self) -> ValidationReport {
        let valid = self.valid.len();
        let checked = valid + self.hallucinations.len() + self.mismatches.len() + self.unverifiable.len();

        ValidationReport {
            overall_confidence: confidence(valid, self.hallucinations.len(), self.mismatches.len()),
            checked,
            valid,
            unverifiable_count: self.unverifiable.len(),
            hallucinations: self.hallucinations,
            signature_mismatches: self.mismatches,
            valid_references: self.valid,
            unverifiable: self.unverifiable,
            repositories: self.repositories,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
