// ⚖️ Reconciliation Engine - Validate a pump's RFID configuration
// Compares the tags a pump is supposed to carry with the tags an operator scanned.
//
// Following the rule:
//   missing    = expected - scanned
//   unexpected = scanned - expected
//   success   <=> main tag matches AND missing = {} AND unexpected = {}
//
// The engine is pure. It never touches storage; the service layer decides
// what to persist from the report it returns.

use crate::tags::{TagId, TagSet};
use serde::{Deserialize, Serialize};

// ============================================================================
// VERDICT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Main tag and every child tag accounted for
    Success,

    /// Anything else: wrong main tag, missing or unexpected child tags
    Failed,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Verdict> {
        match value {
            "success" => Some(Verdict::Success),
            "failed" => Some(Verdict::Failed),
            _ => None,
        }
    }
}

// ============================================================================
// VERIFICATION DETAILS (wire shape of the diff)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub expected_count: usize,
    pub scanned_count: usize,
    pub missing_tags: Vec<String>,
    pub unexpected_tags: Vec<String>,
    pub main_tag_matches: bool,
}

// ============================================================================
// DISCREPANCIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    MainTagMismatch,
    MissingTag,
    UnexpectedTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub category: DiscrepancyCategory,
    pub tag: String,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub verdict: Verdict,
    pub details: VerificationDetails,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationReport {
    /// Human-readable outcome stored with the session and returned to the operator
    pub fn message(&self) -> String {
        if self.discrepancies.is_empty() {
            return "All tags verified".to_string();
        }

        let count = |category: DiscrepancyCategory| {
            self.discrepancies
                .iter()
                .filter(|d| d.category == category)
                .count()
        };

        let mut parts = Vec::new();
        if count(DiscrepancyCategory::MainTagMismatch) > 0 {
            parts.push("main tag mismatch".to_string());
        }
        let missing = count(DiscrepancyCategory::MissingTag);
        if missing > 0 {
            parts.push(format!("{} missing", missing));
        }
        let unexpected = count(DiscrepancyCategory::UnexpectedTag);
        if unexpected > 0 {
            parts.push(format!("{} unexpected", unexpected));
        }

        format!("Verification failed: {}", parts.join(", "))
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine
    }

    /// Reconcile a scan against a pump's expected configuration
    ///
    /// Example:
    /// ```
    /// use pump_verification::{ReconciliationEngine, TagId, TagSet, Verdict};
    ///
    /// let engine = ReconciliationEngine::new();
    /// let main = TagId::parse("MAIN-1").unwrap();
    /// let expected = TagSet::from_expected(["A", "B", "C"]).unwrap();
    /// let scanned = TagSet::from_scan(["A", "B"]).unwrap();
    ///
    /// let report = engine.reconcile(&expected, &main, &main, &scanned);
    /// assert_eq!(report.verdict, Verdict::Failed);
    /// assert_eq!(report.details.missing_tags, vec!["C"]);
    /// ```
    pub fn reconcile(
        &self,
        expected: &TagSet,
        main_tag_expected: &TagId,
        scanned_main: &TagId,
        scanned_children: &TagSet,
    ) -> ReconciliationReport {
        let missing_tags = expected.difference(scanned_children);
        let unexpected_tags = scanned_children.difference(expected);
        let main_tag_matches = scanned_main == main_tag_expected;

        let verdict = if main_tag_matches && missing_tags.is_empty() && unexpected_tags.is_empty()
        {
            Verdict::Success
        } else {
            Verdict::Failed
        };

        let discrepancies =
            self.collect_discrepancies(scanned_main, main_tag_matches, &missing_tags, &unexpected_tags);

        ReconciliationReport {
            verdict,
            details: VerificationDetails {
                expected_count: expected.len(),
                scanned_count: scanned_children.len(),
                missing_tags,
                unexpected_tags,
                main_tag_matches,
            },
            discrepancies,
        }
    }

    fn collect_discrepancies(
        &self,
        scanned_main: &TagId,
        main_tag_matches: bool,
        missing: &[String],
        unexpected: &[String],
    ) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();

        if !main_tag_matches {
            discrepancies.push(Discrepancy {
                category: DiscrepancyCategory::MainTagMismatch,
                tag: scanned_main.to_string(),
            });
        }

        discrepancies.extend(missing.iter().map(|tag| Discrepancy {
            category: DiscrepancyCategory::MissingTag,
            tag: tag.clone(),
        }));

        discrepancies.extend(unexpected.iter().map(|tag| Discrepancy {
            category: DiscrepancyCategory::UnexpectedTag,
            tag: tag.clone(),
        }));

        discrepancies
    }
}

// ============================================================================
// TESTS
// ============================================================================
