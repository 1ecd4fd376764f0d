//! Merge judge: reduce a verification result to one verdict.
//!
//! The rule is strict: approved iff all six flags are true. Every false flag
//! yields exactly one reason citing the artifacts recorded against it.
//! `needs-revision` is reserved for results that are structurally incomplete or
//! contradict themselves; it is never a soft "reject".

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::types::{Severity, VerificationFlag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Approved,
    Rejected,
    NeedsRevision,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::Rejected => "rejected",
            Verdict::NeedsRevision => "needs-revision",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFlags {
    pub artifacts_exist: bool,
    pub deterministic_checks: bool,
    pub goal_wiring: bool,
    pub adversarial_review: bool,
    pub integration_tests: bool,
    /// True when no browser flow applies to the change.
    pub browser_flows: bool,
}

impl VerificationFlags {
    pub fn all_passing() -> Self {
        Self {
            artifacts_exist: true,
            deterministic_checks: true,
            goal_wiring: true,
            adversarial_review: true,
            integration_tests: true,
            browser_flows: true,
        }
    }

    pub fn get(&self, flag: VerificationFlag) -> bool {
        match flag {
            VerificationFlag::ArtifactsExist => self.artifacts_exist,
            VerificationFlag::DeterministicChecks => self.deterministic_checks,
            VerificationFlag::GoalWiring => self.goal_wiring,
            VerificationFlag::AdversarialReview => self.adversarial_review,
            VerificationFlag::IntegrationTests => self.integration_tests,
            VerificationFlag::BrowserFlows => self.browser_flows,
        }
    }

    pub fn set(&mut self, flag: VerificationFlag, value: bool) {
        let slot = match flag {
            VerificationFlag::ArtifactsExist => &mut self.artifacts_exist,
            VerificationFlag::DeterministicChecks => &mut self.deterministic_checks,
            VerificationFlag::GoalWiring => &mut self.goal_wiring,
            VerificationFlag::AdversarialReview => &mut self.adversarial_review,
            VerificationFlag::IntegrationTests => &mut self.integration_tests,
            VerificationFlag::BrowserFlows => &mut self.browser_flows,
        };
        *slot = value;
    }

    pub fn failing(&self) -> Vec<VerificationFlag> {
        VerificationFlag::ALL
            .into_iter()
            .filter(|flag| !self.get(*flag))
            .collect()
    }
}

/// A concrete shortfall against one flag (missing file, stub, unwired export).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub flag: VerificationFlag,
    /// File, check name, or artifact the gap was observed in.
    pub artifact: String,
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub flag: VerificationFlag,
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A claim the verifier declares true, with the artifacts proving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truth {
    pub statement: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Output of one verification cycle, consumed once by [`judge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub flags: VerificationFlags,
    #[serde(default)]
    pub gaps: Vec<Gap>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub truths: Vec<Truth>,
    /// Location of the full verifier report, cited when nothing more specific exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

impl VerificationResult {
    pub fn passing() -> Self {
        Self {
            flags: VerificationFlags::all_passing(),
            gaps: Vec::new(),
            findings: Vec::new(),
            truths: Vec::new(),
            report: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    /// `None` for structural problems that are not tied to one flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<VerificationFlag>,
    pub evidence: Vec<String>,
    pub detail: String,
}

/// Terminal verdict for one verification cycle. Never amended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub verdict: Verdict,
    pub flags: VerificationFlags,
    pub reasons: Vec<Reason>,
    /// Advisory and informational observations carried forward without blocking.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl MergeDecision {
    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }

    /// One line per reason, for failure records and logs.
    pub fn describe(&self) -> String {
        if self.reasons.is_empty() {
            return self.verdict.as_str().to_string();
        }
        let parts: Vec<String> = self
            .reasons
            .iter()
            .map(|reason| {
                let head = reason
                    .flag
                    .map_or_else(|| "structure".to_string(), |flag| flag.to_string());
                format!("{head}: {} [{}]", reason.detail, reason.evidence.join(", "))
            })
            .collect();
        format!("{}: {}", self.verdict.as_str(), parts.join("; "))
    }
}

pub fn judge(result: &VerificationResult) -> MergeDecision {
    let notes = advisory_notes(result);

    let structural = structural_problems(result);
    if !structural.is_empty() {
        return MergeDecision {
            verdict: Verdict::NeedsRevision,
            flags: result.flags,
            reasons: structural,
            notes,
        };
    }

    let reasons: Vec<Reason> = result
        .flags
        .failing()
        .into_iter()
        .map(|flag| reason_for_flag(result, flag))
        .collect();

    let verdict = if reasons.is_empty() {
        Verdict::Approved
    } else {
        Verdict::Rejected
    };
    MergeDecision {
        verdict,
        flags: result.flags,
        reasons,
        notes,
    }
}

fn reason_for_flag(result: &VerificationResult, flag: VerificationFlag) -> Reason {
    let mut evidence = Vec::new();
    let mut details = Vec::new();

    for gap in result
        .gaps
        .iter()
        .filter(|gap| gap.flag == flag && gap.severity == Severity::Blocking)
    {
        evidence.push(gap.artifact.clone());
        details.push(gap.description.clone());
    }
    for finding in result
        .findings
        .iter()
        .filter(|finding| finding.flag == flag && finding.severity == Severity::Blocking)
    {
        if let Some(location) = &finding.location {
            evidence.push(location.clone());
        }
        details.push(finding.summary.clone());
    }

    if evidence.is_empty() {
        evidence.push(format!("flags.{}", flag.as_str()));
        evidence.extend(result.report.clone());
    }
    if details.is_empty() {
        details.push(format!("{flag} reported false with no gap attached"));
    }

    Reason {
        flag: Some(flag),
        evidence: unique_in_order(evidence),
        detail: details.join("; "),
    }
}

/// Drop repeated items, keeping the first occurrence of each.
pub fn unique_in_order(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Problems that make the result unfit to judge either way.
fn structural_problems(result: &VerificationResult) -> Vec<Reason> {
    let mut problems = Vec::new();

    for truth in &result.truths {
        if truth.evidence.iter().all(|item| item.trim().is_empty()) {
            problems.push(Reason {
                flag: None,
                evidence: Vec::new(),
                detail: format!("declared truth has no evidence: {}", truth.statement),
            });
        }
    }

    for gap in &result.gaps {
        if gap.severity == Severity::Blocking && result.flags.get(gap.flag) {
            problems.push(Reason {
                flag: Some(gap.flag),
                evidence: vec![gap.artifact.clone()],
                detail: format!(
                    "blocking gap recorded but {} reported true: {}",
                    gap.flag, gap.description
                ),
            });
        }
    }
    for finding in &result.findings {
        if finding.severity == Severity::Blocking && result.flags.get(finding.flag) {
            problems.push(Reason {
                flag: Some(finding.flag),
                evidence: finding.location.clone().into_iter().collect(),
                detail: format!(
                    "blocking finding recorded but {} reported true: {}",
                    finding.flag, finding.summary
                ),
            });
        }
    }

    problems
}

fn advisory_notes(result: &VerificationResult) -> Vec<String> {
    let gaps = result
        .gaps
        .iter()
        .filter(|gap| gap.severity != Severity::Blocking)
        .map(|gap| format!("{} ({}): {}", gap.flag, gap.artifact, gap.description));
    let findings = result
        .findings
        .iter()
        .filter(|finding| finding.severity != Severity::Blocking)
        .map(|finding| match &finding.location {
            Some(location) => format!("{} ({location}): {}", finding.flag, finding.summary),
            None => format!("{}: {}", finding.flag, finding.summary),
        });
    gaps.chain(findings).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(flag: VerificationFlag, artifact: &str, description: &str) -> Gap {
        Gap {
            flag,
            artifact: artifact.to_string(),
            description: description.to_string(),
            severity: Severity::Blocking,
        }
    }

    #[test]
    fn all_true_is_approved() {
        let decision = judge(&VerificationResult::passing());
        assert_eq!(decision.verdict, Verdict::Approved);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn single_false_flag_rejects_with_one_reason_per_flag() {
        for flag in VerificationFlag::ALL {
            let mut result = VerificationResult::passing();
            result.flags.set(flag, false);
            let decision = judge(&result);
            assert_eq!(decision.verdict, Verdict::Rejected, "{flag}");
            assert_eq!(decision.reasons.len(), 1, "{flag}");
            assert_eq!(decision.reasons[0].flag, Some(flag));
        }
    }

    #[test]
    fn missing_artifact_reason_cites_the_file() {
        let mut result = VerificationResult::passing();
        result.flags.artifacts_exist = false;
        result.gaps.push(gap(
            VerificationFlag::ArtifactsExist,
            "src/billing/invoice.rs",
            "file is a stub (12 lines, todo!() bodies)",
        ));

        let decision = judge(&result);
        assert_eq!(decision.verdict, Verdict::Rejected);
        assert_eq!(decision.reasons.len(), 1);
        assert_eq!(
            decision.reasons[0].evidence,
            vec!["src/billing/invoice.rs".to_string()]
        );
        assert!(decision.reasons[0].detail.contains("stub"));
    }

    #[test]
    fn advisory_findings_never_block() {
        let mut result = VerificationResult::passing();
        result.findings.push(Finding {
            flag: VerificationFlag::AdversarialReview,
            severity: Severity::Advisory,
            summary: "consider caching the lookup".to_string(),
            location: Some("src/lookup.rs:40".to_string()),
        });

        let decision = judge(&result);
        assert_eq!(decision.verdict, Verdict::Approved);
        assert_eq!(decision.notes.len(), 1);
        assert!(decision.notes[0].contains("src/lookup.rs:40"));
    }

    #[test]
    fn truth_without_evidence_needs_revision() {
        let mut result = VerificationResult::passing();
        result.truths.push(Truth {
            statement: "login redirects to dashboard".to_string(),
            evidence: Vec::new(),
        });
        let decision = judge(&result);
        assert_eq!(decision.verdict, Verdict::NeedsRevision);
    }

    #[test]
    fn blocking_gap_on_passing_flag_is_contradictory() {
        let mut result = VerificationResult::passing();
        result.gaps.push(gap(
            VerificationFlag::GoalWiring,
            "src/routes.rs",
            "handler never registered",
        ));
        let decision = judge(&result);
        assert_eq!(decision.verdict, Verdict::NeedsRevision);
        assert_eq!(decision.reasons[0].flag, Some(VerificationFlag::GoalWiring));
    }

    #[test]
    fn false_flag_without_gap_cites_flag_and_report() {
        let mut result = VerificationResult::passing();
        result.flags.integration_tests = false;
        result.report = Some(".warden/audit/verify/t1.json".to_string());
        let decision = judge(&result);
        assert_eq!(
            decision.reasons[0].evidence,
            vec![
                "flags.integration_tests".to_string(),
                ".warden/audit/verify/t1.json".to_string()
            ]
        );

        result.report = None;
        let decision = judge(&result);
        assert_eq!(
            decision.reasons[0].evidence,
            vec!["flags.integration_tests".to_string()]
        );
    }

    #[test]
    fn repeated_artifacts_are_cited_once() {
        let mut result = VerificationResult::passing();
        result.flags.artifacts_exist = false;
        for artifact in ["src/a.rs", "src/b.rs", "src/a.rs"] {
            result
                .gaps
                .push(gap(VerificationFlag::ArtifactsExist, artifact, "stub"));
        }
        let decision = judge(&result);
        assert_eq!(
            decision.reasons[0].evidence,
            vec!["src/a.rs".to_string(), "src/b.rs".to_string()]
        );
    }

    #[test]
    fn verdict_serializes_kebab_case() {
        let json = serde_json::to_string(&Verdict::NeedsRevision).expect("serialize");
        assert_eq!(json, "\"needs-revision\"");
    }
}
