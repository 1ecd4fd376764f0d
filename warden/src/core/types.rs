//! Shared deterministic types for warden core logic.
//!
//! These types define stable contracts between core components and the
//! persisted JSON/TOML formats. They must not depend on I/O.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Blocked,
    Superseded,
    Deferred,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Superseded => "superseded",
            TaskStatus::Deferred => "deferred",
        }
    }

    /// True when the task needs no further work in this run.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Superseded | TaskStatus::Deferred
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared blast radius of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    /// High and critical tasks never run without a checkpoint.
    pub fn requires_checkpoint(self) -> bool {
        self >= RiskTier::High
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test discipline the worker is held to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    Hard,
    Standard,
    Skip,
}

impl TestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TestMode::Hard => "hard",
            TestMode::Standard => "standard",
            TestMode::Skip => "skip",
        }
    }
}

/// Severity attached to verification gaps and findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Blocking,
    Advisory,
    Info,
}

/// The six independent checks a verification cycle reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFlag {
    /// Declared files exist and are not stubs.
    ArtifactsExist,
    DeterministicChecks,
    /// The change is reachable from the goal it claims to serve.
    GoalWiring,
    AdversarialReview,
    IntegrationTests,
    BrowserFlows,
}

impl VerificationFlag {
    pub const ALL: [VerificationFlag; 6] = [
        VerificationFlag::ArtifactsExist,
        VerificationFlag::DeterministicChecks,
        VerificationFlag::GoalWiring,
        VerificationFlag::AdversarialReview,
        VerificationFlag::IntegrationTests,
        VerificationFlag::BrowserFlows,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VerificationFlag::ArtifactsExist => "artifacts_exist",
            VerificationFlag::DeterministicChecks => "deterministic_checks",
            VerificationFlag::GoalWiring => "goal_wiring",
            VerificationFlag::AdversarialReview => "adversarial_review",
            VerificationFlag::IntegrationTests => "integration_tests",
            VerificationFlag::BrowserFlows => "browser_flows",
        }
    }
}

impl fmt::Display for VerificationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of the governance loop, persisted in the governance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopPosition {
    #[default]
    Planning,
    Executing,
    Verifying,
    Unifying,
    Complete,
}

impl LoopPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopPosition::Planning => "planning",
            LoopPosition::Executing => "executing",
            LoopPosition::Verifying => "verifying",
            LoopPosition::Unifying => "unifying",
            LoopPosition::Complete => "complete",
        }
    }
}

impl fmt::Display for LoopPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DispatchTimeout,
    MalformedSignal,
    NoSignal,
    WorkerError,
    VerificationRejected,
    VerificationIncomplete,
}

/// One failed attempt, kept on the task until it next completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub kind: FailureKind,
    pub message: String,
    /// Concrete artifacts backing the failure (files, logs, findings).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_high_and_critical_require_checkpoints() {
        assert!(!RiskTier::Low.requires_checkpoint());
        assert!(!RiskTier::Medium.requires_checkpoint());
        assert!(RiskTier::High.requires_checkpoint());
        assert!(RiskTier::Critical.requires_checkpoint());
    }

    #[test]
    fn flags_serialize_as_snake_case() {
        let json = serde_json::to_string(&VerificationFlag::GoalWiring).expect("serialize");
        assert_eq!(json, "\"goal_wiring\"");
        for flag in VerificationFlag::ALL {
            let encoded = serde_json::to_string(&flag).expect("serialize");
            assert_eq!(encoded, format!("\"{}\"", flag.as_str()));
        }
    }
}
