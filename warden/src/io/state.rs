//! Governance state (`.warden/state/state.json`) and its `STATE.md` rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::escalation::GapClosure;
use crate::core::judge::{MergeDecision, Verdict};
use crate::core::types::{LoopPosition, TaskStatus};
use crate::graph::TaskGraph;
use crate::io::atomic::{write_atomic, write_json_atomic};
use crate::io::init::WardenPaths;

pub const RECENT_DECISIONS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub superseded: usize,
    pub deferred: usize,
}

impl Counters {
    pub fn from_graph(graph: &TaskGraph) -> Self {
        let mut counters = Counters {
            total: graph.len(),
            ..Counters::default()
        };
        for task in graph.tasks() {
            let slot = match task.status {
                TaskStatus::Pending => &mut counters.pending,
                TaskStatus::Running => &mut counters.running,
                TaskStatus::Completed => &mut counters.completed,
                TaskStatus::Failed => &mut counters.failed,
                TaskStatus::Blocked => &mut counters.blocked,
                TaskStatus::Superseded => &mut counters.superseded,
                TaskStatus::Deferred => &mut counters.deferred,
            };
            *slot += 1;
        }
        counters
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub task_id: String,
    pub verdict: Verdict,
    pub at: DateTime<Utc>,
    pub detail: String,
}

impl DecisionSummary {
    pub fn new(task_id: &str, decision: &MergeDecision, at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.to_string(),
            verdict: decision.verdict,
            at,
            detail: decision.describe(),
        }
    }
}

/// Where an interrupted run picks up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub run_id: Option<String>,
    pub cycle: u32,
    pub last_wave: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceState {
    pub position: LoopPosition,
    pub counters: Counters,
    pub blockers: Vec<Blocker>,
    /// Newest last, capped at [`RECENT_DECISIONS`].
    pub recent_decisions: Vec<DecisionSummary>,
    /// Task ids and phases handed back to a human.
    pub escalations: Vec<String>,
    pub session: Session,
    pub gap_closure: BTreeMap<String, GapClosure>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GovernanceState {
    /// Recompute counters and blockers from the graph.
    pub fn refresh_from_graph(&mut self, graph: &TaskGraph) {
        self.counters = Counters::from_graph(graph);
        self.blockers = graph
            .tasks()
            .iter()
            .filter(|task| task.status == TaskStatus::Blocked)
            .map(|task| Blocker {
                task_id: task.id.clone(),
                reason: task
                    .blocked_reason
                    .clone()
                    .unwrap_or_else(|| "blocked".to_string()),
            })
            .collect();
    }

    pub fn record_decision(&mut self, summary: DecisionSummary) {
        self.recent_decisions.push(summary);
        let excess = self.recent_decisions.len().saturating_sub(RECENT_DECISIONS);
        self.recent_decisions.drain(..excess);
    }

    pub fn record_escalation(&mut self, unit: impl Into<String>) {
        let unit = unit.into();
        if !self.escalations.contains(&unit) {
            self.escalations.push(unit);
        }
    }

    /// True if remediation for the phase was disabled by the gap-closure cap.
    pub fn phase_disabled(&self, phase: &str) -> bool {
        self.gap_closure
            .get(phase)
            .is_some_and(|closure| closure.disabled)
    }
}

/// Load governance state; a missing file yields the default state.
pub fn load_state(paths: &WardenPaths) -> Result<GovernanceState> {
    let path = &paths.state_path;
    if !path.exists() {
        return Ok(GovernanceState::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let state: GovernanceState =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    debug!(position = %state.position, cycle = state.session.cycle, "governance state loaded");
    Ok(state)
}

/// Write `state.json` and regenerate `STATE.md`.
pub fn write_state(paths: &WardenPaths, state: &GovernanceState) -> Result<()> {
    write_json_atomic(&paths.state_path, state)?;
    write_atomic(&paths.state_md_path, render_state_markdown(state).as_bytes())
}

pub fn render_state_markdown(state: &GovernanceState) -> String {
    let mut out = String::new();
    let c = &state.counters;
    let _ = writeln!(out, "# Project State\n");
    let _ = writeln!(out, "Position: **{}**", state.position);
    if let Some(at) = state.updated_at {
        let _ = writeln!(out, "Updated: {}", at.to_rfc3339());
    }
    let _ = writeln!(
        out,
        "\n## Progress\n\n{}/{} completed, {} pending, {} running, {} failed, {} blocked, {} superseded, {} deferred",
        c.completed, c.total, c.pending, c.running, c.failed, c.blocked, c.superseded, c.deferred
    );

    let _ = writeln!(out, "\n## Blockers\n");
    if state.blockers.is_empty() {
        let _ = writeln!(out, "None.");
    }
    for blocker in &state.blockers {
        let _ = writeln!(out, "- {}: {}", blocker.task_id, blocker.reason);
    }

    if !state.escalations.is_empty() {
        let _ = writeln!(out, "\n## Escalations (human decision required)\n");
        for unit in &state.escalations {
            let _ = writeln!(out, "- {unit}");
        }
    }

    let _ = writeln!(out, "\n## Recent decisions\n");
    if state.recent_decisions.is_empty() {
        let _ = writeln!(out, "None.");
    }
    for decision in state.recent_decisions.iter().rev() {
        let _ = writeln!(
            out,
            "- {} {} {}",
            decision.at.format("%Y-%m-%d %H:%M"),
            decision.task_id,
            decision.detail
        );
    }

    let disabled: Vec<&str> = state
        .gap_closure
        .iter()
        .filter(|(_, closure)| closure.disabled)
        .map(|(phase, _)| phase.as_str())
        .collect();
    if !disabled.is_empty() {
        let _ = writeln!(
            out,
            "\n## Remediation disabled\n\n{}",
            disabled.join(", ")
        );
    }

    let _ = writeln!(out, "\n## Session\n");
    match &state.session.run_id {
        Some(run_id) => {
            let _ = writeln!(out, "Run {run_id}, cycle {}", state.session.cycle);
        }
        None => {
            let _ = writeln!(out, "No run yet.");
        }
    }
    if let Some(wave) = state.session.last_wave {
        let _ = writeln!(out, "Last wave: {wave}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::judge::{VerificationResult, judge};
    use crate::test_support::{fixed_time, task};

    #[test]
    fn recent_decisions_keep_last_ten() {
        let mut state = GovernanceState::default();
        let decision = judge(&VerificationResult::passing());
        for n in 0..12 {
            state.record_decision(DecisionSummary::new(&format!("t{n}"), &decision, fixed_time()));
        }
        assert_eq!(state.recent_decisions.len(), RECENT_DECISIONS);
        assert_eq!(state.recent_decisions[0].task_id, "t2");
        assert_eq!(state.recent_decisions[9].task_id, "t11");
    }

    #[test]
    fn refresh_counts_statuses_and_blockers() {
        let mut graph =
            TaskGraph::from_tasks(vec![task("a", 1, &[]), task("b", 1, &[])]).expect("graph");
        graph
            .mark_blocked("b", "needs API key", fixed_time())
            .expect("blocked");
        let mut state = GovernanceState::default();
        state.refresh_from_graph(&graph);

        assert_eq!(state.counters.total, 2);
        assert_eq!(state.counters.pending, 1);
        assert_eq!(state.counters.blocked, 1);
        assert_eq!(
            state.blockers,
            vec![Blocker {
                task_id: "b".to_string(),
                reason: "needs API key".to_string()
            }]
        );
    }

    #[test]
    fn write_regenerates_markdown() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WardenPaths::new(temp.path());
        let mut state = GovernanceState {
            position: LoopPosition::Executing,
            ..GovernanceState::default()
        };
        state.record_escalation("task t7");
        write_state(&paths, &state).expect("write");

        let loaded = load_state(&paths).expect("load");
        assert_eq!(loaded, state);
        let md = fs::read_to_string(&paths.state_md_path).expect("read md");
        assert!(md.contains("Position: **executing**"));
        assert!(md.contains("- task t7"));
    }
}
