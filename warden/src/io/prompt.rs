//! Worker prompt rendering from a context packet.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::signal::SignalTag;
use crate::io::context::ContextPacket;

const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("worker", WORKER_TEMPLATE)
            .expect("worker template should be valid");
        Self { env }
    }

    fn render_worker(&self, packet: &ContextPacket) -> Result<String> {
        let template = self.env.get_template("worker")?;
        let rendered = template.render(context! {
            packet => packet,
            complete_open => SignalTag::Complete.open_token(),
            complete_close => SignalTag::Complete.close_token(),
            blocked_open => SignalTag::Blocked.open_token(),
            blocked_close => SignalTag::Blocked.close_token(),
        })?;
        Ok(rendered)
    }
}

/// Render the prompt sent verbatim to the worker's stdin.
pub fn render_worker_prompt(packet: &ContextPacket) -> Result<String> {
    let rendered = PromptEngine::new()
        .render_worker(packet)
        .with_context(|| format!("render worker prompt for {}", packet.task_id))?;
    debug!(task = %packet.task_id, bytes = rendered.len(), "worker prompt rendered");
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::signal::{Signal, parse_signal};
    use crate::core::types::{RiskTier, TestMode};
    use crate::io::context::ToolCommand;

    fn packet() -> ContextPacket {
        ContextPacket {
            task_id: "t1".to_string(),
            description: "Add the tokenizer".to_string(),
            phase: "p1".to_string(),
            wave: 2,
            risk: RiskTier::High,
            test_mode: TestMode::Hard,
            mission: "Ship a parser.".to_string(),
            phase_objective: String::new(),
            files: vec!["src/lex.rs".to_string(), "src/new.rs".to_string()],
            files_content: BTreeMap::from([
                ("src/lex.rs".to_string(), "pub fn lex() {}".to_string()),
                ("src/new.rs".to_string(), String::new()),
            ]),
            new_files: vec!["src/new.rs".to_string()],
            acceptance: "- AC-1: lexes numbers".to_string(),
            modules: Vec::new(),
            contracts: Vec::new(),
            imported_symbols: Vec::new(),
            related_tests: Vec::new(),
            prior_wave: String::new(),
            prevention_rules: "- Never skip tests (scar-0001)".to_string(),
            state_digest: String::new(),
            forbidden: vec![".git/**".to_string(), "src/other.rs".to_string()],
            tools: vec![ToolCommand {
                name: "test".to_string(),
                command: "cargo test".to_string(),
            }],
            omitted: BTreeMap::new(),
        }
    }

    /// Verifies the prompt carries files, rules, forbidden paths and the signal protocol.
    #[test]
    fn renders_task_scope_and_protocol() {
        let prompt = render_worker_prompt(&packet()).expect("render");
        assert!(prompt.starts_with("# Task t1"));
        assert!(prompt.contains("### `src/lex.rs`"));
        assert!(prompt.contains("pub fn lex() {}"));
        assert!(prompt.contains("### `src/new.rs` (new file)"));
        assert!(!prompt.contains("## Context limits"));
        assert!(prompt.contains("Never skip tests"));
        assert!(prompt.contains("- `src/other.rs`"));
        assert!(prompt.contains("- test: `cargo test`"));
        assert!(prompt.contains("Risk: high"));
        assert!(!prompt.contains("## Phase objective"));
        assert!(prompt.contains("<<COMPLETE>>"));
        assert!(prompt.contains("<</BLOCKED>>"));
    }

    #[test]
    fn truncated_slots_are_announced() {
        let mut packet = packet();
        packet.omitted.insert("modules".to_string(), 7);
        let prompt = render_worker_prompt(&packet).expect("render");
        assert!(prompt.contains("## Context limits"));
        assert!(prompt.contains("- modules: 7 more not shown"));
    }

    /// Verifies the prompt's own examples would be rejected as ambiguous if echoed back.
    #[test]
    fn echoed_prompt_is_not_a_valid_signal() {
        let prompt = render_worker_prompt(&packet()).expect("render");
        assert!(!matches!(parse_signal(&prompt), Ok(Signal::Complete(_))));
    }
}
