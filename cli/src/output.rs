//! Console rendering of workflow events and results

use colored::Colorize;
use parley_application::{WorkflowEventSink, WorkflowOutcome};
use parley_domain::{
    ProviderOutput, ProviderResponse, Session, StepKind, StepStatus, Turn, WorkflowEvent,
};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::Mutex;

#[derive(Default)]
struct PrinterState {
    kinds: BTreeMap<String, StepKind>,
    hidden: HashSet<String>,
    /// Step kinds whose text already went to stdout live.
    streamed: HashSet<StepKind>,
    /// Provider currently holding the live stream.
    live: Option<(String, String)>,
}

/// Prints step progress to stderr and streams single-provider steps
/// (mapping, synthesis) to stdout as they arrive.
#[derive(Default)]
pub struct ConsolePrinter {
    state: Mutex<PrinterState>,
}

impl ConsolePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the text of `kind` was already shown while streaming.
    pub fn was_streamed(&self, kind: StepKind) -> bool {
        self.state
            .lock()
            .map(|s| s.streamed.contains(&kind))
            .unwrap_or(false)
    }
}

impl WorkflowEventSink for ConsolePrinter {
    fn emit(&self, event: WorkflowEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        match event {
            WorkflowEvent::StepUpdate {
                step_id,
                kind,
                status,
                hidden,
                error,
                ..
            } => {
                let step = step_id.to_string();
                match status {
                    StepStatus::Started => {
                        eprintln!("{} {}", "->".cyan().bold(), kind.to_string().bold());
                        state.kinds.insert(step.clone(), kind);
                        if hidden {
                            state.hidden.insert(step);
                        }
                    }
                    StepStatus::Completed => {
                        if state.live.as_ref().is_some_and(|(s, _)| *s == step) {
                            println!();
                            state.live = None;
                        }
                        eprintln!("{} {}", "v".green(), kind);
                    }
                    StepStatus::Failed => {
                        if state.live.as_ref().is_some_and(|(s, _)| *s == step) {
                            println!();
                            state.live = None;
                        }
                        eprintln!(
                            "{} {}: {}",
                            "x".red(),
                            kind,
                            error.unwrap_or_else(|| "unknown error".to_string())
                        );
                    }
                }
            }
            WorkflowEvent::PartialResult {
                step_id,
                provider_id,
                delta,
            } => {
                let step = step_id.to_string();
                let Some(kind) = state.kinds.get(&step).copied() else {
                    return;
                };
                if kind == StepKind::Prompt || state.hidden.contains(&step) {
                    return;
                }
                if state.live.is_none() {
                    println!(
                        "\n{}",
                        format!("── {} ({}) ──", kind, provider_id).yellow().bold()
                    );
                    state.live = Some((step, provider_id));
                    state.streamed.insert(kind);
                }
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
            WorkflowEvent::TurnFinalized {
                session_id,
                ai_turn_id,
                ..
            } => {
                eprintln!(
                    "{} session {} turn {}",
                    "saved".dimmed(),
                    session_id,
                    ai_turn_id
                );
            }
            WorkflowEvent::WorkflowComplete { .. } => {}
            WorkflowEvent::WorkflowFailed { error, .. } => {
                eprintln!("{} {}", "Workflow failed:".red().bold(), error);
            }
        }
    }
}

/// Human readable summary of a finished workflow.
pub fn format_outcome(outcome: &WorkflowOutcome, printer: &ConsolePrinter) -> String {
    let mut output = String::new();

    if !outcome.outputs.batch_outputs.is_empty() {
        output.push_str(&section_header("Answers"));
        for out in outcome.outputs.batch_outputs.values() {
            output.push_str(&format_output(out));
        }
    }

    for (kind, outputs) in [
        (StepKind::Mapping, &outcome.outputs.mapping_outputs),
        (StepKind::Synthesis, &outcome.outputs.synthesis_outputs),
    ] {
        if outputs.is_empty() || printer.was_streamed(kind) {
            continue;
        }
        output.push_str(&section_header(&capitalize(kind.as_str())));
        for out in outputs.values() {
            output.push_str(&format_output(out));
        }
    }

    if !outcome.step_errors.is_empty() {
        output.push_str(&format!("\n{}\n", "Step errors:".red().bold()));
        for (step, error) in &outcome.step_errors {
            output.push_str(&format!("  * {}: {}\n", step, error));
        }
    }

    match &outcome.persisted {
        Ok(receipt) => {
            output.push_str(&format!(
                "\n{} {}\n",
                "Session:".cyan().bold(),
                receipt.session_id
            ));
            if let Some(ai_turn_id) = &receipt.ai_turn_id {
                output.push_str(&format!("{} {}\n", "Turn:".cyan().bold(), ai_turn_id));
            }
        }
        Err(e) => {
            output.push_str(&format!("\n{} {}\n", "Not saved:".red().bold(), e));
        }
    }

    output
}

/// Machine readable summary of a finished workflow.
pub fn format_outcome_json(outcome: &WorkflowOutcome) -> String {
    let errors: BTreeMap<String, String> = outcome
        .step_errors
        .iter()
        .map(|(step, e)| (step.to_string(), e.to_string()))
        .collect();
    let value = json!({
        "workflow_id": outcome.workflow_id,
        "session_id": outcome.session_id,
        "outputs": outcome.outputs,
        "step_errors": errors,
        "persisted": match &outcome.persisted {
            Ok(receipt) => json!(receipt),
            Err(e) => json!({ "error": e.to_string() }),
        },
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_sessions(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No sessions yet.\n".to_string();
    }
    let mut output = String::new();
    for session in sessions {
        output.push_str(&format!(
            "{}  {}  {} turns  {}\n",
            session.id.yellow(),
            session.last_activity.format("%Y-%m-%d %H:%M"),
            session.turn_count,
            session.title
        ));
    }
    output
}

/// One session's turns, with the responses of each AI turn.
pub fn format_session(
    session: &Session,
    turns: &[(Turn, Vec<ProviderResponse>)],
) -> String {
    let mut output = format!("{} {}\n", "Session:".cyan().bold(), session.title);
    for (turn, responses) in turns {
        match turn {
            Turn::User(user) => {
                output.push_str(&format!(
                    "\n{} {}\n{}\n",
                    format!("[{}] user", user.sequence).bold(),
                    user.id.dimmed(),
                    user.content
                ));
            }
            Turn::Ai(ai) => {
                let label = if ai.is_branch() {
                    format!("[branch of {}] ai", ai.meta.source_turn_id.as_deref().unwrap_or("?"))
                } else {
                    format!("[{}] ai", ai.sequence)
                };
                output.push_str(&format!("\n{} {}\n", label.bold(), ai.id.dimmed()));
                for response in responses {
                    let header = format!("── {} {} ──", response.response_type, response.provider_id);
                    if response.is_usable() {
                        output.push_str(&format!("{}\n{}\n", header.yellow(), response.text));
                    } else {
                        output.push_str(&format!(
                            "{}\n{}: {}\n",
                            header.red(),
                            response.status,
                            response.error.as_deref().unwrap_or("no text")
                        ));
                    }
                }
            }
        }
    }
    output
}

fn format_output(out: &ProviderOutput) -> String {
    if out.is_usable() {
        let mut block = format!(
            "\n{}\n{}\n",
            format!("── {} ──", out.provider_id).yellow().bold(),
            out.text
        );
        if let Some(soft) = &out.soft_error {
            block.push_str(&format!("{} {}\n", "(degraded)".yellow(), soft));
        }
        block
    } else {
        format!(
            "\n{}\nError: {}\n",
            format!("── {} ──", out.provider_id).red().bold(),
            out.error.as_deref().unwrap_or("Unknown")
        )
    }
}

fn section_header(title: &str) -> String {
    format!("\n{}\n", format!("=== {} ===", title).cyan().bold())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
