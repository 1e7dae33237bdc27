//! The `proctor inspect` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use uuid::Uuid;

use proctor_core::events::EventKind;
use proctor_core::persistence::RecoveryManager;
use proctor_core::security::SecuritySummary;
use proctor_store::config::{create_store, load_config_from};

pub fn execute(session_id: String, format: String, config_path: Option<PathBuf>) -> Result<()> {
    use comfy_table::{Cell, Table};

    let id: Uuid = session_id
        .parse()
        .with_context(|| format!("invalid session id: {session_id}"))?;

    let config = load_config_from(config_path.as_deref())?;
    let recovery = RecoveryManager::new(create_store(&config)?);
    let session = recovery
        .load(id)
        .with_context(|| format!("failed to load session {id}"))?;

    match format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&session)?);
            return Ok(());
        }
        "text" => {}
        other => anyhow::bail!("unknown format: {other} (expected text or json)"),
    }

    println!("Session:  {}", session.id());
    println!("Exam:     {}", session.exam_target());
    println!("Started:  {}", session.started_at().format("%Y-%m-%d %H:%M:%S UTC"));
    match session.submission() {
        Some(s) => println!(
            "Status:   submitted ({}) at {}",
            s.reason,
            s.submitted_at.format("%H:%M:%S")
        ),
        None => println!("Status:   in progress"),
    }
    if let Some(remaining) = session.remaining_secs() {
        println!("Elapsed:  {}s ({remaining}s remaining)", session.elapsed_secs());
    }

    let mut answers = Table::new();
    answers.set_header(vec!["Question", "Answer", "Revisions", "Time (s)", "Flagged"]);
    for (question, value) in session.answers() {
        let time = session
            .time_spent_per_question()
            .get(question)
            .copied()
            .unwrap_or(0.0);
        answers.add_row(vec![
            Cell::new(question),
            Cell::new(value.summary()),
            Cell::new(session.answer_store().revisions(question)),
            Cell::new(format!("{time:.1}")),
            Cell::new(if session.is_flagged(question) { "yes" } else { "" }),
        ]);
    }
    println!("\n{answers}");

    let mut events = Table::new();
    events.set_header(vec!["Event kind", "Count"]);
    for kind in [
        EventKind::Navigation,
        EventKind::Answer,
        EventKind::Focus,
        EventKind::Activity,
        EventKind::Security,
        EventKind::Snapshot,
    ] {
        events.add_row(vec![Cell::new(kind), Cell::new(session.log().count_kind(kind))]);
    }
    println!("\n{events}");

    let summary = SecuritySummary::from_events(session.security_events());
    if summary.total == 0 {
        println!("\nNo integrity violations.");
    } else {
        let mut violations = Table::new();
        violations.set_header(vec!["Time", "Violation", "Detail"]);
        for v in session.security_events() {
            violations.add_row(vec![
                Cell::new(v.timestamp.format("%H:%M:%S")),
                Cell::new(v.kind),
                Cell::new(&v.detail),
            ]);
        }
        println!("\n{violations}");
    }

    Ok(())
}
