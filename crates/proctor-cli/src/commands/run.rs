//! The `proctor run` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use proctor_core::controller::{
    ExamSubmission, SaveStatus, SessionController, SessionObserver, StartupChoice, Warning,
};
use proctor_core::model::{Exam, SubmitReason};
use proctor_core::parser;
use proctor_core::persistence::RecoveryManager;
use proctor_core::security::{SecurityLevel, SecuritySummary};
use proctor_core::session::Session;
use proctor_runtime::{
    ActiveDevices, RuntimeError, SessionHandle, SessionRuntime, StaticCapture, TokioClock,
};
use proctor_store::config::{create_store, load_config_from};

use crate::script::{Action, Script};

/// Console observer: warnings and save failures go to stderr.
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_warning(&self, warning: &Warning) {
        eprintln!("  WARNING: {warning}");
    }

    fn on_save_status(&self, status: &SaveStatus) {
        if let SaveStatus::Failed { error, .. } = status {
            eprintln!("  Save failed: {error}");
        }
    }

    fn on_submitted(&self, submission: &ExamSubmission) {
        if let Some(s) = submission.session.submission() {
            eprintln!("  Submitted ({})", s.reason);
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    exam_path: PathBuf,
    script_path: PathBuf,
    level: Option<SecurityLevel>,
    resume: Option<String>,
    no_submit: bool,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config_from(config_path.as_deref())?;
    if let Some(level) = level {
        config.security_level = level;
    }

    let exam = parser::parse_exam(&exam_path)?;
    for w in parser::validate_exam(&exam) {
        let prefix = w
            .question_id
            .as_ref()
            .map(|id| format!("[{id}] "))
            .unwrap_or_default();
        eprintln!("  {prefix}WARNING: {}", w.message);
    }
    let script = Script::load(&script_path)?;

    let store = create_store(&config)?;
    let choice = match resume.as_deref() {
        None => StartupChoice::Fresh,
        Some("latest") => RecoveryManager::new(Arc::clone(&store))
            .candidates(&exam.id)?
            .first()
            .map(|c| StartupChoice::Resume(c.session_id))
            .unwrap_or(StartupChoice::Fresh),
        Some(id) => StartupChoice::Resume(
            id.parse()
                .with_context(|| format!("invalid session id: {id}"))?,
        ),
    };

    eprintln!(
        "proctor v{}: {} ({} questions, {} level)",
        env!("CARGO_PKG_VERSION"),
        exam.title,
        exam.questions.len(),
        config.security_level
    );

    let controller = SessionController::open(
        exam.clone(),
        choice,
        config.engine_config(),
        store,
        Arc::new(TokioClock::new()),
        Arc::new(ConsoleObserver),
    );
    let handle = SessionRuntime::new()
        .with_media(
            Arc::new(StaticCapture::default()),
            ActiveDevices {
                webcam: config.webcam,
                screen: config.screen_capture,
            },
        )
        .spawn(controller);

    for (index, step) in script.steps.into_iter().enumerate() {
        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }
        match apply(&handle, &exam, step.action).await {
            Ok(()) => {}
            Err(RuntimeError::Closed) => {
                eprintln!("  Session ended before step {}", index + 1);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let outcome = if no_submit {
        handle.shutdown().await?
    } else {
        match handle.submit(SubmitReason::User).await {
            Ok(_) | Err(RuntimeError::Closed) => {}
            Err(e) => return Err(e.into()),
        }
        handle.join().await?
    };

    print_summary(&exam, &outcome.session);

    if let Some(path) = output {
        let json = match &outcome.submission {
            Some(submission) => serde_json::to_string_pretty(submission)?,
            None => serde_json::to_string_pretty(&outcome.session)?,
        };
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("Session written to: {}", path.display());
    }

    Ok(())
}

async fn apply(handle: &SessionHandle, exam: &Exam, action: Action) -> Result<(), RuntimeError> {
    match action {
        Action::Answer { question, value } => match exam.question(&question) {
            None => eprintln!("  Skipping answer for unknown question {question}"),
            Some(q) if !q.accepts(&value) => eprintln!(
                "  Skipping answer for {question}: {} does not fit a {} question",
                value.summary(),
                q.kind.type_name()
            ),
            Some(_) => handle.record_answer(question, value).await?,
        },
        Action::Navigate { question } => handle.navigate(question).await?,
        Action::Flag { question } => handle.toggle_flag(question).await?,
        Action::Signal { signal } => {
            let reaction = handle.signal(signal).await?;
            tracing::debug!(
                prevent_default = reaction.prevent_default,
                capture = ?reaction.capture,
                "signal handled"
            );
        }
        Action::Capture => handle.capture_now().await?,
        Action::SnapshotInterval { secs } => {
            handle
                .set_snapshot_interval(Duration::from_secs(secs))
                .await?
        }
        Action::Save => {
            handle.save().await?;
        }
        Action::Wait => {}
        Action::Submit { reason } => {
            handle.submit(reason.unwrap_or(SubmitReason::User)).await?;
        }
    }
    Ok(())
}

fn print_summary(exam: &Exam, session: &Session) {
    use comfy_table::{Cell, Table};

    let status = match session.submission() {
        Some(s) => format!("submitted ({})", s.reason),
        None => "saved, resumable".to_string(),
    };

    let mut table = Table::new();
    table.set_header(vec!["Session", "Status", "Answered", "Events", "Violations", "Snapshots"]);
    table.add_row(vec![
        Cell::new(session.id()),
        Cell::new(status),
        Cell::new(format!("{}/{}", session.answers().len(), exam.questions.len())),
        Cell::new(session.events().len()),
        Cell::new(session.security_events().len()),
        Cell::new(session.snapshots().len()),
    ]);
    println!("{table}");

    let summary = SecuritySummary::from_events(session.security_events());
    if summary.total > 0 {
        let mut violations = Table::new();
        violations.set_header(vec!["Violation", "Count"]);
        for (kind, count) in &summary.by_kind {
            violations.add_row(vec![Cell::new(kind), Cell::new(count)]);
        }
        println!("{violations}");
    }
}
