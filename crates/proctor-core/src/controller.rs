//! Session controller.
//!
//! Owns the [`Session`] for one exam attempt and exposes every operation the
//! exam surface calls: record an answer, navigate, flag, submit. Environment
//! signals, countdown ticks, autosaves and snapshot results are funnelled
//! through the same methods, so all mutation happens in one place and in a
//! well-defined order.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::events::{ActivityAction, EventPayload};
use crate::model::{AnswerValue, Exam, SubmitReason};
use crate::persistence::{KeyValueStore, RecoveryManager, DEFAULT_MAX_SESSIONS_PER_TARGET};
use crate::security::{
    EnvironmentSignal, EscalationPolicy, Observation, SecurityLevel, SecurityMonitor,
    SecuritySummary, ViolationKind, DEFAULT_DEVTOOLS_THRESHOLD_PX,
};
use crate::session::Session;
use crate::snapshot::{CaptureOutput, SnapshotScheduler, SnapshotTrigger, DEFAULT_SNAPSHOT_INTERVAL};

/// Configuration for the session engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub security_level: SecurityLevel,
    /// Period of the autosave timer.
    pub autosave_interval: Duration,
    /// Period of the periodic snapshot timer.
    pub snapshot_interval: Duration,
    /// Delay between a maximum-level escalation and the forced submission.
    pub escalation_grace: Duration,
    pub tab_switch_threshold: usize,
    pub devtools_threshold_px: u32,
    /// How often the host samples window dimensions.
    pub devtools_poll_interval: Duration,
    /// Remaining-time marks (seconds) at which the candidate is warned.
    pub time_warnings: Vec<u64>,
    pub max_sessions_per_target: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::Standard,
            autosave_interval: Duration::from_secs(30),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            escalation_grace: Duration::from_secs(5),
            tab_switch_threshold: 3,
            devtools_threshold_px: DEFAULT_DEVTOOLS_THRESHOLD_PX,
            devtools_poll_interval: Duration::from_secs(1),
            time_warnings: vec![300, 60],
            max_sessions_per_target: DEFAULT_MAX_SESSIONS_PER_TARGET,
        }
    }
}

/// Outcome of the most recent persistence attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    NeverSaved,
    Saved { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, error: String },
}

impl SaveStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, SaveStatus::Failed { .. })
    }
}

/// User-visible warnings, rendered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    Violation { kind: ViolationKind, detail: String },
    EscalationScheduled { deadline: DateTime<Utc> },
    TimeLow { remaining_secs: u64 },
    SaveFailed { error: String },
    RecoveryFailed { session_id: Uuid, error: String },
    MediaUnavailable { device: String, reason: String },
    Offline,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Violation { kind, detail } => write!(f, "integrity warning ({kind}): {detail}"),
            Warning::EscalationScheduled { deadline } => write!(
                f,
                "exam will be submitted automatically at {}",
                deadline.format("%H:%M:%S")
            ),
            Warning::TimeLow { remaining_secs } => {
                write!(f, "{} min {} s remaining", remaining_secs / 60, remaining_secs % 60)
            }
            Warning::SaveFailed { error } => write!(f, "progress could not be saved: {error}"),
            Warning::RecoveryFailed { session_id, error } => {
                write!(f, "could not restore session {session_id}: {error}")
            }
            Warning::MediaUnavailable { device, reason } => {
                write!(f, "{device} unavailable: {reason}")
            }
            Warning::Offline => write!(f, "connection lost; answers are kept locally"),
        }
    }
}

/// Callbacks into the (excluded) presentation layer.
pub trait SessionObserver: Send + Sync {
    fn on_warning(&self, warning: &Warning);
    fn on_save_status(&self, status: &SaveStatus);
    fn on_submitted(&self, submission: &ExamSubmission);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_warning(&self, _: &Warning) {}
    fn on_save_status(&self, _: &SaveStatus) {}
    fn on_submitted(&self, _: &ExamSubmission) {}
}

/// The frozen session handed to the submission layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSubmission {
    pub session: Session,
    pub security_summary: SecuritySummary,
}

/// How to begin when the exam view opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupChoice {
    Fresh,
    Resume(Uuid),
}

/// Follow-up work the host must perform after a signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reaction {
    /// Suppress the browser's default action for this event.
    pub prevent_default: bool,
    /// Take a snapshot now, with this trigger.
    pub capture: Option<SnapshotTrigger>,
    /// A forced submission was just scheduled for this instant.
    pub escalation_scheduled: Option<DateTime<Utc>>,
}

/// Single owner of one exam attempt.
pub struct SessionController {
    exam: Exam,
    session: Session,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    recovery: RecoveryManager,
    observer: Arc<dyn SessionObserver>,
    monitor: SecurityMonitor,
    policy: EscalationPolicy,
    scheduler: SnapshotScheduler,
    active_since: Option<DateTime<Utc>>,
    save_status: SaveStatus,
    escalation_deadline: Option<DateTime<Utc>>,
    warned_marks: BTreeSet<u64>,
    /// Set once the submitted session has been persisted.
    final_saved: bool,
}

impl SessionController {
    /// Start a new attempt and register it in the recovery index.
    pub fn start(
        exam: Exam,
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let now = clock.now();
        let session = Session::new(&exam.id, exam.duration_secs, now);
        let mut controller = Self::assemble(exam, session, config, store, clock, observer);

        let first = controller.exam.questions.first().map(|q| q.id.clone());
        controller.session.set_current_question(first);
        controller.active_since = Some(now);
        controller
            .session
            .append(now, EventPayload::Activity(ActivityAction::SessionStarted));

        tracing::info!(
            session_id = %controller.session.id(),
            exam = %controller.exam.id,
            level = %controller.config.security_level,
            "session started"
        );
        controller.save();
        controller
    }

    /// Continue a previously persisted attempt.
    pub fn resume(
        exam: Exam,
        session: Session,
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let mut controller = Self::assemble(exam, session, config, store, clock, observer);
        let at = controller.session.stamp(controller.clock.now());

        if controller.session.current_question().is_none() {
            let first = controller.exam.questions.first().map(|q| q.id.clone());
            controller.session.set_current_question(first);
        }
        controller.active_since = Some(at);
        controller
            .session
            .append(at, EventPayload::Activity(ActivityAction::SessionResumed));

        tracing::info!(
            session_id = %controller.session.id(),
            answered = controller.session.answers().len(),
            remaining_secs = ?controller.session.remaining_secs(),
            "session resumed"
        );

        if let Some(deadline) = controller.policy.forced_submit_due(controller.session.log()) {
            tracing::warn!(
                session_id = %controller.session.id(),
                %deadline,
                "pending security escalation restored"
            );
            controller.escalation_deadline = Some(deadline);
            controller
                .observer
                .on_warning(&Warning::EscalationScheduled { deadline });
        }

        if controller.session.remaining_secs() == Some(0) {
            controller.submit(SubmitReason::Timeout);
        } else if controller.poll_escalation().is_none() {
            controller.save();
        }
        controller
    }

    /// Open the exam view: resume the chosen candidate or start fresh.
    ///
    /// A candidate that cannot be read (missing, corrupt, already submitted,
    /// or belonging to another exam) falls back to a fresh session.
    pub fn open(
        exam: Exam,
        choice: StartupChoice,
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        if let StartupChoice::Resume(session_id) = choice {
            let recovery = RecoveryManager::new(Arc::clone(&store))
                .with_retention(config.max_sessions_per_target);
            let failure = match recovery.load(session_id) {
                Ok(session) if session.is_submitted() => "session was already submitted".to_string(),
                Ok(session) if session.exam_target() != exam.id => {
                    format!("session belongs to exam {}", session.exam_target())
                }
                Ok(session) => return Self::resume(exam, session, config, store, clock, observer),
                Err(e) => e.to_string(),
            };
            tracing::warn!(%session_id, "recovery failed, starting a new session: {failure}");
            observer.on_warning(&Warning::RecoveryFailed {
                session_id,
                error: failure,
            });
        }
        Self::start(exam, config, store, clock, observer)
    }

    fn assemble(
        exam: Exam,
        session: Session,
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let recovery = RecoveryManager::new(store).with_retention(config.max_sessions_per_target);
        let policy = EscalationPolicy {
            level: config.security_level,
            tab_switch_threshold: config.tab_switch_threshold,
            grace: config.escalation_grace,
        };
        Self {
            monitor: SecurityMonitor::new(config.devtools_threshold_px),
            scheduler: SnapshotScheduler::new(config.snapshot_interval, config.security_level),
            policy,
            exam,
            session,
            config,
            clock,
            recovery,
            observer,
            active_since: None,
            save_status: SaveStatus::NeverSaved,
            escalation_deadline: None,
            warned_marks: BTreeSet::new(),
            final_saved: false,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn exam(&self) -> &Exam {
        &self.exam
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn save_status(&self) -> &SaveStatus {
        &self.save_status
    }

    pub fn is_submitted(&self) -> bool {
        self.session.is_submitted()
    }

    pub fn snapshot_interval(&self) -> Duration {
        self.scheduler.interval()
    }

    pub fn escalation_deadline(&self) -> Option<DateTime<Utc>> {
        self.escalation_deadline
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // -----------------------------------------------------------------------
    // User operations
    // -----------------------------------------------------------------------

    /// Record a new value for a question. Returns `false` (and changes
    /// nothing) once the session is submitted.
    pub fn record_answer(&mut self, question_id: &str, value: AnswerValue) -> bool {
        if self.is_submitted() {
            tracing::debug!(question_id, "ignoring answer after submission");
            return false;
        }
        let at = self.session.stamp(self.clock.now());
        let revision = self.session.record_answer(question_id, value, at);
        tracing::debug!(question_id, revision, "answer recorded");
        true
    }

    /// Move to another question, crediting time spent on the current one.
    pub fn navigate(&mut self, to: &str) -> bool {
        if self.is_submitted() {
            return false;
        }
        if !self.exam.questions.is_empty() && self.exam.question(to).is_none() {
            tracing::warn!(question_id = to, "navigation to unknown question ignored");
            return false;
        }
        let from = self.session.current_question().map(str::to_string);
        if from.as_deref() == Some(to) {
            return false;
        }

        let at = self.session.stamp(self.clock.now());
        self.flush_active_time(at);
        self.session.append(
            at,
            EventPayload::Navigation {
                from,
                to: to.to_string(),
            },
        );
        self.session.set_current_question(Some(to.to_string()));
        self.active_since = Some(at);
        true
    }

    /// Toggle the review flag; returns the new state, or `None` after submission.
    pub fn toggle_flag(&mut self, question_id: &str) -> Option<bool> {
        if self.is_submitted() {
            return None;
        }
        let at = self.session.stamp(self.clock.now());
        Some(self.session.toggle_flag(question_id, at))
    }

    /// Freeze the session and hand it off. Only the first call has any
    /// effect; later calls return `None`.
    pub fn submit(&mut self, reason: SubmitReason) -> Option<ExamSubmission> {
        if self.is_submitted() {
            tracing::debug!(%reason, "submit ignored, session already submitted");
            return None;
        }
        let at = self.session.stamp(self.clock.now());
        self.flush_active_time(at);
        self.active_since = None;
        self.session.mark_submitted(reason, at);
        self.escalation_deadline = None;

        tracing::info!(
            session_id = %self.session.id(),
            %reason,
            answered = self.session.answers().len(),
            violations = self.session.security_events().len(),
            "session submitted"
        );

        self.save();

        let submission = ExamSubmission {
            security_summary: SecuritySummary::from_events(self.session.security_events()),
            session: self.session.clone(),
        };
        self.observer.on_submitted(&submission);
        Some(submission)
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// One second of countdown. Returns the submission when time runs out.
    pub fn tick_countdown(&mut self) -> Option<ExamSubmission> {
        if self.is_submitted() || self.session.duration_secs() == 0 {
            return None;
        }
        self.session.tick();
        let remaining = self.session.remaining_secs().unwrap_or(0);

        if remaining == 0 {
            tracing::info!(session_id = %self.session.id(), "time is up");
            return self.submit(SubmitReason::Timeout);
        }

        let crossed: Vec<u64> = self
            .config
            .time_warnings
            .iter()
            .copied()
            .filter(|mark| remaining <= *mark && !self.warned_marks.contains(mark))
            .collect();
        if !crossed.is_empty() {
            self.warned_marks.extend(crossed);
            let at = self.session.stamp(self.clock.now());
            self.session.append(
                at,
                EventPayload::Activity(ActivityAction::TimeWarning {
                    remaining_secs: remaining,
                }),
            );
            self.observer.on_warning(&Warning::TimeLow {
                remaining_secs: remaining,
            });
        }
        None
    }

    /// Persist the full session. Failures are surfaced but never block the
    /// exam; the next call simply tries again.
    pub fn save(&mut self) -> SaveStatus {
        if self.is_submitted() && self.final_saved {
            return self.save_status.clone();
        }
        let now = self.clock.now();
        let previous = self.session.last_saved_at();
        self.session.set_last_saved_at(Some(now));

        self.save_status = match self.recovery.persist(&self.session) {
            Ok(()) => {
                self.final_saved = self.is_submitted();
                tracing::debug!(session_id = %self.session.id(), "session saved");
                SaveStatus::Saved { at: now }
            }
            Err(e) => {
                self.session.set_last_saved_at(previous);
                tracing::warn!(session_id = %self.session.id(), "save failed: {e}");
                self.observer.on_warning(&Warning::SaveFailed {
                    error: e.to_string(),
                });
                SaveStatus::Failed {
                    at: now,
                    error: e.to_string(),
                }
            }
        };
        self.observer.on_save_status(&self.save_status);
        self.save_status.clone()
    }

    /// Fire a pending forced submission once its grace period has elapsed.
    pub fn poll_escalation(&mut self) -> Option<ExamSubmission> {
        let deadline = self.escalation_deadline?;
        if self.clock.now() < deadline {
            return None;
        }
        tracing::warn!(session_id = %self.session.id(), "grace period over, forcing submission");
        self.submit(SubmitReason::Security)
    }

    /// Final flush when the exam view goes away without a submission.
    pub fn teardown(&mut self) -> SaveStatus {
        if !self.is_submitted() {
            let at = self.session.stamp(self.clock.now());
            self.flush_active_time(at);
        }
        self.save()
    }

    // -----------------------------------------------------------------------
    // Environment
    // -----------------------------------------------------------------------

    /// Classify and record an environment signal.
    pub fn handle_signal(&mut self, signal: &EnvironmentSignal) -> Reaction {
        let at = self.session.stamp(self.clock.now());
        let classified = self.monitor.observe(signal, at);
        let mut reaction = Reaction {
            prevent_default: classified.prevent_default,
            ..Default::default()
        };
        if self.is_submitted() {
            return reaction;
        }

        match classified.observation {
            Observation::Violation(detection) => {
                let kind = detection.kind;
                self.session
                    .log_mut()
                    .append_security(at, kind, detection.detail.clone());
                let count = self.session.log().violations(kind);
                tracing::warn!(
                    session_id = %self.session.id(),
                    violation = %kind,
                    count,
                    "{}",
                    detection.detail
                );
                self.observer.on_warning(&Warning::Violation {
                    kind,
                    detail: detection.detail,
                });

                let escalation = self.policy.evaluate(kind, self.session.log());
                if escalation.capture_snapshot {
                    reaction.capture = Some(SnapshotTrigger::for_violation(kind));
                }
                if escalation.force_submit && self.escalation_deadline.is_none() {
                    let grace = chrono::Duration::from_std(self.policy.grace)
                        .unwrap_or_else(|_| chrono::Duration::seconds(5));
                    let deadline = at + grace;
                    self.escalation_deadline = Some(deadline);
                    reaction.escalation_scheduled = Some(deadline);
                    tracing::warn!(
                        session_id = %self.session.id(),
                        %deadline,
                        "security escalation: submission scheduled"
                    );
                    self.observer
                        .on_warning(&Warning::EscalationScheduled { deadline });
                }
            }
            Observation::Focus { state, away_secs } => {
                self.session
                    .append(at, EventPayload::Focus { state, away_secs });
            }
            Observation::Activity(action) => {
                if action == ActivityAction::NetworkOffline {
                    self.observer.on_warning(&Warning::Offline);
                }
                self.session.append(at, EventPayload::Activity(action));
            }
            Observation::Ignored => {}
        }
        reaction
    }

    /// Append a finished capture.
    pub fn record_snapshot(&mut self, trigger: SnapshotTrigger, output: CaptureOutput) -> bool {
        if self.is_submitted() {
            return false;
        }
        let at = self.session.stamp(self.clock.now());
        let snapshot = self.scheduler.compose(at, trigger, output);
        tracing::debug!(
            %trigger,
            has_image = snapshot.image_data.is_some(),
            "snapshot recorded"
        );
        self.session.push_snapshot(snapshot);
        true
    }

    /// A capture device could not be acquired; the feature stays off.
    pub fn media_unavailable(&mut self, device: &str, reason: &str) {
        tracing::warn!(device, "media capture unavailable: {reason}");
        self.observer.on_warning(&Warning::MediaUnavailable {
            device: device.to_string(),
            reason: reason.to_string(),
        });
        if self.is_submitted() {
            return;
        }
        let at = self.session.stamp(self.clock.now());
        self.session.append(
            at,
            EventPayload::Activity(ActivityAction::MediaUnavailable {
                device: device.to_string(),
                reason: reason.to_string(),
            }),
        );
    }

    /// Change the periodic snapshot interval; applies from the next cycle.
    pub fn set_snapshot_interval(&mut self, interval: Duration) -> bool {
        if self.is_submitted() || !self.scheduler.set_interval(interval) {
            return false;
        }
        let at = self.session.stamp(self.clock.now());
        self.session.append(
            at,
            EventPayload::Activity(ActivityAction::SnapshotIntervalChanged {
                secs: interval.as_secs(),
            }),
        );
        true
    }

    fn flush_active_time(&mut self, now: DateTime<Utc>) {
        if let (Some(question), Some(since)) =
            (self.session.current_question().map(str::to_string), self.active_since)
        {
            let secs = (now - since).num_milliseconds().max(0) as f64 / 1000.0;
            self.session.add_time(&question, secs);
        }
        self.active_since = Some(now);
    }
}
