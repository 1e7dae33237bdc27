//! Session task and its handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::OptionFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use proctor_core::controller::{ExamSubmission, Reaction, SaveStatus, SessionController};
use proctor_core::model::{AnswerValue, SubmitReason};
use proctor_core::security::{EnvironmentSignal, SecuritySummary};
use proctor_core::session::Session;
use proctor_core::snapshot::{CaptureOutput, SnapshotTrigger};

use crate::capture::{ActiveDevices, CaptureError, Device, MediaCapture, StaticCapture};
use crate::probe::WindowProbe;

const COMMAND_BUFFER: usize = 64;
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Errors from talking to a session task.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The session task has finished (submitted or shut down).
    #[error("session is closed")]
    Closed,

    #[error("session task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// How a session task ended.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Final state of the session.
    pub session: Session,
    /// Present when the session was submitted, absent after a shutdown.
    pub submission: Option<ExamSubmission>,
}

enum Command {
    RecordAnswer {
        question_id: String,
        value: AnswerValue,
    },
    Navigate(String),
    ToggleFlag(String),
    Signal {
        signal: EnvironmentSignal,
        reply: oneshot::Sender<Reaction>,
    },
    Submit {
        reason: SubmitReason,
        reply: oneshot::Sender<Option<ExamSubmission>>,
    },
    SetSnapshotInterval(Duration),
    CaptureNow,
    Save(oneshot::Sender<SaveStatus>),
    Inspect(oneshot::Sender<Session>),
    Shutdown,
}

/// Builder for a session task.
pub struct SessionRuntime {
    media: Arc<dyn MediaCapture>,
    requested: ActiveDevices,
    probe: Option<Arc<dyn WindowProbe>>,
}

impl SessionRuntime {
    /// A runtime with a static webcam source and no window probe.
    pub fn new() -> Self {
        Self {
            media: Arc::new(StaticCapture::default()),
            requested: ActiveDevices {
                webcam: true,
                screen: false,
            },
            probe: None,
        }
    }

    /// Use `media` and request the given devices at start.
    pub fn with_media(mut self, media: Arc<dyn MediaCapture>, requested: ActiveDevices) -> Self {
        self.media = media;
        self.requested = requested;
        self
    }

    /// Poll `probe` for the devtools heuristic.
    pub fn with_probe(mut self, probe: Arc<dyn WindowProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Move the controller onto a new task and return a handle to it.
    pub fn spawn(self, controller: SessionController) -> SessionHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let driver = Driver {
            controller,
            media: self.media,
            requested: self.requested,
            active: ActiveDevices::default(),
            probe: self.probe,
            commands: rx,
            capture_in_flight: false,
            pending_captures: VecDeque::new(),
        };
        SessionHandle {
            commands: tx,
            task: tokio::spawn(driver.run()),
        }
    }
}

impl Default for SessionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends operations to a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    async fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn record_answer(
        &self,
        question_id: impl Into<String>,
        value: AnswerValue,
    ) -> Result<(), RuntimeError> {
        self.send(Command::RecordAnswer {
            question_id: question_id.into(),
            value,
        })
        .await
    }

    pub async fn navigate(&self, question_id: impl Into<String>) -> Result<(), RuntimeError> {
        self.send(Command::Navigate(question_id.into())).await
    }

    pub async fn toggle_flag(&self, question_id: impl Into<String>) -> Result<(), RuntimeError> {
        self.send(Command::ToggleFlag(question_id.into())).await
    }

    /// Forward an environment signal; the reaction tells the host whether
    /// to suppress the default action.
    pub async fn signal(&self, signal: EnvironmentSignal) -> Result<Reaction, RuntimeError> {
        self.request(|reply| Command::Signal { signal, reply }).await
    }

    /// Submit the session. `None` if it was already submitted.
    pub async fn submit(&self, reason: SubmitReason) -> Result<Option<ExamSubmission>, RuntimeError> {
        self.request(|reply| Command::Submit { reason, reply }).await
    }

    pub async fn set_snapshot_interval(&self, interval: Duration) -> Result<(), RuntimeError> {
        self.send(Command::SetSnapshotInterval(interval)).await
    }

    /// Take a snapshot now with the `manual` trigger.
    pub async fn capture_now(&self) -> Result<(), RuntimeError> {
        self.send(Command::CaptureNow).await
    }

    /// Persist immediately and report the outcome.
    pub async fn save(&self) -> Result<SaveStatus, RuntimeError> {
        self.request(Command::Save).await
    }

    /// A copy of the current session state.
    pub async fn inspect(&self) -> Result<Session, RuntimeError> {
        self.request(Command::Inspect).await
    }

    /// End the session without submitting; state is flushed first.
    pub async fn shutdown(self) -> Result<SessionOutcome, RuntimeError> {
        // The task may already be gone after a submission; joining still works.
        let _ = self.commands.send(Command::Shutdown).await;
        Ok(self.task.await?)
    }

    /// Wait for the session to end on its own (submission or timeout).
    pub async fn join(self) -> Result<SessionOutcome, RuntimeError> {
        let SessionHandle { commands, task } = self;
        // Keep the sender alive so the task does not read a closed channel
        // as a shutdown request.
        let outcome = task.await?;
        drop(commands);
        Ok(outcome)
    }
}

type CaptureResult = (SnapshotTrigger, Result<CaptureOutput, CaptureError>);

struct Driver {
    controller: SessionController,
    media: Arc<dyn MediaCapture>,
    requested: ActiveDevices,
    active: ActiveDevices,
    probe: Option<Arc<dyn WindowProbe>>,
    commands: mpsc::Receiver<Command>,
    capture_in_flight: bool,
    pending_captures: VecDeque<SnapshotTrigger>,
}

enum Flow {
    Continue,
    Stop,
}

impl Driver {
    async fn run(mut self) -> SessionOutcome {
        let session_id = self.controller.session().id();
        tracing::debug!(%session_id, "session task started");

        if self.controller.is_submitted() {
            // Resumed an expired session; nothing left to drive.
            return self.finish().await;
        }

        self.acquire_media().await;

        let config = self.controller.config().clone();
        let now = Instant::now();
        let mut countdown = interval_at(now + COUNTDOWN_TICK, COUNTDOWN_TICK);
        let mut autosave = interval_at(now + config.autosave_interval, config.autosave_interval);
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut devtools = interval_at(
            now + config.devtools_poll_interval,
            config.devtools_poll_interval,
        );
        devtools.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let snapshot_timer = sleep(self.controller.snapshot_interval());
        tokio::pin!(snapshot_timer);

        let (capture_tx, mut capture_rx) = mpsc::channel::<CaptureResult>(4);

        loop {
            let escalation: OptionFuture<_> = self
                .controller
                .escalation_deadline()
                .map(|deadline| {
                    let remaining = (deadline - self.controller.clock().now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    sleep(remaining)
                })
                .into();

            let flow = tokio::select! {
                _ = countdown.tick() => {
                    self.controller.tick_countdown();
                    Flow::Continue
                }
                _ = autosave.tick() => {
                    self.controller.save();
                    Flow::Continue
                }
                () = &mut snapshot_timer => {
                    self.request_capture(SnapshotTrigger::Interval, &capture_tx);
                    // A changed interval applies from here on.
                    snapshot_timer
                        .as_mut()
                        .reset(Instant::now() + self.controller.snapshot_interval());
                    Flow::Continue
                }
                _ = devtools.tick(), if self.probe.is_some() => {
                    self.poll_window(&capture_tx);
                    Flow::Continue
                }
                Some(()) = escalation => {
                    self.controller.poll_escalation();
                    Flow::Continue
                }
                Some((trigger, result)) = capture_rx.recv() => {
                    self.on_capture(trigger, result, &capture_tx);
                    Flow::Continue
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command, &capture_tx),
                    None => {
                        tracing::debug!(%session_id, "all handles dropped");
                        Flow::Stop
                    }
                },
            };

            if matches!(flow, Flow::Stop) || self.controller.is_submitted() {
                break;
            }
        }

        self.finish().await
    }

    async fn acquire_media(&mut self) {
        for device in [Device::Webcam, Device::Screen] {
            let wanted = match device {
                Device::Webcam => self.requested.webcam,
                Device::Screen => self.requested.screen,
            };
            if !wanted {
                continue;
            }
            match self.media.acquire(device).await {
                Ok(()) => {
                    tracing::info!(%device, "media device acquired");
                    self.active.set(device, true);
                }
                Err(e) => self
                    .controller
                    .media_unavailable(&device.to_string(), &e.to_string()),
            }
        }
    }

    fn handle(&mut self, command: Command, capture_tx: &mpsc::Sender<CaptureResult>) -> Flow {
        match command {
            Command::RecordAnswer { question_id, value } => {
                self.controller.record_answer(&question_id, value);
            }
            Command::Navigate(question_id) => {
                self.controller.navigate(&question_id);
            }
            Command::ToggleFlag(question_id) => {
                self.controller.toggle_flag(&question_id);
            }
            Command::Signal { signal, reply } => {
                let reaction = self.controller.handle_signal(&signal);
                self.react(&reaction, capture_tx);
                let _ = reply.send(reaction);
            }
            Command::Submit { reason, reply } => {
                let _ = reply.send(self.controller.submit(reason));
            }
            Command::SetSnapshotInterval(interval) => {
                self.controller.set_snapshot_interval(interval);
            }
            Command::CaptureNow => self.request_capture(SnapshotTrigger::Manual, capture_tx),
            Command::Save(reply) => {
                let _ = reply.send(self.controller.save());
            }
            Command::Inspect(reply) => {
                let _ = reply.send(self.controller.session().clone());
            }
            Command::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    fn react(&mut self, reaction: &Reaction, capture_tx: &mpsc::Sender<CaptureResult>) {
        if let Some(trigger) = reaction.capture {
            self.request_capture(trigger, capture_tx);
        }
    }

    fn poll_window(&mut self, capture_tx: &mpsc::Sender<CaptureResult>) {
        let Some(dimensions) = self.probe.as_ref().and_then(|p| p.dimensions()) else {
            return;
        };
        let reaction = self
            .controller
            .handle_signal(&EnvironmentSignal::WindowDimensions(dimensions));
        self.react(&reaction, capture_tx);
    }

    /// Start a capture, or queue it behind the one already running. Queued
    /// interval captures are not duplicated.
    fn request_capture(&mut self, trigger: SnapshotTrigger, capture_tx: &mpsc::Sender<CaptureResult>) {
        if !self.active.any() {
            self.controller
                .record_snapshot(trigger, CaptureOutput::default());
            return;
        }
        if self.capture_in_flight {
            let duplicate = trigger == SnapshotTrigger::Interval
                && self.pending_captures.contains(&SnapshotTrigger::Interval);
            if !duplicate {
                tracing::debug!(%trigger, "capture already running, queued");
                self.pending_captures.push_back(trigger);
            }
            return;
        }

        self.capture_in_flight = true;
        let media = Arc::clone(&self.media);
        let active = self.active;
        let tx = capture_tx.clone();
        tokio::spawn(async move {
            let result = media.capture(active).await;
            let _ = tx.send((trigger, result)).await;
        });
    }

    fn on_capture(
        &mut self,
        trigger: SnapshotTrigger,
        result: Result<CaptureOutput, CaptureError>,
        capture_tx: &mpsc::Sender<CaptureResult>,
    ) {
        self.capture_in_flight = false;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(%trigger, "capture failed: {e}");
                CaptureOutput {
                    screen_active: self.active.screen,
                    ..Default::default()
                }
            }
        };
        self.controller.record_snapshot(trigger, output);

        if let Some(next) = self.pending_captures.pop_front() {
            self.request_capture(next, capture_tx);
        }
    }

    async fn finish(mut self) -> SessionOutcome {
        if !self.controller.is_submitted() {
            self.controller.teardown();
        }
        self.media.release().await;

        let session = self.controller.session().clone();
        let submission = session.is_submitted().then(|| ExamSubmission {
            security_summary: SecuritySummary::from_events(session.security_events()),
            session: session.clone(),
        });
        tracing::debug!(session_id = %session.id(), submitted = submission.is_some(), "session task finished");
        SessionOutcome {
            session,
            submission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proctor_core::controller::{EngineConfig, NoopObserver};
    use proctor_core::events::{ActivityAction, EventKind, EventPayload};
    use proctor_core::model::{Exam, Question, QuestionKind};
    use proctor_core::persistence::{MemoryStore, RecoveryManager};
    use proctor_core::security::{SecurityLevel, ViolationKind, WindowDimensions};

    use crate::capture::DeniedCapture;
    use crate::clock::TokioClock;
    use crate::probe::FixedProbe;

    fn exam(duration_secs: u64) -> Exam {
        Exam {
            id: "biology".into(),
            title: "Biology".into(),
            duration_secs,
            questions: vec![
                Question {
                    id: "1".into(),
                    prompt: "Cells?".into(),
                    points: 1.0,
                    kind: QuestionKind::ShortAnswer,
                },
                Question {
                    id: "2".into(),
                    prompt: "DNA is a protein.".into(),
                    points: 1.0,
                    kind: QuestionKind::TrueFalse,
                },
            ],
        }
    }

    fn start(exam: Exam, config: EngineConfig, store: Arc<MemoryStore>) -> SessionController {
        SessionController::start(
            exam,
            config,
            store,
            Arc::new(TokioClock::new()),
            Arc::new(NoopObserver),
        )
    }

    fn submitted_events(session: &Session) -> usize {
        session
            .events()
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::Activity(ActivityAction::Submitted { .. })))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn maximum_level_submits_after_grace_period() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            security_level: SecurityLevel::Maximum,
            ..Default::default()
        };
        let handle = SessionRuntime::new().spawn(start(exam(3600), config, store));

        for _ in 0..3 {
            handle.signal(EnvironmentSignal::VisibilityHidden).await.unwrap();
            handle.signal(EnvironmentSignal::VisibilityVisible).await.unwrap();
        }

        sleep(Duration::from_secs(4)).await;
        let session = handle.inspect().await.unwrap();
        assert!(!session.is_submitted());

        sleep(Duration::from_secs(2)).await;
        let outcome = handle.join().await.unwrap();
        let submission = outcome.submission.expect("forced submission");
        assert_eq!(
            submission.session.submission().unwrap().reason,
            SubmitReason::Security
        );
        assert_eq!(submission.security_summary.count(ViolationKind::TabSwitch), 3);
        assert_eq!(submitted_events(&outcome.session), 1);
        assert_eq!(outcome.session.snapshots().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_reaching_zero_submits_once() {
        let store = Arc::new(MemoryStore::new());
        let handle = SessionRuntime::new().spawn(start(exam(3), EngineConfig::default(), store));

        let outcome = handle.join().await.unwrap();
        let session = outcome.session;
        assert_eq!(session.submission().unwrap().reason, SubmitReason::Timeout);
        assert_eq!(session.elapsed_secs(), 3);
        assert_eq!(submitted_events(&session), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_and_interval_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let handle =
            SessionRuntime::new().spawn(start(exam(3600), EngineConfig::default(), store.clone()));
        handle.record_answer("1", "mitochondria".into()).await.unwrap();

        sleep(Duration::from_secs(65)).await;
        let session = handle.inspect().await.unwrap();
        assert_eq!(session.snapshots().len(), 1);
        assert_eq!(session.snapshots()[0].trigger, SnapshotTrigger::Interval);
        assert!(session.snapshots()[0].image_data.is_some());

        // Initial save plus two autosaves, each writing the blob and the index.
        assert!(store.write_count() >= 6);
        let persisted = RecoveryManager::new(store.clone()).load(session.id()).unwrap();
        assert_eq!(persisted.answers(), session.answers());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_applies_next_cycle() {
        let store = Arc::new(MemoryStore::new());
        let handle = SessionRuntime::new().spawn(start(exam(3600), EngineConfig::default(), store));
        handle
            .set_snapshot_interval(Duration::from_secs(10))
            .await
            .unwrap();

        sleep(Duration::from_secs(55)).await;
        assert!(handle.inspect().await.unwrap().snapshots().is_empty());

        // 60s (old interval), then 70s and 80s.
        sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.inspect().await.unwrap().snapshots().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_media_keeps_session_running() {
        let store = Arc::new(MemoryStore::new());
        let handle = SessionRuntime::new()
            .with_media(
                Arc::new(DeniedCapture),
                ActiveDevices {
                    webcam: true,
                    screen: true,
                },
            )
            .spawn(start(exam(3600), EngineConfig::default(), store));

        sleep(Duration::from_secs(61)).await;
        let session = handle.inspect().await.unwrap();
        let unavailable = session
            .events()
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::Activity(ActivityAction::MediaUnavailable { .. })))
            .count();
        assert_eq!(unavailable, 2);
        assert_eq!(session.snapshots().len(), 1);
        assert_eq!(session.snapshots()[0].image_data, None);
        assert_eq!(session.snapshots()[0].screen_flag, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn devtools_probe_fires_once_while_open() {
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(FixedProbe::new(WindowDimensions {
            outer_width: 1920,
            inner_width: 1500,
            outer_height: 1080,
            inner_height: 1000,
        }));
        let handle = SessionRuntime::new()
            .with_probe(probe.clone())
            .spawn(start(exam(3600), EngineConfig::default(), store));

        sleep(Duration::from_millis(5500)).await;
        let session = handle.inspect().await.unwrap();
        assert_eq!(session.log().violations(ViolationKind::DevTools), 1);

        probe.set(WindowDimensions {
            outer_width: 1920,
            inner_width: 1920,
            outer_height: 1080,
            inner_height: 1000,
        });
        sleep(Duration::from_secs(2)).await;
        probe.set(WindowDimensions {
            outer_width: 1920,
            inner_width: 1500,
            outer_height: 1080,
            inner_height: 1000,
        });
        sleep(Duration::from_secs(2)).await;
        let session = handle.inspect().await.unwrap();
        assert_eq!(session.log().violations(ViolationKind::DevTools), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_apply_in_order_and_submit_closes() {
        let store = Arc::new(MemoryStore::new());
        let handle = SessionRuntime::new().spawn(start(exam(3600), EngineConfig::default(), store));

        handle.record_answer("1", "cells".into()).await.unwrap();
        handle.navigate("2").await.unwrap();
        handle.record_answer("2", false.into()).await.unwrap();
        handle.toggle_flag("2").await.unwrap();
        let reaction = handle.signal(EnvironmentSignal::ContextMenu).await.unwrap();
        assert!(reaction.prevent_default);

        let submission = handle.submit(SubmitReason::User).await.unwrap().unwrap();
        assert_eq!(submission.session.answers().len(), 2);
        assert_eq!(submission.session.log().count_kind(EventKind::Navigation), 1);
        assert!(submission.session.is_flagged("2"));

        // Either rejected as closed or ignored by the frozen session.
        let _ = handle.record_answer("1", "late".into()).await;
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome.session, submission.session);
        assert_eq!(outcome.session.answers()["1"], AnswerValue::Text("cells".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_without_submitting() {
        let store = Arc::new(MemoryStore::new());
        let handle =
            SessionRuntime::new().spawn(start(exam(3600), EngineConfig::default(), store.clone()));
        handle.record_answer("1", "nucleus".into()).await.unwrap();

        let outcome = handle.shutdown().await.unwrap();
        assert!(outcome.submission.is_none());

        let recovery = RecoveryManager::new(store);
        let candidates = recovery.candidates("biology").unwrap();
        assert_eq!(candidates.len(), 1);
        let persisted = recovery.load(candidates[0].session_id).unwrap();
        assert_eq!(persisted.answers()["1"], AnswerValue::Text("nucleus".into()));
    }
}
