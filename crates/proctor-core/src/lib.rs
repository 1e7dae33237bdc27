//! proctor-core — exam session engine.
//!
//! This crate defines the session aggregate, the event log, integrity
//! detection and escalation, snapshot bookkeeping, and the recovery index.
//! Session storage and clocks are injected through the
//! [`persistence::KeyValueStore`] and [`clock::Clock`] traits. The only
//! file access is in [`parser`], which reads exam definitions from disk.

pub mod answers;
pub mod clock;
pub mod controller;
pub mod error;
pub mod events;
pub mod model;
pub mod parser;
pub mod persistence;
pub mod security;
pub mod session;
pub mod snapshot;

pub use controller::{EngineConfig, ExamSubmission, SessionController, SessionObserver};
pub use model::{AnswerValue, Exam, Question, QuestionKind, SubmitReason};
pub use session::Session;
