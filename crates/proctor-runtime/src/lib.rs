//! proctor-runtime — drives a session on a tokio task.
//!
//! The [`SessionRuntime`] owns a `SessionController` on a single task and
//! multiplexes the countdown, autosave, snapshot and devtools timers with
//! commands from a [`SessionHandle`]. Media capture runs on spawned tasks and
//! reports back through a channel, so the session itself is only ever
//! touched from one place.

pub mod capture;
pub mod clock;
pub mod probe;
pub mod session;

pub use capture::{ActiveDevices, CaptureError, DeniedCapture, Device, MediaCapture, StaticCapture};
pub use clock::TokioClock;
pub use probe::{FixedProbe, WindowProbe};
pub use session::{RuntimeError, SessionHandle, SessionOutcome, SessionRuntime};
