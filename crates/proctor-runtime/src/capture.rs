//! Media capture seam.
//!
//! The camera and screen are external collaborators. The runtime asks for
//! permission once at session start and then requests frames; a device that
//! cannot be acquired stays off for the rest of the session.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use proctor_core::snapshot::CaptureOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Webcam,
    Screen,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Webcam => write!(f, "webcam"),
            Device::Screen => write!(f, "screen"),
        }
    }
}

/// Which devices are live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveDevices {
    pub webcam: bool,
    pub screen: bool,
}

impl ActiveDevices {
    pub fn any(&self) -> bool {
        self.webcam || self.screen
    }

    pub fn set(&mut self, device: Device, on: bool) {
        match device {
            Device::Webcam => self.webcam = on,
            Device::Screen => self.screen = on,
        }
    }
}

/// Errors from the media collaborator.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user or platform refused access.
    #[error("permission denied for {0}")]
    PermissionDenied(Device),

    /// No such device on this host.
    #[error("{0} not available")]
    NotAvailable(Device),

    /// A frame could not be produced.
    #[error("capture failed: {0}")]
    Failed(String),
}

impl CaptureError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CaptureError::PermissionDenied(_))
    }
}

/// Source of webcam frames and screen state.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Ask for access to a device. Called once per device at session start.
    async fn acquire(&self, device: Device) -> Result<(), CaptureError>;

    /// Grab one frame from the active devices.
    async fn capture(&self, active: ActiveDevices) -> Result<CaptureOutput, CaptureError>;

    /// Release all devices. Called when the session ends.
    async fn release(&self) {}
}

/// Returns the same frame every time.
#[derive(Debug)]
pub struct StaticCapture {
    frame: String,
    captures: AtomicUsize,
}

impl StaticCapture {
    pub fn new(frame: impl Into<String>) -> Self {
        Self {
            frame: frame.into(),
            captures: AtomicUsize::new(0),
        }
    }

    /// Number of frames handed out so far.
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::Relaxed)
    }
}

impl Default for StaticCapture {
    fn default() -> Self {
        Self::new("data:image/jpeg;base64,/9j/4AAQSkZJRgABAQ==")
    }
}

#[async_trait]
impl MediaCapture for StaticCapture {
    async fn acquire(&self, _device: Device) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn capture(&self, active: ActiveDevices) -> Result<CaptureOutput, CaptureError> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        Ok(CaptureOutput {
            frame: active.webcam.then(|| self.frame.clone()),
            screen_active: active.screen,
            screen_data: None,
        })
    }
}

/// Refuses every device, like a user dismissing the permission prompt.
#[derive(Debug, Default)]
pub struct DeniedCapture;

#[async_trait]
impl MediaCapture for DeniedCapture {
    async fn acquire(&self, device: Device) -> Result<(), CaptureError> {
        Err(CaptureError::PermissionDenied(device))
    }

    async fn capture(&self, _active: ActiveDevices) -> Result<CaptureOutput, CaptureError> {
        Err(CaptureError::Failed("no device acquired".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_capture_respects_active_devices() {
        let media = StaticCapture::new("frame");
        let out = media
            .capture(ActiveDevices {
                webcam: true,
                screen: false,
            })
            .await
            .unwrap();
        assert_eq!(out.frame.as_deref(), Some("frame"));
        assert!(!out.screen_active);

        let out = media
            .capture(ActiveDevices {
                webcam: false,
                screen: true,
            })
            .await
            .unwrap();
        assert_eq!(out.frame, None);
        assert!(out.screen_active);
        assert_eq!(media.capture_count(), 2);
    }

    #[tokio::test]
    async fn denied_capture_reports_permission() {
        let err = DeniedCapture.acquire(Device::Webcam).await.unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(err.to_string(), "permission denied for webcam");
    }
}
