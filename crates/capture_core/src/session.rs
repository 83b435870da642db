use shared::domain::EncodedImage;

use crate::angles;
use crate::sequence::{TargetSequence, TARGET_COUNT};

/// Where one capture session currently stands. Owned exclusively by
/// [`CaptureSession`]; everything else reads snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    AwaitingPermissions { error: Option<String> },
    Capturing,
    Uploading,
    Complete { url: String },
    Failed { reason: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitingPermissions { .. } => "awaiting_permissions",
            SessionState::Capturing => "capturing",
            SessionState::Uploading => "uploading",
            SessionState::Complete { .. } => "complete",
            SessionState::Failed { .. } => "failed",
        }
    }
}

/// A frame paired with the target angle it satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub target: f64,
    pub image: EncodedImage,
}

/// Read-only projection for rendering consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub heading: f64,
    /// `None` once every target has been captured.
    pub current_target: Option<f64>,
    pub aligned: bool,
    pub captured_angles: Vec<f64>,
    pub captured_count: usize,
    pub progress: f64,
    pub complete: bool,
    pub failure: Option<String>,
}

/// The session state machine. Pure and synchronous: transitions happen
/// only through the methods below, driven by the orchestrator's events.
///
/// A capture is a two-step affair: `begin_capture` reserves the current
/// target (the guard), and `complete_capture` / `abort_capture` settles
/// the reservation once the frame source has answered. The reservation
/// keeps concurrent capture requests out while a frame is in flight.
#[derive(Debug)]
pub struct CaptureSession {
    state: SessionState,
    sequence: TargetSequence,
    frames: Vec<CapturedFrame>,
    heading: f64,
    capture_in_flight: Option<f64>,
    upload_started: bool,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingPermissions { error: None },
            sequence: TargetSequence::new(),
            frames: Vec::new(),
            heading: 0.0,
            capture_in_flight: None,
            upload_started: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn frames(&self) -> &[CapturedFrame] {
        &self.frames
    }

    /// Images in capture order, ready for the upload payload.
    pub fn images(&self) -> Vec<EncodedImage> {
        self.frames.iter().map(|frame| frame.image.clone()).collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SessionState::Complete { .. } | SessionState::Failed { .. }
        )
    }

    /// Both permissions confirmed; start capturing. No-op outside
    /// `AwaitingPermissions`.
    pub fn permissions_granted(&mut self) -> bool {
        match self.state {
            SessionState::AwaitingPermissions { .. } => {
                self.state = SessionState::Capturing;
                true
            }
            _ => false,
        }
    }

    /// A permission was refused. Not terminal: the message is kept for
    /// display and the user may retry.
    pub fn permission_denied(&mut self, reason: impl Into<String>) {
        if let SessionState::AwaitingPermissions { error } = &mut self.state {
            *error = Some(reason.into());
        }
    }

    /// Absorb one sensor reading. `None` means the sensor produced no
    /// usable bearing and is ignored. Cheap; allowed in every state.
    pub fn record_heading(&mut self, degrees: Option<f64>) {
        if let Some(degrees) = degrees {
            self.heading = angles::normalize(degrees);
        }
    }

    fn capture_allowed(&self) -> Option<f64> {
        if !matches!(self.state, SessionState::Capturing) {
            return None;
        }
        if self.capture_in_flight.is_some() || self.upload_started {
            return None;
        }
        let target = self.sequence.current_target().ok()?;
        angles::is_aligned(self.heading, target).then_some(target)
    }

    /// Gate for a user capture request. Rejection is a silent no-op;
    /// acceptance reserves the current target until the frame arrives.
    pub fn begin_capture(&mut self) -> Option<f64> {
        let target = self.capture_allowed()?;
        self.capture_in_flight = Some(target);
        Some(target)
    }

    /// The frame source had no image this attempt; release the
    /// reservation without any other state change.
    pub fn abort_capture(&mut self) {
        self.capture_in_flight = None;
    }

    /// Store the frame for the reserved target and advance the sequence.
    /// Returns `true` on the single transition into `Uploading`.
    ///
    /// Panics if no capture was reserved: `begin_capture` is the only
    /// way in, so reaching here without a reservation is a bug.
    pub fn complete_capture(&mut self, image: EncodedImage) -> bool {
        let target = self
            .capture_in_flight
            .take()
            .expect("complete_capture without a reserved target");
        self.frames.push(CapturedFrame { target, image });
        self.sequence
            .advance()
            .expect("capture reserved past the final target");
        if self.sequence.is_complete() && !self.upload_started {
            self.upload_started = true;
            self.state = SessionState::Uploading;
            return true;
        }
        false
    }

    /// Service success. Ignored unless the session is `Uploading`, so a
    /// stale or duplicate result cannot disturb a settled session.
    pub fn upload_succeeded(&mut self, url: impl Into<String>) {
        if matches!(self.state, SessionState::Uploading) {
            self.state = SessionState::Complete { url: url.into() };
        }
    }

    /// Service failure or transport error. Same idempotence as success.
    pub fn upload_failed(&mut self, reason: impl Into<String>) {
        if matches!(self.state, SessionState::Uploading) {
            self.state = SessionState::Failed {
                reason: reason.into(),
            };
        }
    }

    pub fn view(&self) -> SessionView {
        let current_target = self.sequence.current_target().ok();
        let aligned = current_target
            .map(|target| angles::is_aligned(self.heading, target))
            .unwrap_or(false);
        let failure = match &self.state {
            SessionState::Failed { reason } => Some(reason.clone()),
            SessionState::AwaitingPermissions { error } => error.clone(),
            _ => None,
        };
        SessionView {
            state: self.state.clone(),
            heading: self.heading,
            current_target,
            aligned,
            captured_angles: self.sequence.captured_angles().to_vec(),
            captured_count: self.sequence.captured_count(),
            progress: self.sequence.captured_count() as f64 / TARGET_COUNT as f64,
            complete: self.sequence.is_complete(),
            failure,
        }
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
