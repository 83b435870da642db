use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::domain::{EncodedImage, SessionId, JPEG_DATA_URL_PREFIX};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};

pub mod angles;
pub mod panorama;
pub mod sequence;
pub mod session;

pub use panorama::{HttpPanoramaBackend, PanoramaBackend, PanoramaError};
pub use session::{CaptureSession, CapturedFrame, SessionState, SessionView};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const HEADING_CHANNEL_CAPACITY: usize = 64;

/// Minimal JFIF header plus end marker; enough bytes to pass for a JPEG
/// at the upload contract's level of scrutiny.
const SYNTHETIC_JPEG_BYTES: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

/// A synthetic frame as the simulated camera produces it.
pub fn synthetic_jpeg_data_url() -> EncodedImage {
    EncodedImage(format!(
        "{JPEG_DATA_URL_PREFIX}{}",
        STANDARD.encode(SYNTHETIC_JPEG_BYTES)
    ))
}

/// One orientation reading. `degrees` is `None` when the sensor produced
/// no usable bearing; such readings are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadingReading {
    pub degrees: Option<f64>,
}

/// Compass/orientation sensor access: a one-shot permission negotiation
/// and a continuous stream of readings at sensor rate.
#[async_trait]
pub trait HeadingSource: Send + Sync {
    async fn request_permission(&self) -> Result<bool>;
    fn subscribe(&self) -> broadcast::Receiver<HeadingReading>;
}

/// Camera access. `capture_frame` returning `None` is a transient miss,
/// not an error; `stop` releases the feed and is safe to call twice.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn capture_frame(&self) -> Option<EncodedImage>;
    async fn stop(&self);
}

/// Scriptable heading source for the simulator and tests: readings are
/// pushed by hand through a broadcast channel.
pub struct ScriptedHeadingSource {
    permission: bool,
    readings: broadcast::Sender<HeadingReading>,
}

impl ScriptedHeadingSource {
    pub fn granted() -> Self {
        Self::with_permission(true)
    }

    pub fn denied() -> Self {
        Self::with_permission(false)
    }

    fn with_permission(permission: bool) -> Self {
        let (readings, _) = broadcast::channel(HEADING_CHANNEL_CAPACITY);
        Self {
            permission,
            readings,
        }
    }

    /// Push one reading to every subscriber.
    pub fn emit(&self, degrees: impl Into<Option<f64>>) {
        let _ = self.readings.send(HeadingReading {
            degrees: degrees.into(),
        });
    }
}

#[async_trait]
impl HeadingSource for ScriptedHeadingSource {
    async fn request_permission(&self) -> Result<bool> {
        Ok(self.permission)
    }

    fn subscribe(&self) -> broadcast::Receiver<HeadingReading> {
        self.readings.subscribe()
    }
}

/// Frame source that hands out a fixed synthetic JPEG, with scriptable
/// startup failures and per-attempt misses.
pub struct StaticFrameSource {
    image: EncodedImage,
    fail_start: bool,
    misses: AtomicU32,
    started: AtomicBool,
    stops: AtomicU32,
}

impl StaticFrameSource {
    pub fn new() -> Self {
        Self::with_image(synthetic_jpeg_data_url())
    }

    pub fn with_image(image: EncodedImage) -> Self {
        Self {
            image,
            fail_start: false,
            misses: AtomicU32::new(0),
            started: AtomicBool::new(false),
            stops: AtomicU32::new(0),
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// The next `count` capture attempts yield no frame.
    pub fn miss_next(&self, count: u32) {
        self.misses.store(count, Ordering::SeqCst);
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Default for StaticFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for StaticFrameSource {
    async fn start(&self) -> Result<()> {
        if self.fail_start {
            anyhow::bail!("camera unavailable");
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn capture_frame(&self) -> Option<EncodedImage> {
        if !self.started.load(Ordering::SeqCst) {
            return None;
        }
        let missed = self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |misses| {
                misses.checked_sub(1)
            })
            .is_ok();
        if missed {
            return None;
        }
        Some(self.image.clone())
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Notifications for rendering consumers, broadcast on every transition.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PermissionsUpdated {
        granted: bool,
        error: Option<String>,
    },
    HeadingUpdated {
        heading: f64,
        aligned: bool,
    },
    FrameCaptured {
        target: f64,
        captured: usize,
    },
    UploadStarted,
    Completed {
        url: String,
    },
    Failed {
        reason: String,
    },
}

/// Wires the session state machine to the heading source, the frame
/// source and the stitching backend, and owns both external resources
/// for the session's lifetime.
///
/// Environmental failures (refused permissions, service errors) never
/// escape as panics or `Err`s here; they are folded into the session
/// state for display. The generation counter keeps a stitching result
/// that arrives after `shutdown` from touching the discarded session.
pub struct CaptureOrchestrator {
    session_id: SessionId,
    heading_source: Arc<dyn HeadingSource>,
    frame_source: Arc<dyn FrameSource>,
    backend: Arc<dyn PanoramaBackend>,
    session: Mutex<CaptureSession>,
    generation: AtomicU64,
    heading_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl CaptureOrchestrator {
    pub fn new(
        heading_source: Arc<dyn HeadingSource>,
        frame_source: Arc<dyn FrameSource>,
        backend: Arc<dyn PanoramaBackend>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            session_id: SessionId::new(),
            heading_source,
            frame_source,
            backend,
            session: Mutex::new(CaptureSession::new()),
            generation: AtomicU64::new(0),
            heading_task: Mutex::new(None),
            events,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn view(&self) -> SessionView {
        self.session.lock().await.view()
    }

    /// Negotiate heading and frame access, orientation first the way the
    /// capture page does it. Denial leaves the session retryable; a
    /// grant starts the heading subscription and returns `true`.
    pub async fn request_permissions(self: &Arc<Self>) -> bool {
        let granted = match self.heading_source.request_permission().await {
            Ok(granted) => granted,
            Err(err) => {
                self.note_permission_denied(format!("orientation permission failed: {err}"))
                    .await;
                return false;
            }
        };
        if !granted {
            self.note_permission_denied("orientation permission denied".to_string())
                .await;
            return false;
        }

        if let Err(err) = self.frame_source.start().await {
            self.note_permission_denied(format!("camera access failed: {err}"))
                .await;
            return false;
        }

        self.session.lock().await.permissions_granted();
        self.spawn_heading_task().await;
        info!(session_id = %self.session_id, "capture: permissions granted");
        let _ = self.events.send(SessionEvent::PermissionsUpdated {
            granted: true,
            error: None,
        });
        true
    }

    async fn note_permission_denied(&self, reason: String) {
        warn!(session_id = %self.session_id, "capture: {reason}");
        self.session.lock().await.permission_denied(reason.clone());
        let _ = self.events.send(SessionEvent::PermissionsUpdated {
            granted: false,
            error: Some(reason),
        });
    }

    async fn spawn_heading_task(self: &Arc<Self>) {
        let mut readings = self.heading_source.subscribe();
        let generation = self.generation.load(Ordering::SeqCst);
        let orchestrator = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match readings.recv().await {
                    Ok(reading) => {
                        if orchestrator.generation.load(Ordering::SeqCst) != generation {
                            break;
                        }
                        let Some(degrees) = reading.degrees else {
                            continue;
                        };
                        let (heading, aligned) = {
                            let mut session = orchestrator.session.lock().await;
                            session.record_heading(Some(degrees));
                            let view = session.view();
                            (view.heading, view.aligned)
                        };
                        let _ = orchestrator
                            .events
                            .send(SessionEvent::HeadingUpdated { heading, aligned });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Stale bearings are worthless; drop them and go on.
                        warn!(skipped, "capture: heading stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let previous = self.heading_task.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// User-initiated capture. A rejected attempt (misaligned, already
    /// complete, upload running, or a frame still in flight) is a silent
    /// no-op, however often it is repeated.
    pub async fn request_capture(self: &Arc<Self>) {
        let target = {
            let mut session = self.session.lock().await;
            match session.begin_capture() {
                Some(target) => target,
                None => return,
            }
        };

        // The frame source may suspend; the reservation taken above
        // keeps concurrent requests out while the lock is released.
        let frame = self.frame_source.capture_frame().await;

        let upload_images = {
            let mut session = self.session.lock().await;
            let Some(image) = frame else {
                session.abort_capture();
                info!(session_id = %self.session_id, target, "capture: no frame available");
                return;
            };
            let reached_upload = session.complete_capture(image);
            let captured = session.view().captured_count;
            info!(session_id = %self.session_id, target, captured, "capture: frame stored");
            let _ = self
                .events
                .send(SessionEvent::FrameCaptured { target, captured });
            reached_upload.then(|| session.images())
        };

        if let Some(images) = upload_images {
            self.begin_upload(images).await;
        }
    }

    /// Fired once, on the edge into `Uploading`: submit the full
    /// rotation and settle the session when the service answers.
    async fn begin_upload(self: &Arc<Self>, images: Vec<EncodedImage>) {
        info!(session_id = %self.session_id, count = images.len(), "upload: started");
        let _ = self.events.send(SessionEvent::UploadStarted);

        let generation = self.generation.load(Ordering::SeqCst);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = orchestrator.backend.stitch(&images).await;
            orchestrator.apply_upload_outcome(generation, outcome).await;
        });
    }

    async fn apply_upload_outcome(
        &self,
        generation: u64,
        outcome: Result<String, PanoramaError>,
    ) {
        let event = {
            let mut session = self.session.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                warn!(session_id = %self.session_id, "upload: result arrived after teardown; dropped");
                return;
            }
            match outcome {
                Ok(url) => {
                    session.upload_succeeded(url.clone());
                    SessionEvent::Completed { url }
                }
                Err(err) => {
                    let reason = err.to_string();
                    session.upload_failed(reason.clone());
                    SessionEvent::Failed { reason }
                }
            }
        };

        match &event {
            SessionEvent::Completed { url } => {
                info!(session_id = %self.session_id, url = %url, "upload: complete");
            }
            SessionEvent::Failed { reason } => {
                error!(session_id = %self.session_id, "upload: failed: {reason}");
            }
            _ => {}
        }
        // Release before announcing, so observers of the terminal event
        // never find the camera still held.
        self.release_sources().await;
        let _ = self.events.send(event);
    }

    /// Tear down the session: stop heading delivery, release the camera,
    /// and arrange for any in-flight stitching result to be dropped.
    /// Safe on every exit path, including after a terminal state.
    pub async fn shutdown(&self) {
        {
            // Bumping the generation under the session lock means an
            // upload outcome is either applied before this point or
            // dropped, never half-applied after it.
            let _session = self.session.lock().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.release_sources().await;
        info!(session_id = %self.session_id, "capture: session shut down");
    }

    async fn release_sources(&self) {
        if let Some(task) = self.heading_task.lock().await.take() {
            task.abort();
        }
        self.frame_source.stop().await;
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
