//! Capture session
//!
//! Client-side attendance capture: a state machine driven by a camera scan
//! loop or a manually typed code, plus a background task that re-checks the
//! schedule and duplicate preconditions while the session sits idle.
//!
//! State changes are published on a `watch` channel so a UI can render every
//! transition. Illegal transitions are rejected and leave the state as it was.

use crate::models::CaptureState;
use crate::services::attendance::{
    AttendanceError, AttendanceGateway, AttendanceRequest, IdleStatus, VerificationOutcome,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One camera frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Error types for camera access
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Camera unavailable: {0}")]
    Unavailable(String),
}

/// A device camera
#[async_trait]
pub trait Camera: Send + Sync {
    /// Open a frame stream. The caller must `release` it.
    async fn acquire(&self) -> Result<Box<dyn FrameStream>, CameraError>;
}

/// Frames from an acquired camera
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Give the camera back
    async fn release(&mut self);
}

/// Extracts the text of an attendance code from a frame
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Option<String>;
}

/// Error types for capture session operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Illegal capture transition from {from} to {to}")]
    IllegalTransition { from: CaptureState, to: CaptureState },

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),
}

/// How the decode loop ended
enum ScanEnd {
    Decoded(String),
    Cancelled,
    StreamEnded,
}

/// One student's attendance capture for one class
pub struct CaptureSession {
    gateway: Arc<dyn AttendanceGateway>,
    class_id: i64,
    student_id: i64,
    device_fingerprint: Option<String>,
    state: Arc<watch::Sender<CaptureState>>,
    idle_status: Arc<watch::Sender<Option<IdleStatus>>>,
    watcher: Option<PreconditionWatcher>,
}

impl CaptureSession {
    pub fn new(
        gateway: Arc<dyn AttendanceGateway>,
        class_id: i64,
        student_id: i64,
        device_fingerprint: Option<String>,
    ) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        let (idle_status, _) = watch::channel(None);
        Self {
            gateway,
            class_id,
            student_id,
            device_fingerprint,
            state: Arc::new(state),
            idle_status: Arc::new(idle_status),
            watcher: None,
        }
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Observe every state change
    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// Observe idle re-check results; `None` until the first one lands
    pub fn idle_status(&self) -> watch::Receiver<Option<IdleStatus>> {
        self.idle_status.subscribe()
    }

    /// Start the periodic idle re-check, replacing a running one
    pub fn start_watcher(&mut self, every: Duration) {
        self.watcher = Some(PreconditionWatcher::spawn(
            self.gateway.clone(),
            self.class_id,
            self.student_id,
            self.state.subscribe(),
            self.idle_status.clone(),
            every,
        ));
    }

    /// Stop the idle re-check and wait for its task to finish
    pub async fn stop_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }
    }

    fn transition(&self, to: CaptureState) -> Result<(), CaptureError> {
        let mut rejected = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(to) {
                *current = to;
                true
            } else {
                rejected = Some(*current);
                false
            }
        });

        match rejected {
            Some(from) => Err(CaptureError::IllegalTransition { from, to }),
            None => {
                tracing::debug!(class_id = self.class_id, state = %to, "Capture state changed");
                Ok(())
            }
        }
    }

    /// Back to `Idle` after a terminal state
    pub fn retry(&self) -> Result<(), CaptureError> {
        self.transition(CaptureState::Idle)
    }

    /// Begin manual entry from `Idle`
    pub fn start_manual_entry(&self) -> Result<(), CaptureError> {
        self.transition(CaptureState::Scanning)
    }

    /// Verify a typed code. Allowed from `Idle` or `Scanning`.
    pub async fn submit_manual_code(&self, code: &str) -> Result<VerificationOutcome, CaptureError> {
        if self.state() == CaptureState::Idle {
            self.start_manual_entry()?;
        }
        self.verify_code(code.to_string()).await
    }

    async fn verify_code(&self, code: String) -> Result<VerificationOutcome, CaptureError> {
        self.transition(CaptureState::Verifying)?;

        let request = AttendanceRequest {
            class_id: self.class_id,
            student_id: self.student_id,
            code,
            device_fingerprint: self.device_fingerprint.clone(),
        };
        let outcome = self.gateway.verify(&request).await;

        self.transition(outcome.state)?;
        Ok(outcome)
    }

    /// Scan frames until a code decodes, the stream ends or `cancel` fires.
    ///
    /// # Returns
    /// The verification outcome, or `None` when the scan stopped without a
    /// code (the session is back in `Idle`). A denied camera resolves to a
    /// `permission_denied` outcome.
    ///
    /// # Errors
    /// - `IllegalTransition` unless the session is `Idle`
    /// - `CameraUnavailable` if the camera could not be opened
    pub async fn scan_with(
        &self,
        camera: &dyn Camera,
        decoder: &dyn FrameDecoder,
        cancel: CancellationToken,
    ) -> Result<Option<VerificationOutcome>, CaptureError> {
        self.transition(CaptureState::Scanning)?;

        let mut stream = match camera.acquire().await {
            Ok(stream) => stream,
            Err(CameraError::PermissionDenied) => {
                tracing::warn!(class_id = self.class_id, "Camera permission denied");
                self.transition(CaptureState::PermissionDenied)?;
                return Ok(Some(VerificationOutcome::from_error(&AttendanceError::Permission)));
            }
            Err(CameraError::Unavailable(reason)) => {
                self.transition(CaptureState::Idle)?;
                return Err(CaptureError::CameraUnavailable(reason));
            }
        };

        let end = decode_loop(stream.as_mut(), decoder, &cancel).await;
        stream.release().await;

        match end {
            ScanEnd::Decoded(code) => self.verify_code(code).await.map(Some),
            ScanEnd::Cancelled | ScanEnd::StreamEnded => {
                self.transition(CaptureState::Idle)?;
                Ok(None)
            }
        }
    }
}

async fn decode_loop(
    stream: &mut dyn FrameStream,
    decoder: &dyn FrameDecoder,
    cancel: &CancellationToken,
) -> ScanEnd {
    loop {
        if cancel.is_cancelled() {
            return ScanEnd::Cancelled;
        }

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ScanEnd::Cancelled,
            frame = stream.next_frame() => frame,
        };

        let Some(frame) = frame else {
            tracing::debug!("Camera stream ended before a code was found");
            return ScanEnd::StreamEnded;
        };

        if let Some(text) = decoder.decode(&frame) {
            return ScanEnd::Decoded(text);
        }

        tokio::task::yield_now().await;
    }
}

/// Timer task that re-runs the attendance preconditions while idle.
///
/// Cancelled when dropped.
pub struct PreconditionWatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PreconditionWatcher {
    pub fn spawn(
        gateway: Arc<dyn AttendanceGateway>,
        class_id: i64,
        student_id: i64,
        state: watch::Receiver<CaptureState>,
        status: Arc<watch::Sender<Option<IdleStatus>>>,
        every: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let idle = *state.borrow() == CaptureState::Idle;
                if !idle {
                    continue;
                }

                match gateway.precheck(class_id, student_id).await {
                    Ok(result) => {
                        status.send_replace(Some(result));
                    }
                    Err(e) => {
                        tracing::warn!(class_id, student_id, error = %e, "Idle precondition re-check failed");
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Cancel and wait for the task to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.handle).await {
            tracing::warn!(error = %e, "Precondition watcher task did not exit cleanly");
        }
    }
}

impl Drop for PreconditionWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
