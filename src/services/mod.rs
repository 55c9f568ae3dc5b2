//! Services layer - Business logic
//!
//! Services sit between the HTTP handlers and the repositories. They own:
//! - Validation and error mapping
//! - Time (through `Clock`) and the institution timezone
//! - Invalidation of cached statistics

pub mod attendance;
pub mod capture;
pub mod class;
pub mod clock;
pub mod payload;
pub mod roster;
pub mod schedule;
pub mod stats;
pub mod token;

pub use attendance::{
    AttendanceError, AttendanceGateway, AttendanceRequest, AttendanceService, ElapsedWindow,
    IdleStatus, VerificationOutcome,
};
pub use capture::{
    Camera, CameraError, CaptureError, CaptureSession, Frame, FrameDecoder, FrameStream,
    PreconditionWatcher,
};
pub use class::{ClassService, ClassServiceError, ExpectedSessions, ScheduledSession};
pub use clock::{Clock, ManualClock, SystemClock};
pub use payload::{PayloadCodec, PayloadError, ScanPayload};
pub use roster::{RosterService, RosterServiceError};
pub use stats::{StatsService, StatsServiceError};
pub use token::{IssuedToken, SessionTokenManager, TokenServiceError};
