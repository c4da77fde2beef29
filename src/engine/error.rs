use thiserror::Error;
use ulid::Ulid;

use crate::model::{Ms, SessionStatus, Span, UserId};
use crate::store::StoreError;

/// Stable error taxonomy exposed to request-handling layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Ownership,
    Conflict,
    RegistrationRequired,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Ownership => "ownership",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RegistrationRequired => "registration_required",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("time {0} is not on a whole hour")]
    InvalidTimeFormat(Ms),
    #[error("end {end} must be after start {start}")]
    InvalidRange { start: Ms, end: Ms },
    #[error("duration of {minutes} minutes is shorter than the {min_minutes} minute minimum")]
    DurationTooShort { minutes: i64, min_minutes: i64 },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("student {student_id} is not booked on session {session_id}")]
    NotBooked { session_id: Ulid, student_id: UserId },

    #[error("caller {caller} does not own {entity}")]
    OwnershipViolation { entity: Ulid, caller: UserId },

    #[error("overlaps availability window {0}")]
    OverlapConflict(Ulid),
    #[error("tutor is not available for [{}, {})", .0.start, .0.end)]
    NotAvailable(Span),
    #[error("slot conflicts with sessions {0:?}")]
    SlotConflict(Vec<Ulid>),
    #[error("availability window {0} has no free slots left on that day")]
    WindowFull(Ulid),
    #[error("cannot {action} a {status} session")]
    InvalidTransition {
        status: SessionStatus,
        action: &'static str,
    },
    #[error("session is {0}")]
    InvalidState(SessionStatus),
    #[error("capacity {0} exceeded: all places taken")]
    CapacityExceeded(u32),
    #[error("student {student_id} already booked on session {session_id}")]
    AlreadyBooked { session_id: Ulid, student_id: UserId },
    #[error("calendar of tutor {0} is too contended, retry later")]
    Contention(UserId),

    #[error(
        "student {student_id} has no active registration with tutor {tutor_id} for subject {subject_id}"
    )]
    RegistrationRequired {
        student_id: UserId,
        tutor_id: UserId,
        subject_id: Ulid,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidTimeFormat(_)
            | EngineError::InvalidRange { .. }
            | EngineError::DurationTooShort { .. }
            | EngineError::MissingField(_)
            | EngineError::InvalidField { .. }
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::NotFound(_) | EngineError::NotBooked { .. } => ErrorKind::NotFound,
            EngineError::OwnershipViolation { .. } => ErrorKind::Ownership,
            EngineError::OverlapConflict(_)
            | EngineError::NotAvailable(_)
            | EngineError::SlotConflict(_)
            | EngineError::WindowFull(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::InvalidState(_)
            | EngineError::CapacityExceeded(_)
            | EngineError::AlreadyBooked { .. }
            | EngineError::Contention(_) => ErrorKind::Conflict,
            EngineError::RegistrationRequired { .. } => ErrorKind::RegistrationRequired,
            EngineError::Store(_) => ErrorKind::Storage,
        }
    }
}
