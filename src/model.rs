use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC) — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// External identity of a tutor or a student.
pub type UserId = Ulid;
pub type SubjectId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Wall-clock span between two whole hours of a day, e.g. `Span::hours(9, 12)`.
    pub fn hours(start_hour: i64, end_hour: i64) -> Self {
        Self::new(start_hour * HOUR_MS, end_hour * HOUR_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn shift(&self, by: Ms) -> Span {
        Span::new(self.start + by, self.end + by)
    }
}

/// Where an instant falls on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayPosition {
    pub date: NaiveDate,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: u8,
    pub midnight: Ms,
}

impl DayPosition {
    pub fn of(t: Ms) -> Option<Self> {
        let date = DateTime::from_timestamp_millis(t)?.date_naive();
        Some(Self {
            date,
            weekday: date.weekday().num_days_from_sunday() as u8,
            midnight: t - t.rem_euclid(DAY_MS),
        })
    }

    pub fn of_date(date: NaiveDate) -> Option<Self> {
        let midnight = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
        Some(Self {
            date,
            weekday: date.weekday().num_days_from_sunday() as u8,
            midnight,
        })
    }

    /// Project an absolute span onto this day's wall clock. The result may run
    /// past 24h when the span crosses midnight.
    pub fn wall_clock(&self, span: &Span) -> Span {
        span.shift(-self.midnight)
    }
}

// ── Availability ─────────────────────────────────────────────────

/// Which days an availability window applies to. Also the overlap discriminator:
/// two windows only compete when their kinds are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowKind {
    Recurring { day_of_week: u8 },
    SpecificDate { date: NaiveDate },
}

impl WindowKind {
    pub fn matches(&self, day: &DayPosition) -> bool {
        match self {
            WindowKind::Recurring { day_of_week } => *day_of_week == day.weekday,
            WindowKind::SpecificDate { date } => *date == day.date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub tutor_id: UserId,
    pub kind: WindowKind,
    /// Wall-clock offsets from midnight, `0..=24h`.
    pub hours: Span,
    pub max_slots: u32,
    pub is_active: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    #[serde(alias = "SCHEDULED")]
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
}

impl SessionStatus {
    /// Statuses that claim their time slot on the tutor's calendar.
    pub fn is_committed(self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Confirmed | SessionStatus::InProgress
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Rejected
        )
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Confirmed, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Completed)
                | (InProgress, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Confirmed => "CONFIRMED",
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    Online,
    Offline,
}

/// A validated session type together with its required companion field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Venue {
    Online { meeting_link: String },
    Offline { location: String },
}

impl Venue {
    pub fn session_type(&self) -> SessionType {
        match self {
            Venue::Online { .. } => SessionType::Online,
            Venue::Offline { .. } => SessionType::Offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub student_id: UserId,
    pub registered_at: Ms,
    pub attended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub tutor_id: UserId,
    pub subject_id: SubjectId,
    pub title: String,
    pub span: Span,
    pub venue: Venue,
    pub max_participants: u32,
    pub participants: Vec<Participant>,
    pub status: SessionStatus,
    /// Student who asked for the session; `None` when the tutor opened it directly.
    pub requested_by: Option<UserId>,
    pub rejection_reason: Option<String>,
    pub has_report: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Session {
    pub fn participant(&self, student_id: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.student_id == *student_id)
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_participants as usize
    }

    /// Everyone with a stake in the session besides the tutor.
    pub fn audience(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.participants.iter().map(|p| p.student_id).collect();
        if let Some(requester) = self.requested_by
            && !users.contains(&requester)
        {
            users.push(requester);
        }
        users
    }
}

// ── Calendar document ────────────────────────────────────────────

/// Everything the engine knows about one tutor. This is the unit of atomic
/// read-modify-write: every mutation is checked against a snapshot and
/// committed against the snapshot's `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    pub tutor_id: UserId,
    pub version: u64,
    pub windows: Vec<AvailabilityWindow>,
    /// Sorted by `span.start`.
    pub sessions: Vec<Session>,
}

impl Calendar {
    pub fn new(tutor_id: UserId) -> Self {
        Self {
            tutor_id,
            version: 0,
            windows: Vec::new(),
            sessions: Vec::new(),
        }
    }

    pub fn window(&self, id: &Ulid) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.id == *id)
    }

    pub fn session(&self, id: &Ulid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == *id)
    }

    fn session_mut(&mut self, id: &Ulid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == *id)
    }

    pub fn active_windows(&self) -> impl Iterator<Item = &AvailabilityWindow> {
        self.windows.iter().filter(|w| w.is_active)
    }

    /// Insert a session maintaining sort order by span.start.
    pub fn insert_session(&mut self, session: Session) {
        let pos = self
            .sessions
            .binary_search_by_key(&session.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.sessions.insert(pos, session);
    }

    pub fn remove_session(&mut self, id: &Ulid) -> Option<Session> {
        let pos = self.sessions.iter().position(|s| s.id == *id)?;
        Some(self.sessions.remove(pos))
    }

    /// Sessions of any status whose span overlaps the query window.
    /// Uses binary search to skip sessions starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Session> {
        let right_bound = self.sessions.partition_point(|s| s.span.start < query.end);
        self.sessions[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    /// Apply a committed event. Events referring to unknown ids are ignored.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::WindowDeclared { window } => self.windows.push(window.clone()),
            Event::WindowUpdated { window } => {
                if let Some(existing) = self.windows.iter_mut().find(|w| w.id == window.id) {
                    *existing = window.clone();
                }
            }
            Event::WindowDeactivated { id, at, .. } => {
                if let Some(w) = self.windows.iter_mut().find(|w| w.id == *id) {
                    w.is_active = false;
                    w.updated_at = *at;
                }
            }
            Event::SessionCreated { session } => self.insert_session(session.clone()),
            Event::SessionRescheduled { session } => {
                if self.remove_session(&session.id).is_some() {
                    self.insert_session(session.clone());
                }
            }
            Event::SessionTransitioned {
                id,
                status,
                reason,
                at,
                ..
            } => {
                if let Some(s) = self.session_mut(id) {
                    s.status = *status;
                    if reason.is_some() {
                        s.rejection_reason = reason.clone();
                    }
                    s.updated_at = *at;
                }
            }
            Event::ParticipantAdded {
                session_id,
                participant,
                ..
            } => {
                if let Some(s) = self.session_mut(session_id) {
                    s.updated_at = participant.registered_at;
                    s.participants.push(participant.clone());
                }
            }
            Event::ParticipantRemoved {
                session_id,
                student_id,
                at,
                ..
            } => {
                if let Some(s) = self.session_mut(session_id) {
                    s.participants.retain(|p| p.student_id != *student_id);
                    s.updated_at = *at;
                }
            }
            Event::AttendanceMarked {
                session_id,
                student_id,
                attended,
                ..
            } => {
                if let Some(p) = self
                    .session_mut(session_id)
                    .and_then(|s| s.participants.iter_mut().find(|p| p.student_id == *student_id))
                {
                    p.attended = *attended;
                }
            }
            Event::ReportAttached { session_id, .. } => {
                if let Some(s) = self.session_mut(session_id) {
                    s.has_report = true;
                }
            }
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WindowDeclared {
        window: AvailabilityWindow,
    },
    WindowUpdated {
        window: AvailabilityWindow,
    },
    WindowDeactivated {
        tutor_id: UserId,
        id: Ulid,
        at: Ms,
    },
    SessionCreated {
        session: Session,
    },
    SessionRescheduled {
        session: Session,
    },
    SessionTransitioned {
        tutor_id: UserId,
        id: Ulid,
        status: SessionStatus,
        reason: Option<String>,
        at: Ms,
    },
    ParticipantAdded {
        tutor_id: UserId,
        session_id: Ulid,
        participant: Participant,
    },
    ParticipantRemoved {
        tutor_id: UserId,
        session_id: Ulid,
        student_id: UserId,
        at: Ms,
    },
    AttendanceMarked {
        tutor_id: UserId,
        session_id: Ulid,
        student_id: UserId,
        attended: bool,
    },
    ReportAttached {
        tutor_id: UserId,
        session_id: Ulid,
    },
}

impl Event {
    /// The calendar this event belongs to.
    pub fn tutor_id(&self) -> UserId {
        match self {
            Event::WindowDeclared { window } | Event::WindowUpdated { window } => window.tutor_id,
            Event::SessionCreated { session } | Event::SessionRescheduled { session } => {
                session.tutor_id
            }
            Event::WindowDeactivated { tutor_id, .. }
            | Event::SessionTransitioned { tutor_id, .. }
            | Event::ParticipantAdded { tutor_id, .. }
            | Event::ParticipantRemoved { tutor_id, .. }
            | Event::AttendanceMarked { tutor_id, .. }
            | Event::ReportAttached { tutor_id, .. } => *tutor_id,
        }
    }
}
