use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NoticeKind;

use super::conflict::{ensure_slot_free, session_overlap};
use super::validate::*;
use super::{Engine, EngineError};

/// Input for opening or requesting a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDraft {
    pub subject_id: SubjectId,
    pub title: String,
    pub start: Ms,
    pub end: Ms,
    pub session_type: SessionType,
    pub meeting_link: Option<String>,
    pub location: Option<String>,
    pub max_participants: u32,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub session_type: Option<SessionType>,
    pub meeting_link: Option<String>,
    pub location: Option<String>,
    pub max_participants: Option<u32>,
}

impl SessionPatch {
    fn touches_venue(&self) -> bool {
        self.session_type.is_some() || self.meeting_link.is_some() || self.location.is_some()
    }
}

fn ensure_transition(
    session: &Session,
    next: SessionStatus,
    action: &'static str,
) -> Result<(), EngineError> {
    if !session.status.can_transition_to(next) {
        return Err(EngineError::InvalidTransition {
            status: session.status,
            action,
        });
    }
    Ok(())
}

/// Caps the sessions still holding a slot. Rejected, cancelled and completed
/// sessions stay on the record without counting.
fn ensure_session_quota(calendar: &Calendar) -> Result<(), EngineError> {
    let held = calendar
        .sessions
        .iter()
        .filter(|s| s.status.is_committed())
        .count();
    if held >= MAX_SESSIONS_PER_TUTOR {
        return Err(EngineError::LimitExceeded("too many sessions for tutor"));
    }
    Ok(())
}

impl Engine {
    fn ensure_not_past(&self, span: &Span) -> Result<(), EngineError> {
        if self.config.reject_past_sessions && span.start < self.now() {
            return Err(EngineError::InvalidField {
                field: "start",
                reason: "is in the past",
            });
        }
        Ok(())
    }

    fn validate_draft(&self, draft: &SessionDraft) -> Result<(Span, Venue), EngineError> {
        validate_title(&draft.title)?;
        let span = validate_session_span(draft.start, draft.end, self.config.min_session_minutes)?;
        let venue = validate_venue(
            draft.session_type,
            draft.meeting_link.as_deref(),
            draft.location.as_deref(),
        )?;
        validate_capacity("max_participants", draft.max_participants, MAX_PARTICIPANTS)?;
        self.ensure_not_past(&span)?;
        Ok((span, venue))
    }

    /// Shared pipeline of both entry points. Validation runs before the store
    /// is touched; coverage, overlap and slot cap run against the snapshot.
    async fn create_session(
        &self,
        op: &'static str,
        tutor_id: UserId,
        draft: SessionDraft,
        requested_by: Option<UserId>,
    ) -> Result<Session, EngineError> {
        let (span, venue) = self.validate_draft(&draft)?;
        let id = Ulid::new();
        let now = self.now();
        let status = match requested_by {
            Some(_) => SessionStatus::Pending,
            None => SessionStatus::Confirmed,
        };

        self.transact(op, tutor_id, |cal| {
            ensure_session_quota(cal)?;
            ensure_slot_free(cal, &span, None)?;
            let session = Session {
                id,
                tutor_id,
                subject_id: draft.subject_id,
                title: draft.title.trim().to_string(),
                span,
                venue: venue.clone(),
                max_participants: draft.max_participants,
                participants: Vec::new(),
                status,
                requested_by,
                rejection_reason: None,
                has_report: false,
                created_at: now,
                updated_at: now,
            };
            Ok((
                Event::SessionCreated {
                    session: session.clone(),
                },
                session,
            ))
        })
        .await
    }

    /// Tutor-direct creation; the session is CONFIRMED immediately.
    pub async fn open_session(&self, tutor_id: UserId, draft: SessionDraft) -> Result<Session, EngineError> {
        self.observe("open_session", async {
            let session = self.create_session("open_session", tutor_id, draft, None).await?;
            info!(tutor = %tutor_id, session = %session.id, "session opened");
            Ok(session)
        })
        .await
    }

    /// Student request; the session waits in PENDING for the tutor.
    pub async fn request_session(
        &self,
        student_id: UserId,
        tutor_id: UserId,
        draft: SessionDraft,
    ) -> Result<Session, EngineError> {
        self.observe("request_session", async {
            let session = self
                .create_session("request_session", tutor_id, draft, Some(student_id))
                .await?;
            info!(tutor = %tutor_id, session = %session.id, student = %student_id, "session requested");
            self.notify([tutor_id], NoticeKind::SessionRequested, session.id);
            Ok(session)
        })
        .await
    }

    /// Move an owned session to `next`, re-running `guard` on every attempt.
    async fn advance(
        &self,
        op: &'static str,
        action: &'static str,
        tutor_id: UserId,
        session_id: Ulid,
        next: SessionStatus,
        reason: Option<String>,
        guard: impl Fn(&Calendar, &Session) -> Result<(), EngineError>,
    ) -> Result<Session, EngineError> {
        self.owned_by(session_id, tutor_id).await?;
        let now = self.now();
        self.transact(op, tutor_id, |cal| {
            let session = cal.session(&session_id).ok_or(EngineError::NotFound(session_id))?;
            ensure_transition(session, next, action)?;
            guard(cal, session)?;
            let mut updated = session.clone();
            updated.status = next;
            updated.updated_at = now;
            if reason.is_some() {
                updated.rejection_reason = reason.clone();
            }
            Ok((
                Event::SessionTransitioned {
                    tutor_id,
                    id: session_id,
                    status: next,
                    reason: reason.clone(),
                    at: now,
                },
                updated,
            ))
        })
        .await
    }

    /// PENDING → CONFIRMED. The overlap check is repeated against the
    /// commit snapshot so two racing confirmations cannot both claim a slot.
    pub async fn confirm_session(&self, tutor_id: UserId, session_id: Ulid) -> Result<Session, EngineError> {
        self.observe("confirm_session", async {
            let session = self
                .advance(
                    "confirm_session",
                    "confirm",
                    tutor_id,
                    session_id,
                    SessionStatus::Confirmed,
                    None,
                    |cal, session| {
                        let overlap = session_overlap(cal, &session.span, Some(session.id));
                        if overlap.conflict {
                            return Err(EngineError::SlotConflict(overlap.conflicts));
                        }
                        Ok(())
                    },
                )
                .await?;
            info!(tutor = %tutor_id, session = %session_id, "session confirmed");
            self.notify(session.requested_by, NoticeKind::SessionConfirmed, session_id);
            Ok(session)
        })
        .await
    }

    pub async fn reject_session(
        &self,
        tutor_id: UserId,
        session_id: Ulid,
        reason: impl Into<String>,
    ) -> Result<Session, EngineError> {
        let reason = reason.into();
        self.observe("reject_session", async {
            validate_text("reason", &reason)?;
            let session = self
                .advance(
                    "reject_session",
                    "reject",
                    tutor_id,
                    session_id,
                    SessionStatus::Rejected,
                    Some(reason.clone()),
                    |_, _| Ok(()),
                )
                .await?;
            info!(tutor = %tutor_id, session = %session_id, "session rejected");
            self.notify(
                session.requested_by,
                NoticeKind::SessionRejected { reason },
                session_id,
            );
            Ok(session)
        })
        .await
    }

    /// Edit a CONFIRMED session. New times go through validation, coverage,
    /// overlap and slot cap again, ignoring the session's own slot.
    pub async fn update_session(
        &self,
        tutor_id: UserId,
        session_id: Ulid,
        patch: SessionPatch,
    ) -> Result<Session, EngineError> {
        self.observe("update_session", async {
            if let Some(title) = &patch.title {
                validate_title(title)?;
            }
            if let Some(max) = patch.max_participants {
                validate_capacity("max_participants", max, MAX_PARTICIPANTS)?;
            }
            self.owned_by(session_id, tutor_id).await?;
            let now = self.now();
            let min_minutes = self.config.min_session_minutes;

            let session = self
                .transact("update_session", tutor_id, |cal| {
                    let current = cal.session(&session_id).ok_or(EngineError::NotFound(session_id))?;
                    if current.status != SessionStatus::Confirmed {
                        return Err(EngineError::InvalidTransition {
                            status: current.status,
                            action: "update",
                        });
                    }

                    let start = patch.start.unwrap_or(current.span.start);
                    let end = patch.end.unwrap_or(current.span.end);
                    let span = if (start, end) != (current.span.start, current.span.end) {
                        let span = validate_session_span(start, end, min_minutes)?;
                        self.ensure_not_past(&span)?;
                        ensure_slot_free(cal, &span, Some(session_id))?;
                        span
                    } else {
                        current.span
                    };

                    let venue = if patch.touches_venue() {
                        let (link, location) = match &current.venue {
                            Venue::Online { meeting_link } => (Some(meeting_link.as_str()), None),
                            Venue::Offline { location } => (None, Some(location.as_str())),
                        };
                        validate_venue(
                            patch.session_type.unwrap_or(current.venue.session_type()),
                            patch.meeting_link.as_deref().or(link),
                            patch.location.as_deref().or(location),
                        )?
                    } else {
                        current.venue.clone()
                    };

                    let max_participants = patch.max_participants.unwrap_or(current.max_participants);
                    if (max_participants as usize) < current.participants.len() {
                        return Err(EngineError::InvalidField {
                            field: "max_participants",
                            reason: "is below the current participant count",
                        });
                    }

                    let updated = Session {
                        title: patch
                            .title
                            .as_deref()
                            .map(|t| t.trim().to_string())
                            .unwrap_or_else(|| current.title.clone()),
                        span,
                        venue,
                        max_participants,
                        updated_at: now,
                        ..current.clone()
                    };
                    Ok((
                        Event::SessionRescheduled {
                            session: updated.clone(),
                        },
                        updated,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, session = %session_id, "session updated");
            self.notify(session.audience(), NoticeKind::SessionUpdated, session_id);
            Ok(session)
        })
        .await
    }

    /// CONFIRMED → CANCELLED. Participants stay on the record.
    pub async fn cancel_session(&self, tutor_id: UserId, session_id: Ulid) -> Result<Session, EngineError> {
        self.observe("cancel_session", async {
            let session = self
                .advance(
                    "cancel_session",
                    "cancel",
                    tutor_id,
                    session_id,
                    SessionStatus::Cancelled,
                    None,
                    |_, _| Ok(()),
                )
                .await?;
            info!(tutor = %tutor_id, session = %session_id, "session cancelled");
            self.notify(session.audience(), NoticeKind::SessionCancelled, session_id);
            Ok(session)
        })
        .await
    }

    // ── Lifecycle hooks for attendance and reporting ──────────────

    pub async fn start_session(&self, tutor_id: UserId, session_id: Ulid) -> Result<Session, EngineError> {
        self.observe("start_session", async {
            let session = self
                .advance(
                    "start_session",
                    "start",
                    tutor_id,
                    session_id,
                    SessionStatus::InProgress,
                    None,
                    |_, _| Ok(()),
                )
                .await?;
            info!(tutor = %tutor_id, session = %session_id, "session started");
            Ok(session)
        })
        .await
    }

    pub async fn complete_session(&self, tutor_id: UserId, session_id: Ulid) -> Result<Session, EngineError> {
        self.observe("complete_session", async {
            let session = self
                .advance(
                    "complete_session",
                    "complete",
                    tutor_id,
                    session_id,
                    SessionStatus::Completed,
                    None,
                    |_, _| Ok(()),
                )
                .await?;
            info!(tutor = %tutor_id, session = %session_id, "session completed");
            Ok(session)
        })
        .await
    }

    pub async fn attach_report(&self, tutor_id: UserId, session_id: Ulid) -> Result<Session, EngineError> {
        self.observe("attach_report", async {
            self.owned_by(session_id, tutor_id).await?;
            let session = self
                .transact("attach_report", tutor_id, |cal| {
                    let current = cal.session(&session_id).ok_or(EngineError::NotFound(session_id))?;
                    if current.status != SessionStatus::Completed {
                        return Err(EngineError::InvalidState(current.status));
                    }
                    let mut updated = current.clone();
                    updated.has_report = true;
                    Ok((
                        Event::ReportAttached {
                            tutor_id,
                            session_id,
                        },
                        updated,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, session = %session_id, "report attached");
            Ok(session)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[test]
    fn transitions_name_the_action() {
        let s = session(Ulid::new(), Span::hours(9, 10), SessionStatus::Cancelled);
        let err = ensure_transition(&s, SessionStatus::Confirmed, "confirm").unwrap_err();
        assert_eq!(err.to_string(), "cannot confirm a CANCELLED session");
    }

    #[test]
    fn session_quota_ignores_closed_sessions() {
        let tutor = Ulid::new();
        let mut cal = Calendar::new(tutor);
        cal.sessions = (0..MAX_SESSIONS_PER_TUTOR)
            .map(|i| {
                let status = if i % 2 == 0 {
                    SessionStatus::Rejected
                } else {
                    SessionStatus::Cancelled
                };
                session(tutor, Span::hours(9, 10), status)
            })
            .collect();
        assert!(ensure_session_quota(&cal).is_ok());

        for s in cal.sessions.iter_mut() {
            s.status = SessionStatus::Pending;
        }
        assert!(matches!(
            ensure_session_quota(&cal),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn venue_patch_detection() {
        assert!(!SessionPatch::default().touches_venue());
        let patch = SessionPatch {
            location: Some("Room 4".into()),
            ..Default::default()
        };
        assert!(patch.touches_venue());
    }
}
