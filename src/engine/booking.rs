use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NoticeKind;

use super::{Engine, EngineError};

/// Status and capacity rules for adding a participant.
fn check_bookable(session: &Session) -> Result<(), EngineError> {
    if session.status != SessionStatus::Confirmed {
        return Err(EngineError::InvalidState(session.status));
    }
    if session.is_full() {
        return Err(EngineError::CapacityExceeded(session.max_participants));
    }
    Ok(())
}

impl Engine {
    /// Add `student_id` to a CONFIRMED session.
    ///
    /// Order of checks: session exists, status, capacity, registration,
    /// duplicate. Status and capacity are checked on a snapshot before the
    /// registration lookup and again inside the commit, together with the
    /// duplicate check, so the append can never overfill the session.
    pub async fn book_appointment(&self, student_id: UserId, session_id: Ulid) -> Result<Session, EngineError> {
        self.observe("book_appointment", async {
            let tutor_id = self.owner_of(session_id).await?;
            let snapshot = self.store.load(tutor_id).await?;
            let session = snapshot
                .session(&session_id)
                .ok_or(EngineError::NotFound(session_id))?;
            check_bookable(session)?;

            let subject_id = session.subject_id;
            if !self
                .registrations
                .has_active_registration(student_id, tutor_id, subject_id)
                .await
            {
                return Err(EngineError::RegistrationRequired {
                    student_id,
                    tutor_id,
                    subject_id,
                });
            }

            let now = self.now();
            let session = self
                .transact("book_appointment", tutor_id, |cal| {
                    let session = cal.session(&session_id).ok_or(EngineError::NotFound(session_id))?;
                    check_bookable(session)?;
                    if session.participant(&student_id).is_some() {
                        return Err(EngineError::AlreadyBooked {
                            session_id,
                            student_id,
                        });
                    }
                    let participant = Participant {
                        student_id,
                        registered_at: now,
                        attended: false,
                    };
                    let mut updated = session.clone();
                    updated.participants.push(participant.clone());
                    updated.updated_at = now;
                    Ok((
                        Event::ParticipantAdded {
                            tutor_id,
                            session_id,
                            participant,
                        },
                        updated,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, session = %session_id, student = %student_id, "appointment booked");
            self.notify(
                [tutor_id],
                NoticeKind::AppointmentBooked { student_id },
                session_id,
            );
            Ok(session)
        })
        .await
    }

    /// Remove `student_id` from a session that has not started.
    pub async fn cancel_appointment(&self, student_id: UserId, session_id: Ulid) -> Result<Session, EngineError> {
        self.observe("cancel_appointment", async {
            let tutor_id = self.owner_of(session_id).await?;
            let now = self.now();
            let session = self
                .transact("cancel_appointment", tutor_id, |cal| {
                    let session = cal.session(&session_id).ok_or(EngineError::NotFound(session_id))?;
                    if session.participant(&student_id).is_none() {
                        return Err(EngineError::NotBooked {
                            session_id,
                            student_id,
                        });
                    }
                    if matches!(
                        session.status,
                        SessionStatus::InProgress | SessionStatus::Completed
                    ) {
                        return Err(EngineError::InvalidState(session.status));
                    }
                    let mut updated = session.clone();
                    updated.participants.retain(|p| p.student_id != student_id);
                    updated.updated_at = now;
                    Ok((
                        Event::ParticipantRemoved {
                            tutor_id,
                            session_id,
                            student_id,
                            at: now,
                        },
                        updated,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, session = %session_id, student = %student_id, "appointment cancelled");
            self.notify(
                [tutor_id],
                NoticeKind::AppointmentCancelled { student_id },
                session_id,
            );
            Ok(session)
        })
        .await
    }

    /// Record whether a booked student showed up. Only once the session has started.
    pub async fn mark_attendance(
        &self,
        tutor_id: UserId,
        session_id: Ulid,
        student_id: UserId,
        attended: bool,
    ) -> Result<Session, EngineError> {
        self.observe("mark_attendance", async {
            self.owned_by(session_id, tutor_id).await?;
            let session = self
                .transact("mark_attendance", tutor_id, |cal| {
                    let session = cal.session(&session_id).ok_or(EngineError::NotFound(session_id))?;
                    if !matches!(
                        session.status,
                        SessionStatus::InProgress | SessionStatus::Completed
                    ) {
                        return Err(EngineError::InvalidState(session.status));
                    }
                    if session.participant(&student_id).is_none() {
                        return Err(EngineError::NotBooked {
                            session_id,
                            student_id,
                        });
                    }
                    let mut updated = session.clone();
                    for p in updated.participants.iter_mut().filter(|p| p.student_id == student_id) {
                        p.attended = attended;
                    }
                    Ok((
                        Event::AttendanceMarked {
                            tutor_id,
                            session_id,
                            student_id,
                            attended,
                        },
                        updated,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, session = %session_id, student = %student_id, attended, "attendance marked");
            Ok(session)
        })
        .await
    }
}
