use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::open_slots;
use super::validate::validate_query_span;
use super::{Engine, EngineError};

impl Engine {
    pub async fn windows(
        &self,
        tutor_id: UserId,
        include_inactive: bool,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        let calendar = self.store.load(tutor_id).await?;
        Ok(calendar
            .windows
            .into_iter()
            .filter(|w| include_inactive || w.is_active)
            .collect())
    }

    pub async fn session(&self, session_id: Ulid) -> Result<Session, EngineError> {
        let tutor_id = self.owner_of(session_id).await?;
        let calendar = self.store.load(tutor_id).await?;
        calendar
            .session(&session_id)
            .cloned()
            .ok_or(EngineError::NotFound(session_id))
    }

    /// Sessions of any status overlapping `[from, to)`, in start order.
    pub async fn sessions_between(
        &self,
        tutor_id: UserId,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Session>, EngineError> {
        let query = validate_query_span(from, to)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let calendar = self.store.load(tutor_id).await?;
        Ok(calendar.overlapping(&query).cloned().collect())
    }

    /// Student requests waiting for the tutor's decision.
    pub async fn pending_requests(&self, tutor_id: UserId) -> Result<Vec<Session>, EngineError> {
        let calendar = self.store.load(tutor_id).await?;
        Ok(calendar
            .sessions
            .into_iter()
            .filter(|s| s.status == SessionStatus::Pending)
            .collect())
    }

    /// Sessions the student is booked on, across tutors, in start order.
    pub async fn student_sessions(&self, student_id: UserId) -> Result<Vec<Session>, EngineError> {
        let mut calendars: HashMap<UserId, Calendar> = HashMap::new();
        let mut sessions = Vec::new();
        for session_id in self.store.sessions_for_student(student_id).await? {
            let Some(tutor_id) = self.store.locate(session_id).await? else {
                continue;
            };
            if !calendars.contains_key(&tutor_id) {
                calendars.insert(tutor_id, self.store.load(tutor_id).await?);
            }
            if let Some(session) = calendars.get(&tutor_id).and_then(|c| c.session(&session_id))
                && session.participant(&student_id).is_some()
            {
                sessions.push(session.clone());
            }
        }
        sessions.sort_by_key(|s| (s.span.start, s.id));
        Ok(sessions)
    }

    /// Bookable free time on `date`, in spans of at least `min_minutes`
    /// (the configured session minimum when `None`).
    pub async fn open_slots(
        &self,
        tutor_id: UserId,
        date: NaiveDate,
        min_minutes: Option<i64>,
    ) -> Result<Vec<Span>, EngineError> {
        let day = DayPosition::of_date(date).ok_or(EngineError::InvalidField {
            field: "date",
            reason: "out of range",
        })?;
        let min_minutes = min_minutes.unwrap_or(self.config.min_session_minutes);
        if min_minutes < 0 {
            return Err(EngineError::InvalidField {
                field: "min_minutes",
                reason: "must not be negative",
            });
        }
        if min_minutes > DAY_MS / MINUTE_MS {
            return Err(EngineError::LimitExceeded("min_minutes longer than a day"));
        }
        let calendar = self.store.load(tutor_id).await?;
        Ok(open_slots(&calendar, &day, min_minutes * MINUTE_MS))
    }
}
