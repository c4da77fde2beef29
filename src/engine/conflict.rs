use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::availability::{covering_windows, is_covered, occurrence_load};
use super::validate::validate_query_span;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub covered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionOverlap {
    pub conflict: bool,
    /// Committed sessions intersecting the candidate, in start order.
    pub conflicts: Vec<Ulid>,
}

/// Whether some active window fully contains `span` on the day it starts.
pub fn coverage(calendar: &Calendar, span: &Span) -> Coverage {
    Coverage {
        covered: is_covered(calendar, span),
    }
}

/// Committed sessions (PENDING, CONFIRMED, IN_PROGRESS) whose span intersects
/// `span`, skipping `exclude`. Starts-inside, ends-inside and covers all reduce
/// to the one half-open intersection test in `Calendar::overlapping`.
pub fn session_overlap(calendar: &Calendar, span: &Span, exclude: Option<Ulid>) -> SessionOverlap {
    let conflicts: Vec<Ulid> = calendar
        .overlapping(span)
        .filter(|s| s.status.is_committed() && Some(s.id) != exclude)
        .map(|s| s.id)
        .collect();
    SessionOverlap {
        conflict: !conflicts.is_empty(),
        conflicts,
    }
}

/// Guard chain for every path that claims a slot: coverage, then overlap,
/// then the per-occurrence slot cap of the covering windows.
pub(crate) fn ensure_slot_free(
    calendar: &Calendar,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let windows = covering_windows(calendar, span);
    if windows.is_empty() {
        return Err(EngineError::NotAvailable(*span));
    }

    let overlap = session_overlap(calendar, span, exclude);
    if overlap.conflict {
        return Err(EngineError::SlotConflict(overlap.conflicts));
    }

    let Some(day) = DayPosition::of(span.start) else {
        return Err(EngineError::NotAvailable(*span));
    };
    let has_room = windows
        .iter()
        .any(|w| occurrence_load(calendar, w, &day, exclude) < w.max_slots as usize);
    if !has_room {
        return Err(EngineError::WindowFull(windows[0].id));
    }
    Ok(())
}

impl Engine {
    pub async fn check_availability_coverage(
        &self,
        tutor_id: UserId,
        start: Ms,
        end: Ms,
    ) -> Result<Coverage, EngineError> {
        let span = validate_query_span(start, end)?;
        let calendar = self.store.load(tutor_id).await?;
        Ok(coverage(&calendar, &span))
    }

    pub async fn check_session_overlap(
        &self,
        tutor_id: UserId,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<SessionOverlap, EngineError> {
        let span = validate_query_span(start, end)?;
        let calendar = self.store.load(tutor_id).await?;
        Ok(session_overlap(&calendar, &span, exclude))
    }
}
