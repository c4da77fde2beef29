use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{validate_capacity, validate_window_hours, validate_window_kind};
use super::{Engine, EngineError};

/// Input for declaring a window. `start`/`end` are offsets from midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDraft {
    pub kind: WindowKind,
    pub start: Ms,
    pub end: Ms,
    pub max_slots: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowPatch {
    pub kind: Option<WindowKind>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub max_slots: Option<u32>,
}

// ── Window algebra ────────────────────────────────────────────────

/// First active window competing with `hours` under the same kind, if any.
pub fn find_window_overlap(
    calendar: &Calendar,
    kind: &WindowKind,
    hours: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    calendar
        .active_windows()
        .find(|w| w.kind == *kind && Some(w.id) != exclude && w.hours.overlaps(hours))
        .map(|w| w.id)
}

/// Active windows that apply to the day `span` starts on and fully contain it.
/// A span that runs past midnight is never covered.
pub fn covering_windows<'a>(calendar: &'a Calendar, span: &Span) -> Vec<&'a AvailabilityWindow> {
    let Some(day) = DayPosition::of(span.start) else {
        return Vec::new();
    };
    let local = day.wall_clock(span);
    calendar
        .active_windows()
        .filter(|w| w.kind.matches(&day) && w.hours.contains_span(&local))
        .collect()
}

pub fn is_covered(calendar: &Calendar, span: &Span) -> bool {
    !covering_windows(calendar, span).is_empty()
}

/// Committed sessions sitting inside `window`'s occurrence on `day`.
pub(crate) fn occurrence_load(
    calendar: &Calendar,
    window: &AvailabilityWindow,
    day: &DayPosition,
    exclude: Option<Ulid>,
) -> usize {
    let occurrence = window.hours.shift(day.midnight);
    calendar
        .overlapping(&occurrence)
        .filter(|s| {
            s.status.is_committed() && Some(s.id) != exclude && occurrence.contains_span(&s.span)
        })
        .count()
}

/// Free spans on `day`: each active, not-yet-full window occurrence minus the
/// committed sessions, keeping spans of at least `min_ms`. Spans from
/// different windows are reported separately, in start order.
pub fn open_slots(calendar: &Calendar, day: &DayPosition, min_ms: Ms) -> Vec<Span> {
    let day_span = Span::new(day.midnight, day.midnight + DAY_MS);
    let busy: Vec<Span> = calendar
        .overlapping(&day_span)
        .filter(|s| s.status.is_committed())
        .map(|s| s.span)
        .collect();
    let busy = merge_overlapping(&busy);

    let mut free: Vec<Span> = Vec::new();
    for w in calendar.active_windows().filter(|w| w.kind.matches(day)) {
        if occurrence_load(calendar, w, day, None) >= w.max_slots as usize {
            continue;
        }
        let occurrence = [w.hours.shift(day.midnight)];
        free.extend(
            subtract_intervals(&occurrence, &busy)
                .into_iter()
                .filter(|s| s.duration_ms() >= min_ms),
        );
    }
    free.sort_by_key(|s| (s.start, s.end));
    free.dedup();
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

// ── Availability Manager ──────────────────────────────────────────

impl Engine {
    pub async fn declare_availability(
        &self,
        tutor_id: UserId,
        draft: WindowDraft,
    ) -> Result<AvailabilityWindow, EngineError> {
        self.observe("declare_availability", async {
            validate_window_kind(&draft.kind)?;
            let hours = validate_window_hours(draft.start, draft.end, self.config.min_window_minutes)?;
            validate_capacity("max_slots", draft.max_slots, MAX_WINDOW_SLOTS)?;

            let id = Ulid::new();
            let now = self.now();
            let window = self
                .transact("declare_availability", tutor_id, |cal| {
                    if cal.active_windows().count() >= MAX_WINDOWS_PER_TUTOR {
                        return Err(EngineError::LimitExceeded("too many windows for tutor"));
                    }
                    if let Some(existing) = find_window_overlap(cal, &draft.kind, &hours, None) {
                        return Err(EngineError::OverlapConflict(existing));
                    }
                    let window = AvailabilityWindow {
                        id,
                        tutor_id,
                        kind: draft.kind,
                        hours,
                        max_slots: draft.max_slots,
                        is_active: true,
                        created_at: now,
                        updated_at: now,
                    };
                    Ok((
                        Event::WindowDeclared {
                            window: window.clone(),
                        },
                        window,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, window = %id, "availability declared");
            Ok(window)
        })
        .await
    }

    pub async fn update_availability(
        &self,
        window_id: Ulid,
        caller: UserId,
        patch: WindowPatch,
    ) -> Result<AvailabilityWindow, EngineError> {
        self.observe("update_availability", async {
            if let Some(kind) = &patch.kind {
                validate_window_kind(kind)?;
            }
            if let Some(max_slots) = patch.max_slots {
                validate_capacity("max_slots", max_slots, MAX_WINDOW_SLOTS)?;
            }
            let tutor_id = self.owned_by(window_id, caller).await?;
            let now = self.now();
            let min_minutes = self.config.min_window_minutes;

            let window = self
                .transact("update_availability", tutor_id, |cal| {
                    let current = cal.window(&window_id).ok_or(EngineError::NotFound(window_id))?;
                    let kind = patch.kind.unwrap_or(current.kind);
                    let hours = validate_window_hours(
                        patch.start.unwrap_or(current.hours.start),
                        patch.end.unwrap_or(current.hours.end),
                        min_minutes,
                    )?;
                    let moved = kind != current.kind || hours != current.hours;
                    if moved
                        && current.is_active
                        && let Some(existing) = find_window_overlap(cal, &kind, &hours, Some(window_id))
                    {
                        return Err(EngineError::OverlapConflict(existing));
                    }
                    let updated = AvailabilityWindow {
                        kind,
                        hours,
                        max_slots: patch.max_slots.unwrap_or(current.max_slots),
                        updated_at: now,
                        ..current.clone()
                    };
                    Ok((
                        Event::WindowUpdated {
                            window: updated.clone(),
                        },
                        updated,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, window = %window_id, "availability updated");
            Ok(window)
        })
        .await
    }

    /// Soft delete. Sessions already placed in the window are left alone.
    pub async fn deactivate_availability(
        &self,
        window_id: Ulid,
        caller: UserId,
    ) -> Result<AvailabilityWindow, EngineError> {
        self.observe("deactivate_availability", async {
            let tutor_id = self.owned_by(window_id, caller).await?;
            let now = self.now();
            let window = self
                .transact("deactivate_availability", tutor_id, |cal| {
                    let current = cal.window(&window_id).ok_or(EngineError::NotFound(window_id))?;
                    let updated = AvailabilityWindow {
                        is_active: false,
                        updated_at: now,
                        ..current.clone()
                    };
                    Ok((
                        Event::WindowDeactivated {
                            tutor_id,
                            id: window_id,
                            at: now,
                        },
                        updated,
                    ))
                })
                .await?;
            info!(tutor = %tutor_id, window = %window_id, "availability deactivated");
            Ok(window)
        })
        .await
    }

    pub async fn is_covered(&self, tutor_id: UserId, start: Ms, end: Ms) -> Result<bool, EngineError> {
        Ok(self.check_availability_coverage(tutor_id, start, end).await?.covered)
    }
}
