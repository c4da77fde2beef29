//! Pure input checks. Nothing here touches storage, so every failure is
//! reported before an operation loads or writes anything.

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Fails unless `t` sits exactly on an hour boundary (minutes, seconds and
/// milliseconds all zero).
pub fn validate_hour_aligned(t: Ms) -> Result<(), EngineError> {
    if t.rem_euclid(HOUR_MS) != 0 {
        return Err(EngineError::InvalidTimeFormat(t));
    }
    Ok(())
}

/// Fails unless `end > start` and the range lasts at least `min_minutes`.
pub fn validate_range(start: Ms, end: Ms, min_minutes: i64) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidRange { start, end });
    }
    let length = end
        .checked_sub(start)
        .ok_or(EngineError::LimitExceeded("range too wide"))?;
    let min_ms = min_minutes
        .checked_mul(MINUTE_MS)
        .ok_or(EngineError::LimitExceeded("minimum duration out of range"))?;
    if length < min_ms {
        return Err(EngineError::DurationTooShort {
            minutes: length / MINUTE_MS,
            min_minutes,
        });
    }
    Ok(Span::new(start, end))
}

fn validate_timestamps(start: Ms, end: Ms) -> Result<(), EngineError> {
    let valid = MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS;
    if !valid.contains(&start) || !valid.contains(&end) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Ranges passed to read-only checks and queries: ordered and within the
/// supported timestamp range.
pub(crate) fn validate_query_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = validate_range(start, end, 0)?;
    validate_timestamps(start, end)?;
    Ok(span)
}

/// Absolute session times: in range, hour-aligned, long enough, not absurdly long.
pub(crate) fn validate_session_span(start: Ms, end: Ms, min_minutes: i64) -> Result<Span, EngineError> {
    validate_timestamps(start, end)?;
    validate_hour_aligned(start)?;
    validate_hour_aligned(end)?;
    let span = validate_range(start, end, min_minutes)?;
    if span.duration_ms() > MAX_SESSION_DURATION_MS {
        return Err(EngineError::LimitExceeded("session too long"));
    }
    Ok(span)
}

/// Wall-clock window times, as offsets from midnight.
pub(crate) fn validate_window_hours(start: Ms, end: Ms, min_minutes: i64) -> Result<Span, EngineError> {
    validate_hour_aligned(start)?;
    validate_hour_aligned(end)?;
    let span = validate_range(start, end, min_minutes)?;
    if span.start < 0 || span.end > DAY_MS {
        return Err(EngineError::InvalidField {
            field: "hours",
            reason: "must fall within a single day",
        });
    }
    Ok(span)
}

pub(crate) fn validate_window_kind(kind: &WindowKind) -> Result<(), EngineError> {
    if let WindowKind::Recurring { day_of_week } = kind
        && *day_of_week > 6
    {
        return Err(EngineError::InvalidField {
            field: "day_of_week",
            reason: "must be between 0 (Sunday) and 6 (Saturday)",
        });
    }
    Ok(())
}

pub(crate) fn validate_capacity(field: &'static str, value: u32, max: u32) -> Result<(), EngineError> {
    if value == 0 {
        return Err(EngineError::InvalidField {
            field,
            reason: "must be at least 1",
        });
    }
    if value > max {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(())
}

pub(crate) fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::MissingField("title"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &'static str, text: &str) -> Result<(), EngineError> {
    if text.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(())
}

/// ONLINE needs a meeting link, OFFLINE needs a location.
pub(crate) fn validate_venue(
    session_type: SessionType,
    meeting_link: Option<&str>,
    location: Option<&str>,
) -> Result<Venue, EngineError> {
    let required = |field: &'static str, value: Option<&str>| -> Result<String, EngineError> {
        let value = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(EngineError::MissingField(field))?;
        validate_text(field, value)?;
        Ok(value.to_string())
    };
    match session_type {
        SessionType::Online => Ok(Venue::Online {
            meeting_link: required("meeting_link", meeting_link)?,
        }),
        SessionType::Offline => Ok(Venue::Offline {
            location: required("location", location)?,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::MONDAY;

    #[test]
    fn hour_alignment() {
        assert!(validate_hour_aligned(MONDAY + 9 * HOUR_MS).is_ok());
        assert!(matches!(
            validate_hour_aligned(MONDAY + 9 * HOUR_MS + 15 * MINUTE_MS),
            Err(EngineError::InvalidTimeFormat(_))
        ));
        // Seconds alone also break alignment.
        assert!(validate_hour_aligned(HOUR_MS + 1_000).is_err());
    }

    #[test]
    fn range_ordering_and_minimum() {
        assert_eq!(validate_range(0, 2 * HOUR_MS, 60).unwrap(), Span::hours(0, 2));
        assert!(matches!(
            validate_range(HOUR_MS, HOUR_MS, 60),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_range(2 * HOUR_MS, HOUR_MS, 60),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_range(0, 30 * MINUTE_MS, 60),
            Err(EngineError::DurationTooShort {
                minutes: 30,
                min_minutes: 60
            })
        ));
        assert!(validate_range(0, 30 * MINUTE_MS, 30).is_ok());
    }

    #[test]
    fn extreme_ranges_are_errors() {
        assert!(matches!(
            validate_range(i64::MIN, i64::MAX, 0),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_range(0, HOUR_MS, i64::MAX),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_query_span(i64::MIN, MONDAY),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_query_span(MONDAY, i64::MAX),
            Err(EngineError::LimitExceeded(_))
        ));
        assert_eq!(
            validate_query_span(MONDAY, MONDAY + 90 * MINUTE_MS).unwrap(),
            Span::new(MONDAY, MONDAY + 90 * MINUTE_MS)
        );
    }

    #[test]
    fn session_span_rules() {
        let start = MONDAY + 9 * HOUR_MS;
        assert!(validate_session_span(start, start + HOUR_MS, 60).is_ok());
        assert!(matches!(
            validate_session_span(start + 15 * MINUTE_MS, start + 2 * HOUR_MS, 60),
            Err(EngineError::InvalidTimeFormat(_))
        ));
        assert!(matches!(
            validate_session_span(start, start + 13 * HOUR_MS, 60),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_session_span(-HOUR_MS, HOUR_MS, 60),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn window_hours_stay_within_a_day() {
        assert_eq!(
            validate_window_hours(22 * HOUR_MS, 24 * HOUR_MS, 60).unwrap(),
            Span::hours(22, 24)
        );
        assert!(matches!(
            validate_window_hours(23 * HOUR_MS, 25 * HOUR_MS, 60),
            Err(EngineError::InvalidField { field: "hours", .. })
        ));
    }

    #[test]
    fn day_of_week_bounds() {
        assert!(validate_window_kind(&WindowKind::Recurring { day_of_week: 6 }).is_ok());
        assert!(validate_window_kind(&WindowKind::Recurring { day_of_week: 7 }).is_err());
    }

    #[test]
    fn capacity_bounds() {
        assert!(validate_capacity("max_participants", 1, 10).is_ok());
        assert!(matches!(
            validate_capacity("max_participants", 0, 10),
            Err(EngineError::InvalidField { .. })
        ));
        assert!(matches!(
            validate_capacity("max_participants", 11, 10),
            Err(EngineError::LimitExceeded("max_participants"))
        ));
    }

    #[test]
    fn venue_requires_companion_field() {
        assert_eq!(
            validate_venue(SessionType::Online, Some(" https://meet/x "), None).unwrap(),
            Venue::Online {
                meeting_link: "https://meet/x".into()
            }
        );
        assert!(matches!(
            validate_venue(SessionType::Online, None, Some("Room 4")),
            Err(EngineError::MissingField("meeting_link"))
        ));
        assert!(matches!(
            validate_venue(SessionType::Offline, Some("https://meet/x"), Some("   ")),
            Err(EngineError::MissingField("location"))
        ));
    }

    #[test]
    fn title_required() {
        assert!(matches!(validate_title("  "), Err(EngineError::MissingField("title"))));
        assert!(validate_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }
}
