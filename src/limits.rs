use crate::model::{DAY_MS, HOUR_MS, Ms};

pub const MAX_TITLE_LEN: usize = 200;
/// Meeting links, locations and rejection reasons.
pub const MAX_TEXT_LEN: usize = 1_000;
pub const MAX_PARTICIPANTS: u32 = 500;
pub const MAX_WINDOW_SLOTS: u32 = 24;
pub const MAX_WINDOWS_PER_TUTOR: usize = 256;
pub const MAX_SESSIONS_PER_TUTOR: usize = 100_000;
pub const MAX_SESSION_DURATION_MS: Ms = 12 * HOUR_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
