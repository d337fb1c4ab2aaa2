pub mod entries;
pub mod recap;

use chrono::{DateTime, NaiveDate};
use uuid::Uuid;

use crate::web::ApiError;

/// Every operation is scoped by a caller-supplied user id; an absent or
/// malformed id is rejected before any store or network call.
pub(crate) fn parse_user_id(raw: Option<&str>) -> Result<Uuid, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::validation("userId is required"))?;

    Uuid::parse_str(raw).map_err(|_| ApiError::validation("userId must be a valid UUID"))
}

/// Dates carry date-only semantics throughout. Accepts plain `YYYY-MM-DD`
/// or a full RFC 3339 timestamp, whose time-of-day is discarded.
pub(crate) fn parse_date_like(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}
