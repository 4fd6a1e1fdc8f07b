//! Pagination and list-query helpers
//!
//! Stores accept a plain `(limit, offset)` window; page numbers, default
//! sizes and the upper bound on `limit` are decided here, at the API edge.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Page size when the caller gives none
pub const DEFAULT_LIMIT: i64 = 20;

/// Largest page a caller may ask for
pub const MAX_LIMIT: i64 = 100;

/// Limits applied to every paginated endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for PageSettings {
    fn default() -> Self {
        PageSettings {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

/// Sanitised page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-indexed
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    /// Clamp raw query values into a valid request
    ///
    /// ```
    /// use pump_verification::pagination::{PageRequest, PageSettings};
    ///
    /// let p = PageRequest::new(Some(0), Some(500), &PageSettings::default());
    /// assert_eq!(p.page, 1);
    /// assert_eq!(p.limit, 100);
    /// ```
    pub fn new(page: Option<i64>, limit: Option<i64>, settings: &PageSettings) -> Self {
        let limit = limit
            .unwrap_or(settings.default_limit)
            .clamp(1, settings.max_limit.max(1));
        // The offset of the last allowed page still fits in an i64
        let page = page.unwrap_or(1).clamp(1, i64::MAX / limit);
        PageRequest { page, limit }
    }

    /// `(limit, offset)` for the stores
    pub fn window(&self) -> (i64, i64) {
        (
            self.limit,
            self.page.saturating_sub(1).saturating_mul(self.limit),
        )
    }

    pub fn meta(&self, total: i64) -> PageMeta {
        PageMeta {
            page: self.page,
            limit: self.limit,
            total,
            total_pages: (total + self.limit - 1) / self.limit,
        }
    }
}

/// Pagination block of the response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

// ============================================================================
// DATE RANGE FILTERS
// ============================================================================

/// Parse a `startDate` value: RFC 3339, or `YYYY-MM-DD` meaning midnight UTC
pub fn parse_start(raw: &str) -> Result<DateTime<Utc>> {
    parse_bound(raw, false)
}

/// Parse an `endDate` value into an exclusive upper bound. A bare date
/// includes that whole day.
pub fn parse_end(raw: &str) -> Result<DateTime<Utc>> {
    parse_bound(raw, true)
}

fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        Error::Validation(format!(
            "'{}' is not an RFC 3339 timestamp or YYYY-MM-DD date",
            raw
        ))
    })?;

    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Validation(format!("invalid date '{}'", raw)))?
        .and_utc();

    Ok(if end_of_day {
        midnight + Duration::days(1)
    } else {
        midnight
    })
}
