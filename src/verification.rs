// 🧾 Verification Record Store
//
// Append-only history of reconciliation attempts. A session row is written in
// the same transaction as the pump status it produced, so the two always
// agree. Nothing here updates or deletes a session; the read side is a set of
// projections over the table.

use crate::db::{enum_column, json_list_column, time_column, to_db_time};
use crate::entities::PumpStatus;
use crate::error::Result;
use crate::reconciliation::{Verdict, VerificationDetails};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

// ============================================================================
// VERIFICATION SESSION
// ============================================================================

/// Body of `POST /pumps/{id}/verify`: what the operator's reader saw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub main_tag_scanned: String,
    #[serde(default)]
    pub scanned_child_tags: Vec<String>,
}

/// One stored reconciliation attempt. Serialises as the API's
/// `VerificationResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSession {
    pub session_id: i64,
    pub result: Verdict,
    pub message: String,
    pub details: VerificationDetails,
    pub pump_status: PumpStatus,
    pub previous_status: PumpStatus,
    pub timestamp: DateTime<Utc>,
    pub pump_id: i64,
    pub station_id: i64,
    pub user_id: i64,
    pub main_tag_scanned: String,
    pub scanned_child_tags: Vec<String>,
}

/// A session about to be appended
#[derive(Debug, Clone)]
pub struct NewSession {
    pub pump_id: i64,
    pub station_id: i64,
    pub user_id: i64,
    pub main_tag_scanned: String,
    pub scanned_child_tags: Vec<String>,
    pub result: Verdict,
    pub message: String,
    pub details: VerificationDetails,
    pub previous_status: PumpStatus,
    pub pump_status: PumpStatus,
    pub timestamp: DateTime<Utc>,
}

impl NewSession {
    fn into_session(self, session_id: i64) -> VerificationSession {
        VerificationSession {
            session_id,
            result: self.result,
            message: self.message,
            details: self.details,
            pump_status: self.pump_status,
            previous_status: self.previous_status,
            timestamp: self.timestamp,
            pump_id: self.pump_id,
            station_id: self.station_id,
            user_id: self.user_id,
            main_tag_scanned: self.main_tag_scanned,
            scanned_child_tags: self.scanned_child_tags,
        }
    }
}

/// Append a session and return it with its new id
pub fn append(conn: &Connection, session: NewSession) -> Result<VerificationSession> {
    conn.execute(
        "INSERT INTO verification_sessions (
            pump_id, gas_station_id, user_id, main_tag_scanned, scanned_child_tags,
            result, message, expected_count, scanned_count, missing_tags, unexpected_tags,
            main_tag_matches, previous_status, pump_status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            session.pump_id,
            session.station_id,
            session.user_id,
            session.main_tag_scanned,
            serde_json::to_string(&session.scanned_child_tags)?,
            session.result.as_str(),
            session.message,
            i64::try_from(session.details.expected_count).unwrap_or(i64::MAX),
            i64::try_from(session.details.scanned_count).unwrap_or(i64::MAX),
            serde_json::to_string(&session.details.missing_tags)?,
            serde_json::to_string(&session.details.unexpected_tags)?,
            session.details.main_tag_matches,
            session.previous_status.as_str(),
            session.pump_status.as_str(),
            to_db_time(&session.timestamp),
        ],
    )?;

    let id = conn.last_insert_rowid();
    Ok(session.into_session(id))
}

// ============================================================================
// QUERIES
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VerificationFilter {
    pub pump_id: Option<i64>,
    pub station_id: Option<i64>,
    pub result: Option<Verdict>,
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

impl VerificationFilter {
    pub fn for_pump(pump_id: i64) -> Self {
        Self {
            pump_id: Some(pump_id),
            ..Default::default()
        }
    }

    pub fn for_station(station_id: i64) -> Self {
        Self {
            station_id: Some(station_id),
            ..Default::default()
        }
    }
}

const SESSION_COLUMNS: &str = "id, result, message, expected_count, scanned_count, missing_tags,
                               unexpected_tags, main_tag_matches, pump_status, previous_status,
                               created_at, pump_id, gas_station_id, user_id, main_tag_scanned,
                               scanned_child_tags";

const FILTER_CLAUSE: &str = "(?1 IS NULL OR pump_id = ?1)
           AND (?2 IS NULL OR gas_station_id = ?2)
           AND (?3 IS NULL OR result = ?3)
           AND (?4 IS NULL OR created_at >= ?4)
           AND (?5 IS NULL OR created_at < ?5)";

fn count_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let raw: i64 = row.get(idx)?;
    usize::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn verdict_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Verdict> {
    let raw: String = row.get(idx)?;
    Verdict::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognised verdict '{}'", raw).into(),
        )
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<VerificationSession> {
    Ok(VerificationSession {
        session_id: row.get(0)?,
        result: verdict_column(row, 1)?,
        message: row.get(2)?,
        details: VerificationDetails {
            expected_count: count_column(row, 3)?,
            scanned_count: count_column(row, 4)?,
            missing_tags: json_list_column(row, 5)?,
            unexpected_tags: json_list_column(row, 6)?,
            main_tag_matches: row.get(7)?,
        },
        pump_status: enum_column::<PumpStatus>(row, 8)?,
        previous_status: enum_column::<PumpStatus>(row, 9)?,
        timestamp: time_column(row, 10)?,
        pump_id: row.get(11)?,
        station_id: row.get(12)?,
        user_id: row.get(13)?,
        main_tag_scanned: row.get(14)?,
        scanned_child_tags: json_list_column(row, 15)?,
    })
}

/// Filtered sessions, newest first, inside an optional `(limit, offset)` window
pub fn list(
    conn: &Connection,
    filter: &VerificationFilter,
    window: Option<(i64, i64)>,
) -> Result<Vec<VerificationSession>> {
    let (limit, offset) = window.unwrap_or((-1, 0));
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM verification_sessions
         WHERE {}
         ORDER BY created_at DESC, id DESC
         LIMIT ?6 OFFSET ?7",
        SESSION_COLUMNS, FILTER_CLAUSE
    ))?;

    let sessions = stmt
        .query_map(
            params![
                filter.pump_id,
                filter.station_id,
                filter.result.map(|r| r.as_str()),
                filter.from.as_ref().map(to_db_time),
                filter.until.as_ref().map(to_db_time),
                limit,
                offset,
            ],
            session_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(sessions)
}

pub fn count(conn: &Connection, filter: &VerificationFilter) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM verification_sessions WHERE {}",
            FILTER_CLAUSE
        ),
        params![
            filter.pump_id,
            filter.station_id,
            filter.result.map(|r| r.as_str()),
            filter.from.as_ref().map(to_db_time),
            filter.until.as_ref().map(to_db_time),
        ],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_by_pump(conn: &Connection, pump_id: i64) -> Result<Vec<VerificationSession>> {
    list(conn, &VerificationFilter::for_pump(pump_id), None)
}

pub fn list_by_station(conn: &Connection, station_id: i64) -> Result<Vec<VerificationSession>> {
    list(conn, &VerificationFilter::for_station(station_id), None)
}

pub fn list_all(conn: &Connection) -> Result<Vec<VerificationSession>> {
    list(conn, &VerificationFilter::default(), None)
}
