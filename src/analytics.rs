// 📊 Dashboard Analytics
//
// Read-only counters over stations, pumps and verification sessions. Nothing
// here writes; every figure is computed from the tables at call time.

use crate::audit::{self, AuditLogEntry};
use crate::db;
use crate::entities::{GasStation, Pump, PumpStatus, StationStatus};
use crate::error::Result;
use crate::reconciliation::Verdict;
use crate::verification::{self, VerificationFilter, VerificationSession};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of `GET /admin/analytics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_stations: i64,
    pub total_pumps: i64,
    pub active_stations: i64,
    pub verifications_today_count: i64,
    pub verifications_week_count: i64,
    pub failed_verifications_week: i64,
    /// Percentage of successful verifications over the last 7 days
    pub success_rate: f64,
    pub pumps_by_status: BTreeMap<String, i64>,
}

pub fn compute(conn: &Connection, now: DateTime<Utc>) -> Result<DashboardStats> {
    let total_stations = db::count_stations(conn, None)?;
    let active_stations = db::count_stations(conn, Some(StationStatus::Active))?;
    let total_pumps = db::count_pumps(conn, None)?;

    let start_of_day = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now);
    let week_ago = now - Duration::days(7);

    let today = VerificationFilter {
        from: Some(start_of_day),
        ..Default::default()
    };
    let week = VerificationFilter {
        from: Some(week_ago),
        ..Default::default()
    };
    let week_failed = VerificationFilter {
        result: Some(Verdict::Failed),
        ..week.clone()
    };

    let verifications_today_count = verification::count(conn, &today)?;
    let verifications_week_count = verification::count(conn, &week)?;
    let failed_verifications_week = verification::count(conn, &week_failed)?;

    Ok(DashboardStats {
        total_stations,
        total_pumps,
        active_stations,
        verifications_today_count,
        verifications_week_count,
        failed_verifications_week,
        success_rate: success_rate(verifications_week_count, failed_verifications_week),
        pumps_by_status: pumps_by_status(conn)?,
    })
}

fn success_rate(total: i64, failed: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (total - failed) as f64 / total as f64 * 100.0
}

/// Pump counts keyed by status; every status is present, zero or not
fn pumps_by_status(conn: &Connection) -> Result<BTreeMap<String, i64>> {
    let mut counts: BTreeMap<String, i64> = PumpStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM pumps GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (status, count) in rows {
        counts.insert(status, count);
    }
    Ok(counts)
}

// ============================================================================
// STATION ACTIVITY
// ============================================================================

/// Body of `GET /admin/stations/{id}/logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationActivity {
    pub station: GasStation,
    pub pumps: Vec<Pump>,
    pub recent_verifications: Vec<VerificationSession>,
    pub recent_audit: Vec<AuditLogEntry>,
}

pub fn station_activity(conn: &Connection, station_id: i64, limit: i64) -> Result<StationActivity> {
    let station = db::get_station(conn, station_id)?;
    let pumps = db::list_pumps(conn, Some(station_id), None)?;
    let pump_ids: Vec<i64> = pumps.iter().map(|p| p.id).collect();

    let recent_verifications = verification::list(
        conn,
        &VerificationFilter::for_station(station_id),
        Some((limit, 0)),
    )?;
    let recent_audit = audit::for_station(conn, station_id, &pump_ids, limit)?;

    Ok(StationActivity {
        station,
        pumps,
        recent_verifications,
        recent_audit,
    })
}
