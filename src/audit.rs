// 📜 Audit Trail - "Every change is an event"
//
// One entry per create/update/delete of a station, pump or user, and one per
// verification. Entries are written with the same connection (and therefore
// inside the same transaction) as the change they describe: if the entry
// cannot be written, the change does not happen either.

use crate::context::SessionContext;
use crate::db::{enum_column, time_column, to_db_time};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// ACTION + ENTITY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            other => Err(Error::Validation(format!("unknown audit action '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Station,
    Pump,
    User,
    Verification,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Station => "STATION",
            EntityType::Pump => "PUMP",
            EntityType::User => "USER",
            EntityType::Verification => "VERIFICATION",
        }
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STATION" => Ok(EntityType::Station),
            "PUMP" => Ok(EntityType::Pump),
            "USER" => Ok(EntityType::User),
            "VERIFICATION" => Ok(EntityType::Verification),
            other => Err(Error::Validation(format!("unknown entity type '{}'", other))),
        }
    }
}

// ============================================================================
// AUDIT ENTRY
// ============================================================================

/// A stored audit entry, as returned by `GET /admin/audit-logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_values: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_values: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An entry about to be written
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub user_id: i64,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        ctx: &SessionContext,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: ctx.user_id(),
            action,
            entity_type,
            entity_id,
            old_values: None,
            new_values: None,
            ip_address: ctx.ip_address.clone(),
            timestamp,
        }
    }

    pub fn with_old(mut self, values: serde_json::Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn with_new(mut self, values: serde_json::Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Insert an entry into the audit trail. Call it on the transaction that
/// performs the change.
pub fn record(conn: &Connection, entry: &AuditRecord) -> Result<i64> {
    let old_json = entry.old_values.as_ref().map(serde_json::to_string).transpose()?;
    let new_json = entry.new_values.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO audit_logs (
            user_id, action, entity_type, entity_id, old_values, new_values, ip_address, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.user_id,
            entry.action.as_str(),
            entry.entity_type.as_str(),
            entry.entity_id,
            old_json,
            new_json,
            entry.ip_address,
            to_db_time(&entry.timestamp),
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

// ============================================================================
// QUERIES
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<i64>,
    pub user_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

const FILTER_CLAUSE: &str = "(?1 IS NULL OR a.action = ?1)
           AND (?2 IS NULL OR a.entity_type = ?2)
           AND (?3 IS NULL OR a.entity_id = ?3)
           AND (?4 IS NULL OR a.user_id = ?4)
           AND (?5 IS NULL OR a.created_at >= ?5)
           AND (?6 IS NULL OR a.created_at < ?6)";

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        action: enum_column::<AuditAction>(row, 3)?,
        entity_type: enum_column::<EntityType>(row, 4)?,
        entity_id: row.get(5)?,
        old_values: json_column(row, 6)?,
        new_values: json_column(row, 7)?,
        ip_address: row.get(8)?,
        created_at: time_column(row, 9)?,
    })
}

/// Filtered entries, newest first, inside an optional `(limit, offset)` window
pub fn list(
    conn: &Connection,
    filter: &AuditFilter,
    window: Option<(i64, i64)>,
) -> Result<Vec<AuditLogEntry>> {
    let (limit, offset) = window.unwrap_or((-1, 0));
    let mut stmt = conn.prepare(&format!(
        "SELECT a.id, a.user_id, u.full_name, a.action, a.entity_type, a.entity_id,
                a.old_values, a.new_values, a.ip_address, a.created_at
         FROM audit_logs a
         LEFT JOIN users u ON u.id = a.user_id
         WHERE {}
         ORDER BY a.created_at DESC, a.id DESC
         LIMIT ?7 OFFSET ?8",
        FILTER_CLAUSE
    ))?;

    let entries = stmt
        .query_map(
            params![
                filter.action.map(|a| a.as_str()),
                filter.entity_type.map(|e| e.as_str()),
                filter.entity_id,
                filter.user_id,
                filter.from.as_ref().map(to_db_time),
                filter.until.as_ref().map(to_db_time),
                limit,
                offset,
            ],
            entry_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn count(conn: &Connection, filter: &AuditFilter) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM audit_logs a WHERE {}", FILTER_CLAUSE),
        params![
            filter.action.map(|a| a.as_str()),
            filter.entity_type.map(|e| e.as_str()),
            filter.entity_id,
            filter.user_id,
            filter.from.as_ref().map(to_db_time),
            filter.until.as_ref().map(to_db_time),
        ],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Full history of one entity, newest first
pub fn for_entity(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: i64,
) -> Result<Vec<AuditLogEntry>> {
    list(
        conn,
        &AuditFilter {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id),
            ..Default::default()
        },
        None,
    )
}

/// Recent entries touching a station or any of the given pumps
pub fn for_station(
    conn: &Connection,
    station_id: i64,
    pump_ids: &[i64],
    limit: i64,
) -> Result<Vec<AuditLogEntry>> {
    let mut entries = for_entity(conn, EntityType::Station, station_id)?;
    for pump_id in pump_ids {
        entries.extend(for_entity(conn, EntityType::Pump, *pump_id)?);
    }

    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    entries.truncate(usize::try_from(limit).unwrap_or(0));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_record_and_read_back() {
        let conn = db::open_in_memory().unwrap();
        let ctx = SessionContext::system();

        let entry = AuditRecord::new(&ctx, AuditAction::Update, EntityType::Pump, 7, Utc::now())
            .with_old(serde_json::json!({"status": "LOCKED"}))
            .with_new(serde_json::json!({"status": "BROKEN"}));
        record(&conn, &entry).unwrap();

        let entries = for_entity(&conn, EntityType::Pump, 7).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Update);
        assert_eq!(entries[0].old_values.as_ref().unwrap()["status"], "LOCKED");
        assert_eq!(entries[0].new_values.as_ref().unwrap()["status"], "BROKEN");
        assert_eq!(entries[0].user_id, 0);

        println!("✅ Audit entry round trip test PASSED");
    }

    #[test]
    fn test_audit_log_is_append_only() {
        let conn = db::open_in_memory().unwrap();
        let ctx = SessionContext::system();
        let id = record(
            &conn,
            &AuditRecord::new(&ctx, AuditAction::Create, EntityType::Station, 1, Utc::now()),
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE audit_logs SET action = 'DELETE' WHERE id = ?1", [id])
            .is_err());
        assert!(conn.execute("DELETE FROM audit_logs WHERE id = ?1", [id]).is_err());
        assert_eq!(count(&conn, &AuditFilter::default()).unwrap(), 1);
    }

    #[test]
    fn test_filters() {
        let conn = db::open_in_memory().unwrap();
        let ctx = SessionContext::system();
        let t0 = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z").unwrap().with_timezone(&Utc);
        let t1 = DateTime::parse_from_rfc3339("2025-03-02T10:00:00Z").unwrap().with_timezone(&Utc);

        record(&conn, &AuditRecord::new(&ctx, AuditAction::Create, EntityType::Station, 1, t0)).unwrap();
        record(&conn, &AuditRecord::new(&ctx, AuditAction::Create, EntityType::Pump, 1, t0)).unwrap();
        record(&conn, &AuditRecord::new(&ctx, AuditAction::Delete, EntityType::Pump, 1, t1)).unwrap();

        let creates = AuditFilter {
            action: Some(AuditAction::Create),
            ..Default::default()
        };
        assert_eq!(count(&conn, &creates).unwrap(), 2);

        let late = AuditFilter {
            from: Some(t1),
            ..Default::default()
        };
        let entries = list(&conn, &late, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Delete);

        let early = AuditFilter {
            until: Some(t1),
            entity_type: Some(EntityType::Pump),
            ..Default::default()
        };
        assert_eq!(count(&conn, &early).unwrap(), 1);

        // Newest first
        let all = list(&conn, &AuditFilter::default(), Some((10, 0))).unwrap();
        assert_eq!(all[0].created_at, t1);
    }
}
