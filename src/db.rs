use crate::entities::{
    ChildTagSpec, Credentials, ExpectedChildTag, GasStation, NewPump, NewStation, NewUser, Pump,
    PumpStatus, Role, StationStatus, User,
};
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// CONNECTION
// ============================================================================

/// Open (or create) the database file and make sure the schema exists
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Users + Auth Tokens
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL,
            password_hash TEXT,
            password_salt TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // expires_at NULL = API token; revoked_at set = logged out
    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            token_hash TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT,
            revoked_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Stations, Pumps, Expected Child Tags
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS gas_stations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            location TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_modified_by INTEGER,
            last_verification_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pumps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            gas_station_id INTEGER NOT NULL REFERENCES gas_stations(id),
            pump_number INTEGER NOT NULL,
            main_rfid_tag TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'LOCKED',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_modified_by INTEGER,
            last_verification_at TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (gas_station_id, pump_number)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expected_child_tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pump_id INTEGER NOT NULL REFERENCES pumps(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            UNIQUE (pump_id, tag_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Verification Sessions (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS verification_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pump_id INTEGER NOT NULL,
            gas_station_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            main_tag_scanned TEXT NOT NULL,
            scanned_child_tags TEXT NOT NULL,
            result TEXT NOT NULL,
            message TEXT NOT NULL,
            expected_count INTEGER NOT NULL,
            scanned_count INTEGER NOT NULL,
            missing_tags TEXT NOT NULL,
            unexpected_tags TEXT NOT NULL,
            main_tag_matches INTEGER NOT NULL,
            previous_status TEXT NOT NULL,
            pump_status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Audit Logs (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            old_values TEXT,
            new_values TEXT,
            ip_address TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Sessions and audit entries are facts: the database refuses to rewrite them
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS verification_sessions_no_update
            BEFORE UPDATE ON verification_sessions
            BEGIN SELECT RAISE(ABORT, 'verification sessions are append-only'); END;
         CREATE TRIGGER IF NOT EXISTS verification_sessions_no_delete
            BEFORE DELETE ON verification_sessions
            BEGIN SELECT RAISE(ABORT, 'verification sessions are append-only'); END;
         CREATE TRIGGER IF NOT EXISTS audit_logs_no_update
            BEFORE UPDATE ON audit_logs
            BEGIN SELECT RAISE(ABORT, 'audit log is append-only'); END;
         CREATE TRIGGER IF NOT EXISTS audit_logs_no_delete
            BEFORE DELETE ON audit_logs
            BEGIN SELECT RAISE(ABORT, 'audit log is append-only'); END;",
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tokens_user ON auth_tokens(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pumps_station ON pumps(gas_station_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_pump ON verification_sessions(pump_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_station ON verification_sessions(gas_station_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// TIME + ROW HELPERS
// ============================================================================

/// Fixed-width RFC 3339 so that string order is time order
pub fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

pub(crate) fn opt_time_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(idx, &s)).transpose()
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a TEXT column holding one of our wire enums
pub(crate) fn enum_column<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognised value '{}'", raw).into(),
        )
    })
}

/// Parse a TEXT column holding a JSON array of strings
pub(crate) fn json_list_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Turn a uniqueness violation into a CONFLICT with a readable message
fn conflict_on_constraint(err: rusqlite::Error, message: impl Into<String>) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(message.into())
        }
        other => Error::Database(other),
    }
}

// ============================================================================
// USERS
// ============================================================================

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        role: enum_column::<Role>(row, 3)?,
    })
}

pub fn insert_user(
    conn: &Connection,
    new: &NewUser,
    credentials: Option<&Credentials>,
    now: DateTime<Utc>,
) -> Result<User> {
    conn.execute(
        "INSERT INTO users (username, full_name, role, password_hash, password_salt, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new.username,
            new.full_name,
            new.role.as_str(),
            credentials.map(|c| c.hash.as_str()),
            credentials.map(|c| c.salt.as_str()),
            to_db_time(&now),
        ],
    )
    .map_err(|e| conflict_on_constraint(e, format!("username '{}' is taken", new.username)))?;

    get_user(conn, conn.last_insert_rowid())
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        "SELECT id, username, full_name, role FROM users WHERE id = ?1",
        [id],
        user_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("User {}", id)))
}

/// The user and its stored password, if it has one
pub fn find_credentials(
    conn: &Connection,
    username: &str,
) -> Result<Option<(User, Option<Credentials>)>> {
    let found = conn
        .query_row(
            "SELECT id, username, full_name, role, password_hash, password_salt
             FROM users WHERE username = ?1",
            [username],
            |row| {
                let user = user_from_row(row)?;
                let hash: Option<String> = row.get(4)?;
                let salt: Option<String> = row.get(5)?;
                let credentials = match (hash, salt) {
                    (Some(hash), Some(salt)) => Some(Credentials { hash, salt }),
                    _ => None,
                };
                Ok((user, credentials))
            },
        )
        .optional()?;
    Ok(found)
}

pub fn insert_token(
    conn: &Connection,
    user_id: i64,
    token_hash: &str,
    now: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO auth_tokens (user_id, token_hash, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            user_id,
            token_hash,
            to_db_time(&now),
            expires_at.as_ref().map(to_db_time),
        ],
    )?;
    Ok(())
}

/// Owner of a token that is neither revoked nor expired at `now`
pub fn find_user_by_token_hash(
    conn: &Connection,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT u.id, u.username, u.full_name, u.role
             FROM auth_tokens t JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = ?1
               AND t.revoked_at IS NULL
               AND (t.expires_at IS NULL OR t.expires_at > ?2)",
            params![token_hash, to_db_time(&now)],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

/// Returns false when the token was unknown or already revoked
pub fn revoke_token(conn: &Connection, token_hash: &str, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE auth_tokens SET revoked_at = ?2 WHERE token_hash = ?1 AND revoked_at IS NULL",
        params![token_hash, to_db_time(&now)],
    )?;
    Ok(changed == 1)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare("SELECT id, username, full_name, role FROM users ORDER BY id")?;
    let users = stmt
        .query_map([], user_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// STATIONS
// ============================================================================

const STATION_COLUMNS: &str = "id, name, location, status, created_at, updated_at,
                               last_modified_by, last_verification_at";

fn station_from_row(row: &Row<'_>) -> rusqlite::Result<GasStation> {
    Ok(GasStation {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        status: enum_column::<StationStatus>(row, 3)?,
        created_at: time_column(row, 4)?,
        updated_at: time_column(row, 5)?,
        last_modified_by: row.get(6)?,
        last_verification_at: opt_time_column(row, 7)?,
    })
}

pub fn insert_station(
    conn: &Connection,
    new: &NewStation,
    actor: i64,
    now: DateTime<Utc>,
) -> Result<GasStation> {
    let now_str = to_db_time(&now);
    conn.execute(
        "INSERT INTO gas_stations (name, location, status, created_at, updated_at, last_modified_by)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
        params![
            new.name,
            new.location,
            StationStatus::Active.as_str(),
            now_str,
            actor
        ],
    )?;

    get_station(conn, conn.last_insert_rowid())
}

pub fn get_station(conn: &Connection, id: i64) -> Result<GasStation> {
    conn.query_row(
        &format!("SELECT {} FROM gas_stations WHERE id = ?1", STATION_COLUMNS),
        [id],
        station_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("Station {}", id)))
}

pub fn find_station_by_name(conn: &Connection, name: &str) -> Result<Option<GasStation>> {
    let station = conn
        .query_row(
            &format!(
                "SELECT {} FROM gas_stations WHERE name = ?1 ORDER BY id LIMIT 1",
                STATION_COLUMNS
            ),
            [name],
            station_from_row,
        )
        .optional()?;
    Ok(station)
}

/// List stations, optionally by status, inside a `(limit, offset)` window
pub fn list_stations(
    conn: &Connection,
    status: Option<StationStatus>,
    window: Option<(i64, i64)>,
) -> Result<Vec<GasStation>> {
    let (limit, offset) = window.unwrap_or((-1, 0));
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM gas_stations
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY id
         LIMIT ?2 OFFSET ?3",
        STATION_COLUMNS
    ))?;

    let stations = stmt
        .query_map(
            params![status.map(|s| s.as_str()), limit, offset],
            station_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(stations)
}

pub fn count_stations(conn: &Connection, status: Option<StationStatus>) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM gas_stations WHERE (?1 IS NULL OR status = ?1)",
        params![status.map(|s| s.as_str())],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Persist the editable fields of `next`
pub fn update_station(
    conn: &Connection,
    next: &GasStation,
    actor: i64,
    now: DateTime<Utc>,
) -> Result<GasStation> {
    let changed = conn.execute(
        "UPDATE gas_stations
         SET name = ?1, location = ?2, status = ?3, updated_at = ?4, last_modified_by = ?5
         WHERE id = ?6",
        params![
            next.name,
            next.location,
            next.status.as_str(),
            to_db_time(&now),
            actor,
            next.id
        ],
    )?;

    if changed == 0 {
        return Err(Error::NotFound(format!("Station {}", next.id)));
    }
    get_station(conn, next.id)
}

pub fn delete_station(conn: &Connection, id: i64) -> Result<()> {
    let pumps = count_pumps(conn, Some(id))?;
    if pumps > 0 {
        return Err(Error::Conflict(format!(
            "Station {} still has {} pump(s); delete them first",
            id, pumps
        )));
    }

    let changed = conn.execute("DELETE FROM gas_stations WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(Error::NotFound(format!("Station {}", id)));
    }
    Ok(())
}

pub fn touch_station_verification(conn: &Connection, id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE gas_stations SET last_verification_at = ?1 WHERE id = ?2",
        params![to_db_time(&at), id],
    )?;
    Ok(())
}

// ============================================================================
// PUMPS
// ============================================================================

const PUMP_COLUMNS: &str = "id, gas_station_id, pump_number, main_rfid_tag, status, created_at,
                            updated_at, last_modified_by, last_verification_at, version";

fn pump_from_row(row: &Row<'_>) -> rusqlite::Result<Pump> {
    Ok(Pump {
        id: row.get(0)?,
        gas_station_id: row.get(1)?,
        pump_number: row.get(2)?,
        main_rfid_tag: row.get(3)?,
        status: enum_column::<PumpStatus>(row, 4)?,
        created_at: time_column(row, 5)?,
        updated_at: time_column(row, 6)?,
        last_modified_by: row.get(7)?,
        last_verification_at: opt_time_column(row, 8)?,
        version: row.get(9)?,
        expected_child_tags: Vec::new(),
    })
}

fn load_child_tags(conn: &Connection, pump_id: i64) -> Result<Vec<ExpectedChildTag>> {
    let mut stmt = conn.prepare(
        "SELECT id, tag_id, description FROM expected_child_tags
         WHERE pump_id = ?1
         ORDER BY tag_id",
    )?;

    let tags = stmt
        .query_map([pump_id], |row| {
            Ok(ExpectedChildTag {
                id: row.get(0)?,
                tag_id: row.get(1)?,
                description: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(tags)
}

fn insert_child_tags(conn: &Connection, pump_id: i64, tags: &[ChildTagSpec]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO expected_child_tags (pump_id, tag_id, description) VALUES (?1, ?2, ?3)",
    )?;
    for tag in tags {
        stmt.execute(params![pump_id, tag.tag_id, tag.description])
            .map_err(|e| {
                conflict_on_constraint(e, format!("child tag '{}' is listed twice", tag.tag_id))
            })?;
    }
    Ok(())
}

fn pump_conflict(err: rusqlite::Error, station_id: i64, number: i64, main_tag: &str) -> Error {
    conflict_on_constraint(
        err,
        format!(
            "pump number {} already exists at station {} or main tag '{}' is already assigned",
            number, station_id, main_tag
        ),
    )
}

pub fn insert_pump(
    conn: &Connection,
    station_id: i64,
    new: &NewPump,
    actor: i64,
    now: DateTime<Utc>,
) -> Result<Pump> {
    // Surface an unknown station as NOT_FOUND rather than a foreign key failure
    get_station(conn, station_id)?;

    let now_str = to_db_time(&now);
    conn.execute(
        "INSERT INTO pumps (gas_station_id, pump_number, main_rfid_tag, status,
                            created_at, updated_at, last_modified_by, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, 1)",
        params![
            station_id,
            new.pump_number,
            new.main_rfid_tag,
            PumpStatus::Locked.as_str(),
            now_str,
            actor
        ],
    )
    .map_err(|e| pump_conflict(e, station_id, new.pump_number, &new.main_rfid_tag))?;

    let pump_id = conn.last_insert_rowid();
    insert_child_tags(conn, pump_id, &new.expected_child_tags)?;

    get_pump(conn, pump_id)
}

pub fn get_pump(conn: &Connection, id: i64) -> Result<Pump> {
    let mut pump = conn
        .query_row(
            &format!("SELECT {} FROM pumps WHERE id = ?1", PUMP_COLUMNS),
            [id],
            pump_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("Pump {}", id)))?;

    pump.expected_child_tags = load_child_tags(conn, id)?;
    Ok(pump)
}

pub fn find_pump_by_number(
    conn: &Connection,
    station_id: i64,
    pump_number: i64,
) -> Result<Option<Pump>> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM pumps WHERE gas_station_id = ?1 AND pump_number = ?2",
            params![station_id, pump_number],
            |row| row.get(0),
        )
        .optional()?;

    id.map(|id| get_pump(conn, id)).transpose()
}

pub fn list_pumps(
    conn: &Connection,
    station_id: Option<i64>,
    status: Option<PumpStatus>,
) -> Result<Vec<Pump>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pumps
         WHERE (?1 IS NULL OR gas_station_id = ?1)
           AND (?2 IS NULL OR status = ?2)
         ORDER BY gas_station_id, pump_number",
        PUMP_COLUMNS
    ))?;

    let mut pumps = stmt
        .query_map(params![station_id, status.map(|s| s.as_str())], pump_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for pump in &mut pumps {
        pump.expected_child_tags = load_child_tags(conn, pump.id)?;
    }

    Ok(pumps)
}

pub fn count_pumps(conn: &Connection, station_id: Option<i64>) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pumps WHERE (?1 IS NULL OR gas_station_id = ?1)",
        params![station_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Persist an administrative edit. `next` carries the new field values and
/// the version read before the edit; a stale version is a CONFLICT.
pub fn update_pump(
    conn: &Connection,
    next: &Pump,
    child_tags: Option<&[ChildTagSpec]>,
    actor: i64,
    now: DateTime<Utc>,
) -> Result<Pump> {
    let changed = conn
        .execute(
            "UPDATE pumps
             SET pump_number = ?1, main_rfid_tag = ?2, status = ?3,
                 updated_at = ?4, last_modified_by = ?5, version = version + 1
             WHERE id = ?6 AND version = ?7",
            params![
                next.pump_number,
                next.main_rfid_tag,
                next.status.as_str(),
                to_db_time(&now),
                actor,
                next.id,
                next.version
            ],
        )
        .map_err(|e| pump_conflict(e, next.gas_station_id, next.pump_number, &next.main_rfid_tag))?;

    if changed == 0 {
        return Err(stale_or_missing(conn, next.id)?);
    }

    if let Some(tags) = child_tags {
        conn.execute("DELETE FROM expected_child_tags WHERE pump_id = ?1", [next.id])?;
        insert_child_tags(conn, next.id, tags)?;
    }

    get_pump(conn, next.id)
}

/// Record the outcome of a verification on the pump row.
///
/// Returns `false` when the row's version is no longer `expected_version`,
/// i.e. someone else wrote the pump after it was read.
pub fn apply_verification(
    conn: &Connection,
    pump_id: i64,
    expected_version: i64,
    status: PumpStatus,
    at: DateTime<Utc>,
    actor: i64,
) -> Result<bool> {
    let at_str = to_db_time(&at);
    let changed = conn.execute(
        "UPDATE pumps
         SET status = ?1, last_verification_at = ?2, updated_at = ?2,
             last_modified_by = ?3, version = version + 1
         WHERE id = ?4 AND version = ?5",
        params![status.as_str(), at_str, actor, pump_id, expected_version],
    )?;

    Ok(changed == 1)
}

pub fn delete_pump(conn: &Connection, id: i64, expected_version: i64) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM pumps WHERE id = ?1 AND version = ?2",
        params![id, expected_version],
    )?;

    if changed == 0 {
        return Err(stale_or_missing(conn, id)?);
    }
    Ok(())
}

fn stale_or_missing(conn: &Connection, pump_id: i64) -> Result<Error> {
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM pumps WHERE id = ?1", [pump_id], |row| row.get(0))
        .optional()?;

    Ok(match exists {
        Some(_) => Error::Conflict(format!("Pump {} was modified concurrently", pump_id)),
        None => Error::NotFound(format!("Pump {}", pump_id)),
    })
}
