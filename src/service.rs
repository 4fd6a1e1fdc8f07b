// 🛠 Service Layer - the one way in
//
// Every mutation and every query goes through `Service`. A mutation runs in a
// single IMMEDIATE transaction together with its audit entry; a verification
// additionally writes the pump transition and the session row in that same
// transaction, so the four always agree.
//
// Verifications of one pump are serialized by an in-process lock keyed by
// pump id. Writers in other processes are caught by the pump's version
// counter; a lost race is re-run up to `conflict_retries` times.

use crate::analytics::{self, DashboardStats, StationActivity};
use crate::audit::{self, AuditAction, AuditFilter, AuditLogEntry, AuditRecord, EntityType};
use crate::context::SessionContext;
use crate::db;
use crate::entities::{
    hash_token, issue_token, Credentials, GasStation, IssuedUser, LoginResponse, NewPump,
    NewStation, NewUser, Pump, PumpStatus, PumpUpdate, StationStatus, StationUpdate, User,
};
use crate::error::{Error, Result};
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::tags::{TagId, TagSet};
use crate::verification::{
    self, NewSession, VerificationFilter, VerificationRequest, VerificationSession,
};
use chrono::{Duration, Utc};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Default number of re-runs after a lost optimistic-version race
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Default lifetime of a login token
pub const DEFAULT_SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// One page of results plus the unpaged total
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// A reconciled scan waiting to be committed
#[derive(Debug, Clone)]
struct PlannedVerification {
    pump: Pump,
    report: ReconciliationReport,
    next_status: PumpStatus,
}

// ============================================================================
// PER-PUMP LOCKS
// ============================================================================

/// Lock table keyed by pump id. Unrelated pumps never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct PumpLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl PumpLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `pump_id`, created on first use
    pub fn handle(&self, pump_id: i64) -> Result<Arc<Mutex<()>>> {
        let mut table = self.inner.lock().map_err(|_| Error::poisoned("pump lock table"))?;
        Ok(table
            .entry(pump_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn forget(&self, pump_id: i64) -> Result<()> {
        let mut table = self.inner.lock().map_err(|_| Error::poisoned("pump lock table"))?;
        table.remove(&pump_id);
        Ok(())
    }
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct Service {
    db: Arc<Mutex<Connection>>,
    locks: PumpLocks,
    engine: ReconciliationEngine,
    conflict_retries: u32,
    session_ttl: Duration,
}

impl Service {
    pub fn new(conn: Connection) -> Self {
        Service {
            db: Arc::new(Mutex::new(conn)),
            locks: PumpLocks::new(),
            engine: ReconciliationEngine::new(),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Run a read against the shared connection
    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.db.lock().map_err(|_| Error::poisoned("database"))?;
        f(&*conn)
    }

    /// Run `f` inside one IMMEDIATE transaction; any error rolls it all back
    fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.db.lock().map_err(|_| Error::poisoned("database"))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ========================================================================
    // USERS + SESSIONS
    // ========================================================================

    /// Resolve a bearer token into a session context
    pub fn authenticate(&self, token: &str, ip_address: Option<String>) -> Result<SessionContext> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Unauthorized("missing session token".to_string()));
        }

        let hash = hash_token(token);
        let user = self
            .with_conn(|conn| db::find_user_by_token_hash(conn, &hash, Utc::now()))?
            .ok_or_else(|| {
                Error::Unauthorized("unknown, expired or revoked session token".to_string())
            })?;

        debug!(user_id = user.id, "authenticated session");
        Ok(SessionContext::new(user, ip_address))
    }

    /// Exchange a username and password for an expiring bearer token
    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "username and password are required".to_string(),
            ));
        }
        let rejected = || Error::Unauthorized("invalid username or password".to_string());

        let (user, credentials) = self
            .with_conn(|conn| db::find_credentials(conn, username.trim()))?
            .ok_or_else(rejected)?;
        match credentials {
            Some(credentials) if credentials.verify(password) => {}
            _ => {
                warn!(username = %username.trim(), "rejected login");
                return Err(rejected());
            }
        }

        let token = issue_token();
        let hash = hash_token(&token);
        let now = Utc::now();
        let expires_at = now + self.session_ttl;
        self.mutate(|conn| db::insert_token(conn, user.id, &hash, now, Some(expires_at)))?;

        info!(user_id = user.id, username = %user.username, "logged in");
        Ok(LoginResponse {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: self.session_ttl.num_seconds(),
            user,
        })
    }

    /// Revoke the token the caller authenticated with
    pub fn logout(&self, ctx: &SessionContext, token: &str) -> Result<()> {
        let hash = hash_token(token.trim());
        let revoked = self.mutate(|conn| db::revoke_token(conn, &hash, Utc::now()))?;
        if !revoked {
            return Err(Error::Unauthorized(
                "unknown or revoked session token".to_string(),
            ));
        }

        info!(user_id = ctx.user_id(), "logged out");
        Ok(())
    }

    pub fn create_user(&self, ctx: &SessionContext, new: &NewUser) -> Result<IssuedUser> {
        ctx.require_admin()?;
        new.validate()?;

        let credentials = new.password.as_deref().map(Credentials::derive);
        let token = issue_token();
        let hash = hash_token(&token);
        let now = Utc::now();

        let user = self.mutate(|conn| {
            let user = db::insert_user(conn, new, credentials.as_ref(), now)?;
            db::insert_token(conn, user.id, &hash, now, None)?;
            audit::record(
                conn,
                &AuditRecord::new(ctx, AuditAction::Create, EntityType::User, user.id, now)
                    .with_new(user.snapshot()),
            )?;
            Ok(user)
        })?;

        info!(user_id = user.id, username = %user.username, role = user.role.as_str(), "created user");
        Ok(IssuedUser { user, token })
    }

    pub fn list_users(&self, ctx: &SessionContext) -> Result<Vec<User>> {
        ctx.require_admin()?;
        self.with_conn(db::list_users)
    }

    pub fn count_users(&self) -> Result<i64> {
        self.with_conn(db::count_users)
    }

    // ========================================================================
    // STATIONS
    // ========================================================================

    pub fn list_stations(
        &self,
        status: Option<StationStatus>,
        window: Option<(i64, i64)>,
    ) -> Result<Listing<GasStation>> {
        self.with_conn(|conn| {
            Ok(Listing {
                items: db::list_stations(conn, status, window)?,
                total: db::count_stations(conn, status)?,
            })
        })
    }

    pub fn get_station(&self, id: i64) -> Result<GasStation> {
        self.with_conn(|conn| db::get_station(conn, id))
    }

    pub fn find_station_by_name(&self, name: &str) -> Result<Option<GasStation>> {
        self.with_conn(|conn| db::find_station_by_name(conn, name))
    }

    pub fn create_station(&self, ctx: &SessionContext, new: &NewStation) -> Result<GasStation> {
        ctx.require_admin()?;
        new.validate()?;
        let now = Utc::now();

        let station = self.mutate(|conn| {
            let station = db::insert_station(conn, new, ctx.user_id(), now)?;
            audit::record(
                conn,
                &AuditRecord::new(ctx, AuditAction::Create, EntityType::Station, station.id, now)
                    .with_new(station.snapshot()),
            )?;
            Ok(station)
        })?;

        info!(station_id = station.id, name = %station.name, "created station");
        Ok(station)
    }

    pub fn update_station(
        &self,
        ctx: &SessionContext,
        id: i64,
        update: &StationUpdate,
    ) -> Result<GasStation> {
        ctx.require_admin()?;
        let now = Utc::now();

        let station = self.mutate(|conn| {
            let current = db::get_station(conn, id)?;
            let next = update.apply(&current)?;
            let saved = db::update_station(conn, &next, ctx.user_id(), now)?;
            audit::record(
                conn,
                &AuditRecord::new(ctx, AuditAction::Update, EntityType::Station, id, now)
                    .with_old(current.snapshot())
                    .with_new(saved.snapshot()),
            )?;
            Ok(saved)
        })?;

        info!(station_id = id, status = station.status.as_str(), "updated station");
        Ok(station)
    }

    pub fn delete_station(&self, ctx: &SessionContext, id: i64) -> Result<()> {
        ctx.require_admin()?;
        let now = Utc::now();

        self.mutate(|conn| {
            let current = db::get_station(conn, id)?;
            db::delete_station(conn, id)?;
            audit::record(
                conn,
                &AuditRecord::new(ctx, AuditAction::Delete, EntityType::Station, id, now)
                    .with_old(current.snapshot()),
            )?;
            Ok(())
        })?;

        info!(station_id = id, "deleted station");
        Ok(())
    }

    // ========================================================================
    // PUMPS
    // ========================================================================

    pub fn list_pumps(&self, status: Option<PumpStatus>) -> Result<Vec<Pump>> {
        self.with_conn(|conn| db::list_pumps(conn, None, status))
    }

    pub fn list_station_pumps(&self, station_id: i64) -> Result<Vec<Pump>> {
        self.with_conn(|conn| {
            db::get_station(conn, station_id)?;
            db::list_pumps(conn, Some(station_id), None)
        })
    }

    pub fn get_pump(&self, id: i64) -> Result<Pump> {
        self.with_conn(|conn| db::get_pump(conn, id))
    }

    pub fn find_pump_by_number(&self, station_id: i64, pump_number: i64) -> Result<Option<Pump>> {
        self.with_conn(|conn| db::find_pump_by_number(conn, station_id, pump_number))
    }

    pub fn create_pump(&self, ctx: &SessionContext, station_id: i64, new: &NewPump) -> Result<Pump> {
        ctx.require_admin()?;
        new.validate()?;
        let now = Utc::now();

        let pump = self.mutate(|conn| {
            let pump = db::insert_pump(conn, station_id, new, ctx.user_id(), now)?;
            audit::record(
                conn,
                &AuditRecord::new(ctx, AuditAction::Create, EntityType::Pump, pump.id, now)
                    .with_new(pump.snapshot()),
            )?;
            Ok(pump)
        })?;

        info!(
            pump_id = pump.id,
            station_id,
            pump_number = pump.pump_number,
            expected_tags = pump.expected_child_tags.len(),
            "created pump"
        );
        Ok(pump)
    }

    pub fn update_pump(&self, ctx: &SessionContext, id: i64, update: &PumpUpdate) -> Result<Pump> {
        ctx.require_admin()?;
        let handle = self.locks.handle(id)?;
        let _guard = handle.lock().map_err(|_| Error::poisoned("pump"))?;
        let now = Utc::now();

        let pump = self.mutate(|conn| {
            let current = db::get_pump(conn, id)?;
            update.validate(&current)?;

            let mut next = current.clone();
            if let Some(number) = update.pump_number {
                next.pump_number = number;
            }
            if let Some(tag) = &update.main_rfid_tag {
                next.main_rfid_tag = tag.clone();
            }
            if let Some(status) = update.status {
                next.status = current.status.administrative_transition(status)?;
            }

            let saved = db::update_pump(
                conn,
                &next,
                update.expected_child_tags.as_deref(),
                ctx.user_id(),
                now,
            )?;
            audit::record(
                conn,
                &AuditRecord::new(ctx, AuditAction::Update, EntityType::Pump, id, now)
                    .with_old(current.snapshot())
                    .with_new(saved.snapshot()),
            )?;
            Ok(saved)
        })?;

        info!(pump_id = id, status = pump.status.as_str(), version = pump.version, "updated pump");
        Ok(pump)
    }

    pub fn delete_pump(&self, ctx: &SessionContext, id: i64) -> Result<()> {
        ctx.require_admin()?;
        let handle = self.locks.handle(id)?;
        let guard = handle.lock().map_err(|_| Error::poisoned("pump"))?;
        let now = Utc::now();

        self.mutate(|conn| {
            let current = db::get_pump(conn, id)?;
            db::delete_pump(conn, id, current.version)?;
            audit::record(
                conn,
                &AuditRecord::new(ctx, AuditAction::Delete, EntityType::Pump, id, now)
                    .with_old(current.snapshot()),
            )?;
            Ok(())
        })?;

        drop(guard);
        self.locks.forget(id)?;
        info!(pump_id = id, "deleted pump");
        Ok(())
    }

    // ========================================================================
    // VERIFICATION
    // ========================================================================

    /// Reconcile a scan against the pump's configuration, move the pump's
    /// lock state, and record the session and its audit entry atomically.
    pub fn verify(
        &self,
        ctx: &SessionContext,
        pump_id: i64,
        request: &VerificationRequest,
    ) -> Result<VerificationSession> {
        // Reject malformed scans before touching the pump
        let scanned_main = TagId::parse(&request.main_tag_scanned)
            .map_err(|_| Error::InvalidTag("scanned main tag is empty".to_string()))?;
        let scanned = TagSet::from_scan(&request.scanned_child_tags)?;

        let handle = self.locks.handle(pump_id)?;
        let _guard = handle.lock().map_err(|_| Error::poisoned("pump"))?;

        self.retry_on_conflict(pump_id, || {
            self.verify_once(ctx, pump_id, request, &scanned_main, &scanned)
        })
    }

    /// Re-run `attempt` after each lost version race, at most `conflict_retries` times
    fn retry_on_conflict<T, F>(&self, pump_id: i64, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut retries = 0;
        loop {
            match attempt() {
                Err(Error::Conflict(reason)) if retries < self.conflict_retries => {
                    retries += 1;
                    warn!(pump_id, retries, %reason, "verification lost a version race, retrying");
                }
                other => return other,
            }
        }
    }

    fn verify_once(
        &self,
        ctx: &SessionContext,
        pump_id: i64,
        request: &VerificationRequest,
        scanned_main: &TagId,
        scanned: &TagSet,
    ) -> Result<VerificationSession> {
        let planned = self.plan_verification(pump_id, scanned_main, scanned)?;
        self.commit_verification(ctx, request, scanned_main, planned)
    }

    /// Read the pump and reconcile the scan against it; writes nothing
    fn plan_verification(
        &self,
        pump_id: i64,
        scanned_main: &TagId,
        scanned: &TagSet,
    ) -> Result<PlannedVerification> {
        let pump = self.with_conn(|conn| db::get_pump(conn, pump_id))?;
        let expected = pump.expected_tag_set()?;
        let main_expected = pump.main_tag()?;

        let report = self
            .engine
            .reconcile(&expected, &main_expected, scanned_main, scanned);
        let next_status = pump.status.after_verdict(report.verdict)?;

        Ok(PlannedVerification {
            pump,
            report,
            next_status,
        })
    }

    /// Write the transition, the session and its audit entry, provided the
    /// pump still has the version it was planned against
    fn commit_verification(
        &self,
        ctx: &SessionContext,
        request: &VerificationRequest,
        scanned_main: &TagId,
        planned: PlannedVerification,
    ) -> Result<VerificationSession> {
        let PlannedVerification {
            pump,
            report,
            next_status,
        } = planned;
        let pump_id = pump.id;
        let now = Utc::now();

        let session = self.mutate(|conn| {
            if !db::apply_verification(conn, pump.id, pump.version, next_status, now, ctx.user_id())? {
                return Err(Error::Conflict(format!(
                    "Pump {} changed while it was being verified",
                    pump.id
                )));
            }
            db::touch_station_verification(conn, pump.gas_station_id, now)?;

            let session = verification::append(
                conn,
                NewSession {
                    pump_id: pump.id,
                    station_id: pump.gas_station_id,
                    user_id: ctx.user_id(),
                    main_tag_scanned: scanned_main.as_str().to_string(),
                    // As submitted: repeats and order are evidence
                    scanned_child_tags: request.scanned_child_tags.clone(),
                    result: report.verdict,
                    message: report.message(),
                    details: report.details.clone(),
                    previous_status: pump.status,
                    pump_status: next_status,
                    timestamp: now,
                },
            )?;

            audit::record(
                conn,
                &AuditRecord::new(
                    ctx,
                    AuditAction::Create,
                    EntityType::Verification,
                    session.session_id,
                    now,
                )
                .with_old(serde_json::json!({ "pumpId": pump.id, "status": pump.status }))
                .with_new(serde_json::to_value(&session)?),
            )?;

            Ok(session)
        })?;

        info!(
            pump_id,
            session_id = session.session_id,
            verdict = session.result.as_str(),
            missing = session.details.missing_tags.len(),
            unexpected = session.details.unexpected_tags.len(),
            status = session.pump_status.as_str(),
            "pump verified"
        );
        Ok(session)
    }

    // ========================================================================
    // HISTORY + ADMIN VIEWS
    // ========================================================================

    /// Sessions of one pump; `filter.pump_id` is overridden
    pub fn pump_history(
        &self,
        pump_id: i64,
        filter: VerificationFilter,
        window: Option<(i64, i64)>,
    ) -> Result<Listing<VerificationSession>> {
        let filter = VerificationFilter {
            pump_id: Some(pump_id),
            ..filter
        };
        self.with_conn(|conn| {
            db::get_pump(conn, pump_id)?;
            Ok(Listing {
                items: verification::list(conn, &filter, window)?,
                total: verification::count(conn, &filter)?,
            })
        })
    }

    pub fn all_verifications(
        &self,
        ctx: &SessionContext,
        filter: &VerificationFilter,
        window: Option<(i64, i64)>,
    ) -> Result<Listing<VerificationSession>> {
        ctx.require_admin()?;
        self.with_conn(|conn| {
            Ok(Listing {
                items: verification::list(conn, filter, window)?,
                total: verification::count(conn, filter)?,
            })
        })
    }

    pub fn audit_logs(
        &self,
        ctx: &SessionContext,
        filter: &AuditFilter,
        window: Option<(i64, i64)>,
    ) -> Result<Listing<AuditLogEntry>> {
        ctx.require_admin()?;
        self.with_conn(|conn| {
            Ok(Listing {
                items: audit::list(conn, filter, window)?,
                total: audit::count(conn, filter)?,
            })
        })
    }

    pub fn analytics(&self, ctx: &SessionContext) -> Result<DashboardStats> {
        ctx.require_admin()?;
        self.with_conn(|conn| analytics::compute(conn, Utc::now()))
    }

    pub fn station_activity(
        &self,
        ctx: &SessionContext,
        station_id: i64,
        limit: i64,
    ) -> Result<StationActivity> {
        ctx.require_admin()?;
        self.with_conn(|conn| analytics::station_activity(conn, station_id, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ChildTagSpec, Role};
    use crate::reconciliation::Verdict;
    use std::thread;

    const OPERATOR_PASSWORD: &str = "pump-room-7";

    fn service() -> Service {
        Service::new(db::open_in_memory().unwrap())
    }

    fn operator(service: &Service) -> SessionContext {
        let issued = service
            .create_user(
                &SessionContext::system(),
                &NewUser {
                    username: "op".to_string(),
                    full_name: "Pat Operator".to_string(),
                    role: Role::Operator,
                    password: Some(OPERATOR_PASSWORD.to_string()),
                },
            )
            .unwrap();
        service
            .authenticate(&issued.token, Some("10.0.0.7".to_string()))
            .unwrap()
    }

    /// Station "North" with pump 1: main tag MAIN-1, children A, B, C
    fn seed(service: &Service) -> Pump {
        let admin = SessionContext::system();
        let station = service
            .create_station(
                &admin,
                &NewStation {
                    name: "North".to_string(),
                    location: "Route 9".to_string(),
                },
            )
            .unwrap();

        service
            .create_pump(
                &admin,
                station.id,
                &NewPump {
                    pump_number: 1,
                    main_rfid_tag: "MAIN-1".to_string(),
                    expected_child_tags: ["A", "B", "C"]
                        .iter()
                        .map(|t| ChildTagSpec {
                            tag_id: t.to_string(),
                            description: format!("nozzle {}", t),
                        })
                        .collect(),
                },
            )
            .unwrap()
    }

    fn scan(main: &str, children: &[&str]) -> VerificationRequest {
        VerificationRequest {
            main_tag_scanned: main.to_string(),
            scanned_child_tags: children.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn session_count(service: &Service) -> i64 {
        service
            .with_conn(|conn| verification::count(conn, &VerificationFilter::default()))
            .unwrap()
    }

    fn audit_count(service: &Service) -> i64 {
        service
            .with_conn(|conn| audit::count(conn, &AuditFilter::default()))
            .unwrap()
    }

    #[test]
    fn test_full_match_unlocks() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);

        let session = service
            .verify(&ctx, pump.id, &scan("MAIN-1", &["C", "A", "B", "A"]))
            .unwrap();

        assert_eq!(session.result, Verdict::Success);
        assert_eq!(session.message, "All tags verified");
        assert_eq!(session.details.expected_count, 3);
        assert_eq!(session.details.scanned_count, 3);
        assert_eq!(session.previous_status, PumpStatus::Locked);
        assert_eq!(session.pump_status, PumpStatus::Unlocked);
        assert_eq!(session.user_id, ctx.user_id());

        let pump = service.get_pump(pump.id).unwrap();
        assert_eq!(pump.status, PumpStatus::Unlocked);
        assert!(pump.last_verification_at.is_some());
        assert_eq!(pump.last_modified_by, Some(ctx.user_id()));

        let station = service.get_station(pump.gas_station_id).unwrap();
        assert_eq!(station.last_verification_at, pump.last_verification_at);
    }

    #[test]
    fn test_missing_tag_fails_closed() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);

        service.verify(&ctx, pump.id, &scan("MAIN-1", &["A", "B", "C"])).unwrap();
        let session = service
            .verify(&ctx, pump.id, &scan("MAIN-1", &["A", "B"]))
            .unwrap();

        assert_eq!(session.result, Verdict::Failed);
        assert_eq!(session.details.missing_tags, vec!["C"]);
        assert!(session.details.unexpected_tags.is_empty());
        assert_eq!(session.previous_status, PumpStatus::Unlocked);
        assert_eq!(service.get_pump(pump.id).unwrap().status, PumpStatus::Locked);
    }

    #[test]
    fn test_unexpected_tag_and_main_mismatch() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);

        let session = service
            .verify(&ctx, pump.id, &scan("MAIN-1", &["A", "B", "C", "X"]))
            .unwrap();
        assert_eq!(session.result, Verdict::Failed);
        assert_eq!(session.details.unexpected_tags, vec!["X"]);

        let session = service
            .verify(&ctx, pump.id, &scan("MAIN-9", &["A", "B", "C"]))
            .unwrap();
        assert_eq!(session.result, Verdict::Failed);
        assert!(!session.details.main_tag_matches);
        assert_eq!(service.get_pump(pump.id).unwrap().status, PumpStatus::Locked);
    }

    #[test]
    fn test_session_keeps_scans_as_submitted() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);
        let request = scan("MAIN-1", &["C", "B", "A", "A"]);

        let session = service.verify(&ctx, pump.id, &request).unwrap();
        assert_eq!(session.scanned_child_tags, request.scanned_child_tags);
        assert_eq!(session.details.scanned_count, 3);
        assert_eq!(session.result, Verdict::Success);

        let stored = service
            .pump_history(pump.id, VerificationFilter::default(), None)
            .unwrap();
        assert_eq!(stored.items[0].scanned_child_tags, vec!["C", "B", "A", "A"]);
    }

    #[test]
    fn test_stale_version_is_conflict_and_writes_nothing() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);
        let request = scan("MAIN-1", &["A", "B", "C"]);
        let main = TagId::parse("MAIN-1").unwrap();
        let scanned = TagSet::from_scan(&request.scanned_child_tags).unwrap();

        let planned = service.plan_verification(pump.id, &main, &scanned).unwrap();
        assert_eq!(planned.next_status, PumpStatus::Unlocked);

        // Another writer touches the pump between the read and the commit
        service
            .update_pump(
                &SessionContext::system(),
                pump.id,
                &PumpUpdate {
                    pump_number: Some(7),
                    ..Default::default()
                },
            )
            .unwrap();
        let sessions_before = session_count(&service);
        let audits_before = audit_count(&service);

        let err = service
            .commit_verification(&ctx, &request, &main, planned)
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(session_count(&service), sessions_before);
        assert_eq!(audit_count(&service), audits_before);

        let current = service.get_pump(pump.id).unwrap();
        assert_eq!(current.status, PumpStatus::Locked);
        assert!(current.last_verification_at.is_none());

        // A fresh attempt reads the new version and goes through
        let session = service.verify(&ctx, pump.id, &request).unwrap();
        assert_eq!(session.pump_status, PumpStatus::Unlocked);
    }

    #[test]
    fn test_conflicts_are_retried_then_reported() {
        let service = service().with_conflict_retries(2);
        let lost_race = || Error::Conflict("pump changed".to_string());

        let mut calls = 0;
        let value = service
            .retry_on_conflict(1, || {
                calls += 1;
                if calls <= 2 {
                    Err(lost_race())
                } else {
                    Ok(calls)
                }
            })
            .unwrap();
        assert_eq!(value, 3);

        let mut calls = 0;
        let err = service
            .retry_on_conflict(1, || -> Result<()> {
                calls += 1;
                Err(lost_race())
            })
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(calls, 3);

        let no_retries = service.clone().with_conflict_retries(0);
        let mut calls = 0;
        let err = no_retries
            .retry_on_conflict(1, || -> Result<()> {
                calls += 1;
                Err(lost_race())
            })
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(calls, 1);

        let mut calls = 0;
        let err = service
            .retry_on_conflict(1, || -> Result<()> {
                calls += 1;
                Err(Error::InvalidState("pump is BROKEN".to_string()))
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_repeat_verification_gets_distinct_sessions() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);
        let request = scan("MAIN-1", &["A", "B"]);

        let first = service.verify(&ctx, pump.id, &request).unwrap();
        let second = service.verify(&ctx, pump.id, &request).unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(first.result, second.result);
        assert_eq!(first.details, second.details);
        assert_eq!(session_count(&service), 2);
    }

    #[test]
    fn test_one_audit_entry_per_mutation() {
        let service = service();
        let before = audit_count(&service);
        let pump = seed(&service);
        let ctx = operator(&service);
        // station, pump, operator user
        assert_eq!(audit_count(&service), before + 3);

        let session = service.verify(&ctx, pump.id, &scan("MAIN-1", &["A"])).unwrap();
        assert_eq!(audit_count(&service), before + 4);

        let entries = service
            .with_conn(|conn| audit::for_entity(conn, EntityType::Verification, session.session_id))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Create);
        assert_eq!(entries[0].user_id, ctx.user_id());
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_invalid_tags_leave_no_trace() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);
        let audits = audit_count(&service);

        let err = service
            .verify(&ctx, pump.id, &scan("MAIN-1", &["A", ""]))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TAG");

        let err = service.verify(&ctx, pump.id, &scan("  ", &["A"])).unwrap_err();
        assert_eq!(err.code(), "INVALID_TAG");

        assert_eq!(session_count(&service), 0);
        assert_eq!(audit_count(&service), audits);
        assert_eq!(service.get_pump(pump.id).unwrap().version, pump.version);
    }

    #[test]
    fn test_unknown_pump_is_not_found() {
        let service = service();
        let ctx = operator(&service);
        let err = service.verify(&ctx, 404, &scan("MAIN-1", &[])).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(session_count(&service), 0);
    }

    #[test]
    fn test_broken_pump_cannot_be_verified() {
        let service = service();
        let pump = seed(&service);
        let admin = SessionContext::system();
        let ctx = operator(&service);

        service
            .update_pump(
                &admin,
                pump.id,
                &PumpUpdate {
                    status: Some(PumpStatus::Broken),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = service
            .verify(&ctx, pump.id, &scan("MAIN-1", &["A", "B", "C"]))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(session_count(&service), 0);
        assert_eq!(service.get_pump(pump.id).unwrap().status, PumpStatus::Broken);
    }

    #[test]
    fn test_admin_cannot_unlock() {
        let service = service();
        let pump = seed(&service);

        let err = service
            .update_pump(
                &SessionContext::system(),
                pump.id,
                &PumpUpdate {
                    status: Some(PumpStatus::Unlocked),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn test_update_replaces_expected_tags() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);

        let updated = service
            .update_pump(
                &SessionContext::system(),
                pump.id,
                &PumpUpdate {
                    expected_child_tags: Some(vec![ChildTagSpec {
                        tag_id: "Z".to_string(),
                        description: String::new(),
                    }]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.version, pump.version + 1);
        assert_eq!(updated.expected_child_tags.len(), 1);

        let session = service.verify(&ctx, pump.id, &scan("MAIN-1", &["Z"])).unwrap();
        assert_eq!(session.result, Verdict::Success);
    }

    #[test]
    fn test_operator_cannot_administer() {
        let service = service();
        let ctx = operator(&service);

        let err = service
            .create_station(
                &ctx,
                &NewStation {
                    name: "South".to_string(),
                    location: "Dock".to_string(),
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        assert_eq!(service.analytics(&ctx).unwrap_err().code(), "FORBIDDEN");
    }

    #[test]
    fn test_unknown_token_is_unauthorized() {
        let service = service();
        assert_eq!(
            service.authenticate("nope", None).unwrap_err().code(),
            "UNAUTHORIZED"
        );
        assert_eq!(service.authenticate("", None).unwrap_err().code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_login_issues_expiring_token() {
        let service = service();
        operator(&service);

        let session = service.login("op", OPERATOR_PASSWORD).unwrap();
        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.expires_in, DEFAULT_SESSION_TTL_SECS);
        assert_eq!(session.user.username, "op");

        let ctx = service.authenticate(&session.access_token, None).unwrap();
        assert_eq!(ctx.user_id(), session.user.id);
    }

    #[test]
    fn test_login_rejects_bad_credentials() {
        let service = service();
        operator(&service);

        let wrong = service.login("op", "not-the-password").unwrap_err();
        assert_eq!(wrong.code(), "UNAUTHORIZED");
        let unknown = service.login("ghost", OPERATOR_PASSWORD).unwrap_err();
        assert_eq!(unknown.code(), "UNAUTHORIZED");
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert_eq!(service.login("op", "").unwrap_err().code(), "VALIDATION_ERROR");

        // A user created without a password cannot log in at all
        service
            .create_user(
                &SessionContext::system(),
                &NewUser {
                    username: "kiosk".to_string(),
                    full_name: "Kiosk".to_string(),
                    role: Role::Operator,
                    password: None,
                },
            )
            .unwrap();
        assert_eq!(service.login("kiosk", "anything").unwrap_err().code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_logout_revokes_only_that_token() {
        let service = service();
        let api_ctx = operator(&service);

        let first = service.login("op", OPERATOR_PASSWORD).unwrap();
        let second = service.login("op", OPERATOR_PASSWORD).unwrap();
        let ctx = service.authenticate(&first.access_token, None).unwrap();

        service.logout(&ctx, &first.access_token).unwrap();
        assert_eq!(
            service.authenticate(&first.access_token, None).unwrap_err().code(),
            "UNAUTHORIZED"
        );
        assert_eq!(
            service.logout(&ctx, &first.access_token).unwrap_err().code(),
            "UNAUTHORIZED"
        );
        assert!(service.authenticate(&second.access_token, None).is_ok());
        assert_eq!(api_ctx.user_id(), ctx.user_id());
    }

    #[test]
    fn test_expired_login_token_is_unauthorized() {
        let service = service().with_session_ttl(Duration::seconds(-1));
        operator(&service);

        let session = service.login("op", OPERATOR_PASSWORD).unwrap();
        assert_eq!(
            service.authenticate(&session.access_token, None).unwrap_err().code(),
            "UNAUTHORIZED"
        );
    }

    #[test]
    fn test_audit_failure_rolls_back_mutation() {
        let service = service();
        service
            .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE audit_logs")?))
            .unwrap();

        let err = service
            .create_station(
                &SessionContext::system(),
                &NewStation {
                    name: "Ghost".to_string(),
                    location: "Nowhere".to_string(),
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert_eq!(service.list_stations(None, None).unwrap().total, 0);
    }

    #[test]
    fn test_station_with_pumps_cannot_be_deleted() {
        let service = service();
        let pump = seed(&service);
        let admin = SessionContext::system();

        let err = service.delete_station(&admin, pump.gas_station_id).unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        service.delete_pump(&admin, pump.id).unwrap();
        service.delete_station(&admin, pump.gas_station_id).unwrap();
        assert_eq!(service.get_pump(pump.id).unwrap_err().code(), "NOT_FOUND");
    }

    #[test]
    fn test_concurrent_verifications_serialize() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);
        let pump_id = pump.id;

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                let ctx = ctx.clone();
                let request = if i % 2 == 0 {
                    scan("MAIN-1", &["A", "B", "C"])
                } else {
                    scan("MAIN-1", &["A"])
                };
                thread::spawn(move || service.verify(&ctx, pump_id, &request).unwrap())
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        let history = service
            .pump_history(pump.id, VerificationFilter::default(), None)
            .unwrap();
        assert_eq!(history.total, 8);

        let current = service.get_pump(pump.id).unwrap();
        let last = service
            .with_conn(|conn| {
                let sessions = verification::list_by_pump(conn, pump.id)?;
                Ok(sessions.into_iter().max_by_key(|s| s.session_id))
            })
            .unwrap()
            .unwrap();
        assert_eq!(current.status, last.pump_status);
        assert_eq!(current.version, pump.version + 8);

        // Each session starts from the status the previous one left behind
        let mut sessions = service
            .with_conn(|conn| verification::list_by_pump(conn, pump.id))
            .unwrap();
        sessions.sort_by_key(|s| s.session_id);
        for pair in sessions.windows(2) {
            assert_eq!(pair[1].previous_status, pair[0].pump_status);
        }
    }

    #[test]
    fn test_history_filters() {
        let service = service();
        let pump = seed(&service);
        let ctx = operator(&service);

        service.verify(&ctx, pump.id, &scan("MAIN-1", &["A", "B", "C"])).unwrap();
        service.verify(&ctx, pump.id, &scan("MAIN-1", &["A"])).unwrap();
        service.verify(&ctx, pump.id, &scan("MAIN-1", &["A"])).unwrap();

        let failed = service
            .pump_history(
                pump.id,
                VerificationFilter {
                    result: Some(Verdict::Failed),
                    ..Default::default()
                },
                Some((1, 0)),
            )
            .unwrap();
        assert_eq!(failed.total, 2);
        assert_eq!(failed.items.len(), 1);

        let all = service
            .all_verifications(&SessionContext::system(), &VerificationFilter::default(), None)
            .unwrap();
        assert_eq!(all.total, 3);

        let stats = service.analytics(&SessionContext::system()).unwrap();
        assert_eq!(stats.verifications_week_count, 3);
        assert_eq!(stats.pumps_by_status["LOCKED"], 1);
    }
}
