use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use httpmon_common::types::{
    Alert, AlertKind, CheckResult, Endpoint, EndpointStatus, HttpMethod, Incident, IncidentState,
    Plan, Project, ResultKind,
};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    plan TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    sealed_value TEXT NOT NULL,
    sealed_username TEXT,
    header_name TEXT,
    description TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_credentials_project_name
    ON credentials(project_id, name);

CREATE TABLE IF NOT EXISTS endpoints (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers_json TEXT,
    request_body TEXT,
    expected_status INTEGER NOT NULL,
    interval_secs INTEGER NOT NULL,
    timeout_ms INTEGER NOT NULL,
    max_latency_ms INTEGER,
    credential_id TEXT REFERENCES credentials(id),
    enabled INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'UNKNOWN',
    last_check_at INTEGER,
    next_check_at INTEGER,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_endpoints_due
    ON endpoints(enabled, next_check_at);

CREATE TABLE IF NOT EXISTS check_results (
    id TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    status_code INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    success INTEGER NOT NULL,
    kind TEXT NOT NULL,
    error_message TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_check_results_endpoint_created
    ON check_results(endpoint_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_check_results_created
    ON check_results(created_at);

CREATE TABLE IF NOT EXISTS incidents (
    id TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    state TEXT NOT NULL,
    failure_kind TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    resolved_at INTEGER,
    failed_check_count INTEGER NOT NULL DEFAULT 0,
    last_error_message TEXT,
    notes TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_incidents_endpoint_state
    ON incidents(endpoint_id, state);
CREATE INDEX IF NOT EXISTS idx_incidents_started ON incidents(started_at);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    incident_id TEXT,
    kind TEXT NOT NULL,
    severity TEXT NOT NULL,
    channel TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    delivered INTEGER NOT NULL DEFAULT 0,
    delivery_error TEXT,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    acknowledged_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_endpoint_kind_created
    ON alerts(endpoint_id, kind, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
";

fn ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ms(v: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(v).unwrap_or_default()
}

fn opt_ms(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|v| v.timestamp_millis())
}

/// Aggregate health figures for one endpoint over a window.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EndpointStats {
    pub total_checks: u64,
    pub uptime_pct: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub failure_breakdown: HashMap<String, u64>,
}

/// Handle to the monitoring state database.
///
/// Safe to share across tasks; every operation takes the connection mutex
/// for its duration, so reads see all prior writes (the happens-before edge
/// the alert dedup window depends on).
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Opens from a `DATABASE_URL`-style value: `sqlite://<path>`,
    /// `sqlite:<path>` or a bare filesystem path.
    pub fn open_url(url: &str) -> Result<Self> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        Self::open(Path::new(path))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- row mappers ----

    fn row_to_endpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Endpoint> {
        let method: String = row.get(4)?;
        let status: String = row.get(13)?;
        Ok(Endpoint {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            url: row.get(3)?,
            method: method.parse().unwrap_or(HttpMethod::Get),
            headers_json: row.get(5)?,
            request_body: row.get(6)?,
            expected_status: row.get::<_, i64>(7)? as u16,
            interval_secs: row.get::<_, i64>(8)? as u32,
            timeout_ms: row.get::<_, i64>(9)? as u32,
            max_latency_ms: row.get::<_, Option<i64>>(10)?.map(|v| v as u32),
            credential_id: row.get(11)?,
            enabled: row.get(12)?,
            status: status.parse().unwrap_or(EndpointStatus::Unknown),
            last_check_at: row.get::<_, Option<i64>>(14)?.map(from_ms),
            next_check_at: row.get::<_, Option<i64>>(15)?.map(from_ms),
            consecutive_failures: row.get::<_, i64>(16)? as u32,
            created_at: from_ms(row.get(17)?),
            updated_at: from_ms(row.get(18)?),
        })
    }

    const ENDPOINT_COLS: &'static str = "id, project_id, name, url, method, headers_json, \
         request_body, expected_status, interval_secs, timeout_ms, max_latency_ms, \
         credential_id, enabled, status, last_check_at, next_check_at, \
         consecutive_failures, created_at, updated_at";

    fn row_to_check_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckResult> {
        let kind: String = row.get(5)?;
        Ok(CheckResult {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            status_code: row.get::<_, i64>(2)? as u16,
            latency_ms: row.get::<_, i64>(3)? as u64,
            success: row.get(4)?,
            kind: kind.parse().unwrap_or(ResultKind::UnknownError),
            error_message: row.get(6)?,
            created_at: from_ms(row.get(7)?),
        })
    }

    fn row_to_incident(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
        let state: String = row.get(2)?;
        let kind: String = row.get(3)?;
        Ok(Incident {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            state: state.parse().unwrap_or(IncidentState::Open),
            failure_kind: kind.parse().unwrap_or(ResultKind::UnknownError),
            started_at: from_ms(row.get(4)?),
            resolved_at: row.get::<_, Option<i64>>(5)?.map(from_ms),
            failed_check_count: row.get::<_, i64>(6)? as u32,
            last_error_message: row.get(7)?,
            notes: row.get(8)?,
            created_at: from_ms(row.get(9)?),
            updated_at: from_ms(row.get(10)?),
        })
    }

    const INCIDENT_COLS: &'static str = "id, endpoint_id, state, failure_kind, started_at, \
         resolved_at, failed_check_count, last_error_message, notes, created_at, updated_at";

    fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
        let kind: String = row.get(3)?;
        let severity: String = row.get(4)?;
        let channel: String = row.get(5)?;
        Ok(Alert {
            id: row.get(0)?,
            endpoint_id: row.get(1)?,
            incident_id: row.get(2)?,
            kind: kind.parse().unwrap_or(AlertKind::UnknownError),
            severity: severity
                .parse()
                .unwrap_or(httpmon_common::types::Severity::Error),
            channel: channel
                .parse()
                .unwrap_or(httpmon_common::types::AlertChannel::Email),
            title: row.get(6)?,
            message: row.get(7)?,
            delivered: row.get(8)?,
            delivery_error: row.get(9)?,
            acknowledged: row.get(10)?,
            acknowledged_at: row.get::<_, Option<i64>>(11)?.map(from_ms),
            created_at: from_ms(row.get(12)?),
        })
    }

    const ALERT_COLS: &'static str = "id, endpoint_id, incident_id, kind, severity, channel, \
         title, message, delivered, delivery_error, acknowledged, acknowledged_at, created_at";

    // ---- endpoints: runtime reads/writes ----

    /// Enabled endpoints whose next check is due at or before `now`.
    /// Never-checked endpoints (NULL next_check_at) are always due.
    pub fn due_endpoints(&self, now: DateTime<Utc>) -> Result<Vec<Endpoint>> {
        let conn = self.lock_conn();
        let sql = format!(
            "SELECT {} FROM endpoints
             WHERE enabled = 1 AND (next_check_at IS NULL OR next_check_at <= ?1)
             ORDER BY created_at ASC",
            Self::ENDPOINT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(rusqlite::params![ms(now)], Self::row_to_endpoint)?;
        let mut endpoints = Vec::new();
        for row in rows {
            endpoints.push(row?);
        }
        Ok(endpoints)
    }

    pub fn get_endpoint(&self, id: &str) -> Result<Endpoint> {
        let conn = self.lock_conn();
        let sql = format!(
            "SELECT {} FROM endpoints WHERE id = ?1",
            Self::ENDPOINT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        match stmt.query_row(rusqlite::params![id], Self::row_to_endpoint) {
            Ok(endpoint) => Ok(endpoint),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                entity: "endpoint",
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_endpoints(&self, project_id: &str) -> Result<Vec<Endpoint>> {
        let conn = self.lock_conn();
        let sql = format!(
            "SELECT {} FROM endpoints WHERE project_id = ?1 ORDER BY created_at DESC",
            Self::ENDPOINT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(rusqlite::params![project_id], Self::row_to_endpoint)?;
        let mut endpoints = Vec::new();
        for row in rows {
            endpoints.push(row?);
        }
        Ok(endpoints)
    }

    /// Single logical update of the runtime fields after a check. The
    /// incident engine is the only caller once an endpoint is admitted.
    pub fn update_endpoint_check_status(
        &self,
        id: &str,
        status: EndpointStatus,
        last_check_at: DateTime<Utc>,
        next_check_at: DateTime<Utc>,
        consecutive_failures: u32,
    ) -> Result<()> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE endpoints
             SET status = ?1, last_check_at = ?2, next_check_at = ?3,
                 consecutive_failures = ?4, updated_at = ?5
             WHERE id = ?6",
            rusqlite::params![
                status.to_string(),
                ms(last_check_at),
                ms(next_check_at),
                consecutive_failures as i64,
                ms(Utc::now()),
                id,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "endpoint",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ---- check results ----

    pub fn append_check_result(&self, result: &CheckResult) -> Result<()> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO check_results
             (id, endpoint_id, status_code, latency_ms, success, kind, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        stmt.execute(rusqlite::params![
            result.id,
            result.endpoint_id,
            result.status_code as i64,
            result.latency_ms as i64,
            result.success,
            result.kind.to_string(),
            result.error_message,
            ms(result.created_at),
        ])?;
        Ok(())
    }

    pub fn latest_result(&self, endpoint_id: &str) -> Result<Option<CheckResult>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, endpoint_id, status_code, latency_ms, success, kind, error_message, created_at
             FROM check_results WHERE endpoint_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )?;
        match stmt.query_row(rusqlite::params![endpoint_id], Self::row_to_check_result) {
            Ok(result) => Ok(Some(result)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn recent_results(&self, endpoint_id: &str, limit: usize) -> Result<Vec<CheckResult>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, endpoint_id, status_code, latency_ms, success, kind, error_message, created_at
             FROM check_results WHERE endpoint_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![endpoint_id, limit as i64],
            Self::row_to_check_result,
        )?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Percentage of successful checks since `since`, or `None` when no
    /// checks exist in the window.
    pub fn uptime_pct(&self, endpoint_id: &str, since: DateTime<Utc>) -> Result<Option<f64>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM check_results
             WHERE endpoint_id = ?1 AND created_at >= ?2",
        )?;
        let (total, ok): (i64, i64) = stmt.query_row(
            rusqlite::params![endpoint_id, ms(since)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if total == 0 {
            return Ok(None);
        }
        Ok(Some(ok as f64 * 100.0 / total as f64))
    }

    pub fn avg_latency(&self, endpoint_id: &str, since: DateTime<Utc>) -> Result<Option<f64>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT AVG(latency_ms) FROM check_results
             WHERE endpoint_id = ?1 AND created_at >= ?2",
        )?;
        let avg: Option<f64> = stmt.query_row(
            rusqlite::params![endpoint_id, ms(since)],
            |row| row.get(0),
        )?;
        Ok(avg)
    }

    /// Failed-check counts grouped by result kind since `since`.
    pub fn failure_breakdown(
        &self,
        endpoint_id: &str,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, u64>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT kind, COUNT(*) FROM check_results
             WHERE endpoint_id = ?1 AND created_at >= ?2 AND success = 0
             GROUP BY kind",
        )?;
        let rows = stmt.query_map(rusqlite::params![endpoint_id, ms(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut breakdown = HashMap::new();
        for row in rows {
            let (kind, count) = row?;
            breakdown.insert(kind, count as u64);
        }
        Ok(breakdown)
    }

    pub fn last_failure_at(&self, endpoint_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT MAX(created_at) FROM check_results
             WHERE endpoint_id = ?1 AND success = 0",
        )?;
        let last: Option<i64> =
            stmt.query_row(rusqlite::params![endpoint_id], |row| row.get(0))?;
        Ok(last.map(from_ms))
    }

    pub fn endpoint_stats(
        &self,
        endpoint_id: &str,
        since: DateTime<Utc>,
    ) -> Result<EndpointStats> {
        let uptime_pct = self.uptime_pct(endpoint_id, since)?;
        let avg_latency_ms = self.avg_latency(endpoint_id, since)?;
        let failure_breakdown = self.failure_breakdown(endpoint_id, since)?;
        let conn = self.lock_conn();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM check_results WHERE endpoint_id = ?1 AND created_at >= ?2",
            rusqlite::params![endpoint_id, ms(since)],
            |row| row.get(0),
        )?;
        Ok(EndpointStats {
            total_checks: total as u64,
            uptime_pct,
            avg_latency_ms,
            failure_breakdown,
        })
    }

    // ---- incidents ----

    /// The endpoint's non-resolved incident, if one exists. At most one by
    /// construction of [`StateStore::open_incident`].
    pub fn find_open_incident(&self, endpoint_id: &str) -> Result<Option<Incident>> {
        let conn = self.lock_conn();
        let sql = format!(
            "SELECT {} FROM incidents
             WHERE endpoint_id = ?1 AND state != 'RESOLVED'
             ORDER BY started_at DESC LIMIT 1",
            Self::INCIDENT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        match stmt.query_row(rusqlite::params![endpoint_id], Self::row_to_incident) {
            Ok(incident) => Ok(Some(incident)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Find-or-create the open incident for an endpoint, transactionally.
    /// Returns `(incident, created)`; when `created` is false the caller is
    /// looking at a pre-existing non-resolved incident.
    pub fn open_incident(
        &self,
        endpoint_id: &str,
        kind: ResultKind,
        error_message: Option<&str>,
    ) -> Result<(Incident, bool)> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;

        let sql = format!(
            "SELECT {} FROM incidents
             WHERE endpoint_id = ?1 AND state != 'RESOLVED'
             ORDER BY started_at DESC LIMIT 1",
            Self::INCIDENT_COLS
        );
        let existing = {
            let mut stmt = tx.prepare_cached(&sql)?;
            match stmt.query_row(rusqlite::params![endpoint_id], Self::row_to_incident) {
                Ok(incident) => Some(incident),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };
        if let Some(incident) = existing {
            tx.commit()?;
            return Ok((incident, false));
        }

        let now = Utc::now();
        let incident = Incident {
            id: httpmon_common::id::next_id(),
            endpoint_id: endpoint_id.to_string(),
            state: IncidentState::Open,
            failure_kind: kind,
            started_at: now,
            resolved_at: None,
            failed_check_count: 1,
            last_error_message: error_message.map(|s| s.to_string()),
            notes: None,
            created_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO incidents
             (id, endpoint_id, state, failure_kind, started_at, resolved_at,
              failed_check_count, last_error_message, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, NULL, ?8, ?9)",
            rusqlite::params![
                incident.id,
                incident.endpoint_id,
                incident.state.to_string(),
                incident.failure_kind.to_string(),
                ms(incident.started_at),
                incident.failed_check_count as i64,
                incident.last_error_message,
                ms(incident.created_at),
                ms(incident.updated_at),
            ],
        )?;
        tx.commit()?;
        tracing::info!(endpoint_id, kind = %kind, incident_id = %incident.id, "Incident opened");
        Ok((incident, true))
    }

    /// Atomic `failed_check_count += 1`; overwrites the last error message.
    pub fn increment_incident_failures(
        &self,
        incident_id: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE incidents
             SET failed_check_count = failed_check_count + 1,
                 last_error_message = COALESCE(?1, last_error_message),
                 updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![error_message, ms(Utc::now()), incident_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "incident",
                id: incident_id.to_string(),
            });
        }
        Ok(())
    }

    /// Resolves the endpoint's non-resolved incident, if any. Returns
    /// whether a row actually transitioned — the signal for a recovery
    /// alert.
    pub fn resolve_open_incident(&self, endpoint_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE incidents
             SET state = 'RESOLVED', resolved_at = ?1, updated_at = ?1
             WHERE endpoint_id = ?2 AND state != 'RESOLVED'",
            rusqlite::params![ms(now), endpoint_id],
        )?;
        Ok(updated > 0)
    }

    /// OPEN → ACKNOWLEDGED. Resolved incidents are terminal.
    pub fn acknowledge_incident(&self, incident_id: &str) -> Result<bool> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE incidents SET state = 'ACKNOWLEDGED', updated_at = ?1
             WHERE id = ?2 AND state = 'OPEN'",
            rusqlite::params![ms(Utc::now()), incident_id],
        )?;
        Ok(updated > 0)
    }

    pub fn list_incidents(&self, endpoint_id: &str, limit: usize) -> Result<Vec<Incident>> {
        let conn = self.lock_conn();
        let sql = format!(
            "SELECT {} FROM incidents WHERE endpoint_id = ?1
             ORDER BY started_at DESC LIMIT ?2",
            Self::INCIDENT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![endpoint_id, limit as i64],
            Self::row_to_incident,
        )?;
        let mut incidents = Vec::new();
        for row in rows {
            incidents.push(row?);
        }
        Ok(incidents)
    }

    // ---- alerts ----

    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO alerts
             (id, endpoint_id, incident_id, kind, severity, channel, title, message,
              delivered, delivery_error, acknowledged, acknowledged_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        stmt.execute(rusqlite::params![
            alert.id,
            alert.endpoint_id,
            alert.incident_id,
            alert.kind.to_string(),
            alert.severity.to_string(),
            alert.channel.to_string(),
            alert.title,
            alert.message,
            alert.delivered,
            alert.delivery_error,
            alert.acknowledged,
            opt_ms(alert.acknowledged_at),
            ms(alert.created_at),
        ])?;
        Ok(())
    }

    /// Whether an alert of this kind was created for the endpoint at or
    /// after `since`. Drives the dedup window.
    pub fn exists_recent_alert(
        &self,
        endpoint_id: &str,
        kind: AlertKind,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(*) FROM alerts
             WHERE endpoint_id = ?1 AND kind = ?2 AND created_at >= ?3",
        )?;
        let count: i64 = stmt.query_row(
            rusqlite::params![endpoint_id, kind.to_string(), ms(since)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn mark_alert_delivery(
        &self,
        alert_id: &str,
        delivered: bool,
        delivery_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE alerts SET delivered = ?1, delivery_error = ?2 WHERE id = ?3",
            rusqlite::params![delivered, delivery_error, alert_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            });
        }
        Ok(())
    }

    /// Monotonic: an acknowledged alert never reverts.
    pub fn acknowledge_alert(&self, alert_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE alerts SET acknowledged = 1, acknowledged_at = ?1
             WHERE id = ?2 AND acknowledged = 0",
            rusqlite::params![ms(now), alert_id],
        )?;
        Ok(updated > 0)
    }

    /// One atomic update over every unacknowledged alert of the endpoint.
    pub fn acknowledge_all(&self, endpoint_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE alerts SET acknowledged = 1, acknowledged_at = ?1
             WHERE endpoint_id = ?2 AND acknowledged = 0",
            rusqlite::params![ms(now), endpoint_id],
        )?;
        Ok(updated as u64)
    }

    pub fn unacknowledged_alerts(&self, endpoint_id: &str) -> Result<Vec<Alert>> {
        let conn = self.lock_conn();
        let sql = format!(
            "SELECT {} FROM alerts
             WHERE endpoint_id = ?1 AND acknowledged = 0
             ORDER BY created_at DESC",
            Self::ALERT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(rusqlite::params![endpoint_id], Self::row_to_alert)?;
        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    pub fn list_alerts(&self, endpoint_id: &str, limit: usize) -> Result<Vec<Alert>> {
        let conn = self.lock_conn();
        let sql = format!(
            "SELECT {} FROM alerts WHERE endpoint_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
            Self::ALERT_COLS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![endpoint_id, limit as i64],
            Self::row_to_alert,
        )?;
        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    pub fn get_alert(&self, alert_id: &str) -> Result<Alert> {
        let conn = self.lock_conn();
        let sql = format!("SELECT {} FROM alerts WHERE id = ?1", Self::ALERT_COLS);
        let mut stmt = conn.prepare_cached(&sql)?;
        match stmt.query_row(rusqlite::params![alert_id], Self::row_to_alert) {
            Ok(alert) => Ok(alert),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    // ---- retention ----

    pub fn delete_check_results_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM check_results WHERE created_at < ?1",
            rusqlite::params![ms(cutoff)],
        )?;
        Ok(deleted as u64)
    }

    pub fn delete_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM alerts WHERE created_at < ?1",
            rusqlite::params![ms(cutoff)],
        )?;
        Ok(deleted as u64)
    }

    /// Per-plan check-result retention. For each project the effective cap
    /// is the stricter of its plan cap and `absolute_cap_hours`.
    pub fn plan_retention_sweep(
        &self,
        now: DateTime<Utc>,
        absolute_cap_hours: i64,
    ) -> Result<u64> {
        let projects = self.list_projects()?;
        let mut total = 0u64;
        for project in projects {
            let cap_hours = project
                .plan
                .check_result_retention_hours()
                .min(absolute_cap_hours);
            let cutoff = now - chrono::Duration::hours(cap_hours);
            let conn = self.lock_conn();
            let deleted = conn.execute(
                "DELETE FROM check_results WHERE created_at < ?1 AND endpoint_id IN
                 (SELECT id FROM endpoints WHERE project_id = ?2)",
                rusqlite::params![ms(cutoff), project.id],
            )?;
            total += deleted as u64;
        }
        Ok(total)
    }

    // ---- projects (read side; writes live in admin) ----

    pub fn get_project(&self, id: &str) -> Result<Project> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare_cached("SELECT id, name, plan, created_at FROM projects WHERE id = ?1")?;
        match stmt.query_row(rusqlite::params![id], Self::row_to_project) {
            Ok(project) => Ok(project),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                entity: "project",
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached("SELECT id, name, plan, created_at FROM projects ORDER BY created_at")?;
        let rows = stmt.query_map([], Self::row_to_project)?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
        let plan: String = row.get(2)?;
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            plan: plan.parse().unwrap_or(Plan::Free),
            created_at: from_ms(row.get(3)?),
        })
    }
}
