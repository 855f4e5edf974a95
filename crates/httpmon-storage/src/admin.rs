//! Configuration-provider API.
//!
//! The admin surface that actually speaks HTTP lives outside the core; this
//! module is the contract it drives. Writes are validated defensively here
//! even though plan limits are enforced upstream: an interval below 30
//! seconds or a timeout outside [1000, 60000] ms never reaches the
//! scheduler.

use crate::error::{Result, StoreError};
use crate::store::StateStore;
use chrono::Utc;
use httpmon_common::types::{
    Credential, CredentialKind, Endpoint, EndpointStatus, HttpMethod, Plan, Project,
};
use httpmon_secret::SecretStore;
use serde::{Deserialize, Serialize};
use tracing;

pub const MIN_INTERVAL_SECS: u32 = 30;
pub const MAX_INTERVAL_SECS: u32 = 3600;
pub const MIN_TIMEOUT_MS: u32 = 1000;
pub const MAX_TIMEOUT_MS: u32 = 60000;

#[derive(Debug, Clone, Deserialize)]
pub struct NewEndpoint {
    pub project_id: String,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers_json: Option<String>,
    pub request_body: Option<String>,
    pub expected_status: u16,
    pub interval_secs: u32,
    pub timeout_ms: u32,
    pub max_latency_ms: Option<u32>,
    pub credential_id: Option<String>,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers_json: Option<Option<String>>,
    pub request_body: Option<Option<String>>,
    pub expected_status: Option<u16>,
    pub interval_secs: Option<u32>,
    pub timeout_ms: Option<u32>,
    pub max_latency_ms: Option<Option<u32>>,
    pub credential_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCredential {
    pub project_id: String,
    pub name: String,
    pub kind: CredentialKind,
    /// Plaintext secret; sealed before it reaches the database.
    pub value: String,
    pub username: Option<String>,
    pub header_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialUpdate {
    pub name: Option<String>,
    pub value: Option<String>,
    pub username: Option<String>,
    pub header_name: Option<String>,
    pub description: Option<String>,
}

/// What credential reads look like outside the process: masked, never sealed.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialView {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub kind: CredentialKind,
    pub masked_value: String,
    pub masked_username: Option<String>,
    pub header_name: Option<String>,
    pub description: Option<String>,
    pub in_use: bool,
}

fn validate_interval(interval_secs: u32) -> Result<()> {
    if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
        return Err(StoreError::Invalid {
            entity: "endpoint",
            reason: format!(
                "interval_secs must be within [{MIN_INTERVAL_SECS}, {MAX_INTERVAL_SECS}], got {interval_secs}"
            ),
        });
    }
    Ok(())
}

fn validate_timeout(timeout_ms: u32) -> Result<()> {
    if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
        return Err(StoreError::Invalid {
            entity: "endpoint",
            reason: format!(
                "timeout_ms must be within [{MIN_TIMEOUT_MS}, {MAX_TIMEOUT_MS}], got {timeout_ms}"
            ),
        });
    }
    Ok(())
}

fn validate_expected_status(status: u16) -> Result<()> {
    if !(100..=599).contains(&status) {
        return Err(StoreError::Invalid {
            entity: "endpoint",
            reason: format!("expected_status must be within [100, 599], got {status}"),
        });
    }
    Ok(())
}

impl StateStore {
    // ---- projects ----

    pub fn create_project(&self, name: &str, plan: Plan) -> Result<Project> {
        let project = Project {
            id: httpmon_common::id::next_id(),
            name: name.to_string(),
            plan,
            created_at: Utc::now(),
        };
        {
            let conn = self.lock_conn();
            conn.execute(
                "INSERT INTO projects (id, name, plan, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    project.id,
                    project.name,
                    project.plan.to_string(),
                    project.created_at.timestamp_millis(),
                ],
            )?;
        }
        tracing::info!(project_id = %project.id, name = %project.name, "Project created");
        Ok(project)
    }

    /// Cascades to credentials, endpoints, and through endpoints to check
    /// results, incidents, and alerts.
    pub fn delete_project(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn();
        let deleted = conn.execute("DELETE FROM projects WHERE id = ?1", rusqlite::params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "project",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ---- endpoints ----

    /// Admits a new endpoint. Starts `UNKNOWN` with an immediate first check.
    pub fn register_endpoint(&self, req: &NewEndpoint) -> Result<Endpoint> {
        validate_interval(req.interval_secs)?;
        validate_timeout(req.timeout_ms)?;
        validate_expected_status(req.expected_status)?;
        self.get_project(&req.project_id)?;
        if let Some(credential_id) = &req.credential_id {
            let credential = self.get_credential(credential_id)?;
            if credential.project_id != req.project_id {
                return Err(StoreError::Invalid {
                    entity: "endpoint",
                    reason: "credential belongs to a different project".to_string(),
                });
            }
        }
        if let Some(headers) = &req.headers_json {
            // Reject obviously broken header maps up front; the prober still
            // tolerates whatever slips through.
            if serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(headers).is_err()
            {
                return Err(StoreError::Invalid {
                    entity: "endpoint",
                    reason: "headers_json is not a JSON object".to_string(),
                });
            }
        }

        let now = Utc::now();
        let endpoint = Endpoint {
            id: httpmon_common::id::next_id(),
            project_id: req.project_id.clone(),
            name: req.name.clone(),
            url: req.url.clone(),
            method: req.method,
            headers_json: req.headers_json.clone(),
            request_body: req.request_body.clone(),
            expected_status: req.expected_status,
            interval_secs: req.interval_secs,
            timeout_ms: req.timeout_ms,
            max_latency_ms: req.max_latency_ms,
            credential_id: req.credential_id.clone(),
            enabled: true,
            status: EndpointStatus::Unknown,
            last_check_at: None,
            next_check_at: Some(now),
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        };
        {
            let conn = self.lock_conn();
            conn.execute(
                "INSERT INTO endpoints
                 (id, project_id, name, url, method, headers_json, request_body,
                  expected_status, interval_secs, timeout_ms, max_latency_ms, credential_id,
                  enabled, status, last_check_at, next_check_at, consecutive_failures,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, NULL, ?14, 0, ?15, ?15)",
                rusqlite::params![
                    endpoint.id,
                    endpoint.project_id,
                    endpoint.name,
                    endpoint.url,
                    endpoint.method.to_string(),
                    endpoint.headers_json,
                    endpoint.request_body,
                    endpoint.expected_status as i64,
                    endpoint.interval_secs as i64,
                    endpoint.timeout_ms as i64,
                    endpoint.max_latency_ms.map(|v| v as i64),
                    endpoint.credential_id,
                    endpoint.status.to_string(),
                    now.timestamp_millis(),
                    now.timestamp_millis(),
                ],
            )?;
        }
        tracing::info!(endpoint_id = %endpoint.id, name = %endpoint.name, url = %endpoint.url, "Endpoint registered");
        Ok(endpoint)
    }

    pub fn update_endpoint(&self, id: &str, update: &EndpointUpdate) -> Result<Endpoint> {
        let mut endpoint = self.get_endpoint(id)?;

        if let Some(name) = &update.name {
            endpoint.name = name.clone();
        }
        if let Some(url) = &update.url {
            endpoint.url = url.clone();
        }
        if let Some(method) = update.method {
            endpoint.method = method;
        }
        if let Some(headers_json) = &update.headers_json {
            endpoint.headers_json = headers_json.clone();
        }
        if let Some(request_body) = &update.request_body {
            endpoint.request_body = request_body.clone();
        }
        if let Some(expected_status) = update.expected_status {
            validate_expected_status(expected_status)?;
            endpoint.expected_status = expected_status;
        }
        if let Some(interval_secs) = update.interval_secs {
            validate_interval(interval_secs)?;
            endpoint.interval_secs = interval_secs;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            validate_timeout(timeout_ms)?;
            endpoint.timeout_ms = timeout_ms;
        }
        if let Some(max_latency_ms) = update.max_latency_ms {
            endpoint.max_latency_ms = max_latency_ms;
        }
        if let Some(credential_id) = &update.credential_id {
            if let Some(cid) = credential_id {
                let credential = self.get_credential(cid)?;
                if credential.project_id != endpoint.project_id {
                    return Err(StoreError::Invalid {
                        entity: "endpoint",
                        reason: "credential belongs to a different project".to_string(),
                    });
                }
            }
            endpoint.credential_id = credential_id.clone();
        }

        let now = Utc::now();
        {
            let conn = self.lock_conn();
            conn.execute(
                "UPDATE endpoints SET name = ?1, url = ?2, method = ?3, headers_json = ?4,
                 request_body = ?5, expected_status = ?6, interval_secs = ?7, timeout_ms = ?8,
                 max_latency_ms = ?9, credential_id = ?10, updated_at = ?11
                 WHERE id = ?12",
                rusqlite::params![
                    endpoint.name,
                    endpoint.url,
                    endpoint.method.to_string(),
                    endpoint.headers_json,
                    endpoint.request_body,
                    endpoint.expected_status as i64,
                    endpoint.interval_secs as i64,
                    endpoint.timeout_ms as i64,
                    endpoint.max_latency_ms.map(|v| v as i64),
                    endpoint.credential_id,
                    now.timestamp_millis(),
                    id,
                ],
            )?;
        }
        self.get_endpoint(id)
    }

    /// Cascades to check results, incidents, and alerts.
    pub fn delete_endpoint(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn();
        let deleted = conn.execute("DELETE FROM endpoints WHERE id = ?1", rusqlite::params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "endpoint",
                id: id.to_string(),
            });
        }
        tracing::info!(endpoint_id = %id, "Endpoint deleted");
        Ok(())
    }

    /// A disabled endpoint is never selected by the scheduler. Re-enabling
    /// schedules an immediate check.
    pub fn toggle_endpoint(&self, id: &str, enabled: bool) -> Result<Endpoint> {
        let now = Utc::now();
        {
            let conn = self.lock_conn();
            let updated = conn.execute(
                "UPDATE endpoints SET enabled = ?1,
                 next_check_at = CASE WHEN ?1 THEN ?2 ELSE next_check_at END,
                 updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![enabled, now.timestamp_millis(), id],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound {
                    entity: "endpoint",
                    id: id.to_string(),
                });
            }
        }
        self.get_endpoint(id)
    }

    // ---- credentials ----

    pub fn register_credential(
        &self,
        secrets: &SecretStore,
        req: &NewCredential,
    ) -> Result<Credential> {
        self.get_project(&req.project_id)?;
        match req.kind {
            CredentialKind::ApiKey => {
                if req.header_name.as_deref().unwrap_or("").is_empty() {
                    return Err(StoreError::Invalid {
                        entity: "credential",
                        reason: "header_name is required for API key credentials".to_string(),
                    });
                }
            }
            CredentialKind::BasicAuth => {
                if req.username.as_deref().unwrap_or("").is_empty() {
                    return Err(StoreError::Invalid {
                        entity: "credential",
                        reason: "username is required for basic auth credentials".to_string(),
                    });
                }
            }
            CredentialKind::BearerToken => {}
        }
        if self.credential_name_exists(&req.project_id, &req.name)? {
            return Err(StoreError::Conflict(format!(
                "credential '{}' already exists in project",
                req.name
            )));
        }

        let sealed_value = secrets.seal(&req.value)?;
        let sealed_username = match (&req.kind, &req.username) {
            (CredentialKind::BasicAuth, Some(username)) => Some(secrets.seal(username)?),
            _ => None,
        };

        let now = Utc::now();
        let credential = Credential {
            id: httpmon_common::id::next_id(),
            project_id: req.project_id.clone(),
            name: req.name.clone(),
            kind: req.kind,
            sealed_value,
            sealed_username,
            header_name: req.header_name.clone(),
            description: req.description.clone(),
            created_at: now,
            updated_at: now,
        };
        {
            let conn = self.lock_conn();
            conn.execute(
                "INSERT INTO credentials
                 (id, project_id, name, kind, sealed_value, sealed_username, header_name,
                  description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    credential.id,
                    credential.project_id,
                    credential.name,
                    credential.kind.to_string(),
                    credential.sealed_value,
                    credential.sealed_username,
                    credential.header_name,
                    credential.description,
                    now.timestamp_millis(),
                ],
            )?;
        }
        tracing::info!(credential_id = %credential.id, name = %credential.name, "Credential registered");
        Ok(credential)
    }

    pub fn update_credential(
        &self,
        secrets: &SecretStore,
        id: &str,
        update: &CredentialUpdate,
    ) -> Result<Credential> {
        let mut credential = self.get_credential(id)?;

        if let Some(name) = &update.name {
            if *name != credential.name
                && self.credential_name_exists(&credential.project_id, name)?
            {
                return Err(StoreError::Conflict(format!(
                    "credential '{name}' already exists in project"
                )));
            }
            credential.name = name.clone();
        }
        if let Some(value) = &update.value {
            if !value.is_empty() {
                credential.sealed_value = secrets.seal(value)?;
            }
        }
        if let Some(username) = &update.username {
            credential.sealed_username = Some(secrets.seal(username)?);
        }
        if let Some(header_name) = &update.header_name {
            credential.header_name = Some(header_name.clone());
        }
        if let Some(description) = &update.description {
            credential.description = Some(description.clone());
        }

        let now = Utc::now();
        {
            let conn = self.lock_conn();
            conn.execute(
                "UPDATE credentials SET name = ?1, sealed_value = ?2, sealed_username = ?3,
                 header_name = ?4, description = ?5, updated_at = ?6
                 WHERE id = ?7",
                rusqlite::params![
                    credential.name,
                    credential.sealed_value,
                    credential.sealed_username,
                    credential.header_name,
                    credential.description,
                    now.timestamp_millis(),
                    id,
                ],
            )?;
        }
        self.get_credential(id)
    }

    /// Refused while any endpoint still references the credential.
    pub fn delete_credential(&self, id: &str) -> Result<()> {
        if self.credential_in_use(id)? {
            return Err(StoreError::Conflict(
                "credential is in use by one or more endpoints".to_string(),
            ));
        }
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM credentials WHERE id = ?1",
            rusqlite::params![id],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "credential",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_credential(&self, id: &str) -> Result<Credential> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, project_id, name, kind, sealed_value, sealed_username, header_name,
             description, created_at, updated_at
             FROM credentials WHERE id = ?1",
        )?;
        match stmt.query_row(rusqlite::params![id], Self::row_to_credential) {
            Ok(credential) => Ok(credential),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                entity: "credential",
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Masked read for external consumption. Sealed blobs never leave the
    /// process; a credential that fails to open shows the bare mask.
    pub fn list_credentials_masked(
        &self,
        secrets: &SecretStore,
        project_id: &str,
    ) -> Result<Vec<CredentialView>> {
        let credentials = {
            let conn = self.lock_conn();
            let mut stmt = conn.prepare_cached(
                "SELECT id, project_id, name, kind, sealed_value, sealed_username, header_name,
                 description, created_at, updated_at
                 FROM credentials WHERE project_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(rusqlite::params![project_id], Self::row_to_credential)?;
            let mut credentials = Vec::new();
            for row in rows {
                credentials.push(row?);
            }
            credentials
        };

        let mut views = Vec::with_capacity(credentials.len());
        for credential in credentials {
            let masked_value = secrets
                .open(&credential.sealed_value)
                .map(|plain| httpmon_secret::mask(&plain))
                .unwrap_or_else(|_| "****".to_string());
            let masked_username = credential
                .sealed_username
                .as_deref()
                .map(|sealed| {
                    secrets
                        .open(sealed)
                        .map(|plain| httpmon_secret::mask(&plain))
                        .unwrap_or_else(|_| "****".to_string())
                });
            let in_use = self.credential_in_use(&credential.id)?;
            views.push(CredentialView {
                id: credential.id,
                project_id: credential.project_id,
                name: credential.name,
                kind: credential.kind,
                masked_value,
                masked_username,
                header_name: credential.header_name,
                description: credential.description,
                in_use,
            });
        }
        Ok(views)
    }

    pub fn credential_in_use(&self, credential_id: &str) -> Result<bool> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM endpoints WHERE credential_id = ?1",
            rusqlite::params![credential_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn credential_name_exists(&self, project_id: &str, name: &str) -> Result<bool> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM credentials WHERE project_id = ?1 AND name = ?2",
            rusqlite::params![project_id, name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<Credential> {
        let kind: String = row.get(3)?;
        Ok(Credential {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            kind: kind.parse().unwrap_or(CredentialKind::BearerToken),
            sealed_value: row.get(4)?,
            sealed_username: row.get(5)?,
            header_name: row.get(6)?,
            description: row.get(7)?,
            created_at: chrono::DateTime::from_timestamp_millis(row.get(8)?).unwrap_or_default(),
            updated_at: chrono::DateTime::from_timestamp_millis(row.get(9)?).unwrap_or_default(),
        })
    }
}
