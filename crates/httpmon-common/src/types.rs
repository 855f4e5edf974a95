use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP methods supported for endpoint checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err(format!("unknown http method: {s}")),
        }
    }
}

/// Derived health of an endpoint based on its most recent checks.
///
/// `Degraded` is set when the endpoint answers correctly but slower than its
/// configured latency ceiling; every other failure drives `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    Up,
    Down,
    Degraded,
    Unknown,
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndpointStatus::Up => "UP",
            EndpointStatus::Down => "DOWN",
            EndpointStatus::Degraded => "DEGRADED",
            EndpointStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EndpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UP" => Ok(EndpointStatus::Up),
            "DOWN" => Ok(EndpointStatus::Down),
            "DEGRADED" => Ok(EndpointStatus::Degraded),
            "UNKNOWN" => Ok(EndpointStatus::Unknown),
            _ => Err(format!("unknown endpoint status: {s}")),
        }
    }
}

/// Closed taxonomy of probe outcomes.
///
/// Classification order matters: transport errors first, then 401, then 5xx,
/// then status mismatch, then latency. See `httpmon-probe::classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
    Success,
    StatusMismatch,
    Timeout,
    ConnectionError,
    SslError,
    AuthFailure,
    LatencyBreach,
    ServerError,
    UnknownError,
}

impl ResultKind {
    pub fn is_success(self) -> bool {
        self == ResultKind::Success
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultKind::Success => "SUCCESS",
            ResultKind::StatusMismatch => "STATUS_MISMATCH",
            ResultKind::Timeout => "TIMEOUT",
            ResultKind::ConnectionError => "CONNECTION_ERROR",
            ResultKind::SslError => "SSL_ERROR",
            ResultKind::AuthFailure => "AUTH_FAILURE",
            ResultKind::LatencyBreach => "LATENCY_BREACH",
            ResultKind::ServerError => "SERVER_ERROR",
            ResultKind::UnknownError => "UNKNOWN_ERROR",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ResultKind::Success),
            "STATUS_MISMATCH" => Ok(ResultKind::StatusMismatch),
            "TIMEOUT" => Ok(ResultKind::Timeout),
            "CONNECTION_ERROR" => Ok(ResultKind::ConnectionError),
            "SSL_ERROR" => Ok(ResultKind::SslError),
            "AUTH_FAILURE" => Ok(ResultKind::AuthFailure),
            "LATENCY_BREACH" => Ok(ResultKind::LatencyBreach),
            "SERVER_ERROR" => Ok(ResultKind::ServerError),
            "UNKNOWN_ERROR" => Ok(ResultKind::UnknownError),
            _ => Err(format!("unknown result kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Delivery channels for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertChannel {
    Email,
    Slack,
    Webhook,
}

impl std::fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertChannel::Email => "EMAIL",
            AlertChannel::Slack => "SLACK",
            AlertChannel::Webhook => "WEBHOOK",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Ok(AlertChannel::Email),
            "SLACK" => Ok(AlertChannel::Slack),
            "WEBHOOK" => Ok(AlertChannel::Webhook),
            _ => Err(format!("unknown alert channel: {s}")),
        }
    }
}

/// What an alert is about. Failure alerts carry the result kind that caused
/// them; recovery alerts use the dedicated variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    StatusMismatch,
    Timeout,
    ConnectionError,
    SslError,
    AuthFailure,
    LatencyBreach,
    ServerError,
    UnknownError,
    EndpointRecovered,
}

impl AlertKind {
    /// Maps a failed check's result kind to the corresponding alert kind.
    /// Returns `None` for `Success` — a successful check never produces a
    /// failure alert.
    pub fn from_result_kind(kind: ResultKind) -> Option<AlertKind> {
        match kind {
            ResultKind::Success => None,
            ResultKind::StatusMismatch => Some(AlertKind::StatusMismatch),
            ResultKind::Timeout => Some(AlertKind::Timeout),
            ResultKind::ConnectionError => Some(AlertKind::ConnectionError),
            ResultKind::SslError => Some(AlertKind::SslError),
            ResultKind::AuthFailure => Some(AlertKind::AuthFailure),
            ResultKind::LatencyBreach => Some(AlertKind::LatencyBreach),
            ResultKind::ServerError => Some(AlertKind::ServerError),
            ResultKind::UnknownError => Some(AlertKind::UnknownError),
        }
    }

    /// Severity is fixed per kind: recovery is informational, slowness is a
    /// warning, credential and certificate problems are critical, everything
    /// else is an error.
    pub fn severity(self) -> Severity {
        match self {
            AlertKind::EndpointRecovered => Severity::Info,
            AlertKind::LatencyBreach => Severity::Warning,
            AlertKind::AuthFailure | AlertKind::SslError => Severity::Critical,
            _ => Severity::Error,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            AlertKind::EndpointRecovered => "✅",
            AlertKind::AuthFailure => "🔐",
            AlertKind::Timeout => "⏱️",
            AlertKind::SslError => "🔒",
            AlertKind::LatencyBreach => "🐢",
            AlertKind::ConnectionError => "🔌",
            _ => "🔴",
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            AlertKind::EndpointRecovered => "Recovered",
            AlertKind::AuthFailure => "Auth Failed",
            AlertKind::Timeout => "Timeout",
            AlertKind::SslError => "SSL Error",
            AlertKind::LatencyBreach => "Slow Response",
            AlertKind::ConnectionError => "Connection Failed",
            _ => "API Down",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertKind::StatusMismatch => "STATUS_MISMATCH",
            AlertKind::Timeout => "TIMEOUT",
            AlertKind::ConnectionError => "CONNECTION_ERROR",
            AlertKind::SslError => "SSL_ERROR",
            AlertKind::AuthFailure => "AUTH_FAILURE",
            AlertKind::LatencyBreach => "LATENCY_BREACH",
            AlertKind::ServerError => "SERVER_ERROR",
            AlertKind::UnknownError => "UNKNOWN_ERROR",
            AlertKind::EndpointRecovered => "ENDPOINT_RECOVERED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STATUS_MISMATCH" => Ok(AlertKind::StatusMismatch),
            "TIMEOUT" => Ok(AlertKind::Timeout),
            "CONNECTION_ERROR" => Ok(AlertKind::ConnectionError),
            "SSL_ERROR" => Ok(AlertKind::SslError),
            "AUTH_FAILURE" => Ok(AlertKind::AuthFailure),
            "LATENCY_BREACH" => Ok(AlertKind::LatencyBreach),
            "SERVER_ERROR" => Ok(AlertKind::ServerError),
            "UNKNOWN_ERROR" => Ok(AlertKind::UnknownError),
            "ENDPOINT_RECOVERED" => Ok(AlertKind::EndpointRecovered),
            _ => Err(format!("unknown alert kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialKind {
    BearerToken,
    ApiKey,
    BasicAuth,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CredentialKind::BearerToken => "BEARER_TOKEN",
            CredentialKind::ApiKey => "API_KEY",
            CredentialKind::BasicAuth => "BASIC_AUTH",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BEARER_TOKEN" => Ok(CredentialKind::BearerToken),
            "API_KEY" => Ok(CredentialKind::ApiKey),
            "BASIC_AUTH" => Ok(CredentialKind::BasicAuth),
            _ => Err(format!("unknown credential kind: {s}")),
        }
    }
}

/// Subscription plan of the owning project. Governs check-result retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    Free,
    Starter,
    Pro,
}

impl Plan {
    /// Check-result retention cap in hours: FREE 24h, STARTER 7d, PRO 30d.
    pub fn check_result_retention_hours(self) -> i64 {
        match self {
            Plan::Free => 24,
            Plan::Starter => 7 * 24,
            Plan::Pro => 30 * 24,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Plan::Free => "FREE",
            Plan::Starter => "STARTER",
            Plan::Pro => "PRO",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FREE" => Ok(Plan::Free),
            "STARTER" => Ok(Plan::Starter),
            "PRO" => Ok(Plan::Pro),
            _ => Err(format!("unknown plan: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentState {
    Open,
    Acknowledged,
    Resolved,
}

impl IncidentState {
    pub fn is_resolved(self) -> bool {
        self == IncidentState::Resolved
    }
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IncidentState::Open => "OPEN",
            IncidentState::Acknowledged => "ACKNOWLEDGED",
            IncidentState::Resolved => "RESOLVED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IncidentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(IncidentState::Open),
            "ACKNOWLEDGED" => Ok(IncidentState::Acknowledged),
            "RESOLVED" => Ok(IncidentState::Resolved),
            _ => Err(format!("unknown incident state: {s}")),
        }
    }
}

/// A minimal owning record. The core carries no users; the plan rides on the
/// project so the retention sweeper can find it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
}

/// A configured HTTP endpoint under monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    /// Custom request headers as an opaque JSON object string. Parse errors
    /// are tolerated at probe time; the check proceeds without them.
    pub headers_json: Option<String>,
    pub request_body: Option<String>,
    pub expected_status: u16,
    pub interval_secs: u32,
    pub timeout_ms: u32,
    pub max_latency_ms: Option<u32>,
    pub credential_id: Option<String>,
    pub enabled: bool,
    pub status: EndpointStatus,
    pub last_check_at: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one probe. Response bodies are never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub endpoint_id: String,
    /// 0 means the request never produced an HTTP response.
    pub status_code: u16,
    pub latency_ms: u64,
    pub success: bool,
    pub kind: ResultKind,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Longest an error message is allowed to grow before being stored.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

impl CheckResult {
    pub fn success(endpoint_id: &str, status_code: u16, latency_ms: u64) -> Self {
        Self {
            id: crate::id::next_id(),
            endpoint_id: endpoint_id.to_string(),
            status_code,
            latency_ms,
            success: true,
            kind: ResultKind::Success,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        endpoint_id: &str,
        kind: ResultKind,
        status_code: u16,
        latency_ms: u64,
        error_message: String,
    ) -> Self {
        Self {
            id: crate::id::next_id(),
            endpoint_id: endpoint_id.to_string(),
            status_code,
            latency_ms,
            success: false,
            kind,
            error_message: Some(truncate_chars(&error_message, MAX_ERROR_MESSAGE_CHARS)),
            created_at: Utc::now(),
        }
    }
}

/// A contiguous run of failures for one endpoint. At most one non-resolved
/// incident exists per endpoint at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub endpoint_id: String,
    pub state: IncidentState,
    pub failure_kind: ResultKind,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub failed_check_count: u32,
    pub last_error_message: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn duration_minutes(&self) -> i64 {
        let end = self.resolved_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_minutes()
    }
}

/// One externally delivered notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub endpoint_id: String,
    /// Absent only for recovery alerts.
    pub incident_id: Option<String>,
    pub kind: AlertKind,
    pub severity: Severity,
    pub channel: AlertChannel,
    pub title: String,
    pub message: String,
    pub delivered: bool,
    pub delivery_error: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An encrypted secret plus its binding metadata. The sealed blobs never
/// leave the process; reads expose masked values only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub kind: CredentialKind,
    pub sealed_value: String,
    pub sealed_username: Option<String>,
    pub header_name: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn alert_kind_severity_mapping() {
        assert_eq!(AlertKind::EndpointRecovered.severity(), Severity::Info);
        assert_eq!(AlertKind::LatencyBreach.severity(), Severity::Warning);
        assert_eq!(AlertKind::AuthFailure.severity(), Severity::Critical);
        assert_eq!(AlertKind::SslError.severity(), Severity::Critical);
        assert_eq!(AlertKind::ServerError.severity(), Severity::Error);
        assert_eq!(AlertKind::Timeout.severity(), Severity::Error);
        assert_eq!(AlertKind::ConnectionError.severity(), Severity::Error);
    }

    #[test]
    fn alert_kind_from_result_kind() {
        assert_eq!(AlertKind::from_result_kind(ResultKind::Success), None);
        assert_eq!(
            AlertKind::from_result_kind(ResultKind::ServerError),
            Some(AlertKind::ServerError)
        );
        assert_eq!(
            AlertKind::from_result_kind(ResultKind::Timeout),
            Some(AlertKind::Timeout)
        );
    }

    #[test]
    fn result_kind_round_trips_through_display() {
        for kind in [
            ResultKind::Success,
            ResultKind::StatusMismatch,
            ResultKind::Timeout,
            ResultKind::ConnectionError,
            ResultKind::SslError,
            ResultKind::AuthFailure,
            ResultKind::LatencyBreach,
            ResultKind::ServerError,
            ResultKind::UnknownError,
        ] {
            let parsed: ResultKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn plan_retention_caps() {
        assert_eq!(Plan::Free.check_result_retention_hours(), 24);
        assert_eq!(Plan::Starter.check_result_retention_hours(), 168);
        assert_eq!(Plan::Pro.check_result_retention_hours(), 720);
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
