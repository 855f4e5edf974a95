use serde::Deserialize;

/// Construction-time failures. All of these abort startup; the core never
/// begins scheduling on a bad configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config: required environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("Config: {0}")]
    Invalid(String),

    #[error("Config: failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Config: failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
    /// Grace period for in-flight probes on shutdown.
    #[serde(default = "default_probe_grace_secs")]
    pub probe_grace_secs: u64,
    /// Grace period for in-flight notifier deliveries on shutdown.
    #[serde(default = "default_notifier_grace_secs")]
    pub notifier_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_dedup_window_minutes")]
    pub dedup_window_minutes: i64,
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
    #[serde(default = "default_email_enabled")]
    pub email_enabled: bool,
    pub email_from: Option<String>,
    #[serde(default)]
    pub email_recipients: Vec<String>,
    pub slack_webhook_url: Option<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_check_result_days")]
    pub check_result_days: i64,
    #[serde(default = "default_alert_days")]
    pub alert_days: i64,
    #[serde(default = "default_plan_sweep_hours")]
    pub plan_sweep_hours: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_concurrent_checks: default_max_concurrent_checks(),
            probe_grace_secs: default_probe_grace_secs(),
            notifier_grace_secs: default_notifier_grace_secs(),
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            dedup_window_minutes: default_dedup_window_minutes(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            email_enabled: default_email_enabled(),
            email_from: None,
            email_recipients: Vec::new(),
            slack_webhook_url: None,
            webhook_url: None,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            check_result_days: default_check_result_days(),
            alert_days: default_alert_days(),
            plan_sweep_hours: default_plan_sweep_hours(),
        }
    }
}

fn default_tick_secs() -> u64 {
    10
}

fn default_max_concurrent_checks() -> usize {
    100
}

fn default_probe_grace_secs() -> u64 {
    60
}

fn default_notifier_grace_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_dedup_window_minutes() -> i64 {
    15
}

fn default_max_concurrent_deliveries() -> usize {
    8
}

fn default_email_enabled() -> bool {
    true
}

fn default_check_result_days() -> i64 {
    30
}

fn default_alert_days() -> i64 {
    90
}

fn default_plan_sweep_hours() -> u64 {
    6
}

impl EngineConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitoring.tick_secs == 0 {
            return Err(ConfigError::Invalid("tick_secs must be positive".into()));
        }
        if self.monitoring.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_checks must be positive".into(),
            ));
        }
        if self.retention.check_result_days <= 0 || self.retention.alert_days <= 0 {
            return Err(ConfigError::Invalid(
                "retention horizons must be positive".into(),
            ));
        }
        if self.retention.plan_sweep_hours == 0 {
            return Err(ConfigError::Invalid(
                "plan_sweep_hours must be positive".into(),
            ));
        }
        if self.alerting.email_enabled {
            if self.alerting.email_from.is_none() {
                return Err(ConfigError::Invalid(
                    "email_from is required when email is enabled".into(),
                ));
            }
            if self.alerting.email_recipients.is_empty() {
                return Err(ConfigError::Invalid(
                    "email_recipients is required when email is enabled".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Values the core only accepts from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub encryption_secret: String,
    pub database_url: String,
    pub mail: Option<MailEnv>,
}

#[derive(Debug, Clone)]
pub struct MailEnv {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EnvConfig {
    /// Reads the environment. `ENCRYPTION_SECRET` and `DATABASE_URL` are
    /// always required; `MAIL_*` only when the email sink is enabled.
    pub fn from_env(email_enabled: bool) -> Result<Self, ConfigError> {
        let encryption_secret = std::env::var("ENCRYPTION_SECRET")
            .map_err(|_| ConfigError::MissingEnv("ENCRYPTION_SECRET"))?;
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let mail = if email_enabled {
            let host = std::env::var("MAIL_HOST").map_err(|_| ConfigError::MissingEnv("MAIL_HOST"))?;
            let port = std::env::var("MAIL_PORT")
                .map_err(|_| ConfigError::MissingEnv("MAIL_PORT"))?
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid("MAIL_PORT is not a valid port".into()))?;
            Some(MailEnv {
                host,
                port,
                username: std::env::var("MAIL_USERNAME").ok(),
                password: std::env::var("MAIL_PASSWORD").ok(),
            })
        } else {
            None
        };

        Ok(Self {
            encryption_secret,
            database_url,
            mail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.monitoring.tick_secs, 10);
        assert_eq!(config.monitoring.max_concurrent_checks, 100);
        assert_eq!(config.alerting.failure_threshold, 3);
        assert_eq!(config.alerting.dedup_window_minutes, 15);
        assert_eq!(config.retention.check_result_days, 30);
        assert_eq!(config.retention.alert_days, 90);
    }

    #[test]
    fn parses_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
            [monitoring]
            tick_secs = 5
            max_concurrent_checks = 200

            [alerting]
            failure_threshold = 1
            email_enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.monitoring.tick_secs, 5);
        assert_eq!(config.monitoring.max_concurrent_checks, 200);
        assert_eq!(config.alerting.failure_threshold, 1);
        assert!(!config.alerting.email_enabled);
        // untouched sections fall back to defaults
        assert_eq!(config.retention.alert_days, 90);
        config.validate().unwrap();
    }

    #[test]
    fn email_enabled_requires_sender_and_recipients() {
        let config: EngineConfig = toml::from_str(
            r#"
            [alerting]
            email_enabled = true
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_tick_is_rejected() {
        let config: EngineConfig = toml::from_str(
            r#"
            [monitoring]
            tick_secs = 0
            [alerting]
            email_enabled = false
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
