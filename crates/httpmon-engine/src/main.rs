use anyhow::Result;
use httpmon_alert::{AlertEngine, AlertEngineConfig};
use httpmon_engine::config::{EngineConfig, EnvConfig};
use httpmon_engine::incident::IncidentEngine;
use httpmon_engine::retention::RetentionSweeper;
use httpmon_engine::scheduler::Scheduler;
use httpmon_notify::sinks::email::EmailSink;
use httpmon_notify::sinks::slack::SlackSink;
use httpmon_notify::sinks::webhook::WebhookSink;
use httpmon_notify::SinkRegistry;
use httpmon_probe::Prober;
use httpmon_secret::SecretStore;
use httpmon_storage::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    httpmon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("httpmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/httpmon.toml");
    let config = EngineConfig::load(config_path)?;
    let env = EnvConfig::from_env(config.alerting.email_enabled)?;

    tracing::info!(
        config = config_path,
        tick_secs = config.monitoring.tick_secs,
        max_concurrent = config.monitoring.max_concurrent_checks,
        "httpmon starting"
    );

    // Fatal on a weak or missing secret: the core never schedules checks it
    // could not authenticate.
    let secrets = Arc::new(SecretStore::new(&env.encryption_secret)?);
    let store = Arc::new(StateStore::open_url(&env.database_url)?);

    // Notifier sinks. Email is the shipped default; Slack and webhook join
    // when configured.
    let sink_client = reqwest::Client::new();
    let mut registry = SinkRegistry::new();
    if config.alerting.email_enabled {
        let mail = env
            .mail
            .as_ref()
            .expect("mail env is present when email is enabled");
        let from = config
            .alerting
            .email_from
            .as_deref()
            .expect("validated at load");
        registry.register(Box::new(EmailSink::new(
            &mail.host,
            mail.port,
            mail.username.as_deref(),
            mail.password.as_deref(),
            from,
            config.alerting.email_recipients.clone(),
        )?));
    }
    if let Some(url) = &config.alerting.slack_webhook_url {
        registry.register(Box::new(SlackSink::new(sink_client.clone(), url)));
    }
    if let Some(url) = &config.alerting.webhook_url {
        registry.register(Box::new(WebhookSink::new(sink_client.clone(), url)));
    }
    let sinks = Arc::new(registry);

    let alerts = AlertEngine::new(
        store.clone(),
        sinks,
        AlertEngineConfig {
            failure_threshold: config.alerting.failure_threshold,
            dedup_window_minutes: config.alerting.dedup_window_minutes,
            max_concurrent_deliveries: config.alerting.max_concurrent_deliveries,
        },
    );
    let incidents = Arc::new(IncidentEngine::new(store.clone(), alerts.clone()));
    let prober = Prober::new(store.clone(), secrets.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        prober,
        incidents,
        config.monitoring.tick_secs,
        config.monitoring.max_concurrent_checks,
        shutdown_rx.clone(),
    ));
    let probe_grace = Duration::from_secs(config.monitoring.probe_grace_secs);
    let scheduler_handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move {
            scheduler.run(probe_grace).await;
        }
    });

    let sweeper = RetentionSweeper::new(
        store.clone(),
        config.retention.check_result_days,
        config.retention.alert_days,
        config.retention.plan_sweep_hours,
    );
    let sweeper_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            sweeper.run(shutdown_rx).await;
        }
    });

    tracing::info!("httpmon started");

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    shutdown_tx.send(true).ok();

    // Scheduler drains probes under its own grace period; then give
    // notifier deliveries theirs.
    let _ = scheduler_handle.await;
    let _ = sweeper_handle.await;
    alerts
        .drain(Duration::from_secs(config.monitoring.notifier_grace_secs))
        .await;

    tracing::info!("httpmon stopped");
    Ok(())
}
