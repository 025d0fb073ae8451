//! `geoguard-monitor` -- runs one monitor against observations on stdin.
//!
//! Reads newline-delimited JSON observations from stdin, evaluates them with
//! the configured strategy and fans admitted alerts out to the local log,
//! the alert history and (optionally) a remote HTTP endpoint. Stops on
//! Ctrl-C or end of input.
//!
//! # Environment variables
//!
//! | Variable                 | Required | Default      | Description                             |
//! |--------------------------|----------|--------------|-----------------------------------------|
//! | `GEOGUARD_CONFIG`        | yes      | --           | Path to the JSON monitor configuration  |
//! | `GEOGUARD_HISTORY_PATH`  | no       | in-memory    | JSON-lines alert history file           |
//! | `GEOGUARD_BASELINE`      | no       | --           | Baseline for anomaly monitors           |
//! | `GEOGUARD_REPORT_URL`    | no       | --           | Remote alert endpoint; unset disables   |
//! | `GEOGUARD_POSITION_URL`  | no       | report URL   | Remote position trail endpoint          |
//! | `GEOGUARD_REPORT_METHOD` | no       | `post`       | `get` (query string) or `post` (JSON)   |
//! | `GEOGUARD_DEVICE_ID`     | no       | `unknown-device` | Identifier sent with every report   |
//! | `RUST_LOG`               | no       | `geoguard_monitor=info` | Log filter                   |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use geoguard_core::MonitorConfig;
use geoguard_events::{AlertHistory, EventBus, FanoutSink, HttpReporter, LogNotifier, ReportConfig};
use geoguard_monitor::{JsonLinesSource, Monitor, MonitorNotice, StaticPermissions};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Longest wait for queued alerts to reach the sink after the monitor stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "geoguard_monitor=info,geoguard_events=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("GEOGUARD_CONFIG")
        .context("GEOGUARD_CONFIG environment variable is required")?;
    let raw = tokio::fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("failed to read monitor config {config_path}"))?;
    let config = MonitorConfig::from_json(&raw)
        .with_context(|| format!("invalid monitor config {config_path}"))?;

    let history = match std::env::var("GEOGUARD_HISTORY_PATH") {
        Ok(path) => AlertHistory::open(&path)
            .await
            .with_context(|| format!("failed to open alert history {path}"))?,
        Err(_) => AlertHistory::in_memory(),
    };

    let mut sink = FanoutSink::new(Arc::new(history), Arc::new(EventBus::default()))
        .with_channel(Arc::new(LogNotifier));
    if let Some(report) = ReportConfig::from_env() {
        tracing::info!(url = %report.alert_url, method = ?report.method, "Remote reporting enabled");
        let reporter = Arc::new(HttpReporter::new(report).context("failed to build HTTP client")?);
        sink = sink.with_channel(reporter.clone());
        if config.position_report_interval().is_some() {
            sink = sink.with_position_trail(reporter);
        }
    }

    let source = Arc::new(JsonLinesSource::new(tokio::io::stdin()));

    tracing::info!(
        monitor = %config.name,
        kind = ?config.kind,
        cooldown_ms = config.cooldown_ms,
        "Starting geoguard-monitor",
    );

    let monitor = Monitor::new(
        config,
        source,
        Arc::new(StaticPermissions::granted()),
        Arc::new(sink),
    )?;

    if let Ok(raw) = std::env::var("GEOGUARD_BASELINE") {
        let baseline: f64 = raw
            .parse()
            .with_context(|| format!("GEOGUARD_BASELINE must be a number, got {raw}"))?;
        monitor.calibrate(baseline)?;
    }

    let mut notices = monitor.subscribe_notices();
    monitor.start().await?;

    // Everything on stdin has been evaluated once the loop sees the stream close.
    let end_of_input = async move {
        loop {
            match notices.recv().await {
                Ok(MonitorNotice::StreamClosed) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            tracing::info!("Interrupt received, shutting down");
        }
        _ = end_of_input => {
            tracing::info!("Input exhausted, shutting down");
        }
    }

    monitor.stop().await;
    if !monitor.flush(SHUTDOWN_GRACE).await {
        tracing::warn!("Exiting with alerts still being delivered");
    }

    let stats = monitor.stats();
    tracing::info!(
        observations = stats.observations,
        rejected = stats.rejected,
        admitted = stats.admitted,
        suppressed = stats.suppressed,
        resubscriptions = stats.resubscriptions,
        "Monitor finished",
    );

    Ok(())
}
