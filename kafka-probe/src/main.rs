use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use envconfig::Envconfig;
use futures::future::ready;
use serde_json::json;
use time::OffsetDateTime;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use kafka_probe::config::Config;
use kafka_probe::{metrics, KafkaProbe, Message};

fn start_server(bind: String) -> JoinHandle<()> {
    let recorder_handle = metrics::setup_metrics_recorder();

    let router = Router::new()
        .route("/", get(|| async { "kafka probe" }))
        .route("/_liveness", get(|| async { "ok" }))
        .route("/metrics", get(move || ready(recorder_handle.render())));

    tokio::task::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to bind metrics server on {}: {}", bind, e);
                return;
            }
        };
        if let Err(e) = axum::serve(listener, router).await {
            error!("metrics server exited: {}", e);
        }
    })
}

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

fn synthetic_messages(count: u32) -> Vec<Message> {
    (0..count)
        .map(|seq| {
            let sent_at = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
            Message {
                key: Uuid::now_v7().to_string(),
                value: json!({ "seq": seq, "sent_at": sent_at }).to_string(),
                header_key: "sent_at".to_string(),
                header_value: sent_at.to_string(),
            }
        })
        .collect()
}

async fn run_lag_checks(probe: &KafkaProbe, interval: Duration, checks: u32) {
    let mut ticker = tokio::time::interval(interval);
    let mut completed = 0;

    loop {
        ticker.tick().await;

        match probe.lag_report().await {
            Ok(report) => match serde_json::to_string(&report) {
                Ok(report) => info!("lag report: {}", report),
                Err(e) => error!("failed to serialize lag report: {}", e),
            },
            Err(e) => {
                metrics::record_lag_check_error(e.error_type());
                error!("lag check failed: {}", e);
            }
        }

        completed += 1;
        if checks > 0 && completed >= checks {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().context("failed to load configuration from env")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let server_handle = start_server(config.bind());
    metrics::register_metrics();
    info!("Started metrics server on {}", config.bind());

    let mut probe = KafkaProbe::start(config.kafka.clone())
        .await
        .context("failed to connect to kafka")?;

    if config.produce_count > 0 {
        let messages = synthetic_messages(config.produce_count);
        let report = probe.send(&messages).await?;
        info!(
            "enqueued {} messages to {}, {} failed locally",
            report.enqueued(),
            config.kafka.kafka_topic,
            report.errors()
        );

        let deliveries = probe.flush(config.kafka.message_timeout()).await?;
        let failed = deliveries.iter().filter(|d| d.result.is_err()).count();
        info!(
            "{} messages acknowledged, {} failed delivery",
            deliveries.len() - failed,
            failed
        );
    }

    tokio::select! {
        _ = run_lag_checks(&probe, config.lag_check_interval(), config.lag_checks) => {},
        _ = shutdown() => {},
    };

    info!("produce totals: {:?}", probe.counters());
    let close_errors = probe.close().await;
    server_handle.abort();

    if !close_errors.is_empty() {
        anyhow::bail!("{} errors while closing kafka clients", close_errors.len());
    }

    Ok(())
}
