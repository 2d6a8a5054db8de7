//! Expenditure Audit Pipeline - Main Entry Point
//!
//! Consumes normalized expenditure records from NATS, scores them in batches,
//! commits audit entries to the ledger and publishes them downstream.

use anyhow::{Context, Result};
use expenditure_audit_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{decode_message, TransactionConsumer},
    metrics::MetricsReporter,
    models::lifecycle::spawn_retrain_loop,
    pipeline::AuditPipeline,
    producer::EntryPublisher,
    types::RawTransaction,
    RiskTier,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("expenditure_audit_pipeline={}", logging.level))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from_path(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => AppConfig::load().context("Failed to load config/config.toml")?,
    };

    init_logging(&config.logging)?;
    info!("Starting Expenditure Audit Pipeline");

    // Invalid thresholds or windows are fatal
    let pipeline = Arc::new(AuditPipeline::new(&config).context("Invalid configuration")?);
    info!(
        min_samples = config.benford.min_samples,
        method = ?config.benford.method,
        grouping = ?config.benford.grouping,
        deviation_high_threshold = config.fusion.deviation_high_threshold,
        contamination = config.model.contamination,
        "Configuration loaded"
    );

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let publisher = EntryPublisher::new(client.clone(), &config.nats.ledger_subject);
    info!(
        listening = %consumer.subject(),
        publishing = %publisher.subject(),
        workers = config.pipeline.workers,
        batch_size = config.pipeline.batch_size,
        "Starting batch processing loop"
    );

    let reporter = MetricsReporter::new(
        pipeline.metrics().clone(),
        config.pipeline.metrics_interval_secs,
    );
    tokio::spawn(reporter.start());

    let retrain_task = spawn_retrain_loop(
        pipeline.models().clone(),
        pipeline.window().clone(),
        &config.retraining,
    );

    let mut subscription = consumer.subscribe().await?;
    let batch_size = config.pipeline.batch_size;
    let batch_timeout = Duration::from_millis(config.pipeline.batch_timeout_ms);
    let mut pending: Vec<RawTransaction> = Vec::with_capacity(batch_size);

    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            next = tokio::time::timeout(batch_timeout, subscription.next()) => next,
        };

        let timed_out = next.is_err();
        let stream_open = match next {
            Ok(Some(message)) => {
                if let Some(raw) = decode_message(&message) {
                    pending.push(raw);
                } else {
                    pipeline.metrics().record_skipped(1);
                }
                true
            }
            Ok(None) => false,
            Err(_) => true,
        };

        if pending.len() >= batch_size || (timed_out && !pending.is_empty()) || !stream_open {
            let batch = std::mem::replace(&mut pending, Vec::with_capacity(batch_size));
            flush(&pipeline, &publisher, batch).await;
        }
        if !stream_open {
            warn!("Transaction subscription closed");
            break;
        }
    }

    if !pending.is_empty() {
        flush(&pipeline, &publisher, pending).await;
    }
    retrain_task.abort();

    info!("Pipeline shutting down...");
    pipeline.metrics().print_summary();
    let tiers = pipeline.ledger().tier_counts();
    info!(
        low = tiers.get(&RiskTier::Low).copied().unwrap_or(0),
        medium = tiers.get(&RiskTier::Medium).copied().unwrap_or(0),
        high = tiers.get(&RiskTier::High).copied().unwrap_or(0),
        critical = tiers.get(&RiskTier::Critical).copied().unwrap_or(0),
        "Ledger tier counts"
    );

    Ok(())
}

/// Score and commit one batch off the async runtime, then publish its entries.
async fn flush(
    pipeline: &Arc<AuditPipeline>,
    publisher: &EntryPublisher,
    batch: Vec<RawTransaction>,
) {
    if batch.is_empty() {
        return;
    }
    let worker = pipeline.clone();
    let result = tokio::task::spawn_blocking(move || worker.process_batch(batch)).await;

    let report = match result {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!(error = %e, code = e.error_code(), "Batch rolled back");
            return;
        }
        Err(e) => {
            error!(error = %e, "Batch task failed");
            return;
        }
    };

    for entry in report.entries.iter().filter(|e| e.risk_tier >= RiskTier::High) {
        info!(
            transaction_id = %entry.transaction_id,
            subject = %entry.subject,
            risk_tier = %entry.risk_tier,
            outlier_score = ?entry.signals.outlier.as_ref().map(|o| o.raw_score),
            deviation = ?entry.signals.deviation.statistic,
            "Flagged transaction"
        );
    }

    let published = publisher.publish_batch(&report.entries).await;
    info!(
        received = report.received,
        committed = report.entries.len(),
        published = published,
        skipped = report.skipped,
        duplicates = report.duplicates,
        model_version = ?report.model_version,
        ledger_len = pipeline.ledger().len(),
        "Batch processed"
    );
}
