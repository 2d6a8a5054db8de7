//! Test Expenditure Producer
//!
//! Generates and publishes synthetic expenditure records to NATS for pipeline
//! testing. Routine awards follow Benford's law; injected anomalies are either
//! outsized awards or runs of fabricated amounts that crowd a single leading digit.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Record in the shape the pipeline's ingestion boundary accepts
#[derive(Debug, Clone, Serialize)]
struct ExpenditureRecord {
    transaction_id: String,
    amount: f64,
    timestamp: DateTime<Utc>,
    recipient_id: String,
    category: String,
    subject: String,
}

const AGENCIES: [&str; 5] = [
    "Department of Defense",
    "Department of Energy",
    "Department of Health and Human Services",
    "Department of Transportation",
    "General Services Administration",
];

/// Expenditure generator for testing
struct ExpenditureGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
}

impl ExpenditureGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    fn record(&mut self, amount: f64, recipient_id: String, agency: &str) -> ExpenditureRecord {
        self.counter += 1;
        ExpenditureRecord {
            transaction_id: format!("award_{:010}", self.counter),
            amount: (amount * 100.0).round() / 100.0,
            timestamp: Utc::now(),
            recipient_id,
            category: agency.to_string(),
            subject: agency.to_string(),
        }
    }

    /// Log-uniform amounts between $100 and $10M, which follow Benford's law
    fn generate_routine(&mut self) -> ExpenditureRecord {
        let exponent = self.rng.gen_range(2.0..7.0);
        let amount = 10f64.powf(exponent);
        let recipient = format!("vendor_{}", self.rng.gen_range(1..400));
        let agency = self.random_choice(&AGENCIES);
        self.record(amount, recipient, agency)
    }

    /// Either a single outsized award or an amount just under a round
    /// approval limit, which piles up leading nines
    fn generate_anomalous(&mut self) -> ExpenditureRecord {
        let agency = self.random_choice(&AGENCIES);
        if self.rng.gen_bool(0.2) {
            let amount = self.rng.gen_range(50_000_000.0..500_000_000.0);
            let recipient = format!("vendor_{}", self.rng.gen_range(900..910));
            self.record(amount, recipient, agency)
        } else {
            let limit = 10f64.powi(self.rng.gen_range(4..7));
            let amount = limit - self.rng.gen_range(1.0..(limit * 0.05));
            self.record(amount, "vendor_shell_01".to_string(), agency)
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Expenditure Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args
        .get(2)
        .map(|s| s.as_str())
        .unwrap_or("expenditures.normalized");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1000);
    let anomaly_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.05);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(10);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        anomaly_rate = anomaly_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, anomaly_rate, delay_ms).await;
        }
    };

    let mut generator = ExpenditureGenerator::new();
    let mut rng = rand::thread_rng();

    info!("Starting to publish {} records...", count);

    let mut routine_count = 0;
    let mut anomalous_count = 0;
    let mut capital = 0.0;

    for i in 0..count {
        let record = if rng.gen_bool(anomaly_rate) {
            anomalous_count += 1;
            generator.generate_anomalous()
        } else {
            routine_count += 1;
            generator.generate_routine()
        };
        capital += record.amount;

        let payload = serde_json::to_vec(&record)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 100 == 0 {
            info!(
                "Published {}/{} records ({} routine, {} anomalous)",
                i + 1,
                count,
                routine_count,
                anomalous_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    client.flush().await?;

    info!(
        capital = format!("${:.2}", capital),
        "Completed! Published {} records ({} routine, {} anomalous)",
        count,
        routine_count,
        anomalous_count
    );

    Ok(())
}

async fn run_dry_mode(count: u64, anomaly_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = ExpenditureGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let record = if rng.gen_bool(anomaly_rate) {
            generator.generate_anomalous()
        } else {
            generator.generate_routine()
        };

        let json = serde_json::to_string_pretty(&record)?;

        if (i + 1) % 100 == 0 || i == 0 {
            info!("Sample record {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
