//! quay-cli - drive an operation queue against a simulated flaky remote service.
//!
//! ```text
//! quay-cli --operations 40 --failure-rate 0.5 --seed 7
//! RUST_LOG=quay_core=debug quay-cli --config quay.toml --hang-rate 0.05
//! ```
//!
//! Every operation is an `asset.update` call. The service fails or hangs at
//! the given rates, so retries, deadline hits and breaker trips show up in the
//! log. The final queue stats are printed as JSON.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use quay_core::config::load_config;
use quay_core::ports::{RemoteCall, invoker};
use quay_core::{BoxError, OperationQueue, QueueConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "quay-cli", about = "Resilient operation queue simulator")]
struct Args {
    /// TOML queue configuration (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of operations to enqueue
    #[arg(short = 'n', long, default_value_t = 20)]
    operations: u32,

    /// Probability that a call fails
    #[arg(long, default_value_t = 0.3)]
    failure_rate: f64,

    /// Probability that a call never answers
    #[arg(long, default_value_t = 0.0)]
    hang_rate: f64,

    /// RNG seed for a reproducible run
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

enum Behaviour {
    Answer,
    Fail,
    Hang,
}

/// Simulated asset service with a configurable error profile.
struct FlakyAssetService {
    rng: Mutex<StdRng>,
    failure_rate: f64,
    hang_rate: f64,
}

impl FlakyAssetService {
    fn new(seed: u64, failure_rate: f64, hang_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failure_rate,
            hang_rate,
        }
    }

    fn roll(&self) -> (Behaviour, Duration) {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let latency = Duration::from_millis(rng.gen_range(10..80));
        let behaviour = if rng.gen_bool(self.hang_rate) {
            Behaviour::Hang
        } else if rng.gen_bool(self.failure_rate) {
            Behaviour::Fail
        } else {
            Behaviour::Answer
        };
        (behaviour, latency)
    }
}

#[async_trait]
impl RemoteCall for FlakyAssetService {
    async fn call(&self, command: &str, args: Value) -> Result<Value, BoxError> {
        let (behaviour, latency) = self.roll();
        tracing::trace!(command, %args, "remote call");

        match behaviour {
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Fail => {
                tokio::time::sleep(latency).await;
                Err(format!("{command}: 503 service unavailable").into())
            }
            Behaviour::Answer => {
                tokio::time::sleep(latency).await;
                Ok(json!({ "command": command, "args": args, "status": "ok" }))
            }
        }
    }
}

fn check_rate(name: &str, rate: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(format!("{name} must be within 0.0..=1.0, got {rate}"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quay_cli=info,quay_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    check_rate("--failure-rate", args.failure_rate)?;
    check_rate("--hang-rate", args.hang_rate)?;

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => QueueConfig::default(),
    };
    tracing::info!(?config, operations = args.operations, seed = args.seed, "starting simulation");

    let remote: Arc<dyn RemoteCall> = Arc::new(FlakyAssetService::new(
        args.seed,
        args.failure_rate,
        args.hang_rate,
    ));
    let queue = OperationQueue::spawn(config)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for asset_id in 0..args.operations {
        let (ok_tx, err_tx) = (tx.clone(), tx.clone());
        queue.enqueue(
            invoker(
                Arc::clone(&remote),
                "asset.update".to_string(),
                json!({ "id": asset_id, "status": "checked_out" }),
            ),
            move |_| {
                let _ = ok_tx.send((asset_id, None));
            },
            move |err| {
                let _ = err_tx.send((asset_id, Some(err.to_string())));
            },
        )?;
    }
    drop(tx);

    let mut degraded = queue.degraded();
    loop {
        tokio::select! {
            settled = rx.recv() => match settled {
                Some((asset_id, None)) => tracing::info!(asset_id, "asset updated"),
                Some((asset_id, Some(error))) => tracing::warn!(asset_id, %error, "asset update abandoned"),
                None => break,
            },
            Some(now_degraded) = degraded.changed() => {
                if now_degraded {
                    tracing::warn!("service degraded, changes are queued");
                } else {
                    tracing::info!("service recovered");
                }
            }
        }
    }

    let stats = queue.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    queue.shutdown_and_join().await;
    Ok(())
}
