//! Load generator for a running tokengate.
//!
//! Fires one request every `TG_BENCH_SPACING_US` for `TG_BENCH_SECS` and
//! compares the admitted count with `burst + T * rate`.
//!
//! Env:
//! - `TG_BENCH_URL` (default `http://127.0.0.1:8080/bench`)
//! - `TG_BENCH_SECS` (default 5)
//! - `TG_BENCH_SPACING_US` (default 500)
//! - `TG_BENCH_RATE`, `TG_BENCH_BURST`: the limits configured for the target route

use anyhow::Result;
use futures::{
    stream::{FuturesUnordered, StreamExt},
    FutureExt,
};
use reqwest::{Client, StatusCode};
use std::{
    env,
    time::{Duration, Instant},
};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Outcome {
    Admitted,
    Limited,
    Failed,
}

fn classify(status: Option<StatusCode>) -> Outcome {
    match status {
        Some(s) if s.is_success() => Outcome::Admitted,
        Some(StatusCode::TOO_MANY_REQUESTS) => Outcome::Limited,
        _ => Outcome::Failed,
    }
}

#[derive(Debug, Default)]
struct Tally {
    admitted: u64,
    limited: u64,
    failed: u64,
}

impl Tally {
    fn record(&mut self, o: Outcome) {
        match o {
            Outcome::Admitted => self.admitted += 1,
            Outcome::Limited => self.limited += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// Upper bound on admissions for a token bucket over `elapsed`.
fn ideal_admitted(rate: f64, burst: u64, elapsed: Duration) -> f64 {
    burst as f64 + elapsed.as_secs_f64() * rate
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .compact()
        .init();

    let url = env::var("TG_BENCH_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/bench".to_string());
    let secs: u64 = env_or("TG_BENCH_SECS", 5);
    let spacing = Duration::from_micros(env_or("TG_BENCH_SPACING_US", 500u64).max(1));
    let rate: Option<f64> = env::var("TG_BENCH_RATE").ok().and_then(|v| v.parse().ok());
    let burst: u64 = env_or("TG_BENCH_BURST", 0);

    let client = Client::builder()
        .pool_max_idle_per_host(64)
        .timeout(Duration::from_secs(10))
        .build()?;

    info!("benchmarking {} for {}s, one request every {:?}", url, secs, spacing);

    let mut tally = Tally::default();
    let mut inflight = FuturesUnordered::new();
    let mut ticker = tokio::time::interval(spacing);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let end = start + Duration::from_secs(secs);
    while Instant::now() < end {
        ticker.tick().await;
        let req = client.get(&url).send();
        inflight.push(async move { req.await.ok().map(|r| r.status()) });
        // Reap whatever already finished without blocking the ticker.
        while let Some(Some(status)) = inflight.next().now_or_never() {
            tally.record(classify(status));
        }
    }
    while let Some(status) = inflight.next().await {
        tally.record(classify(status));
    }
    let elapsed = start.elapsed();

    info!(
        admitted = tally.admitted,
        limited = tally.limited,
        failed = tally.failed,
        "finished in {:.2}s",
        elapsed.as_secs_f64()
    );
    if let Some(rate) = rate {
        let ideal = ideal_admitted(rate, burst, elapsed);
        let ratio = tally.admitted as f64 / ideal;
        info!("ideal burst + T*rate = {:.1}, admitted/ideal = {:.4}", ideal, ratio);
        if ratio > 1.0 + 1.0 / ideal.max(1.0) {
            warn!("limiter admitted more than the bucket allows");
        }
    }
    if tally.failed > 0 {
        warn!("{} requests failed outright", tally.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify(Some(StatusCode::OK)), Outcome::Admitted);
        assert_eq!(classify(Some(StatusCode::TOO_MANY_REQUESTS)), Outcome::Limited);
        assert_eq!(classify(Some(StatusCode::BAD_GATEWAY)), Outcome::Failed);
        assert_eq!(classify(None), Outcome::Failed);
    }

    #[test]
    fn ideal_counts_burst_plus_rate() {
        assert_eq!(ideal_admitted(100.0, 100, Duration::from_secs(5)), 600.0);
        assert_eq!(ideal_admitted(0.0, 3, Duration::from_secs(60)), 3.0);
    }
}
