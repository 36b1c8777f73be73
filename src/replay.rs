//! CSV ingestion and replay.
//!
//! Reads the generated order-file format
//! (`order_id,side,price,quantity,type,disp,display_size,owner,stop_price,session_id,ip_address`),
//! feeds each row to the engine, and collects per-order latencies into a
//! [`ReplayReport`]. Malformed rows are skipped. Every 1000 orders the book
//! mid price is marked to market, matching the benchmark driver's cadence.

use crate::engine::Engine;
use crate::types::{OrderRequest, OrderType, Side};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};

/// Latency distribution over one replay, in nanoseconds per order.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct LatencySummary {
    pub mean_ns: f64,
    pub p50_ns: i64,
    pub p95_ns: i64,
    pub p99_ns: i64,
    pub min_ns: i64,
    pub max_ns: i64,
}

impl LatencySummary {
    fn from_sorted(latencies: &[i64]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }
        let idx =
            |q: f64| latencies[((latencies.len() as f64 * q) as usize).min(latencies.len() - 1)];
        Self {
            mean_ns: latencies.iter().sum::<i64>() as f64 / latencies.len() as f64,
            p50_ns: idx(0.50),
            p95_ns: idx(0.95),
            p99_ns: idx(0.99),
            min_ns: latencies[0],
            max_ns: latencies[latencies.len() - 1],
        }
    }
}

/// Outcome of one CSV replay.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct ReplayReport {
    pub orders: usize,
    pub trades: usize,
    pub skipped_rows: usize,
    pub risk_rejected: u64,
    pub elapsed: Duration,
    pub latency: LatencySummary,
}

impl ReplayReport {
    pub fn throughput_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.orders as f64 / secs
        } else {
            0.0
        }
    }
}

/// Parses one CSV row into an [`OrderRequest`]. Returns `None` for any
/// malformed row (wrong field count, bad numbers, unknown tags).
pub fn parse_order_line(line: &str) -> Option<OrderRequest> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 11 {
        return None;
    }
    let id = fields[0].parse().ok()?;
    let side = match fields[1] {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return None,
    };
    let price = fields[2].parse().ok()?;
    let quantity = fields[3].parse().ok()?;
    let order_type = OrderType::from_tag(fields[4])?;
    let display = fields[5].parse().ok()?;
    let display_size = fields[6].parse().ok()?;
    let owner_id = fields[7].parse().ok()?;
    let stop_price = fields[8].parse().ok()?;
    let session_id = fields[9].parse().ok()?;
    // fields[10] is the client IP; the matching core has no use for it.
    Some(OrderRequest {
        id,
        side,
        price,
        quantity,
        display,
        display_size,
        order_type,
        owner_id,
        stop_price,
        session_id,
        is_market_maker: false,
    })
}

/// Replays a CSV order stream into the engine. The first line is assumed to
/// be the header.
pub fn replay<R: BufRead>(engine: &mut Engine, reader: R) -> io::Result<ReplayReport> {
    let rejected_before = engine.stats().total_risk_rejected;
    let mut orders = 0usize;
    let mut trades = 0usize;
    let mut skipped_rows = 0usize;
    let mut latencies: Vec<i64> = Vec::new();

    let started = Instant::now();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line_no == 0 || line.is_empty() {
            continue;
        }
        let Some(request) = parse_order_line(&line) else {
            skipped_rows += 1;
            continue;
        };

        let order_start = Instant::now();
        let executed = engine.add_order(request);
        latencies.push(order_start.elapsed().as_nanos() as i64);

        orders += 1;
        trades += executed.len();

        if orders % 1_000 == 0 {
            let mid = if engine.best_bid() > 0 && engine.best_ask() > 0 {
                (engine.best_bid() + engine.best_ask()) / 2
            } else {
                100_000
            };
            engine.risk_manager_mut().mark_to_market(mid);
        }
    }
    let elapsed = started.elapsed();

    latencies.sort_unstable();
    Ok(ReplayReport {
        orders,
        trades,
        skipped_rows,
        risk_rejected: engine.stats().total_risk_rejected - rejected_before,
        elapsed,
        latency: LatencySummary::from_sorted(&latencies),
    })
}

/// Replays a CSV file from disk.
pub fn replay_file(engine: &mut Engine, path: impl AsRef<Path>) -> io::Result<ReplayReport> {
    let file = File::open(path)?;
    replay(engine, BufReader::new(file))
}
