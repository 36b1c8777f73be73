//! Simulation driver: generate synthetic order files, replay them through the
//! engine with a latency report, or serve the REST API.
//!
//! ```text
//! sim_matching_engine                 # generate 50k demo orders and replay them
//! sim_matching_engine generate <file> <count>
//! sim_matching_engine run <file>
//! sim_matching_engine serve           # REST API on $PORT (default 8080)
//! ```

use sim_matching_engine::api;
use sim_matching_engine::market_data_gen::{GeneratorConfig, MarketDataGenerator};
use sim_matching_engine::replay::{replay_file, ReplayReport};
use sim_matching_engine::risk::RiskLimits;
use sim_matching_engine::Engine;
use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;
use tokio::net::TcpListener;

fn demo_limits() -> RiskLimits {
    RiskLimits {
        max_position: 100_000,
        max_order_qty: 10_000,
        max_order_value: 50_000_000,
        daily_loss_limit: 1_000_000,
        max_price_deviation: 0.10,
        max_orders_per_sec: 1_000,
        max_daily_volume: 1_000_000,
    }
}

/// Installs limits for the generator's 100 trader ids and arms the breaker at
/// the reference price so the first orders are not rejected.
fn setup_demo_risk_limits(engine: &mut Engine) {
    let limits = demo_limits();
    for owner in 1..=100 {
        if let Err(err) = engine.risk_manager_mut().set_trader_limits(owner, limits) {
            eprintln!("limits for trader {owner}: {err}");
        }
    }
    engine
        .risk_manager_mut()
        .circuit_breaker_mut()
        .set_limits(100_000, 0.20);
    engine.risk_manager_mut().mark_to_market(100_000);
}

fn generate_test_data(path: &str, count: usize) -> std::io::Result<()> {
    let mut generator = MarketDataGenerator::new(&GeneratorConfig {
        seed: 42,
        num_orders: count,
    });
    let mut out = BufWriter::new(File::create(path)?);
    generator.write_csv(&mut out, count)?;
    let market = generator.market();
    println!(
        "generated {count} orders to {path} (last ${:.2}, bid ${:.2} / ask ${:.2}, vol {:.1}%)",
        market.last_price as f64 / 100.0,
        market.bid_price as f64 / 100.0,
        market.ask_price as f64 / 100.0,
        market.volatility * 100.0,
    );
    Ok(())
}

fn print_report(report: &ReplayReport, engine: &Engine) {
    let stats = engine.stats();
    println!("== replay report ==");
    println!("orders processed:   {}", report.orders);
    println!("trades executed:    {}", report.trades);
    println!("rows skipped:       {}", report.skipped_rows);
    println!("risk rejected:      {}", report.risk_rejected);
    println!(
        "match rate:         {:.1}%",
        if report.orders > 0 {
            report.trades as f64 * 100.0 / report.orders as f64
        } else {
            0.0
        }
    );
    println!("total time:         {} ms", report.elapsed.as_millis());
    println!("throughput:         {:.0} orders/sec", report.throughput_per_sec());
    println!("latency mean:       {:.1} us", report.latency.mean_ns / 1_000.0);
    println!("latency p50:        {:.1} us", report.latency.p50_ns as f64 / 1_000.0);
    println!("latency p95:        {:.1} us", report.latency.p95_ns as f64 / 1_000.0);
    println!("latency p99:        {:.1} us", report.latency.p99_ns as f64 / 1_000.0);
    println!(
        "book:               {} bid levels / {} ask levels, {} resting orders",
        engine.bid_levels(),
        engine.ask_levels(),
        engine.order_count()
    );
    println!(
        "pool:               {} allocated / {} available / {} capacity",
        engine.pool_allocated(),
        engine.pool_available(),
        engine.pool_capacity()
    );
    println!(
        "counters:           {} orders, {} trades, {} volume, {} cancelled, {} stops fired",
        stats.total_orders,
        stats.total_trades,
        stats.total_volume,
        stats.total_cancelled,
        stats.total_stop_triggered
    );
}

fn run_benchmark(path: &str) -> std::io::Result<()> {
    let mut engine = Engine::new();
    setup_demo_risk_limits(&mut engine);
    let report = replay_file(&mut engine, path)?;
    print_report(&report, &engine);
    Ok(())
}

async fn serve() {
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let mut engine = Engine::new();
    setup_demo_risk_limits(&mut engine);
    let app = api::create_router(engine);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.expect("bind");
    eprintln!("listening on http://{addr}");
    axum::serve(listener, app).await.expect("serve");
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let result = match args.get(1).map(String::as_str) {
        None => {
            let demo_file = "market_orders.csv";
            generate_test_data(demo_file, 50_000).and_then(|_| run_benchmark(demo_file))
        }
        Some("generate") if args.len() == 4 => match args[3].parse() {
            Ok(count) => generate_test_data(&args[2], count),
            Err(_) => {
                eprintln!("invalid count: {}", args[3]);
                return ExitCode::FAILURE;
            }
        },
        Some("run") if args.len() == 3 => run_benchmark(&args[2]),
        Some("serve") => {
            serve().await;
            Ok(())
        }
        _ => {
            eprintln!(
                "usage: {} [generate <file> <count> | run <file> | serve]",
                args[0]
            );
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
