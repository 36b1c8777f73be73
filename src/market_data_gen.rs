//! Synthetic market-data generator.
//!
//! Produces a deterministic CSV order stream for replay tests, demos and
//! benchmarks: same seed, same bytes. The market model is a bounded random
//! walk with volatility clustering, decaying momentum and mean reversion
//! toward $1000, quoted around a volatility-scaled spread on the tick grid.
//! A population of 100 trader profiles (market makers, institutions, HFT,
//! retail) decides order types, sizes and prices; the first 10% of the
//! stream builds the book with resting orders only.

use crate::tick_table::TickSizeTable;
use crate::types::{Price, Quantity};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::io::{self, Write};

/// CSV header for generated order files.
pub const CSV_HEADER: &str =
    "order_id,side,price,quantity,type,disp,display_size,owner,stop_price,session_id,ip_address";

/// Configuration for the generator. Same config (including seed) produces
/// the same stream.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub num_orders: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_orders: 50_000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum TraderKind {
    MarketMaker,
    Institutional,
    Hft,
    Retail,
}

#[derive(Clone, Copy, Debug)]
struct TraderProfile {
    kind: TraderKind,
    /// 0..=1, higher means more market orders.
    aggressiveness: f64,
    min_size: Quantity,
    max_size: Quantity,
    iceberg_probability: f64,
    stop_loss_probability: f64,
}

/// Market state snapshot, exposed for reporting.
#[derive(Clone, Copy, Debug)]
pub struct MarketSnapshot {
    pub last_price: Price,
    pub bid_price: Price,
    pub ask_price: Price,
    pub volatility: f64,
    pub momentum: f64,
    /// Minutes since the open, 0..390.
    pub time_of_day: usize,
    pub is_high_volume_period: bool,
}

/// Deterministic order-stream generator.
pub struct MarketDataGenerator {
    rng: StdRng,
    market: MarketSnapshot,
    profiles: Vec<TraderProfile>,
    ticks: TickSizeTable,
}

impl MarketDataGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        let ticks = TickSizeTable::default();
        let market = MarketSnapshot {
            last_price: 100_000,
            bid_price: ticks.round_to_tick(99_999),
            ask_price: ticks.round_to_tick(100_001),
            volatility: 0.02,
            momentum: 0.0,
            time_of_day: 0,
            is_high_volume_period: true,
        };
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            market,
            profiles: Self::trader_profiles(),
            ticks,
        }
    }

    /// 100 trader profiles: 10% market makers, 20% institutional, 15% HFT,
    /// 55% retail.
    fn trader_profiles() -> Vec<TraderProfile> {
        let mut profiles = Vec::with_capacity(100);
        for _ in 0..10 {
            profiles.push(TraderProfile {
                kind: TraderKind::MarketMaker,
                aggressiveness: 0.4,
                min_size: 100,
                max_size: 500,
                iceberg_probability: 0.3,
                stop_loss_probability: 0.05,
            });
        }
        for _ in 10..30 {
            profiles.push(TraderProfile {
                kind: TraderKind::Institutional,
                aggressiveness: 0.7,
                min_size: 500,
                max_size: 2_000,
                iceberg_probability: 0.7,
                stop_loss_probability: 0.2,
            });
        }
        for _ in 30..45 {
            profiles.push(TraderProfile {
                kind: TraderKind::Hft,
                aggressiveness: 0.9,
                min_size: 50,
                max_size: 300,
                iceberg_probability: 0.1,
                stop_loss_probability: 0.15,
            });
        }
        for _ in 45..100 {
            profiles.push(TraderProfile {
                kind: TraderKind::Retail,
                aggressiveness: 0.8,
                min_size: 10,
                max_size: 200,
                iceberg_probability: 0.05,
                stop_loss_probability: 0.25,
            });
        }
        profiles
    }

    pub fn market(&self) -> MarketSnapshot {
        self.market
    }

    /// Advances the market one step: volatility shock, momentum decay, a
    /// bounded random walk with mean reversion, and fresh tick-aligned
    /// quotes.
    pub fn update_market_dynamics(&mut self) {
        self.market.volatility += self.rng.gen_range(-0.001..0.001);
        self.market.volatility = self.market.volatility.clamp(0.005, 0.05);

        self.market.momentum += self.rng.gen_range(-0.1..0.1);
        self.market.momentum *= 0.95;

        self.market.time_of_day = (self.market.time_of_day + 1) % 390;
        self.market.is_high_volume_period = self.market.time_of_day < 30
            || self.market.time_of_day > 360
            || (90..=120).contains(&self.market.time_of_day);

        let change = match Normal::new(self.market.momentum * 0.1, self.market.volatility * 0.01) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.0,
        };
        let base_increment = 50.0;
        let price_increment = (change * base_increment * self.market.volatility * 100.0) as Price;

        let target_price = 100_000;
        let mean_reversion = ((target_price - self.market.last_price) as f64 * 0.001) as Price;

        let new_price = (self.market.last_price + price_increment + mean_reversion)
            .clamp(50_000, 150_000);
        let new_price = self.ticks.round_to_tick(new_price);
        if new_price == 0 {
            return;
        }
        self.market.last_price = new_price;

        let tick_size = self.ticks.get_tick_size(new_price);
        let volatility_spread = (self.market.volatility * new_price as f64 * 0.05) as Price;
        let spread = self.ticks.round_to_tick(tick_size.max(volatility_spread));

        self.market.bid_price = self.ticks.round_to_tick(new_price - spread / 2);
        self.market.ask_price = self.ticks.round_to_tick(new_price + spread / 2);
        if self.market.ask_price - self.market.bid_price < tick_size {
            self.market.ask_price = self.market.bid_price + tick_size;
        }
    }

    /// One CSV row. `order_id` and `total_count` drive the build-the-book
    /// phase (first 10%: resting orders only).
    pub fn generate_order_line(&mut self, order_id: u64, total_count: usize) -> String {
        let trader_index = self.rng.gen_range(0..self.profiles.len());
        let trader_id = trader_index as u32 + 1;
        let profile = self.profiles[trader_index];

        let type_rand: f64 = self.rng.gen();
        let build_book_phase = order_id as usize <= total_count / 10;
        let order_type = if build_book_phase {
            if type_rand < 0.8 {
                "GTC"
            } else {
                "ICEBERG"
            }
        } else {
            let market_bias = profile.aggressiveness
                * if self.market.is_high_volume_period {
                    1.5
                } else {
                    1.0
                };
            if type_rand < market_bias {
                "MARKET"
            } else if type_rand < profile.aggressiveness + profile.iceberg_probability {
                "ICEBERG"
            } else if type_rand
                < profile.aggressiveness
                    + profile.iceberg_probability
                    + profile.stop_loss_probability
            {
                "STOP_LOSS"
            } else if type_rand < 0.95 {
                "GTC"
            } else if self.rng.gen::<f64>() < 0.5 {
                "IOC"
            } else {
                "FOK"
            }
        };

        let mut quantity: Quantity = self.rng.gen_range(profile.min_size..=profile.max_size);
        if self.market.is_high_volume_period {
            quantity = (quantity as f64 * (1.0 + self.rng.gen::<f64>() * 0.5)) as Quantity;
        }

        let is_buy = if self.market.momentum.abs() > 0.01 {
            let buy_bias = if self.market.momentum > 0.0 { 0.6 } else { 0.4 };
            self.rng.gen::<f64>() < buy_bias
        } else {
            self.rng.gen::<f64>() < 0.5
        };

        let (order_price, stop_price) = match order_type {
            "MARKET" => (0, 0),
            "STOP_LOSS" => {
                let stop_offset = self.rng.gen_range(0.02..0.05);
                if is_buy {
                    (
                        self.ticks.round_to_tick(self.market.ask_price),
                        self.ticks.round_to_tick(
                            (self.market.last_price as f64 * (1.0 + stop_offset)) as Price,
                        ),
                    )
                } else {
                    (
                        self.ticks.round_to_tick(self.market.bid_price),
                        self.ticks.round_to_tick(
                            (self.market.last_price as f64 * (1.0 - stop_offset)) as Price,
                        ),
                    )
                }
            }
            _ => (self.limit_price(&profile, is_buy), 0),
        };
        let order_price = if order_price > 0 {
            self.ticks.round_to_tick(order_price.max(1))
        } else {
            0
        };

        let (disp, display_size) = if order_type == "ICEBERG" {
            let slice = self
                .rng
                .gen_range(quantity / 10..=(quantity / 3).max(quantity / 10));
            let display_size = slice.min(quantity).max(1);
            (display_size, display_size)
        } else {
            (quantity, quantity)
        };

        let session_id = (order_id % 500) + 1;
        let ip_address = format!("192.168.{}.{}", (order_id % 200) / 50, (order_id % 50) + 1);

        format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            order_id,
            if is_buy { "BUY" } else { "SELL" },
            order_price,
            quantity,
            order_type,
            disp,
            display_size,
            trader_id,
            stop_price,
            session_id,
            ip_address
        )
    }

    /// Limit price for a non-stop, non-market order.
    fn limit_price(&mut self, profile: &TraderProfile, is_buy: bool) -> Price {
        if matches!(profile.kind, TraderKind::MarketMaker) {
            let tick_size = self.ticks.get_tick_size(self.market.last_price);
            let cross: f64 = self.rng.gen();
            let inside: f64 = self.rng.gen();
            if is_buy {
                if cross < 0.2 {
                    self.market.ask_price
                } else if inside < 0.7 {
                    self.market.bid_price
                } else {
                    self.market.bid_price + tick_size
                }
            } else if cross < 0.2 {
                self.market.bid_price
            } else if inside < 0.7 {
                self.market.ask_price
            } else {
                self.market.ask_price - tick_size
            }
        } else if is_buy {
            let aggressive = self.market.ask_price;
            let passive = self.market.bid_price;
            let price =
                passive + (profile.aggressiveness * (aggressive - passive) as f64) as Price;
            self.ticks.round_to_tick(price)
        } else {
            let aggressive = self.market.bid_price;
            let passive = self.market.ask_price;
            let price =
                passive - (profile.aggressiveness * (passive - aggressive) as f64) as Price;
            self.ticks.round_to_tick(price)
        }
    }

    /// Writes `count` rows (plus header) to `out`, advancing the market
    /// every 50 orders.
    pub fn write_csv<W: Write>(&mut self, out: &mut W, count: usize) -> io::Result<()> {
        writeln!(out, "{CSV_HEADER}")?;
        for order_id in 1..=count as u64 {
            if order_id % 50 == 0 {
                self.update_market_dynamics();
            }
            let line = self.generate_order_line(order_id, count);
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_lines(seed: u64, count: usize) -> Vec<String> {
        let mut generator = MarketDataGenerator::new(&GeneratorConfig {
            seed,
            num_orders: count,
        });
        let mut buf = Vec::new();
        generator.write_csv(&mut buf, count).unwrap();
        String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn same_seed_same_stream() {
        let a = generate_lines(7, 200);
        let b = generate_lines(7, 200);
        assert_eq!(a, b);
        assert_eq!(a.len(), 201);
        assert_eq!(a[0], CSV_HEADER);
    }

    #[test]
    fn different_seed_different_stream() {
        let a = generate_lines(1, 100);
        let b = generate_lines(2, 100);
        assert_ne!(a[1..], b[1..]);
    }

    #[test]
    fn rows_have_eleven_fields() {
        for line in &generate_lines(42, 300)[1..] {
            assert_eq!(line.split(',').count(), 11, "line: {line}");
        }
    }

    #[test]
    fn build_phase_emits_resting_orders_only() {
        let lines = generate_lines(42, 500);
        for line in &lines[1..=50] {
            let order_type = line.split(',').nth(4).unwrap();
            assert!(
                order_type == "GTC" || order_type == "ICEBERG",
                "line: {line}"
            );
        }
    }

    #[test]
    fn prices_are_tick_aligned() {
        let ticks = TickSizeTable::default();
        for line in &generate_lines(42, 400)[1..] {
            let fields: Vec<&str> = line.split(',').collect();
            let price: Price = fields[2].parse().unwrap();
            let stop_price: Price = fields[8].parse().unwrap();
            if price > 0 {
                assert!(ticks.is_valid_price(price), "price off-grid: {line}");
            }
            if stop_price > 0 {
                assert!(ticks.is_valid_price(stop_price), "stop off-grid: {line}");
            }
        }
    }

    #[test]
    fn market_walk_stays_in_bounds() {
        let mut generator = MarketDataGenerator::new(&GeneratorConfig::default());
        for _ in 0..2_000 {
            generator.update_market_dynamics();
            let market = generator.market();
            assert!(market.last_price >= 50_000 && market.last_price <= 150_000);
            assert!(market.bid_price < market.ask_price);
            assert!(market.volatility >= 0.005 && market.volatility <= 0.05);
        }
    }
}
