//! Engine facade: wires the tick table, object pool, risk manager, stop
//! manager and book, and sequences every submission through admission,
//! matching and the stop cascade.
//!
//! The engine is single-threaded cooperative: one actor drives `add_order`
//! and `cancel_order` serially, and the trade sequence is a deterministic
//! function of the submissions alone.

use crate::matching;
use crate::order_book::OrderBook;
pub use crate::order_book::RefillPolicy;
use crate::pool::{Handle, ObjectPool};
use crate::risk::RiskManager;
use crate::stop_manager::StopOrderManager;
use crate::tick_table::TickSizeTable;
use crate::types::{Order, OrderId, OrderRequest, OrderType, Price, Trade};
use std::collections::HashSet;
use std::time::Instant;

/// Pathological stop chains are cut off after this many cascade rounds.
const MAX_CASCADE_DEPTH: usize = 3;

const INITIAL_POOL_CAPACITY: usize = 10_000;

/// Engine-lifetime counters. Self-trade removals increment nothing;
/// `total_cancelled` counts explicit cancels only.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct EngineStats {
    pub total_orders: u64,
    pub total_trades: u64,
    pub total_volume: u64,
    pub total_cancelled: u64,
    pub total_stop_triggered: u64,
    pub total_risk_rejected: u64,
}

/// Single-symbol matching engine.
#[derive(Debug)]
pub struct Engine {
    book: OrderBook,
    pool: ObjectPool<Order>,
    risk: RiskManager,
    stops: StopOrderManager,
    stats: EngineStats,
    processing_stops: HashSet<OrderId>,
    refill_policy: RefillPolicy,
    epoch: Instant,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_refill_policy(RefillPolicy::BackOfQueue)
    }

    pub fn with_refill_policy(refill_policy: RefillPolicy) -> Self {
        Self {
            book: OrderBook::new(),
            pool: ObjectPool::with_capacity(INITIAL_POOL_CAPACITY),
            risk: RiskManager::new(TickSizeTable::default()),
            stops: StopOrderManager::new(),
            stats: EngineStats::default(),
            processing_stops: HashSet::new(),
            refill_policy,
            epoch: Instant::now(),
        }
    }

    fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    /// Submits an order and returns the trades it executed, in execution
    /// order; trades from the stop cascade are appended. A risk-rejected
    /// submission returns an empty list and leaves all state untouched.
    pub fn add_order(&mut self, request: OrderRequest) -> Vec<Trade> {
        self.stats.total_orders += 1;
        let now = self.now_ns();
        let mut trades = Vec::new();

        let handle = self.pool.acquire();
        {
            let order = self.pool.get_mut(handle);
            order.id = request.id;
            order.side = request.side;
            order.price = request.price;
            order.stop_price = request.stop_price;
            order.quantity = request.quantity;
            order.remaining = request.quantity;
            order.display = request.display;
            order.display_size = request.display_size;
            order.order_type = request.order_type;
            order.timestamp = now;
            order.owner_id = request.owner_id;
            order.session_id = request.session_id;
            order.is_market_maker = request.is_market_maker;
        }

        // Stop trigger prices are index keys, not execution prices; keep them
        // on the tick grid.
        if request.stop_price > 0 {
            let rounded = self.risk.tick_table().round_to_tick(request.stop_price);
            if rounded > 0 {
                self.pool.get_mut(handle).stop_price = rounded;
            }
        }

        if let Err(rejection) = self.risk.check_order_at(self.pool.get(handle), now) {
            log::debug!("order {} rejected: {:?}", request.id, rejection);
            self.stats.total_risk_rejected += 1;
            self.pool.release(handle);
            return trades;
        }

        match request.order_type {
            OrderType::StopLoss => {
                let order = self.pool.get(handle);
                self.stops
                    .add_stop_order(order.id, order.side, order.stop_price, handle);
                self.book.orders.insert(request.id, handle);
                return trades;
            }
            OrderType::FOK => {
                matching::match_fok(
                    &mut self.book,
                    &mut self.pool,
                    &mut self.risk,
                    handle,
                    now,
                    self.refill_policy,
                    &mut trades,
                );
                self.pool.release(handle);
            }
            OrderType::Market => {
                matching::match_market(
                    &mut self.book,
                    &mut self.pool,
                    &mut self.risk,
                    handle,
                    now,
                    self.refill_policy,
                    &mut trades,
                );
                self.pool.release(handle);
            }
            OrderType::GTC | OrderType::IOC | OrderType::Iceberg => {
                matching::match_limit(
                    &mut self.book,
                    &mut self.pool,
                    &mut self.risk,
                    handle,
                    now,
                    self.refill_policy,
                    &mut trades,
                );
                if request.order_type == OrderType::Iceberg {
                    self.tranche_iceberg(handle);
                }
                let rests = request.order_type != OrderType::IOC
                    && self.pool.get(handle).display > 0;
                if rests {
                    self.book.rest_order(&self.pool, handle);
                } else {
                    self.pool.release(handle);
                }
            }
        }

        self.process_triggered_stops(&mut trades);

        self.stats.total_trades += trades.len() as u64;
        for trade in &trades {
            self.stats.total_volume += trade.quantity as u64;
        }
        trades
    }

    /// Draws the resting tranche for an iceberg that is about to rest. A
    /// fresh order (display still equal to remaining) is cut down to its
    /// display size; in either case the exposed tranche leaves `remaining`.
    fn tranche_iceberg(&mut self, handle: Handle) {
        let order = self.pool.get_mut(handle);
        if order.remaining <= 0 {
            return;
        }
        if order.display == 0 || order.display == order.remaining {
            order.display = order.remaining.min(order.display_size);
        }
        order.remaining -= order.display;
    }

    /// Runs the stop cascade after a matching burst. Each round drains the
    /// stops triggered by the last trade price, converts them to market
    /// orders, re-checks risk, and matches them; trades they produce can
    /// trigger the next round, up to `MAX_CASCADE_DEPTH` rounds.
    fn process_triggered_stops(&mut self, trades: &mut Vec<Trade>) {
        if trades.is_empty() {
            return;
        }
        let mut depth = 0;
        while depth < MAX_CASCADE_DEPTH {
            let last_price = match trades.last() {
                Some(trade) => trade.price,
                None => break,
            };
            let triggered = self.stops.check_triggered_stops(last_price);
            if triggered.is_empty() {
                break;
            }
            for handle in triggered {
                let id = self.pool.get(handle).id;
                if !self.processing_stops.insert(id) {
                    continue;
                }
                self.stats.total_stop_triggered += 1;
                {
                    let order = self.pool.get_mut(handle);
                    order.order_type = OrderType::Market;
                    order.price = 0;
                    order.is_triggered = true;
                    order.display = order.remaining;
                }
                let now = self.now_ns();
                if let Err(rejection) = self.risk.check_order_at(self.pool.get(handle), now) {
                    log::debug!("triggered stop {} rejected: {:?}", id, rejection);
                    self.stats.total_risk_rejected += 1;
                } else {
                    matching::match_market(
                        &mut self.book,
                        &mut self.pool,
                        &mut self.risk,
                        handle,
                        now,
                        self.refill_policy,
                        trades,
                    );
                }
                self.book.orders.remove(&id);
                self.pool.release(handle);
                self.processing_stops.remove(&id);
            }
            depth += 1;
        }
        if depth == MAX_CASCADE_DEPTH && self.stops.pending_stop_count() > 0 {
            log::warn!("stop cascade cut off at depth {MAX_CASCADE_DEPTH}");
        }
    }

    /// Cancels a resting or pending-stop order. Returns false for unknown
    /// ids. This is the only path that touches the cancellation counter.
    pub fn cancel_order(&mut self, id: OrderId) -> bool {
        let Some(handle) = self.book.lookup(id) else {
            return false;
        };
        let (order_type, side, price) = {
            let order = self.pool.get(handle);
            (order.order_type, order.side, order.price)
        };
        if order_type == OrderType::StopLoss {
            self.stops.remove_stop_order(id);
        } else {
            self.book.remove_from_level(side, price, handle);
        }
        self.book.orders.remove(&id);
        self.pool.release(handle);
        self.stats.total_cancelled += 1;
        true
    }

    /// Copy of a resting (or pending-stop) order, if the id is live.
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.book.lookup(id).map(|h| self.pool.get(h).clone())
    }

    pub fn best_bid(&self) -> Price {
        self.book.best_bid()
    }

    pub fn best_ask(&self) -> Price {
        self.book.best_ask()
    }

    pub fn order_count(&self) -> usize {
        self.book.order_count()
    }

    pub fn bid_levels(&self) -> usize {
        self.book.bid_levels()
    }

    pub fn ask_levels(&self) -> usize {
        self.book.ask_levels()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_manager_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    pub fn stop_manager(&self) -> &StopOrderManager {
        &self.stops
    }

    pub fn pool_available(&self) -> usize {
        self.pool.available_count()
    }

    pub fn pool_allocated(&self) -> usize {
        self.pool.allocated_count()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.total_capacity()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskLimits, RiskRejection};
    use crate::types::{OrderRequest, Side};

    fn demo_limits() -> RiskLimits {
        RiskLimits {
            max_position: 100_000,
            max_order_qty: 10_000,
            max_order_value: 50_000_000,
            daily_loss_limit: 1_000_000,
            max_price_deviation: 0.90,
            max_orders_per_sec: 1_000,
            max_daily_volume: 1_000_000,
        }
    }

    fn engine_with_traders(n: u32) -> Engine {
        let mut engine = Engine::new();
        for owner in 1..=n {
            engine
                .risk_manager_mut()
                .set_trader_limits(owner, demo_limits())
                .unwrap();
        }
        engine
    }

    #[test]
    fn simple_cross_partial_fill_rests_remainder() {
        let mut engine = engine_with_traders(2);
        assert!(engine
            .add_order(OrderRequest::limit(1, Side::Buy, 100, 10, 1))
            .is_empty());
        let trades = engine.add_order(OrderRequest::limit(2, Side::Sell, 100, 4, 2));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_id, 1);
        assert_eq!(trades[0].sell_id, 2);
        assert_eq!(trades[0].price, 100);
        assert_eq!(trades[0].quantity, 4);

        let resting = engine.order(1).unwrap();
        assert_eq!(resting.display, 6);
        assert_eq!(engine.best_bid(), 100);
        assert_eq!(engine.best_ask(), 0);
    }

    #[test]
    fn price_improvement_executes_at_passive_price() {
        let mut engine = engine_with_traders(2);
        engine.add_order(OrderRequest::limit(1, Side::Buy, 105, 5, 1));
        let trades = engine.add_order(OrderRequest::limit(2, Side::Sell, 100, 5, 2));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, 105);
        assert_eq!(trades[0].quantity, 5);
        assert_eq!(engine.best_bid(), 0);
        assert_eq!(engine.best_ask(), 0);
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn iceberg_rests_tranche_and_refills_at_tail() {
        let mut engine = engine_with_traders(3);
        engine.add_order(OrderRequest::iceberg(1, Side::Buy, 100, 1_000, 100, 1));
        {
            let iceberg = engine.order(1).unwrap();
            assert_eq!(iceberg.display, 100);
            assert_eq!(iceberg.remaining, 900);
        }
        // A second buy at the same price sits behind the iceberg tranche.
        engine.add_order(OrderRequest::limit(2, Side::Buy, 100, 50, 2));

        let trades = engine.add_order(OrderRequest::limit(3, Side::Sell, 100, 100, 3));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_id, 1);
        assert_eq!(trades[0].quantity, 100);
        {
            let iceberg = engine.order(1).unwrap();
            assert_eq!(iceberg.display, 100);
            assert_eq!(iceberg.remaining, 800);
        }
        // Refill went to the tail: the other resting buy now matches first.
        let trades = engine.add_order(OrderRequest::limit(4, Side::Sell, 100, 50, 3));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_id, 2);
    }

    #[test]
    fn iceberg_preserve_priority_policy_keeps_the_head() {
        let mut engine = Engine::with_refill_policy(RefillPolicy::PreservePriority);
        for owner in 1..=3 {
            engine
                .risk_manager_mut()
                .set_trader_limits(owner, demo_limits())
                .unwrap();
        }
        engine.add_order(OrderRequest::iceberg(1, Side::Buy, 100, 300, 100, 1));
        engine.add_order(OrderRequest::limit(2, Side::Buy, 100, 50, 2));
        engine.add_order(OrderRequest::limit(3, Side::Sell, 100, 100, 3));
        let trades = engine.add_order(OrderRequest::limit(4, Side::Sell, 100, 50, 3));
        assert_eq!(trades[0].buy_id, 1, "refilled iceberg keeps the head");
    }

    #[test]
    fn fok_is_all_or_nothing() {
        let mut engine = engine_with_traders(4);
        engine.add_order(OrderRequest::limit(10, Side::Sell, 100, 3, 1));
        engine.add_order(OrderRequest::limit(11, Side::Sell, 101, 2, 2));

        let trades = engine.add_order(OrderRequest::fok(20, Side::Buy, 100, 5, 3));
        assert!(trades.is_empty());
        assert_eq!(engine.order_count(), 2);
        assert_eq!(engine.order(10).unwrap().display, 3);

        let trades = engine.add_order(OrderRequest::fok(21, Side::Buy, 101, 5, 3));
        assert_eq!(trades.len(), 2);
        assert_eq!(trades.iter().map(|t| t.quantity).sum::<i64>(), 5);
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn ioc_discards_residual() {
        let mut engine = engine_with_traders(2);
        engine.add_order(OrderRequest::limit(1, Side::Sell, 100, 5, 1));
        let trades = engine.add_order(OrderRequest::ioc(2, Side::Buy, 100, 10, 2));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, 5);
        assert_eq!(engine.best_bid(), 0, "IOC residual never rests");
    }

    #[test]
    fn self_trade_prevention_cancels_resting_silently() {
        let mut engine = engine_with_traders(2);
        engine.add_order(OrderRequest::limit(1, Side::Buy, 100, 5, 1));
        let trades = engine.add_order(OrderRequest::limit(2, Side::Sell, 100, 5, 1));
        assert!(trades.is_empty());
        assert!(engine.order(1).is_none(), "resting order silently removed");
        // The aggressor found no liquidity and rests on the sell side.
        let resting = engine.order(2).unwrap();
        assert_eq!(resting.side, Side::Sell);
        assert_eq!(engine.best_ask(), 100);
        assert_eq!(engine.stats().total_cancelled, 0);
    }

    #[test]
    fn market_order_walks_book_and_discards_rest() {
        let mut engine = engine_with_traders(3);
        engine.add_order(OrderRequest::limit(1, Side::Sell, 100, 5, 1));
        engine.add_order(OrderRequest::limit(2, Side::Sell, 105, 5, 2));
        let trades = engine.add_order(OrderRequest::market(3, Side::Buy, 20, 3));
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, 100);
        assert_eq!(trades[1].price, 105);
        assert_eq!(engine.ask_levels(), 0);
        assert_eq!(engine.order_count(), 0, "market remainder is discarded");
    }

    #[test]
    fn stop_order_rests_off_book_until_triggered() {
        let mut engine = engine_with_traders(3);
        engine.add_order(OrderRequest::stop_loss(5, Side::Buy, 1, 100, 3));
        assert_eq!(engine.stop_manager().pending_stop_count(), 1);
        assert_eq!(engine.bid_levels(), 0);
        assert_eq!(engine.order_count(), 1);
    }

    #[test]
    fn stop_cascade_converts_and_matches() {
        let mut engine = engine_with_traders(4);
        engine.add_order(OrderRequest::limit(1, Side::Sell, 100, 1, 1));
        engine.add_order(OrderRequest::limit(2, Side::Sell, 101, 1, 2));
        engine.add_order(OrderRequest::stop_loss(3, Side::Buy, 1, 100, 3));

        let trades = engine.add_order(OrderRequest::market(4, Side::Buy, 1, 4));
        // The market buy trades at 100; the stop triggers, converts to a
        // market buy and lifts the 101 ask in the same burst.
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, 100);
        assert_eq!(trades[1].price, 101);
        assert_eq!(trades[1].buy_id, 3);
        assert_eq!(engine.stop_manager().pending_stop_count(), 0);
        assert_eq!(engine.stats().total_stop_triggered, 1);
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn triggered_stop_with_no_liquidity_produces_no_trade() {
        let mut engine = engine_with_traders(3);
        engine.add_order(OrderRequest::limit(1, Side::Sell, 100, 1, 1));
        engine.add_order(OrderRequest::stop_loss(2, Side::Buy, 1, 100, 2));
        let trades = engine.add_order(OrderRequest::market(3, Side::Buy, 1, 3));
        assert_eq!(trades.len(), 1);
        assert_eq!(engine.stop_manager().pending_stop_count(), 0);
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn cascade_depth_is_capped() {
        let mut engine = engine_with_traders(12);
        // Ladder of asks and a chain of buy stops, each fired by the
        // previous fill's price.
        for i in 0..6u64 {
            engine.add_order(OrderRequest::limit(
                10 + i,
                Side::Sell,
                100 + i as i64,
                1,
                (1 + i) as u32,
            ));
        }
        for i in 0..5u64 {
            engine.add_order(OrderRequest::stop_loss(
                20 + i,
                Side::Buy,
                1,
                100 + i as i64,
                (7 + i) as u32,
            ));
        }
        let trades = engine.add_order(OrderRequest::market(30, Side::Buy, 1, 12));
        // Round 1 fires the 100-stop, round 2 the 101-stop, round 3 the
        // 102-stop; deeper stops stay pending.
        assert_eq!(trades.len(), 4);
        assert!(engine.stop_manager().pending_stop_count() > 0);
    }

    #[test]
    fn cancel_semantics() {
        let mut engine = engine_with_traders(2);
        engine.add_order(OrderRequest::limit(1, Side::Buy, 100, 10, 1));
        engine.add_order(OrderRequest::stop_loss(2, Side::Sell, 5, 90, 2));

        assert!(engine.cancel_order(1));
        assert!(engine.cancel_order(2));
        assert!(!engine.cancel_order(1));
        assert!(!engine.cancel_order(99));
        assert_eq!(engine.order_count(), 0);
        assert_eq!(engine.stop_manager().pending_stop_count(), 0);
        assert_eq!(engine.stats().total_cancelled, 2);
    }

    #[test]
    fn risk_rejection_leaves_state_untouched() {
        let mut engine = engine_with_traders(1);
        engine.add_order(OrderRequest::limit(1, Side::Buy, 100, 10, 1));
        let pool_allocated = engine.pool_allocated();

        // Owner 99 has no limits: rejected.
        let trades = engine.add_order(OrderRequest::limit(2, Side::Sell, 100, 10, 99));
        assert!(trades.is_empty());
        assert_eq!(engine.order_count(), 1);
        assert_eq!(engine.best_bid(), 100);
        assert_eq!(engine.pool_allocated(), pool_allocated);
        assert_eq!(engine.stats().total_risk_rejected, 1);
        assert_eq!(engine.risk_manager().last_trade_price(), 0);
    }

    #[test]
    fn off_tick_price_is_rejected_not_rounded() {
        let mut engine = engine_with_traders(1);
        let trades = engine.add_order(OrderRequest::limit(1, Side::Buy, 100_002, 1, 1));
        assert!(trades.is_empty());
        assert_eq!(engine.order_count(), 0);
        assert_eq!(engine.stats().total_risk_rejected, 1);
    }

    #[test]
    fn stats_track_orders_trades_and_volume() {
        let mut engine = engine_with_traders(2);
        engine.add_order(OrderRequest::limit(1, Side::Buy, 100, 10, 1));
        engine.add_order(OrderRequest::limit(2, Side::Sell, 100, 4, 2));
        let stats = engine.stats();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.total_volume, 4);
    }

    #[test]
    fn positions_update_symmetrically_on_fills() {
        let mut engine = engine_with_traders(2);
        engine.add_order(OrderRequest::limit(1, Side::Buy, 100, 10, 1));
        engine.add_order(OrderRequest::limit(2, Side::Sell, 100, 10, 2));
        let buyer = engine.risk_manager().position(1);
        let seller = engine.risk_manager().position(2);
        assert_eq!(buyer.quantity, 10);
        assert_eq!(seller.quantity, -10);
        assert_eq!(buyer.avg_price, 100);
        assert_eq!(seller.avg_price, 100);
        assert_eq!(engine.risk_manager().last_trade_price(), 100);
    }

    #[test]
    fn rejected_submission_is_not_admitted_by_rate_limiter_side_effects() {
        let mut engine = Engine::new();
        let mut limits = demo_limits();
        limits.max_orders_per_sec = 2;
        engine.risk_manager_mut().set_trader_limits(1, limits).unwrap();

        engine.add_order(OrderRequest::limit(1, Side::Buy, 10, 1, 1));
        engine.add_order(OrderRequest::limit(2, Side::Buy, 11, 1, 1));
        let trades = engine.add_order(OrderRequest::limit(3, Side::Buy, 12, 1, 1));
        assert!(trades.is_empty());
        assert_eq!(engine.stats().total_risk_rejected, 1);
        assert_eq!(engine.order_count(), 2);
    }

    #[test]
    fn triggered_stop_is_rechecked_against_risk() {
        let mut engine = engine_with_traders(2);
        engine.add_order(OrderRequest::limit(1, Side::Sell, 100, 1, 1));
        // Owner 99 has no limits; the stop is admitted (stops bypass risk)
        // but fails the re-check at trigger time.
        engine.add_order(OrderRequest::stop_loss(2, Side::Buy, 1, 100, 99));
        let trades = engine.add_order(OrderRequest::market(3, Side::Buy, 1, 2));
        assert_eq!(trades.len(), 1);
        assert_eq!(engine.stats().total_stop_triggered, 1);
        assert_eq!(engine.stats().total_risk_rejected, 1);
        assert_eq!(engine.stop_manager().pending_stop_count(), 0);
        assert_eq!(engine.order_count(), 0);
    }
}
