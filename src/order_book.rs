//! Two-sided price-time order book.
//!
//! Each price level keeps two FIFO queues: market-maker orders have strict
//! priority over regular orders. The bid side serves highest price first, the
//! ask side lowest first. An empty level is never retained. The id index maps
//! every resting order (book or stop book) to its pool handle.

use crate::pool::{Handle, ObjectPool};
use crate::types::{Order, OrderId, Price, Side};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Where a refilled iceberg tranche re-enters its queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefillPolicy {
    /// Refill re-queues at the tail: the tranche loses time priority.
    #[default]
    BackOfQueue,
    /// Refill keeps the order at the head of its priority class.
    PreservePriority,
}

/// One price bucket: market-maker queue ahead of the regular queue.
#[derive(Debug, Default)]
pub struct PriceLevel {
    mm_orders: VecDeque<Handle>,
    regular_orders: VecDeque<Handle>,
}

impl PriceLevel {
    /// Next order to match: head of the MM queue, else head of the regular
    /// queue.
    pub fn front(&self) -> Option<Handle> {
        self.mm_orders
            .front()
            .or_else(|| self.regular_orders.front())
            .copied()
    }

    pub fn pop_front(&mut self) -> Option<Handle> {
        if self.mm_orders.is_empty() {
            self.regular_orders.pop_front()
        } else {
            self.mm_orders.pop_front()
        }
    }

    pub fn push(&mut self, handle: Handle, is_market_maker: bool) {
        if is_market_maker {
            self.mm_orders.push_back(handle);
        } else {
            self.regular_orders.push_back(handle);
        }
    }

    /// Re-queues a refilled iceberg tranche within its priority class.
    pub fn requeue(&mut self, handle: Handle, is_market_maker: bool, policy: RefillPolicy) {
        let queue = if is_market_maker {
            &mut self.mm_orders
        } else {
            &mut self.regular_orders
        };
        match policy {
            RefillPolicy::BackOfQueue => queue.push_back(handle),
            RefillPolicy::PreservePriority => queue.push_front(handle),
        }
    }

    pub fn remove(&mut self, handle: Handle) -> bool {
        if let Some(i) = self.mm_orders.iter().position(|h| *h == handle) {
            self.mm_orders.remove(i);
            return true;
        }
        if let Some(i) = self.regular_orders.iter().position(|h| *h == handle) {
            self.regular_orders.remove(i);
            return true;
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.mm_orders.is_empty() && self.regular_orders.is_empty()
    }

    pub fn order_count(&self) -> usize {
        self.mm_orders.len() + self.regular_orders.len()
    }

    /// Handles in matching priority order (MM queue, then regular).
    pub fn iter(&self) -> impl Iterator<Item = Handle> + '_ {
        self.mm_orders
            .iter()
            .chain(self.regular_orders.iter())
            .copied()
    }
}

/// Single-symbol book: sides plus the resting-order id index.
#[derive(Debug, Default)]
pub struct OrderBook {
    pub(crate) bids: BTreeMap<Price, PriceLevel>,
    pub(crate) asks: BTreeMap<Price, PriceLevel>,
    pub(crate) orders: HashMap<OrderId, Handle>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rests an order at its own price and indexes it by id.
    pub fn rest_order(&mut self, pool: &ObjectPool<Order>, handle: Handle) {
        let order = pool.get(handle);
        let side = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        side.entry(order.price)
            .or_default()
            .push(handle, order.is_market_maker);
        self.orders.insert(order.id, handle);
    }

    /// Removes a resting order from its level; drops the level if emptied.
    /// The id index is not touched here.
    pub fn remove_from_level(&mut self, side: Side, price: Price, handle: Handle) {
        let book_side = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(level) = book_side.get_mut(&price) {
            level.remove(handle);
            if level.is_empty() {
                book_side.remove(&price);
            }
        }
    }

    pub(crate) fn cleanup_level(&mut self, side: Side, price: Price) {
        let book_side = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if book_side.get(&price).is_some_and(PriceLevel::is_empty) {
            book_side.remove(&price);
        }
    }

    /// Best bid price, 0 when the side is empty.
    pub fn best_bid(&self) -> Price {
        self.bids.keys().next_back().copied().unwrap_or(0)
    }

    /// Best ask price, 0 when the side is empty.
    pub fn best_ask(&self) -> Price {
        self.asks.keys().next().copied().unwrap_or(0)
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// Resting orders across book and stop book (everything indexed by id).
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn lookup(&self, id: OrderId) -> Option<Handle> {
        self.orders.get(&id).copied()
    }
}
