//! Resting stop orders indexed by trigger price.
//!
//! Buy stops fire when the market rises to the stop; sell stops fire when it
//! falls to the stop. Triggered orders are drained atomically: the caller gets
//! them back in ascending trigger-price order (buys first, then sells) and
//! they are gone from every internal structure. Stops are single-shot.

use crate::pool::Handle;
use crate::types::{OrderId, Price, Side};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct StopOrderManager {
    buy_stops: BTreeMap<Price, VecDeque<(OrderId, Handle)>>,
    sell_stops: BTreeMap<Price, VecDeque<(OrderId, Handle)>>,
    lookup: HashMap<OrderId, (Side, Price, Handle)>,
}

impl StopOrderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a stop order by its trigger price.
    pub fn add_stop_order(&mut self, id: OrderId, side: Side, stop_price: Price, handle: Handle) {
        let book = match side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        book.entry(stop_price).or_default().push_back((id, handle));
        self.lookup.insert(id, (side, stop_price, handle));
    }

    /// Removes a stop by id. Returns the handle if the id was pending.
    pub fn remove_stop_order(&mut self, id: OrderId) -> Option<Handle> {
        let (side, stop_price, handle) = self.lookup.remove(&id)?;
        let book = match side {
            Side::Buy => &mut self.buy_stops,
            Side::Sell => &mut self.sell_stops,
        };
        if let Some(queue) = book.get_mut(&stop_price) {
            queue.retain(|(qid, _)| *qid != id);
            if queue.is_empty() {
                book.remove(&stop_price);
            }
        }
        Some(handle)
    }

    /// Drains every stop triggered by `last_trade_price`: buy stops with
    /// `stop_price <= last`, sell stops with `stop_price >= last`. Returned in
    /// ascending trigger-price order, buys then sells, FIFO within a price.
    pub fn check_triggered_stops(&mut self, last_trade_price: Price) -> Vec<Handle> {
        let mut triggered = Vec::new();

        let buy_prices: Vec<Price> = self
            .buy_stops
            .range(..=last_trade_price)
            .map(|(p, _)| *p)
            .collect();
        for price in buy_prices {
            if let Some(queue) = self.buy_stops.remove(&price) {
                for (id, handle) in queue {
                    self.lookup.remove(&id);
                    triggered.push(handle);
                }
            }
        }

        let sell_prices: Vec<Price> = self
            .sell_stops
            .range(last_trade_price..)
            .map(|(p, _)| *p)
            .collect();
        for price in sell_prices {
            if let Some(queue) = self.sell_stops.remove(&price) {
                for (id, handle) in queue {
                    self.lookup.remove(&id);
                    triggered.push(handle);
                }
            }
        }

        triggered
    }

    pub fn pending_stop_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.lookup.contains_key(&id)
    }
}
