//! Price-time priority matching over the book.
//!
//! Three entry points, one per execution style: [`match_limit`] walks the
//! opposite side while the aggressor's limit crosses, [`match_market`] walks
//! it without a price bound, and [`match_fok`] runs a two-phase dry-run then
//! commit so fill-or-kill is all-or-nothing. Every trade prices at the
//! passive order's resting price. When the aggressor and the head of the
//! queue share an owner, the resting order is silently removed and matching
//! continues; no trade is emitted for self-crossings.

use crate::order_book::{OrderBook, RefillPolicy};
use crate::pool::{Handle, ObjectPool};
use crate::risk::RiskManager;
use crate::types::{Order, OrderType, Price, Quantity, Side, Trade};

/// Matches a limit-style aggressor (GTC, IOC, ICEBERG) against the book.
/// Residual handling is the caller's business.
pub(crate) fn match_limit(
    book: &mut OrderBook,
    pool: &mut ObjectPool<Order>,
    risk: &mut RiskManager,
    aggressor: Handle,
    now_ns: i64,
    policy: RefillPolicy,
    trades: &mut Vec<Trade>,
) {
    let limit = pool.get(aggressor).price;
    sweep(book, pool, risk, aggressor, Some(limit), now_ns, policy, trades);
}

/// Matches a market aggressor: walks the opposite side until the aggressor or
/// the book is exhausted. Any remainder is simply left unfilled.
pub(crate) fn match_market(
    book: &mut OrderBook,
    pool: &mut ObjectPool<Order>,
    risk: &mut RiskManager,
    aggressor: Handle,
    now_ns: i64,
    policy: RefillPolicy,
    trades: &mut Vec<Trade>,
) {
    sweep(book, pool, risk, aggressor, None, now_ns, policy, trades);
}

#[allow(clippy::too_many_arguments)]
fn sweep(
    book: &mut OrderBook,
    pool: &mut ObjectPool<Order>,
    risk: &mut RiskManager,
    aggressor: Handle,
    limit: Option<Price>,
    now_ns: i64,
    policy: RefillPolicy,
    trades: &mut Vec<Trade>,
) {
    let side = pool.get(aggressor).side;
    loop {
        if pool.get(aggressor).display <= 0 {
            break;
        }
        let best_price = match side {
            Side::Buy => book.asks.keys().next().copied(),
            Side::Sell => book.bids.keys().next_back().copied(),
        };
        let Some(best_price) = best_price else { break };
        if let Some(limit) = limit {
            let crossable = match side {
                Side::Buy => best_price <= limit,
                Side::Sell => best_price >= limit,
            };
            if !crossable {
                break;
            }
        }
        match_at_level(book, pool, risk, aggressor, side, best_price, now_ns, policy, trades);
        book.cleanup_level(side.opposite(), best_price);
    }
}

/// Consumes the level at `level_price` on the side opposite the aggressor.
#[allow(clippy::too_many_arguments)]
fn match_at_level(
    book: &mut OrderBook,
    pool: &mut ObjectPool<Order>,
    risk: &mut RiskManager,
    aggressor: Handle,
    aggressor_side: Side,
    level_price: Price,
    now_ns: i64,
    policy: RefillPolicy,
    trades: &mut Vec<Trade>,
) {
    loop {
        if pool.get(aggressor).display <= 0 {
            break;
        }
        let book_side = match aggressor_side {
            Side::Buy => &mut book.asks,
            Side::Sell => &mut book.bids,
        };
        let Some(level) = book_side.get_mut(&level_price) else { break };
        let Some(passive) = level.front() else { break };

        if pool.get(passive).owner_id == pool.get(aggressor).owner_id {
            // Self-trade prevention: drop the resting order, no trade, and
            // no cancellation accounting.
            level.pop_front();
            let passive_id = pool.get(passive).id;
            book.orders.remove(&passive_id);
            pool.release(passive);
            continue;
        }

        let match_qty = pool.get(aggressor).display.min(pool.get(passive).display);
        let trade = execute_trade(pool, risk, aggressor, passive, match_qty, now_ns);
        trades.push(trade);

        {
            let agg = pool.get_mut(aggressor);
            agg.display -= match_qty;
            agg.remaining -= match_qty;
        }
        let passive_exhausted = {
            let p = pool.get_mut(passive);
            p.display -= match_qty;
            if p.order_type != OrderType::Iceberg {
                p.remaining -= match_qty;
            }
            p.display == 0
        };

        if passive_exhausted {
            level.pop_front();
            if !refill_iceberg(pool, passive) {
                let passive_id = pool.get(passive).id;
                book.orders.remove(&passive_id);
                pool.release(passive);
            } else {
                let is_mm = pool.get(passive).is_market_maker;
                level.requeue(passive, is_mm, policy);
            }
        }
    }
}

/// Draws the next iceberg tranche into `display`. Returns false when there is
/// nothing left to expose (or the order is not an iceberg).
fn refill_iceberg(pool: &mut ObjectPool<Order>, handle: Handle) -> bool {
    let order = pool.get_mut(handle);
    if order.order_type != OrderType::Iceberg || order.remaining <= 0 || order.display_size <= 0 {
        return false;
    }
    let tranche = order.remaining.min(order.display_size);
    order.display = tranche;
    order.remaining -= tranche;
    true
}

/// Fill-or-kill: dry-run the opposite side collecting `(passive, qty)` fills
/// without mutating anything, then commit only if the full quantity is
/// available. Returns whether the order filled.
pub(crate) fn match_fok(
    book: &mut OrderBook,
    pool: &mut ObjectPool<Order>,
    risk: &mut RiskManager,
    aggressor: Handle,
    now_ns: i64,
    policy: RefillPolicy,
    trades: &mut Vec<Trade>,
) -> bool {
    let (side, owner, limit, quantity) = {
        let a = pool.get(aggressor);
        (a.side, a.owner_id, a.price, a.quantity)
    };

    let mut needed = quantity;
    let mut plan: Vec<(Handle, Quantity)> = Vec::new();
    match side {
        Side::Buy => {
            for (&price, level) in book.asks.iter() {
                if price > limit || needed <= 0 {
                    break;
                }
                collect_available(level.iter(), pool, owner, &mut needed, &mut plan);
            }
        }
        Side::Sell => {
            for (&price, level) in book.bids.iter().rev() {
                if price < limit || needed <= 0 {
                    break;
                }
                collect_available(level.iter(), pool, owner, &mut needed, &mut plan);
            }
        }
    }
    if needed > 0 {
        return false;
    }

    for (passive, fill_qty) in plan {
        let trade = execute_trade(pool, risk, aggressor, passive, fill_qty, now_ns);
        trades.push(trade);

        {
            let agg = pool.get_mut(aggressor);
            agg.display -= fill_qty;
            agg.remaining -= fill_qty;
        }
        let (passive_exhausted, passive_side, passive_price) = {
            let p = pool.get_mut(passive);
            p.display -= fill_qty;
            if p.order_type != OrderType::Iceberg {
                p.remaining -= fill_qty;
            }
            (p.display == 0, p.side, p.price)
        };

        if passive_exhausted {
            book.remove_from_level(passive_side, passive_price, passive);
            if refill_iceberg(pool, passive) {
                let is_mm = pool.get(passive).is_market_maker;
                let book_side = match passive_side {
                    Side::Buy => &mut book.bids,
                    Side::Sell => &mut book.asks,
                };
                book_side
                    .entry(passive_price)
                    .or_default()
                    .requeue(passive, is_mm, policy);
            } else {
                let passive_id = pool.get(passive).id;
                book.orders.remove(&passive_id);
                pool.release(passive);
            }
        }
    }
    true
}

fn collect_available(
    handles: impl Iterator<Item = Handle>,
    pool: &ObjectPool<Order>,
    owner: u32,
    needed: &mut Quantity,
    plan: &mut Vec<(Handle, Quantity)>,
) {
    for handle in handles {
        if *needed <= 0 {
            return;
        }
        if pool.get(handle).owner_id == owner {
            continue;
        }
        let available = (*needed).min(pool.get(handle).display);
        if available > 0 {
            plan.push((handle, available));
            *needed -= available;
        }
    }
}

/// Builds the trade (at the passive price) and applies both position updates.
fn execute_trade(
    pool: &ObjectPool<Order>,
    risk: &mut RiskManager,
    aggressor: Handle,
    passive: Handle,
    quantity: Quantity,
    now_ns: i64,
) -> Trade {
    let agg = pool.get(aggressor);
    let pas = pool.get(passive);
    let (buy_id, sell_id, buyer, seller) = match agg.side {
        Side::Buy => (agg.id, pas.id, agg.owner_id, pas.owner_id),
        Side::Sell => (pas.id, agg.id, pas.owner_id, agg.owner_id),
    };
    let trade = Trade {
        buy_id,
        sell_id,
        price: pas.price,
        quantity,
        timestamp: now_ns,
    };
    risk.update_position(buyer, &trade, Side::Buy);
    risk.update_position(seller, &trade, Side::Sell);
    trade
}
