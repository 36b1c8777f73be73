//! Piecewise tick-size grid governing legal prices.
//!
//! Rules are non-overlapping `(min, max, tick)` bands sorted by `min`. The
//! default table mirrors a NMS-style schedule: penny ticks up to $1000, wider
//! ticks above.

use crate::types::Price;
use thiserror::Error;

/// Rejected tick-rule registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TickRuleError {
    #[error("invalid tick rule parameters")]
    InvalidArgument,
    #[error("overlapping tick rule ranges not allowed")]
    Overlap,
}

#[derive(Clone, Copy, Debug)]
struct TickRule {
    min_price: Price,
    max_price: Price,
    tick_size: Price,
}

/// Sorted, non-overlapping collection of tick rules.
#[derive(Clone, Debug)]
pub struct TickSizeTable {
    rules: Vec<TickRule>,
}

impl Default for TickSizeTable {
    fn default() -> Self {
        // The simulation defaults: 1-cent ticks through $999.99, then 5, 10
        // and 100 cents as price grows.
        let rules = [
            (1, 99, 1),
            (100, 999, 1),
            (1_000, 4_999, 1),
            (5_000, 9_999, 1),
            (10_000, 99_999, 1),
            (100_000, 499_999, 5),
            (500_000, 999_999, 10),
            (1_000_000, Price::MAX, 100),
        ];
        Self {
            rules: rules
                .iter()
                .map(|&(min_price, max_price, tick_size)| TickRule {
                    min_price,
                    max_price,
                    tick_size,
                })
                .collect(),
        }
    }
}

impl TickSizeTable {
    /// Table with no rules; every price is off-grid until rules are added.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Registers a rule. Rejects `min > max`, non-positive ticks, negative
    /// `min`, and any overlap with an existing rule.
    pub fn add_rule(
        &mut self,
        min_price: Price,
        max_price: Price,
        tick_size: Price,
    ) -> Result<(), TickRuleError> {
        if min_price > max_price || tick_size <= 0 || min_price < 0 {
            return Err(TickRuleError::InvalidArgument);
        }
        for rule in &self.rules {
            if !(max_price < rule.min_price || min_price > rule.max_price) {
                return Err(TickRuleError::Overlap);
            }
        }
        self.rules.push(TickRule {
            min_price,
            max_price,
            tick_size,
        });
        self.rules.sort_by_key(|r| r.min_price);
        Ok(())
    }

    fn rule_for(&self, price: Price) -> Option<&TickRule> {
        self.rules
            .iter()
            .find(|r| r.min_price <= price && price <= r.max_price)
    }

    /// Rounds half-up to the nearest tick of the covering rule. Returns 0 for
    /// non-positive prices and for prices no rule covers.
    pub fn round_to_tick(&self, price: Price) -> Price {
        if price <= 0 {
            return 0;
        }
        match self.rule_for(price) {
            Some(rule) => {
                let half_tick = rule.tick_size / 2;
                ((price + half_tick) / rule.tick_size) * rule.tick_size
            }
            None => 0,
        }
    }

    /// A price is valid when rounding is a fixed point.
    pub fn is_valid_price(&self, price: Price) -> bool {
        price == self.round_to_tick(price)
    }

    /// Tick size at `price`, or 0 if uncovered.
    pub fn get_tick_size(&self, price: Price) -> Price {
        if price <= 0 {
            return 0;
        }
        self.rule_for(price).map_or(0, |r| r.tick_size)
    }

    /// One tick above `price` (after rounding), re-rounded so band crossings
    /// land on the destination grid. Returns 0 if `price` is off the table.
    pub fn next_tick_up(&self, price: Price) -> Price {
        let tick = self.get_tick_size(price);
        if tick == 0 {
            return 0;
        }
        let rounded = self.round_to_tick(price);
        if rounded == 0 {
            return 0;
        }
        self.round_to_tick(rounded + tick)
    }

    /// One tick below `price`; never crosses zero.
    pub fn next_tick_down(&self, price: Price) -> Price {
        let tick = self.get_tick_size(price);
        if tick == 0 {
            return 0;
        }
        let rounded = self.round_to_tick(price);
        if rounded == 0 {
            return 0;
        }
        let next = rounded - tick;
        if next > 0 {
            self.round_to_tick(next)
        } else {
            0
        }
    }
}
