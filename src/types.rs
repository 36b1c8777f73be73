//! Core types for the matching engine.
//!
//! Prices and quantities are plain `i64` in minor units (cents): integer
//! arithmetic keeps trade sequences bit-for-bit reproducible. [`Order`] is the
//! pooled record that lives on the book; [`OrderRequest`] is the submission
//! message; [`Trade`] is the immutable execution record.

/// Unique order identifier, assigned by the caller, unique per engine lifetime.
pub type OrderId = u64;
/// Price in minor units. 0 means "no price" (market orders).
pub type Price = i64;
/// Quantity in whole units.
pub type Quantity = i64;
/// Trader identity; positions and risk limits are keyed by it.
pub type OwnerId = u32;
/// Opaque session identity, passed through from the admission gate.
pub type SessionId = u32;

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type. GTC, IOC and ICEBERG are limit orders; MARKET takes the best
/// available; STOP_LOSS rests off-book until its trigger price prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum OrderType {
    /// Good-till-cancel: rest on book until filled or canceled.
    GTC,
    /// Immediate-or-cancel: fill what crosses now; discard the rest.
    IOC,
    /// Fill-or-kill: fill entirely now or do nothing.
    FOK,
    /// No price limit; never rests.
    Market,
    /// Dormant until `last_trade_price` crosses `stop_price`, then a market order.
    StopLoss,
    /// Limit order exposing one `display_size` tranche at a time.
    Iceberg,
}

impl OrderType {
    /// Parses the textual tag used in CSV order files. Unknown tags are `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "GTC" => Some(OrderType::GTC),
            "IOC" => Some(OrderType::IOC),
            "FOK" => Some(OrderType::FOK),
            "MARKET" => Some(OrderType::Market),
            "STOP_LOSS" => Some(OrderType::StopLoss),
            "ICEBERG" => Some(OrderType::Iceberg),
            _ => None,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            OrderType::GTC => "GTC",
            OrderType::IOC => "IOC",
            OrderType::FOK => "FOK",
            OrderType::Market => "MARKET",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::Iceberg => "ICEBERG",
        }
    }
}

/// Pooled order record. Owned by the engine's object pool; the book, stop
/// manager and id index hold non-owning handles that are all cleared before
/// the record is released.
///
/// Quantity accounting: `display` is the tranche currently exposed to
/// matching. For non-iceberg orders `remaining == display` (both track the
/// unfilled residual). A resting iceberg keeps its undisplayed stock in
/// `remaining`; each refill draws `min(remaining, display_size)` out of it.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub price: Price,
    pub stop_price: Price,
    pub quantity: Quantity,
    pub remaining: Quantity,
    pub display: Quantity,
    pub display_size: Quantity,
    pub order_type: OrderType,
    /// Monotonic nanoseconds at admission.
    pub timestamp: i64,
    pub owner_id: OwnerId,
    pub session_id: SessionId,
    pub is_market_maker: bool,
    /// Set when a stop order has converted to a market order.
    pub is_triggered: bool,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            id: 0,
            side: Side::Buy,
            price: 0,
            stop_price: 0,
            quantity: 0,
            remaining: 0,
            display: 0,
            display_size: 0,
            order_type: OrderType::GTC,
            timestamp: 0,
            owner_id: 0,
            session_id: 0,
            is_market_maker: false,
            is_triggered: false,
        }
    }
}

impl Order {
    pub fn is_limit(&self) -> bool {
        matches!(
            self.order_type,
            OrderType::GTC | OrderType::IOC | OrderType::Iceberg
        )
    }

    pub fn is_market(&self) -> bool {
        matches!(self.order_type, OrderType::Market)
    }
}

/// Order submission message (the `add_order` parameters).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OrderRequest {
    pub id: OrderId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub display: Quantity,
    pub display_size: Quantity,
    pub order_type: OrderType,
    pub owner_id: OwnerId,
    #[serde(default)]
    pub stop_price: Price,
    #[serde(default)]
    pub session_id: SessionId,
    #[serde(default)]
    pub is_market_maker: bool,
}

impl OrderRequest {
    /// Plain GTC limit order exposing its full quantity.
    pub fn limit(id: OrderId, side: Side, price: Price, quantity: Quantity, owner_id: OwnerId) -> Self {
        Self {
            id,
            side,
            price,
            quantity,
            display: quantity,
            display_size: quantity,
            order_type: OrderType::GTC,
            owner_id,
            stop_price: 0,
            session_id: 0,
            is_market_maker: false,
        }
    }

    pub fn ioc(id: OrderId, side: Side, price: Price, quantity: Quantity, owner_id: OwnerId) -> Self {
        Self {
            order_type: OrderType::IOC,
            ..Self::limit(id, side, price, quantity, owner_id)
        }
    }

    pub fn fok(id: OrderId, side: Side, price: Price, quantity: Quantity, owner_id: OwnerId) -> Self {
        Self {
            order_type: OrderType::FOK,
            ..Self::limit(id, side, price, quantity, owner_id)
        }
    }

    pub fn market(id: OrderId, side: Side, quantity: Quantity, owner_id: OwnerId) -> Self {
        Self {
            order_type: OrderType::Market,
            ..Self::limit(id, side, 0, quantity, owner_id)
        }
    }

    pub fn iceberg(
        id: OrderId,
        side: Side,
        price: Price,
        quantity: Quantity,
        display_size: Quantity,
        owner_id: OwnerId,
    ) -> Self {
        Self {
            order_type: OrderType::Iceberg,
            display: display_size.min(quantity),
            display_size,
            ..Self::limit(id, side, price, quantity, owner_id)
        }
    }

    pub fn stop_loss(
        id: OrderId,
        side: Side,
        quantity: Quantity,
        stop_price: Price,
        owner_id: OwnerId,
    ) -> Self {
        Self {
            order_type: OrderType::StopLoss,
            stop_price,
            ..Self::limit(id, side, 0, quantity, owner_id)
        }
    }

    pub fn market_maker(mut self) -> Self {
        self.is_market_maker = true;
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Execution record. `price` is always the passive order's resting price.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Trade {
    pub buy_id: OrderId,
    pub sell_id: OrderId,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: i64,
}
