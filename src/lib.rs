//! # Sim Matching Engine
//!
//! Single-symbol limit-order matching engine for low-latency simulation:
//! price-time priority with a market-maker tier, pre-trade risk, stop-loss
//! cascades, iceberg orders, and pooled order records.
//!
//! ## Entry point
//!
//! Use [`Engine`] as the single entry point: configure trader limits through
//! [`Engine::risk_manager_mut`], then drive it with [`Engine::add_order`] and
//! [`Engine::cancel_order`].
//!
//! ## Example
//!
//! ```rust
//! use sim_matching_engine::{Engine, OrderRequest, RiskLimits, Side};
//!
//! let mut engine = Engine::new();
//! let limits = RiskLimits {
//!     max_position: 1_000,
//!     max_order_qty: 100,
//!     max_order_value: 1_000_000,
//!     daily_loss_limit: 100_000,
//!     max_price_deviation: 0.10,
//!     max_orders_per_sec: 100,
//!     max_daily_volume: 100_000,
//! };
//! engine.risk_manager_mut().set_trader_limits(1, limits).unwrap();
//! engine.risk_manager_mut().set_trader_limits(2, limits).unwrap();
//!
//! engine.add_order(OrderRequest::limit(1, Side::Buy, 100, 10, 1));
//! let trades = engine.add_order(OrderRequest::limit(2, Side::Sell, 100, 4, 2));
//! assert_eq!(trades.len(), 1);
//! assert_eq!(trades[0].price, 100);
//! ```
//!
//! Ordering between successive `add_order` calls defines the official trade
//! sequence: identical inputs produce identical trades.

pub mod api;
pub mod engine;
pub mod market_data_gen;
mod matching;
pub mod order_book;
pub mod pool;
pub mod replay;
pub mod risk;
pub mod session;
pub mod stop_manager;
pub mod tick_table;
pub mod types;

pub use engine::{Engine, EngineStats, RefillPolicy};
pub use order_book::{OrderBook, PriceLevel};
pub use pool::{Handle, ObjectPool, PoolItem};
pub use risk::{CircuitBreaker, LimitsError, Position, RiskLimits, RiskManager, RiskRejection};
pub use session::{AdmissionTicket, SessionError, SessionManager, SessionStats};
pub use stop_manager::StopOrderManager;
pub use tick_table::{TickRuleError, TickSizeTable};
pub use types::{
    Order, OrderId, OrderRequest, OrderType, OwnerId, Price, Quantity, SessionId, Side, Trade,
};
