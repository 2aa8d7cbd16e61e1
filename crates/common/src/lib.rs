//! Shared primitives for directord components: the common error type,
//! tracing initialization, and the ticker abstraction used to inject time.

pub mod error;
pub mod logging;
pub mod ticker;

pub use error::{Error, Result};
pub use ticker::{IntervalTicker, Ticker, TickerFactory, interval_ticker_factory};
