//! Ticker abstraction so time-driven loops can be driven by tests.
//!
//! The engine and the health scheduler both take a [`TickerFactory`] at
//! construction; production code installs [`IntervalTicker`], tests install
//! channel-backed tickers and feed ticks explicitly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// A source of periodic wakeups.
#[async_trait]
pub trait Ticker: Send {
    /// Completes on the next tick.
    async fn tick(&mut self);
}

/// Factory producing a ticker for a given period.
pub type TickerFactory = Arc<dyn Fn(Duration) -> Box<dyn Ticker> + Send + Sync>;

/// Wall-clock ticker backed by [`tokio::time::Interval`].
///
/// The first tick fires one full period after creation, never immediately.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// The default factory used outside tests.
pub fn interval_ticker_factory() -> TickerFactory {
    Arc::new(|period| Box::new(IntervalTicker::new(period)))
}
