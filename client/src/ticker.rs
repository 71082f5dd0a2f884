use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Fixed-rate simulation clock.
///
/// Late ticks are skipped rather than bunched, so a stalled loop never runs
/// a burst of catch-up simulation steps.
pub struct Ticker {
    interval: Interval,
    ticks: u64,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, ticks: 0 }
    }

    /// Waits for the next tick and returns its number, starting at 1.
    pub async fn tick(&mut self) -> u64 {
        self.interval.tick().await;
        self.ticks += 1;
        self.ticks
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}
