use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::state::MAX_INTERVAL_SECONDS;

const MIN_PERIOD: Duration = Duration::from_secs(1);
const MAX_PERIOD: Duration = Duration::from_secs(MAX_INTERVAL_SECONDS);

/// The periodic timer driving tracking cycles. Disarmed, it never ticks.
#[derive(Debug, Default)]
pub struct Scheduler {
    interval: Option<Interval>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks every `period`, the first time right away when `immediately`.
    /// The period is clamped to between a second and a year and a day.
    pub fn arm(&mut self, period: Duration, immediately: bool) {
        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
        let now = Instant::now();
        let start = if immediately {
            now
        } else {
            now.checked_add(period).unwrap_or(now)
        };
        let mut interval = interval_at(start, period);
        // Ticks missed while a cycle ran late are dropped, not bunched up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
    }

    pub fn disarm(&mut self) {
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.interval.as_ref().map(Interval::period)
    }

    /// Completes at the next tick. Cancel safe.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}
