use crate::distance::{self, Accumulated};
use crate::models::Coordinates;
use crate::utils;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;
/// A year and a day.
pub const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 60 * 60;

pub fn is_valid_interval(interval_seconds: u64) -> bool {
    (1..=MAX_INTERVAL_SECONDS).contains(&interval_seconds)
}

/// User-supplied settings that outlive any single session.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub user_id: String,
    pub endpoint_url: String,
    pub interval_seconds: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            endpoint_url: String::new(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
        }
    }
}

/// Trip state of one enable..disable period.
///
/// A cycle loads this from the store at tick start, mutates it while
/// processing the fix and writes it back before the cycle completes. Nothing
/// here is assumed to survive in memory between ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSession {
    pub session_id: String,
    pub interval_seconds: u64,
    pub cumulative_distance_m: f64,
    pub previous_fix: Option<Coordinates>,
    pub is_first_fix_of_session: bool,
}

impl TrackingSession {
    /// Starts a fresh session with a newly generated id.
    pub fn start(interval_seconds: u64) -> Self {
        Self {
            session_id: utils::generate_session_id(),
            interval_seconds,
            cumulative_distance_m: 0.0,
            previous_fix: None,
            is_first_fix_of_session: true,
        }
    }

    /// Feeds one accepted fix into the running total and returns the
    /// increment in meters.
    pub fn record_fix(&mut self, current: Coordinates) -> f64 {
        let Accumulated {
            total_m,
            previous,
            increment_m,
        } = distance::accumulate(self.previous_fix, self.cumulative_distance_m, current);
        self.cumulative_distance_m = total_m;
        self.previous_fix = previous;
        if previous.is_some() {
            self.is_first_fix_of_session = false;
        }
        increment_m
    }

    pub fn distance_miles(&self) -> f64 {
        distance::meters_to_miles(self.cumulative_distance_m)
    }
}

/// Everything the configuration store holds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredState {
    pub settings: TrackingSettings,
    pub currently_tracking: bool,
    /// Present only while tracking is enabled.
    pub session: Option<TrackingSession>,
}

impl StoredState {
    /// The session a tick should work on, if tracking is enabled.
    pub fn active_session(&self) -> Option<&TrackingSession> {
        if self.currently_tracking {
            self.session.as_ref()
        } else {
            None
        }
    }
}
