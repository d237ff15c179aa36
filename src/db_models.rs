// src/db_models.rs

use crate::models::Coordinates;
use crate::state::{StoredState, TrackingSession, TrackingSettings};

/// The single `tracking_state` row, column for column.
#[derive(Debug, Clone, PartialEq)]
pub struct DbTrackingState {
    pub user_id: String,
    pub endpoint_url: String,
    pub interval_seconds: u64,
    pub session_id: Option<String>,
    pub currently_tracking: bool,
    pub cumulative_distance_meters: f64,
    pub previous_latitude: Option<f64>,
    pub previous_longitude: Option<f64>,
    pub is_first_fix_of_session: bool,
}

impl From<&StoredState> for DbTrackingState {
    fn from(state: &StoredState) -> Self {
        let session = state.session.as_ref();
        let previous = session.and_then(|s| s.previous_fix);
        Self {
            user_id: state.settings.user_id.clone(),
            endpoint_url: state.settings.endpoint_url.clone(),
            interval_seconds: state.settings.interval_seconds,
            session_id: session.map(|s| s.session_id.clone()),
            currently_tracking: state.currently_tracking,
            cumulative_distance_meters: session.map_or(0.0, |s| s.cumulative_distance_m),
            previous_latitude: previous.map(|p| p.latitude),
            previous_longitude: previous.map(|p| p.longitude),
            is_first_fix_of_session: session.is_none_or(|s| s.is_first_fix_of_session),
        }
    }
}

impl From<DbTrackingState> for StoredState {
    /// A row without a session id carries no session, whatever the other
    /// session columns say.
    fn from(row: DbTrackingState) -> Self {
        let previous_fix = match (row.previous_latitude, row.previous_longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates::new(latitude, longitude)),
            _ => None,
        };
        let session = row.session_id.map(|session_id| TrackingSession {
            session_id,
            interval_seconds: row.interval_seconds,
            cumulative_distance_m: row.cumulative_distance_meters,
            // A seeded previous fix means the first fix has been seen.
            is_first_fix_of_session: row.is_first_fix_of_session && previous_fix.is_none(),
            previous_fix,
        });
        Self {
            settings: TrackingSettings {
                user_id: row.user_id,
                endpoint_url: row.endpoint_url,
                interval_seconds: row.interval_seconds,
            },
            currently_tracking: row.currently_tracking,
            session,
        }
    }
}
