use std::fmt::Display;

use chrono::TimeZone;

use crate::models::{LocationFix, UploadRecord};
use crate::state::TrackingSession;
use crate::utils::rounded_or_zero;

/// The collector stores dates in this (MySQL datetime) layout.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MPS_TO_MPH: f64 = 2.2369;

/// Static parts of every record produced by this agent.
#[derive(Debug, Clone)]
pub struct RecordIdentity {
    pub user_id: String,
    /// Identifies the client variant to the collector
    pub event_type: String,
}

/// Builds the upload record for one fix.
///
/// The collector url-decodes `date` and `locationmethod` on its own after the
/// transport has been decoded, so those two are percent-encoded here; the
/// transport encoding is applied on top by the uploader.
pub fn encode<Tz>(
    fix: &LocationFix,
    session: &TrackingSession,
    identity: &RecordIdentity,
    timezone: &Tz,
) -> UploadRecord
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local_time = fix.timestamp.with_timezone(timezone);
    let date = local_time.format(DATE_FORMAT).to_string();

    UploadRecord {
        latitude: fix.latitude.to_string(),
        longitude: fix.longitude.to_string(),
        speed: rounded_or_zero(fix.speed_mps.map(|mps| mps * MPS_TO_MPH)),
        direction: rounded_or_zero(fix.bearing_deg),
        accuracy: rounded_or_zero(Some(fix.accuracy_m)),
        distance: format_distance(session.distance_miles()),
        date: percent_encode(&date),
        user_id: identity.user_id.clone(),
        session_id: session.session_id.clone(),
        location_method: percent_encode(&fix.provider),
        event_type: identity.event_type.clone(),
        extra_info: rounded_or_zero(fix.altitude_m),
    }
}

// The field is always present; zero is written as a bare "0".
fn format_distance(miles: f64) -> String {
    if miles > 0.0 && miles.is_finite() {
        format!("{miles:.4}")
    } else {
        "0".to_string()
    }
}

fn percent_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinates;
    use chrono::{FixedOffset, Utc};

    fn fix() -> LocationFix {
        LocationFix {
            latitude: 40.001,
            longitude: -75.0,
            accuracy_m: 12.4,
            speed_mps: Some(10.0),
            bearing_deg: Some(271.6),
            altitude_m: Some(33.5),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 17, 5, 42).unwrap(),
            provider: "gps".to_string(),
        }
    }

    fn identity() -> RecordIdentity {
        RecordIdentity {
            user_id: "duck".to_string(),
            event_type: "gpsd-agent".to_string(),
        }
    }

    fn session(total_m: f64) -> TrackingSession {
        TrackingSession {
            session_id: "7d7c3f7e-5a43-4a8c-9d1e-0f7c6a1b2c3d".to_string(),
            interval_seconds: 60,
            cumulative_distance_m: total_m,
            previous_fix: Some(Coordinates::new(40.0, -75.0)),
            is_first_fix_of_session: false,
        }
    }

    #[test]
    fn renders_all_fields() {
        let record = encode(&fix(), &session(611.0), &identity(), &Utc);

        assert_eq!(record.latitude, "40.001");
        assert_eq!(record.longitude, "-75");
        assert_eq!(record.speed, "22");
        assert_eq!(record.direction, "272");
        assert_eq!(record.accuracy, "12");
        assert_eq!(record.extra_info, "34");
        assert_eq!(record.date, "2024-03-09+17%3A05%3A42");
        assert_eq!(record.location_method, "gps");
        assert_eq!(record.user_id, "duck");
        assert_eq!(record.event_type, "gpsd-agent");
        assert_eq!(record.session_id, "7d7c3f7e-5a43-4a8c-9d1e-0f7c6a1b2c3d");

        let miles: f64 = record.distance.parse().unwrap();
        assert!((miles - 0.38).abs() < 0.005, "got {miles}");
    }

    #[test]
    fn date_uses_the_given_zone() {
        let helsinki = FixedOffset::east_opt(2 * 3600).unwrap();
        let record = encode(&fix(), &session(0.0), &identity(), &helsinki);
        assert_eq!(record.date, "2024-03-09+19%3A05%3A42");
    }

    #[test]
    fn zero_distance_is_sent_as_zero() {
        let record = encode(&fix(), &session(0.0), &identity(), &Utc);
        assert_eq!(record.distance, "0");
    }

    #[test]
    fn missing_kinematics_become_zero() {
        let mut fix = fix();
        fix.speed_mps = None;
        fix.bearing_deg = None;
        fix.altitude_m = None;
        let record = encode(&fix, &session(0.0), &identity(), &Utc);
        assert_eq!(record.speed, "0");
        assert_eq!(record.direction, "0");
        assert_eq!(record.extra_info, "0");
    }

    #[test]
    fn provider_tag_is_escaped() {
        let mut fix = fix();
        fix.provider = "fused network&gps".to_string();
        let record = encode(&fix, &session(0.0), &identity(), &Utc);
        assert_eq!(record.location_method, "fused+network%26gps");
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode(&fix(), &session(1500.0), &identity(), &Utc);
        let b = encode(&fix(), &session(1500.0), &identity(), &Utc);
        assert_eq!(a, b);
    }
}
