use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in signed degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// One position reported by a location provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Estimated horizontal error radius in meters
    pub accuracy_m: f64,
    pub speed_mps: Option<f64>,
    pub bearing_deg: Option<f64>,
    pub altitude_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Which location technology produced the fix, e.g. "gps" or "network"
    pub provider: String,
}

impl LocationFix {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// NaN accuracy never qualifies.
    pub fn is_accurate_within(&self, threshold_m: f64) -> bool {
        self.accuracy_m <= threshold_m
    }
}

/// The record sent to the collector. Field names are the collector's form
/// field names; every value is already rendered as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub latitude: String,
    pub longitude: String,
    pub speed: String,
    pub direction: String,
    pub accuracy: String,
    pub distance: String,
    pub date: String,
    #[serde(rename = "phonenumber")]
    pub user_id: String,
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "locationmethod")]
    pub location_method: String,
    #[serde(rename = "eventtype")]
    pub event_type: String,
    #[serde(rename = "extrainfo")]
    pub extra_info: String,
}

// ========================
// Control API Request and Response Models
// ========================

/// Request body for the /api/tracking/enable endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnableRequest {
    /// In seconds; the agent default is used when absent
    pub interval: Option<u64>,
    #[serde(rename = "userid")]
    pub user_id: String,
    #[serde(default)]
    pub endpoint: String,
}

/// Request body for the /api/tracking/interval endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct IntervalRequest {
    pub interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    AwaitingFix,
    AwaitingUpload,
}

/// How the most recent cycle ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Uploaded { status: u16 },
    UploadFailed { reason: String },
    NoFix { reason: String },
    StoreUnavailable { reason: String },
}

/// Response body for every control endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub tracking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub interval_seconds: u64,
    pub phase: CyclePhase,
    pub cumulative_distance_meters: f64,
    pub wake_locks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
}
