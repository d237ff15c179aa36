use async_trait::async_trait;

use crate::acquirer::{LocationProvider, ProviderError};
use crate::models::LocationFix;

const DEFAULT_ACCURACY_M: f64 = 10.0;

/// A position given on the command line, for hosts that do not move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
}

impl std::str::FromStr for FixedPosition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(anyhow::anyhow!(
                "Invalid position format. Expected 'lat,lon' or 'lat,lon,accuracy', got '{}'",
                s
            ));
        }

        let latitude = parts[0].parse::<f64>()?;
        let longitude = parts[1].parse::<f64>()?;
        let accuracy_m = match parts.get(2) {
            Some(accuracy) => accuracy.parse::<f64>()?,
            None => DEFAULT_ACCURACY_M,
        };

        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(anyhow::anyhow!(
                "Position out of range. Got lat={}, lon={}",
                latitude,
                longitude
            ));
        }
        if !(accuracy_m >= 0.0) {
            return Err(anyhow::anyhow!("Accuracy must be non-negative, got {}", accuracy_m));
        }

        Ok(FixedPosition {
            latitude,
            longitude,
            accuracy_m,
        })
    }
}

/// Reports the same position every time it is asked.
pub struct FixedProvider {
    position: FixedPosition,
}

impl FixedProvider {
    pub fn new(position: FixedPosition) -> Self {
        Self { position }
    }
}

#[async_trait]
impl LocationProvider for FixedProvider {
    async fn next_fix(&self) -> Result<LocationFix, ProviderError> {
        Ok(LocationFix {
            latitude: self.position.latitude,
            longitude: self.position.longitude,
            accuracy_m: self.position.accuracy_m,
            speed_mps: Some(0.0),
            bearing_deg: None,
            altitude_m: None,
            timestamp: chrono::Utc::now(),
            provider: "fixed".to_string(),
        })
    }
}
