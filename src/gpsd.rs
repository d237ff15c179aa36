//! Location reports from a gpsd daemon over its JSON protocol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex;

use crate::acquirer::{LocationProvider, ProviderError};
use crate::models::LocationFix;

const WATCH_ENABLE: &str = "?WATCH={\"enable\":true,\"json\":true};\n";

/// A gpsd TPV (time-position-velocity) report. Only the fields the agent
/// uses are decoded.
#[derive(Debug, Deserialize)]
struct TpvReport {
    #[serde(default)]
    mode: u8,
    time: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
    track: Option<f64>,
    speed: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum Report {
    #[serde(rename = "TPV")]
    Tpv(TpvReport),
    #[serde(other)]
    Other,
}

impl TpvReport {
    /// Mode 2 is a 2D fix, mode 3 a 3D fix; anything less has no position.
    fn into_fix(self) -> Option<LocationFix> {
        if self.mode < 2 {
            return None;
        }
        let (latitude, longitude) = (self.lat?, self.lon?);
        let accuracy_m = match (self.eph, self.epx, self.epy) {
            (Some(eph), _, _) => eph,
            (None, Some(epx), Some(epy)) => epx.max(epy),
            _ => f64::INFINITY,
        };
        Some(LocationFix {
            latitude,
            longitude,
            accuracy_m,
            speed_mps: self.speed,
            bearing_deg: self.track,
            altitude_m: self.alt_msl.or(self.alt),
            timestamp: self.time.unwrap_or_else(Utc::now),
            provider: "gps".to_string(),
        })
    }
}

/// Parses one line of gpsd output; `None` for anything but a usable TPV.
fn parse_report(line: &str) -> Option<LocationFix> {
    match serde_json::from_str::<Report>(line) {
        Ok(Report::Tpv(tpv)) => tpv.into_fix(),
        Ok(Report::Other) => None,
        Err(err) => {
            tracing::trace!(error = %err, line, "Ignoring undecodable gpsd line");
            None
        }
    }
}

struct Watch {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Kept so the socket stays open for writing until released.
    _writer: tokio::net::tcp::OwnedWriteHalf,
}

/// Connects lazily and keeps the watch open across requests until released.
pub struct GpsdProvider {
    address: String,
    watch: Mutex<Option<Watch>>,
}

impl GpsdProvider {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            watch: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Watch, ProviderError> {
        tracing::debug!(address = %self.address, "Connecting to gpsd");
        let stream = TcpStream::connect(&self.address).await?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(WATCH_ENABLE.as_bytes()).await?;
        Ok(Watch {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        })
    }
}

#[async_trait]
impl LocationProvider for GpsdProvider {
    async fn next_fix(&self) -> Result<LocationFix, ProviderError> {
        let mut guard = self.watch.lock().await;
        let watch = match guard.take() {
            Some(watch) => guard.insert(watch),
            None => guard.insert(self.connect().await?),
        };

        loop {
            match watch.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(fix) = parse_report(&line) {
                        return Ok(fix);
                    }
                }
                Ok(None) => {
                    guard.take();
                    return Err(ProviderError::Disconnected);
                }
                Err(err) => {
                    guard.take();
                    return Err(err.into());
                }
            }
        }
    }

    async fn release(&self) {
        if self.watch.lock().await.take().is_some() {
            tracing::debug!(address = %self.address, "Closed gpsd watch");
        }
    }
}
