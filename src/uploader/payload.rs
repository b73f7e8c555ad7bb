use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::location::LocationSample;

/// Wire body POSTed to the destination endpoint. Field names are part of
/// the server contract; absent readings are omitted entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(
        rename = "horizontalAccuracy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub horizontal_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
    #[serde(rename = "timestampISO8601")]
    pub timestamp_iso8601: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

impl From<&LocationSample> for LocationPayload {
    fn from(sample: &LocationSample) -> Self {
        LocationPayload {
            latitude: sample.latitude,
            longitude: sample.longitude,
            horizontal_accuracy: sample.horizontal_accuracy,
            altitude: sample.altitude,
            speed: sample.speed,
            course: sample.course,
            timestamp_iso8601: sample
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            device_id: sample.device_id.clone(),
        }
    }
}
