use chrono::{DateTime, Utc};

/// OS-level location permission, mirrored from the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PermissionStatus {
    NotDetermined,
    Restricted,
    Denied,
    WhenInUse,
    Always,
}

/// How aggressively the source should watch for movement.
///
/// `Standard` keeps continuous updates flowing; `LowPower` relies on the
/// platform's coarse wake-up events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MonitoringMode {
    Standard,
    LowPower,
}

/// One position reading. Optional fields are `None` when the underlying
/// reading reported a negative (invalid) value.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>, device_id: String) -> Self {
        LocationSample {
            latitude,
            longitude,
            horizontal_accuracy: None,
            altitude: None,
            speed: None,
            course: None,
            timestamp,
            device_id,
        }
    }

    pub fn with_horizontal_accuracy(mut self, meters: f64) -> Self {
        self.horizontal_accuracy = valid_metric(meters);
        self
    }

    pub fn with_altitude(mut self, meters: f64) -> Self {
        self.altitude = valid_metric(meters);
        self
    }

    pub fn with_speed(mut self, meters_per_second: f64) -> Self {
        self.speed = valid_metric(meters_per_second);
        self
    }

    pub fn with_course(mut self, degrees: f64) -> Self {
        self.course = valid_metric(degrees);
        self
    }
}

fn valid_metric(value: f64) -> Option<f64> {
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}
