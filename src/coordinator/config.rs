use crate::settings::SettingsStore;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8787/location";
pub const DEFAULT_SEND_INTERVAL_SECONDS: u64 = 10;
pub const MIN_INTERVAL_SECONDS: u64 = 2;
pub const MAX_INTERVAL_SECONDS: u64 = 3600;

pub const KEY_SERVER_URL: &str = "serverURLString";
pub const KEY_SEND_INTERVAL: &str = "sendIntervalSeconds";
pub const KEY_TRACKING_ENABLED: &str = "isTrackingEnabled";

/// User-editable tracking configuration, persisted through a
/// [`SettingsStore`] so it survives restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub server_url: String,
    pub send_interval_seconds: u64,
    pub enabled: bool,
}

impl TrackingConfig {
    pub fn clamp_interval(seconds: u64) -> u64 {
        seconds.clamp(MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS)
    }

    pub fn load(store: &dyn SettingsStore) -> Self {
        let server_url = store
            .get(KEY_SERVER_URL)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let send_interval_seconds = store
            .get(KEY_SEND_INTERVAL)
            .and_then(|s| s.parse().ok())
            .map(Self::clamp_interval)
            .unwrap_or(DEFAULT_SEND_INTERVAL_SECONDS);
        let enabled = store
            .get(KEY_TRACKING_ENABLED)
            .map(|s| s == "true")
            .unwrap_or(false);

        TrackingConfig {
            server_url,
            send_interval_seconds,
            enabled,
        }
    }
}
