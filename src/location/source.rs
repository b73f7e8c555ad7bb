use tokio::sync::broadcast;

use super::types::{LocationSample, MonitoringMode, PermissionStatus};

/// Change notification emitted by a [`LocationSource`].
#[derive(Debug, Clone)]
pub enum LocationEvent {
    Sample(LocationSample),
    Permission(PermissionStatus),
    Error(String),
}

/// The coordinator's view of OS location services.
///
/// A source is a passive observer: it owns the latest known state and
/// broadcasts change events; it never decides what to do with a sample.
/// Start/stop are expected to be idempotent.
pub trait LocationSource: Send + Sync {
    fn permission_status(&self) -> PermissionStatus;
    fn latest_sample(&self) -> Option<LocationSample>;
    fn last_error(&self) -> Option<String>;

    fn request_elevated_permission(&self);
    fn start_monitoring(&self, mode: MonitoringMode);
    fn stop_monitoring(&self);

    fn subscribe(&self) -> broadcast::Receiver<LocationEvent>;
}
