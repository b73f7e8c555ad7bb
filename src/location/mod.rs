mod device_id;
mod simulated;
mod source;
mod types;

pub use device_id::stable_device_id;
pub use simulated::SimulatedSource;
pub use source::{LocationEvent, LocationSource};
pub use types::{LocationSample, MonitoringMode, PermissionStatus};
