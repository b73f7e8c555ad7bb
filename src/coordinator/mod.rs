mod background;
mod config;
mod coordinator;
mod outcome;

pub use background::{BackgroundExecution, BackgroundGrant, UnlimitedBackground};
pub use config::{TrackingConfig, DEFAULT_SERVER_URL, DEFAULT_SEND_INTERVAL_SECONDS};
pub use coordinator::{Coordinator, CoordinatorMode, CoordinatorStatus};
pub use outcome::SendOutcome;
