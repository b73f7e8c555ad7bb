use chrono::Utc;
use log::debug;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::source::{LocationEvent, LocationSource};
use super::types::{LocationSample, MonitoringMode, PermissionStatus};

/// Simulated horizontal accuracy, meters.
const SIM_ACCURACY_M: f64 = 5.0;
/// Walk radius around the configured center, degrees (roughly 50 m).
const SIM_RADIUS_DEG: f64 = 0.0005;
/// Low-power wake-ups fire this many times slower than standard updates.
const LOW_POWER_FACTOR: u32 = 6;

#[derive(Debug)]
struct SourceState {
    permission: PermissionStatus,
    latest: Option<LocationSample>,
    last_error: Option<String>,
}

struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    #[allow(dead_code)]
    join: JoinHandle<()>,
}

/// Deterministic stand-in for platform location services: walks a small
/// circle around a fixed center, one sample per period. Useful on hosts
/// without a positioning stack and as the demo source for the CLI.
pub struct SimulatedSource {
    device_id: String,
    center: (f64, f64),
    period: Duration,
    shared: Arc<StdMutex<SourceState>>,
    events: broadcast::Sender<LocationEvent>,
    worker: StdMutex<Option<WorkerHandle>>,
}

impl SimulatedSource {
    pub fn new(device_id: String, center: (f64, f64), period: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        SimulatedSource {
            device_id,
            center,
            period,
            shared: Arc::new(StdMutex::new(SourceState {
                permission: PermissionStatus::NotDetermined,
                latest: None,
                last_error: None,
            })),
            events,
            worker: StdMutex::new(None),
        }
    }
}

fn walk_sample(device_id: &str, center: (f64, f64), step: u64) -> LocationSample {
    // One full lap every 60 steps.
    let theta = (step % 60) as f64 / 60.0 * std::f64::consts::TAU;
    let latitude = center.0 + SIM_RADIUS_DEG * theta.sin();
    let longitude = center.1 + SIM_RADIUS_DEG * theta.cos();
    // Tangential heading, clockwise from north.
    let course = (theta.to_degrees() + 90.0) % 360.0;

    LocationSample::new(latitude, longitude, Utc::now(), device_id.to_string())
        .with_horizontal_accuracy(SIM_ACCURACY_M)
        .with_altitude(0.0)
        .with_speed(1.4)
        .with_course(course)
}

impl LocationSource for SimulatedSource {
    fn permission_status(&self) -> PermissionStatus {
        self.shared.lock().unwrap().permission
    }

    fn latest_sample(&self) -> Option<LocationSample> {
        self.shared.lock().unwrap().latest.clone()
    }

    fn last_error(&self) -> Option<String> {
        self.shared.lock().unwrap().last_error.clone()
    }

    fn request_elevated_permission(&self) {
        // The simulator always grants "always" access.
        let mut state = self.shared.lock().unwrap();
        state.last_error = None;
        if state.permission != PermissionStatus::Always {
            state.permission = PermissionStatus::Always;
            let _ = self
                .events
                .send(LocationEvent::Permission(PermissionStatus::Always));
        }
    }

    fn start_monitoring(&self, mode: MonitoringMode) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }

        let period = match mode {
            MonitoringMode::Standard => self.period,
            MonitoringMode::LowPower => self.period * LOW_POWER_FACTOR,
        };
        debug!("simulated source: monitoring {} every {:?}", mode, period);

        let shared = self.shared.clone();
        let events = self.events.clone();
        let device_id = self.device_id.clone();
        let center = self.center;
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let join = tokio::spawn(async move {
            let mut step: u64 = 0;
            loop {
                let should_stop = tokio::select! {
                    _ = sleep(period) => false,
                    _ = &mut stop_rx => true,
                };
                if should_stop {
                    return;
                }

                let sample = walk_sample(&device_id, center, step);
                step += 1;
                shared.lock().unwrap().latest = Some(sample.clone());
                let _ = events.send(LocationEvent::Sample(sample));
            }
        });

        *worker = Some(WorkerHandle { stop_tx, join });
    }

    fn stop_monitoring(&self) {
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.stop_tx.send(());
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<LocationEvent> {
        self.events.subscribe()
    }
}
