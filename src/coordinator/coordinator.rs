use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::auth::CredentialProvider;
use crate::location::{LocationEvent, LocationSource, MonitoringMode, PermissionStatus};
use crate::settings::SettingsStore;
use crate::uploader::Uploader;

use super::background::BackgroundExecution;
use super::config::{TrackingConfig, KEY_SEND_INTERVAL, KEY_SERVER_URL, KEY_TRACKING_ENABLED};
use super::outcome::SendOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CoordinatorMode {
    Disabled,
    Idle,
    Sending,
}

/// Non-blocking snapshot for display surfaces.
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub mode: CoordinatorMode,
    pub config: TrackingConfig,
    pub permission: PermissionStatus,
    pub source_error: Option<String>,
    pub last_outcome: Option<SendOutcome>,
}

#[derive(Debug)]
struct Shared {
    config: TrackingConfig,
    last_attempt_at: Option<DateTime<Utc>>,
    in_flight: bool,
    last_outcome: Option<SendOutcome>,
}

struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

struct Inner<S, C, U, B> {
    source: S,
    auth: C,
    uploader: U,
    background: B,
    settings: Arc<dyn SettingsStore>,
    shared: Arc<StdMutex<Shared>>,
}

/// Clears the in-flight flag on every exit path of a send cycle,
/// including unwinds and task aborts at an await point.
struct InFlightGuard {
    shared: Arc<StdMutex<Shared>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.in_flight = false;
        }
    }
}

/// The tracking/send coordinator: owns the tracking configuration,
/// listens to the location source, and serializes throttled uploads.
///
/// All state mutation goes through one `Shared` block; the `in_flight`
/// flag is the sole single-flight primitive. A cycle that passes the
/// throttle gate records its attempt timestamp immediately, so failed
/// attempts throttle the next trigger exactly like successful ones.
pub struct Coordinator<S, C, U, B> {
    inner: Arc<Inner<S, C, U, B>>,
    monitoring_mode: MonitoringMode,
    worker: Option<WorkerHandle>,
}

impl<S, C, U, B> Coordinator<S, C, U, B>
where
    S: LocationSource + 'static,
    C: CredentialProvider + 'static,
    U: Uploader + 'static,
    B: BackgroundExecution + 'static,
{
    pub fn new(
        source: S,
        auth: C,
        uploader: U,
        background: B,
        settings: Arc<dyn SettingsStore>,
        monitoring_mode: MonitoringMode,
    ) -> Self {
        let config = TrackingConfig::load(settings.as_ref());
        Coordinator {
            inner: Arc::new(Inner {
                source,
                auth,
                uploader,
                background,
                settings,
                shared: Arc::new(StdMutex::new(Shared {
                    config,
                    last_attempt_at: None,
                    in_flight: false,
                    last_outcome: None,
                })),
            }),
            monitoring_mode,
            worker: None,
        }
    }

    /// Enables tracking: requests elevated permission, starts monitoring,
    /// and spawns the event-loop worker. No-op if already enabled.
    pub fn start(&mut self) {
        {
            let shared = self.inner.shared.lock().unwrap();
            if shared.config.enabled && self.worker.is_some() {
                return;
            }
        }

        // Subscribe before monitoring starts so no event is missed.
        let events = self.inner.source.subscribe();
        self.inner.source.request_elevated_permission();
        self.inner.source.start_monitoring(self.monitoring_mode);

        if self.worker.is_none() {
            let (stop_tx, stop_rx) = oneshot::channel();
            let inner = self.inner.clone();
            let join = tokio::spawn(run_event_loop(inner, events, stop_rx));
            self.worker = Some(WorkerHandle { stop_tx, join });
        }

        self.inner.shared.lock().unwrap().config.enabled = true;
        self.inner.settings.set(KEY_TRACKING_ENABLED, "true");
        info!("tracking enabled ({} monitoring)", self.monitoring_mode);
    }

    /// Disables tracking and stops all monitoring. No-op if already
    /// disabled.
    pub async fn stop(&mut self) {
        let was_enabled = {
            let shared = self.inner.shared.lock().unwrap();
            shared.config.enabled
        };
        if !was_enabled && self.worker.is_none() {
            return;
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
        }
        self.inner.source.stop_monitoring();

        self.inner.shared.lock().unwrap().config.enabled = false;
        self.inner.settings.set(KEY_TRACKING_ENABLED, "false");
        info!("tracking disabled");
    }

    /// Forced send: bypasses the throttle but not single-flight, and
    /// works even while tracking is disabled.
    pub async fn send_now(&self) {
        self.inner.send(true).await;
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.inner.status()
    }

    pub fn config(&self) -> TrackingConfig {
        self.inner.shared.lock().unwrap().config.clone()
    }

    pub fn set_server_url(&self, url: &str) {
        self.inner.shared.lock().unwrap().config.server_url = url.to_string();
        self.inner.settings.set(KEY_SERVER_URL, url);
    }

    /// Stores the interval, clamped to the permitted range. Returns the
    /// value actually stored.
    pub fn set_send_interval_seconds(&self, seconds: u64) -> u64 {
        let clamped = TrackingConfig::clamp_interval(seconds);
        self.inner.shared.lock().unwrap().config.send_interval_seconds = clamped;
        self.inner
            .settings
            .set(KEY_SEND_INTERVAL, &clamped.to_string());
        clamped
    }
}

impl<S, C, U, B> Inner<S, C, U, B>
where
    S: LocationSource,
    C: CredentialProvider,
    U: Uploader,
    B: BackgroundExecution,
{
    fn status(&self) -> CoordinatorStatus {
        let shared = self.shared.lock().unwrap();
        let mode = if !shared.config.enabled {
            CoordinatorMode::Disabled
        } else if shared.in_flight {
            CoordinatorMode::Sending
        } else {
            CoordinatorMode::Idle
        };
        CoordinatorStatus {
            mode,
            config: shared.config.clone(),
            permission: self.source.permission_status(),
            source_error: self.source.last_error(),
            last_outcome: shared.last_outcome.clone(),
        }
    }

    /// One send cycle. Aborts silently when the throttle predicate
    /// fails; otherwise runs to completion and records the outcome.
    async fn send(&self, force: bool) {
        let now = Utc::now();
        let server_url = {
            let mut shared = self.shared.lock().unwrap();
            if !should_send(&shared, now, force) {
                return;
            }
            shared.in_flight = true;
            shared.last_attempt_at = Some(now);
            shared.config.server_url.clone()
        };
        let _in_flight = InFlightGuard {
            shared: self.shared.clone(),
        };

        // A failed refresh does not abort the cycle; the uploader's
        // precondition surfaces the problem if the token is still absent.
        if let Err(e) = self.auth.refresh_if_needed().await {
            warn!("credential refresh failed: {}", e);
        }

        let _grant = self.background.begin("send-location");

        let token = self.auth.bearer_token();
        let sample = self.source.latest_sample();
        let result = self
            .uploader
            .upload(&server_url, token.as_deref(), sample.as_ref())
            .await;

        let mut shared = self.shared.lock().unwrap();
        match result {
            Ok(success) => {
                info!("location sent (HTTP {})", success.status_code);
                shared.last_outcome = Some(SendOutcome::Success {
                    status_code: success.status_code,
                    response_body: success.response_body,
                    at: now,
                });
            }
            Err(e) => {
                warn!("location send failed: {}", e);
                shared.last_outcome = Some(SendOutcome::Failure {
                    error: e.to_string(),
                    at: now,
                });
            }
        }
    }
}

/// Throttle predicate. The in-flight check dominates everything,
/// including forced sends; forced sends bypass the enabled flag and the
/// interval; non-forced sends require tracking to be enabled and the
/// interval to have elapsed since the last attempt.
fn should_send(shared: &Shared, now: DateTime<Utc>, force: bool) -> bool {
    if shared.in_flight {
        return false;
    }
    if force {
        return true;
    }
    if !shared.config.enabled {
        return false;
    }
    match shared.last_attempt_at {
        None => true,
        Some(last) => now - last >= Duration::seconds(shared.config.send_interval_seconds as i64),
    }
}

async fn run_event_loop<S, C, U, B>(
    inner: Arc<Inner<S, C, U, B>>,
    mut events: broadcast::Receiver<LocationEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) where
    S: LocationSource,
    C: CredentialProvider,
    U: Uploader,
    B: BackgroundExecution,
{
    loop {
        let event = tokio::select! {
            _ = &mut stop_rx => return,
            event = events.recv() => event,
        };
        match event {
            Ok(LocationEvent::Sample(_)) => inner.send(false).await,
            Ok(LocationEvent::Permission(status)) => {
                debug!("location permission changed: {}", status)
            }
            Ok(LocationEvent::Error(message)) => warn!("location source error: {}", message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("event loop lagged, skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::BackgroundGrant;
    use crate::location::LocationSample;
    use crate::settings::MemoryStore;
    use crate::uploader::{SendError, SendSuccess};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio::time::{sleep, timeout};

    #[derive(Clone)]
    struct FakeSource {
        state: Arc<FakeSourceState>,
    }

    struct FakeSourceState {
        events: broadcast::Sender<LocationEvent>,
        latest: StdMutex<Option<LocationSample>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        permission_requests: AtomicUsize,
    }

    impl FakeSource {
        fn new() -> Self {
            let (events, _) = broadcast::channel(16);
            FakeSource {
                state: Arc::new(FakeSourceState {
                    events,
                    latest: StdMutex::new(Some(LocationSample::new(
                        48.0,
                        2.0,
                        Utc::now(),
                        "dev-fake".to_string(),
                    ))),
                    starts: AtomicUsize::new(0),
                    stops: AtomicUsize::new(0),
                    permission_requests: AtomicUsize::new(0),
                }),
            }
        }

        fn emit_sample(&self) {
            let sample = self.state.latest.lock().unwrap().clone().unwrap();
            let _ = self.state.events.send(LocationEvent::Sample(sample));
        }
    }

    impl LocationSource for FakeSource {
        fn permission_status(&self) -> PermissionStatus {
            PermissionStatus::Always
        }

        fn latest_sample(&self) -> Option<LocationSample> {
            self.state.latest.lock().unwrap().clone()
        }

        fn last_error(&self) -> Option<String> {
            None
        }

        fn request_elevated_permission(&self) {
            self.state.permission_requests.fetch_add(1, Ordering::SeqCst);
        }

        fn start_monitoring(&self, _mode: MonitoringMode) {
            self.state.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop_monitoring(&self) {
            self.state.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn subscribe(&self) -> broadcast::Receiver<LocationEvent> {
            self.state.events.subscribe()
        }
    }

    #[derive(Clone)]
    struct FakeAuth {
        state: Arc<FakeAuthState>,
    }

    struct FakeAuthState {
        token: StdMutex<Option<String>>,
        refreshes: AtomicUsize,
        fail_refresh: AtomicBool,
    }

    impl FakeAuth {
        fn new() -> Self {
            FakeAuth {
                state: Arc::new(FakeAuthState {
                    token: StdMutex::new(Some("tok-fake".to_string())),
                    refreshes: AtomicUsize::new(0),
                    fail_refresh: AtomicBool::new(false),
                }),
            }
        }
    }

    impl CredentialProvider for FakeAuth {
        fn is_signed_in(&self) -> bool {
            self.state.token.lock().unwrap().is_some()
        }

        fn bearer_token(&self) -> Option<String> {
            self.state.token.lock().unwrap().clone()
        }

        async fn refresh_if_needed(&self) -> Result<(), crate::auth::AuthError> {
            self.state.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_refresh.load(Ordering::SeqCst) {
                Err(crate::auth::AuthError::RefreshFailed("fake".to_string()))
            } else {
                Ok(())
            }
        }
    }

    enum UploadResponse {
        Succeed(u16),
        FailHttp(u16, String),
    }

    #[derive(Clone)]
    struct RecordingUploader {
        state: Arc<RecordingUploaderState>,
    }

    struct RecordingUploaderState {
        attempts: AtomicUsize,
        gate: StdMutex<Option<Arc<Notify>>>,
        response: StdMutex<UploadResponse>,
    }

    impl RecordingUploader {
        fn new() -> Self {
            RecordingUploader {
                state: Arc::new(RecordingUploaderState {
                    attempts: AtomicUsize::new(0),
                    gate: StdMutex::new(None),
                    response: StdMutex::new(UploadResponse::Succeed(200)),
                }),
            }
        }

        fn attempts(&self) -> usize {
            self.state.attempts.load(Ordering::SeqCst)
        }

        fn fail_with(&self, status_code: u16, body: &str) {
            *self.state.response.lock().unwrap() =
                UploadResponse::FailHttp(status_code, body.to_string());
        }
    }

    impl Uploader for RecordingUploader {
        async fn upload(
            &self,
            _destination: &str,
            _bearer_token: Option<&str>,
            _sample: Option<&LocationSample>,
        ) -> Result<SendSuccess, SendError> {
            self.state.attempts.fetch_add(1, Ordering::SeqCst);
            let gate = self.state.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            match &*self.state.response.lock().unwrap() {
                UploadResponse::Succeed(status_code) => Ok(SendSuccess {
                    status_code: *status_code,
                    response_body: "ok".to_string(),
                }),
                UploadResponse::FailHttp(status_code, body) => Err(SendError::Http {
                    status_code: *status_code,
                    body: body.clone(),
                }),
            }
        }
    }

    #[derive(Clone, Default)]
    struct CountingBackground {
        begun: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl BackgroundExecution for CountingBackground {
        fn begin(&self, _name: &str) -> Option<BackgroundGrant> {
            self.begun.fetch_add(1, Ordering::SeqCst);
            let released = self.released.clone();
            Some(BackgroundGrant::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    type TestCoordinator = Coordinator<FakeSource, FakeAuth, RecordingUploader, CountingBackground>;

    struct Fixture {
        coordinator: TestCoordinator,
        source: FakeSource,
        auth: FakeAuth,
        uploader: RecordingUploader,
        background: CountingBackground,
    }

    fn fixture(enabled: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY_SEND_INTERVAL, "10");
        store.set(KEY_TRACKING_ENABLED, if enabled { "true" } else { "false" });

        let source = FakeSource::new();
        let auth = FakeAuth::new();
        let uploader = RecordingUploader::new();
        let background = CountingBackground::default();
        let coordinator = Coordinator::new(
            source.clone(),
            auth.clone(),
            uploader.clone(),
            background.clone(),
            store,
            MonitoringMode::Standard,
        );
        Fixture {
            coordinator,
            source,
            auth,
            uploader,
            background,
        }
    }

    fn backdate_last_attempt(coordinator: &TestCoordinator, seconds_ago: i64) {
        coordinator.inner.shared.lock().unwrap().last_attempt_at =
            Some(Utc::now() - Duration::seconds(seconds_ago));
    }

    fn last_outcome(coordinator: &TestCoordinator) -> Option<SendOutcome> {
        coordinator.inner.shared.lock().unwrap().last_outcome.clone()
    }

    #[tokio::test]
    async fn non_forced_trigger_is_throttled_within_interval() {
        let f = fixture(true);
        backdate_last_attempt(&f.coordinator, 5);

        f.coordinator.inner.send(false).await;

        assert_eq!(f.uploader.attempts(), 0);
        assert!(last_outcome(&f.coordinator).is_none());
    }

    #[tokio::test]
    async fn non_forced_trigger_fires_once_interval_elapsed() {
        let f = fixture(true);
        backdate_last_attempt(&f.coordinator, 10);
        let seeded = f.coordinator.inner.shared.lock().unwrap().last_attempt_at;

        f.coordinator.inner.send(false).await;

        assert_eq!(f.uploader.attempts(), 1);
        let outcome = last_outcome(&f.coordinator).unwrap();
        assert!(outcome.is_success());
        // Attempt timestamp moved forward.
        let updated = f.coordinator.inner.shared.lock().unwrap().last_attempt_at;
        assert!(updated > seeded);
    }

    #[tokio::test]
    async fn first_trigger_sends_immediately() {
        let f = fixture(true);
        f.coordinator.inner.send(false).await;
        assert_eq!(f.uploader.attempts(), 1);
        assert_eq!(f.auth.state.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_blocks_non_forced_but_not_forced_sends() {
        let f = fixture(false);

        f.coordinator.inner.send(false).await;
        assert_eq!(f.uploader.attempts(), 0);

        f.coordinator.send_now().await;
        assert_eq!(f.uploader.attempts(), 1);
    }

    #[tokio::test]
    async fn send_now_bypasses_the_throttle() {
        let f = fixture(true);
        backdate_last_attempt(&f.coordinator, 0);

        f.coordinator.inner.send(false).await;
        assert_eq!(f.uploader.attempts(), 0);

        f.coordinator.send_now().await;
        assert_eq!(f.uploader.attempts(), 1);
    }

    #[tokio::test]
    async fn in_flight_cycle_drops_all_concurrent_triggers() {
        let f = fixture(true);
        let gate = Arc::new(Notify::new());
        *f.uploader.state.gate.lock().unwrap() = Some(gate.clone());

        let inner = f.coordinator.inner.clone();
        let blocked = tokio::spawn(async move { inner.send(true).await });

        // Wait until the cycle is inside the uploader and blocked.
        timeout(std::time::Duration::from_secs(1), async {
            while f.uploader.attempts() < 1 {
                sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.coordinator.status().mode, CoordinatorMode::Sending);

        // Both a sample trigger and a forced request are dropped.
        f.coordinator.inner.send(false).await;
        f.coordinator.send_now().await;
        assert_eq!(f.uploader.attempts(), 1);

        gate.notify_one();
        blocked.await.unwrap();
        assert_eq!(f.uploader.attempts(), 1);
        assert_eq!(f.coordinator.status().mode, CoordinatorMode::Idle);

        // With the cycle complete, a forced send goes through again.
        *f.uploader.state.gate.lock().unwrap() = None;
        f.coordinator.send_now().await;
        assert_eq!(f.uploader.attempts(), 2);
    }

    #[tokio::test]
    async fn failed_attempt_still_updates_attempt_timestamp() {
        let f = fixture(true);
        f.uploader.fail_with(500, "boom");

        f.coordinator.send_now().await;
        assert_eq!(f.uploader.attempts(), 1);
        let outcome = last_outcome(&f.coordinator).unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.status_text().contains("500"));

        // The throttle measures from the failed attempt.
        f.coordinator.inner.send(false).await;
        assert_eq!(f.uploader.attempts(), 1);
    }

    #[tokio::test]
    async fn refresh_failure_does_not_abort_the_cycle() {
        let f = fixture(true);
        f.auth.state.fail_refresh.store(true, Ordering::SeqCst);
        *f.auth.state.token.lock().unwrap() = None;

        f.coordinator.send_now().await;

        // The cycle still reached the uploader with whatever credential
        // state resulted.
        assert_eq!(f.uploader.attempts(), 1);
        assert!(last_outcome(&f.coordinator).is_some());
    }

    #[tokio::test]
    async fn background_grant_is_released_on_every_outcome() {
        let f = fixture(true);

        f.coordinator.send_now().await;
        assert_eq!(f.background.begun.load(Ordering::SeqCst), 1);
        assert_eq!(f.background.released.load(Ordering::SeqCst), 1);

        f.uploader.fail_with(503, "overloaded");
        f.coordinator.send_now().await;
        assert_eq!(f.background.begun.load(Ordering::SeqCst), 2);
        assert_eq!(f.background.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn interval_setting_is_clamped_before_storing() {
        let f = fixture(true);
        assert_eq!(f.coordinator.set_send_interval_seconds(1), 2);
        assert_eq!(f.coordinator.config().send_interval_seconds, 2);

        assert_eq!(f.coordinator.set_send_interval_seconds(7200), 3600);
        assert_eq!(f.coordinator.config().send_interval_seconds, 3600);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let mut f = fixture(false);

        f.coordinator.start();
        f.coordinator.start();
        assert_eq!(f.source.state.starts.load(Ordering::SeqCst), 1);
        assert_eq!(f.source.state.permission_requests.load(Ordering::SeqCst), 1);
        assert!(f.coordinator.config().enabled);

        f.coordinator.stop().await;
        f.coordinator.stop().await;
        assert_eq!(f.source.state.stops.load(Ordering::SeqCst), 1);
        assert!(!f.coordinator.config().enabled);

        // stop() then start() leaves tracking enabled, with exactly one
        // new registration.
        f.coordinator.start();
        assert!(f.coordinator.config().enabled);
        assert_eq!(f.source.state.starts.load(Ordering::SeqCst), 2);
        f.coordinator.stop().await;
    }

    #[tokio::test]
    async fn sample_events_drive_throttled_sends() {
        let mut f = fixture(false);
        f.coordinator.start();

        f.source.emit_sample();
        timeout(std::time::Duration::from_secs(1), async {
            while f.uploader.attempts() < 1 {
                sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // A second sample inside the interval is throttled.
        f.source.emit_sample();
        sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(f.uploader.attempts(), 1);

        f.coordinator.stop().await;
    }

    #[tokio::test]
    async fn status_reports_mode_and_outcome() {
        let f = fixture(false);
        let status = f.coordinator.status();
        assert_eq!(status.mode, CoordinatorMode::Disabled);
        assert_eq!(status.permission, PermissionStatus::Always);
        assert!(status.source_error.is_none());
        assert!(status.last_outcome.is_none());

        f.coordinator.send_now().await;
        let status = f.coordinator.status();
        assert_eq!(status.mode, CoordinatorMode::Disabled);
        assert!(status.last_outcome.unwrap().is_success());
    }
}
