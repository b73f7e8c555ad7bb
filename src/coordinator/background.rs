/// Time-boxed permission from the host to keep running while the app is
/// not in the foreground. Released exactly once, on drop, so every exit
/// path of a send cycle returns the grant.
pub struct BackgroundGrant {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl BackgroundGrant {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        BackgroundGrant {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for BackgroundGrant {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Host environment hook for background execution windows. Acquisition
/// is best-effort: `None` means the host imposes no limit (or refused
/// the grant), and the send attempt proceeds either way.
pub trait BackgroundExecution: Send + Sync {
    fn begin(&self, name: &str) -> Option<BackgroundGrant>;
}

/// Hosts without background-execution limits (desktop, server).
pub struct UnlimitedBackground;

impl BackgroundExecution for UnlimitedBackground {
    fn begin(&self, _name: &str) -> Option<BackgroundGrant> {
        None
    }
}
