use crate::error::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on how long a single update run may keep the host awake.
pub const WAKE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Something that keeps the host from sleeping while it is held.
pub trait WakeLock: Send + Sync {
    fn acquire(&self, tag: &str) -> Result<()>;

    fn release(&self, tag: &str);
}

/// A held wake lock that is released exactly once: explicitly, when the
/// timeout elapses, or when the guard is dropped.
pub struct WakeGuard {
    state: Arc<GuardState>,
    timeout: Option<JoinHandle<()>>,
}

struct GuardState {
    lock: Arc<dyn WakeLock>,
    tag: String,
    released: AtomicBool,
}

impl GuardState {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.lock.release(&self.tag);
        true
    }
}

impl WakeGuard {
    pub fn acquire(lock: Arc<dyn WakeLock>, tag: impl Into<String>, timeout: Duration) -> Self {
        let tag = tag.into();
        let acquired = match lock.acquire(&tag) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not acquire wake lock {}: {}", tag, e);
                false
            }
        };

        let state = Arc::new(GuardState {
            lock,
            tag,
            released: AtomicBool::new(!acquired),
        });

        let timeout = acquired.then(|| {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if state.release() {
                    warn!("Wake lock {} timed out and was released", state.tag);
                }
            })
        });

        Self { state, timeout }
    }

    pub fn release(&self) {
        if let Some(timeout) = &self.timeout {
            timeout.abort();
        }
        if self.state.release() {
            debug!("Released wake lock {}", self.state.tag);
        }
    }

    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::SeqCst)
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Advertises an active update through `<dir>/<tag>.lock`, for host tooling
/// such as `systemd-inhibit` wrappers to pick up.
#[derive(Debug, Clone)]
pub struct LockFileWakeLock {
    dir: PathBuf,
}

impl LockFileWakeLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", tag))
    }
}

impl WakeLock for LockFileWakeLock {
    fn acquire(&self, tag: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(
            self.path(tag),
            format!("{} {}\n", std::process::id(), chrono::Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    fn release(&self, tag: &str) {
        if let Err(e) = std::fs::remove_file(self.path(tag)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove wake lock file for {}: {}", tag, e);
            }
        }
    }
}
