use crate::config::DeviceRestriction;
use crate::update::{StartOutcome, UpdateManager, UpdateRequest};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Host conditions periodic updates can be restricted to.
pub trait DeviceState: Send + Sync {
    fn has_network(&self) -> bool;

    /// True on networks that are not billed per byte.
    fn is_unmetered_network(&self) -> bool;

    fn is_charging(&self) -> bool;

    fn is_battery_low(&self) -> bool;
}

const LOW_BATTERY_PERCENT: u32 = 15;

/// Reads network and power state from Linux sysfs. Hosts without a battery
/// count as charging; hosts without sysfs count as online.
#[derive(Debug, Clone)]
pub struct HostDeviceState {
    sysfs: std::path::PathBuf,
}

impl Default for HostDeviceState {
    fn default() -> Self {
        Self::with_sysfs("/sys/class")
    }
}

impl HostDeviceState {
    pub fn with_sysfs(root: impl Into<std::path::PathBuf>) -> Self {
        Self { sysfs: root.into() }
    }

    fn read(path: &Path) -> Option<String> {
        std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    /// Names of non-loopback interfaces that are up, or `None` without sysfs.
    fn interfaces_up(&self) -> Option<Vec<String>> {
        let entries = std::fs::read_dir(self.sysfs.join("net")).ok()?;
        Some(
            entries
                .flatten()
                .filter_map(|entry| {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let up = Self::read(&entry.path().join("operstate")).as_deref() == Some("up");
                    (name != "lo" && up).then_some(name)
                })
                .collect(),
        )
    }

    fn supplies(&self) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(self.sysfs.join("power_supply"))
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    fn batteries(&self) -> Vec<std::path::PathBuf> {
        self.supplies()
            .into_iter()
            .filter(|p| Self::read(&p.join("type")).as_deref() == Some("Battery"))
            .collect()
    }
}

impl DeviceState for HostDeviceState {
    fn has_network(&self) -> bool {
        self.interfaces_up().map_or(true, |up| !up.is_empty())
    }

    fn is_unmetered_network(&self) -> bool {
        // Cellular modems show up as wwan interfaces.
        self.interfaces_up()
            .map_or(true, |up| up.iter().any(|name| !name.starts_with("wwan")))
    }

    fn is_charging(&self) -> bool {
        let batteries = self.batteries();
        if batteries.is_empty() {
            return true;
        }
        let on_mains = self.supplies().iter().any(|p| {
            Self::read(&p.join("type")).as_deref() == Some("Mains") && Self::read(&p.join("online")).as_deref() == Some("1")
        });
        on_mains
            || batteries.iter().any(|b| {
                matches!(Self::read(&b.join("status")).as_deref(), Some("Charging") | Some("Full"))
            })
    }

    fn is_battery_low(&self) -> bool {
        self.batteries().iter().any(|b| {
            Self::read(&b.join("capacity"))
                .and_then(|c| c.parse::<u32>().ok())
                .is_some_and(|c| c < LOW_BATTERY_PERCENT)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunNow {
    /// Added to the chapter update already running.
    Merged,
    /// Started as a one-shot task, replacing any earlier one-shot.
    Scheduled,
}

/// Periodic and on-demand triggers for an [`UpdateManager`].
pub struct UpdateScheduler {
    manager: UpdateManager,
    device: Arc<dyn DeviceState>,
    restrictions: Vec<DeviceRestriction>,
    periodic: Mutex<Option<JoinHandle<()>>>,
    one_shot: Mutex<Option<JoinHandle<StartOutcome>>>,
}

impl UpdateScheduler {
    pub fn new(manager: UpdateManager, device: Arc<dyn DeviceState>, restrictions: Vec<DeviceRestriction>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            device,
            restrictions,
            periodic: Mutex::new(None),
            one_shot: Mutex::new(None),
        })
    }

    /// Network is always required; the rest follows the configured restrictions.
    pub fn constraints_met(&self) -> bool {
        if !self.device.has_network() {
            return false;
        }
        self.restrictions.iter().all(|restriction| match restriction {
            DeviceRestriction::OnlyOnWifi => self.device.is_unmetered_network(),
            DeviceRestriction::Charging => self.device.is_charging(),
            DeviceRestriction::BatteryNotLow => !self.device.is_battery_low(),
        })
    }

    /// Replaces the periodic task. Zero or negative hours disable it.
    pub fn setup_periodic(self: &Arc<Self>, interval_hours: i64) -> bool {
        if interval_hours <= 0 {
            self.cancel_periodic();
            info!("Periodic library updates disabled");
            return false;
        }
        let hours = interval_hours.unsigned_abs();
        self.schedule_every(Duration::from_secs(hours * 60 * 60));
        info!("📅 Library updates every {} hours", hours);
        true
    }

    /// Replaces the periodic task with one that ticks every `period`, first
    /// after one full period.
    pub fn schedule_every(self: &Arc<Self>, period: Duration) {
        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !scheduler.constraints_met() {
                    debug!("Skipping periodic update, device constraints not met");
                    continue;
                }
                match scheduler.manager.start(UpdateRequest::chapters()).await {
                    StartOutcome::Finished(report) => debug!(
                        "Periodic update {} done: {} updated, {} failed",
                        report.run_id,
                        report.updates.len(),
                        report.failed.len()
                    ),
                    StartOutcome::Merged | StartOutcome::Busy => debug!("Periodic update joined the running one"),
                }
            }
        });

        if let Some(previous) = self.periodic.lock().unwrap_or_else(|p| p.into_inner()).replace(task) {
            previous.abort();
        }
    }

    pub fn is_periodic_scheduled(&self) -> bool {
        self.periodic
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn cancel_periodic(&self) {
        if let Some(task) = self.periodic.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }

    /// Runs `request` now, merging into a running chapter update when possible.
    pub async fn run_now(&self, request: UpdateRequest) -> RunNow {
        if self.manager.added_if_running(&request).await {
            return RunNow::Merged;
        }

        let manager = self.manager.clone();
        let task = tokio::spawn(async move { manager.start(request).await });
        if let Some(previous) = self.one_shot.lock().unwrap_or_else(|p| p.into_inner()).replace(task) {
            previous.abort();
        }
        RunNow::Scheduled
    }

    /// Waits for the latest one-shot task, if any.
    pub async fn wait_one_shot(&self) -> Option<StartOutcome> {
        let task = self.one_shot.lock().unwrap_or_else(|p| p.into_inner()).take()?;
        task.await.ok()
    }

    pub async fn shutdown(&self) {
        self.cancel_periodic();
        if let Some(task) = self.one_shot.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
        self.manager.stop().await;
        info!("Scheduler shut down");
    }
}
