//! Library update orchestration.
//!
//! An [`UpdateManager`] owns at most one [`run::Run`] at a time. Chapter runs
//! group their manga by source and drain each source sequentially on its own
//! task, with at most [`MAX_CONCURRENT_SOURCES`] sources in flight. Requests
//! for chapters that arrive while a chapter run is active are merged into it.
//! Every run ends in a single finalization that reports results, releases the
//! wake lock and publishes [`UpdateEvent::Finished`].

mod candidates;
mod chapters;
mod details;
mod run;

pub use candidates::{apply_restrictions, distinct, explicit, select, skip_reason, Selection, SkipReason};
pub use run::MAX_CONCURRENT_SOURCES;

use crate::config::LibraryUpdateConfig;
use crate::error::Result;
use crate::events::UpdateEvent;
use crate::models::{Chapter, LibraryManga, UpdateTarget};
use crate::report::write_report;
use crate::sources::SourceRegistry;
use crate::tracking::TrackManager;
use crate::traits::{
    ChapterSync, CoverCache, DownloadGateway, FollowUps, LibraryStore, NotificationChannel, Notifier,
};
use crate::wake::{WakeGuard, WakeLock, WAKE_TIMEOUT};
use run::Run;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Largest per-source queue tolerated before warning about rate limits.
pub const QUEUE_WARNING_THRESHOLD: usize = 60;

const WAKE_LOCK_TAG: &str = "library-update";
const SKIPPED_REPORT_HEADER: &str =
    "Manga were skipped by the library update restrictions, see `library.manga_restrictions` in the configuration";

/// What to update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub target: UpdateTarget,
    /// Explicit manga ids; when set, category selection is bypassed.
    pub manga_ids: Option<Vec<i64>>,
    pub category: Option<i32>,
}

impl UpdateRequest {
    pub fn chapters() -> Self {
        Self::new(UpdateTarget::Chapters)
    }

    pub fn new(target: UpdateTarget) -> Self {
        Self {
            target,
            manga_ids: None,
            category: None,
        }
    }

    pub fn with_category(mut self, category: i32) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_manga(mut self, ids: Vec<i64>) -> Self {
        self.manga_ids = Some(ids);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: UpdateTarget,
    pub cancelled: bool,
    pub updates: Vec<(LibraryManga, Vec<Chapter>)>,
    pub failed: Vec<(LibraryManga, String)>,
    pub skipped: Vec<(LibraryManga, String)>,
    /// Empty when no report was written.
    pub skipped_report: PathBuf,
    pub errors_report: PathBuf,
}

#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// This call ran the update to completion.
    Finished(RunReport),
    /// The request was added to the chapter run already in progress.
    Merged,
    /// Another run is active and the request cannot be merged into it.
    Busy,
}

enum Merge {
    Merged,
    /// Not mergeable: wrong target, or the candidates could not be resolved.
    Refused,
    /// The run stopped accepting work and is about to end.
    Finalizing,
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn LibraryStore>,
    pub sources: Arc<SourceRegistry>,
    pub chapter_sync: Arc<dyn ChapterSync>,
    pub downloads: Arc<dyn DownloadGateway>,
    pub covers: Arc<dyn CoverCache>,
    pub notifier: Arc<dyn Notifier>,
    pub trackers: Arc<TrackManager>,
    pub follow_ups: Arc<dyn FollowUps>,
    pub wake_lock: Arc<dyn WakeLock>,
}

#[derive(Clone)]
pub struct UpdateManager {
    inner: Arc<Inner>,
}

struct Inner {
    deps: Collaborators,
    settings: LibraryUpdateConfig,
    reports_dir: PathBuf,
    active: Mutex<Option<Arc<Run>>>,
    events: broadcast::Sender<UpdateEvent>,
    run_extension_updates_after: AtomicBool,
}

impl UpdateManager {
    pub fn new(deps: Collaborators, settings: LibraryUpdateConfig, reports_dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                deps,
                settings,
                reports_dir: reports_dir.into(),
                active: Mutex::new(None),
                events,
                run_extension_updates_after: AtomicBool::new(false),
            }),
        }
    }

    fn deps(&self) -> &Collaborators {
        &self.inner.deps
    }

    fn settings(&self) -> &LibraryUpdateConfig {
        &self.inner.settings
    }

    fn active_run(&self) -> Option<Arc<Run>> {
        self.inner.active.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn emit(&self, event: UpdateEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.active_run().is_some()
    }

    pub fn category_in_queue(&self, id: i32) -> bool {
        self.active_run().is_some_and(|run| run.has_category(id))
    }

    /// Asks for the extension update follow-up once the current library update finishes.
    pub fn request_extension_updates_after(&self) {
        self.inner.run_extension_updates_after.store(true, Ordering::SeqCst);
    }

    pub fn extension_updates_pending(&self) -> bool {
        self.inner.run_extension_updates_after.load(Ordering::SeqCst)
    }

    /// Runs an update to completion, or merges it into the chapter run in
    /// progress. Failures end up in the returned report, never as an error.
    ///
    /// A chapters request that finds the active run already finalizing, or
    /// that loses the race for the active slot, waits for that run to finish
    /// and starts afresh.
    pub async fn start(&self, request: UpdateRequest) -> StartOutcome {
        loop {
            if let Some(active) = self.active_run() {
                match self.try_merge(&active, &request).await {
                    Merge::Merged => return StartOutcome::Merged,
                    Merge::Refused => {
                        info!("An update is already running; ignoring {} request", request.target);
                        return StartOutcome::Busy;
                    }
                    Merge::Finalizing => {
                        debug!("Update {} is finalizing; {} request waits for it", active.id, request.target);
                        active.wait().await;
                        continue;
                    }
                }
            }

            if let Some(run) = self.begin(request.target) {
                return self.execute(run, request).await;
            }
        }
    }

    async fn execute(&self, run: Arc<Run>, request: UpdateRequest) -> StartOutcome {
        info!("🔄 Starting {} update {}", run.target, run.id);

        // The run lives on its own task; dropping this future only stops waiting for it.
        let body = {
            let manager = self.clone();
            let run = Arc::clone(&run);
            tokio::spawn(async move {
                match run.target {
                    UpdateTarget::Chapters => manager.run_chapters(&run, &request).await,
                    UpdateTarget::Details | UpdateTarget::Tracking => manager.run_metadata(&run, &request).await,
                }
            })
        };
        if let Err(e) = body.await {
            error!("Update {} aborted: {}", run.id, e);
            if run.force_finalization() {
                self.finalize(&run).await;
            }
        }

        StartOutcome::Finished(run.wait().await)
    }

    /// Claims the active slot for a new run.
    fn begin(&self, target: UpdateTarget) -> Option<Arc<Run>> {
        let mut active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
        if active.is_some() {
            return None;
        }
        let wake = WakeGuard::acquire(Arc::clone(&self.deps().wake_lock), WAKE_LOCK_TAG, WAKE_TIMEOUT);
        let run = Arc::new(Run::new(target, wake));
        *active = Some(Arc::clone(&run));
        Some(run)
    }

    async fn resolve(&self, request: &UpdateRequest) -> Result<Selection> {
        let library = self.deps().store.library_manga().await?;
        if let Some(ids) = &request.manga_ids {
            return Ok(Selection {
                manga: explicit(&library, ids),
                category_ids: request.category.into_iter().collect(),
            });
        }
        let known = self.deps().store.category_ids().await?;
        Ok(select(&library, &known, request.category, self.settings()))
    }

    async fn run_chapters(&self, run: &Arc<Run>, request: &UpdateRequest) {
        match self.resolve(request).await {
            Ok(selection) => {
                let (eligible, skipped) =
                    apply_restrictions(selection.manga, &self.settings().manga_restrictions);
                run.add_categories(selection.category_ids);
                run.record_skipped(skipped);
                self.emit(UpdateEvent::Started {
                    run_id: run.id,
                    target: run.target,
                    total: eligible.len(),
                });
                self.dispatch(run, eligible);
            }
            Err(e) => error!("Could not resolve manga to update: {}", e),
        }

        if run.release_job() {
            self.finalize(run).await;
        }
    }

    async fn run_metadata(&self, run: &Arc<Run>, request: &UpdateRequest) {
        match self.resolve(request).await {
            Ok(selection) => {
                run.add_categories(selection.category_ids);
                self.emit(UpdateEvent::Started {
                    run_id: run.id,
                    target: run.target,
                    total: selection.manga.len(),
                });
                match run.target {
                    UpdateTarget::Tracking => self.update_tracking(run, &selection.manga).await,
                    _ => self.update_details(run, &selection.manga).await,
                }
            }
            Err(e) => error!("Could not resolve manga to update: {}", e),
        }

        if run.release_job() {
            self.finalize(run).await;
        }
    }

    /// Adds a chapters request to the chapter run in progress. Returns false
    /// when nothing is running, the request is not for chapters, or the run
    /// is already finalizing.
    pub async fn added_if_running(&self, request: &UpdateRequest) -> bool {
        match self.active_run() {
            Some(run) => matches!(self.try_merge(&run, request).await, Merge::Merged),
            None => false,
        }
    }

    async fn try_merge(&self, run: &Arc<Run>, request: &UpdateRequest) -> Merge {
        if request.target != UpdateTarget::Chapters || run.target != UpdateTarget::Chapters {
            return Merge::Refused;
        }

        let selection = match self.resolve(request).await {
            Ok(selection) => selection,
            Err(e) => {
                warn!("Could not add request to running update: {}", e);
                return Merge::Refused;
            }
        };
        let (eligible, skipped) = apply_restrictions(selection.manga, &self.settings().manga_restrictions);
        let merged = eligible.len();
        if !self.dispatch(run, eligible) {
            return Merge::Finalizing;
        }
        run.add_categories(selection.category_ids);
        run.record_skipped(skipped);
        info!("➕ Merged {} manga into running update {}", merged, run.id);
        Merge::Merged
    }

    /// Cancels the active run and finalizes it without waiting for workers.
    pub async fn stop(&self) {
        let Some(run) = self.active_run() else {
            return;
        };
        info!("⏹️ Stopping update {}", run.id);
        run.token.cancel();
        if run.force_finalization() {
            self.finalize(&run).await;
        }
    }

    /// The single exit of every run. Callers must have won `release_job` or
    /// `force_finalization`.
    async fn finalize(&self, run: &Arc<Run>) {
        let deps = self.deps();
        let cancelled = run.is_cancelled();
        let outcome = run.take_outcome();
        let mut report = RunReport {
            cancelled,
            updates: outcome.updates,
            failed: outcome.failed,
            skipped: outcome.skipped,
            ..RunReport::empty(run.id, run.target)
        };

        if run.target == UpdateTarget::Chapters {
            if !report.updates.is_empty() {
                deps.notifier.show_result(&report.updates);
                if self.settings().refresh_covers_too && !cancelled {
                    let updated: Vec<LibraryManga> = report.updates.iter().map(|(m, _)| m.clone()).collect();
                    self.update_details(run, &updated).await;
                    deps.notifier.cancel_progress();
                }
                if run.has_downloads() {
                    deps.downloads.start_service();
                }
            }

            if !report.skipped.is_empty() && deps.notifier.is_channel_enabled(NotificationChannel::Skipped) {
                report.skipped_report = write_report(
                    &self.inner.reports_dir,
                    "skipped",
                    &report.skipped,
                    &deps.sources,
                    Some(SKIPPED_REPORT_HEADER),
                );
                deps.notifier.show_skipped(&titles(&report.skipped), &report.skipped_report);
            }

            if !report.failed.is_empty() && deps.notifier.is_channel_enabled(NotificationChannel::Errors) {
                report.errors_report =
                    write_report(&self.inner.reports_dir, "errors", &report.failed, &deps.sources, None);
                deps.notifier.show_errors(&titles(&report.failed), &report.errors_report);
            }

            deps.follow_ups.update_shortcuts();
            deps.notifier.cancel_progress();

            if self.extension_updates_pending() && !deps.downloads.is_running() {
                deps.follow_ups.run_extension_updates();
                self.inner.run_extension_updates_after.store(false, Ordering::SeqCst);
            }
        }

        info!(
            "✅ {} update {} finished: {} updated, {} failed, {} skipped{}",
            run.target,
            run.id,
            report.updates.len(),
            report.failed.len(),
            report.skipped.len(),
            if cancelled { " (cancelled)" } else { "" }
        );
        self.teardown(run, report);
    }

    fn teardown(&self, run: &Arc<Run>, report: RunReport) {
        run.wake.release();
        {
            let mut active = self.inner.active.lock().unwrap_or_else(|p| p.into_inner());
            if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, run)) {
                *active = None;
            }
        }
        self.emit(UpdateEvent::Finished {
            run_id: run.id,
            target: run.target,
            cancelled: report.cancelled,
        });
        run.complete(report);
    }
}

fn titles(entries: &[(LibraryManga, String)]) -> Vec<String> {
    entries.iter().map(|(m, _)| m.title.clone()).collect()
}
