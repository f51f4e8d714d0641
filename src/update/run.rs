use crate::models::{Chapter, LibraryManga, UpdateTarget};
use crate::update::RunReport;
use crate::wake::WakeGuard;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Sources drained in parallel within one run.
pub const MAX_CONCURRENT_SOURCES: usize = 5;

/// One execution of the orchestrator, from `start` to finalization.
pub(crate) struct Run {
    pub id: Uuid,
    pub target: UpdateTarget,
    pub token: CancellationToken,
    pub permits: Semaphore,
    pub wake: WakeGuard,
    progress: AtomicUsize,
    has_downloads: AtomicBool,
    state: Mutex<RunState>,
    report: watch::Sender<Option<RunReport>>,
}

/// Accumulators shared by the source workers of a run.
#[derive(Default)]
pub(crate) struct RunState {
    /// Manga id to source id of everything ever queued in this run.
    queued: HashMap<i64, i64>,
    queues: HashMap<i64, VecDeque<LibraryManga>>,
    /// Sources with a live worker; at most one worker per source.
    active_sources: HashSet<i64>,
    category_ids: HashSet<i32>,
    new_updates: HashMap<i64, (LibraryManga, Vec<Chapter>)>,
    failed: HashMap<i64, (LibraryManga, String)>,
    skipped: HashMap<i64, (LibraryManga, String)>,
    /// Outstanding jobs; the dispatcher holds one token until dispatch completes.
    jobs: i64,
    finalizing: bool,
}

/// Result of queueing manga into a live run.
pub(crate) struct Enqueued {
    /// Sources that had no worker and now need one.
    pub idle_sources: Vec<i64>,
    pub largest_metered_queue: usize,
}

/// Results drained from a run at finalization.
pub(crate) struct Outcome {
    pub updates: Vec<(LibraryManga, Vec<Chapter>)>,
    pub failed: Vec<(LibraryManga, String)>,
    pub skipped: Vec<(LibraryManga, String)>,
}

impl Run {
    pub fn new(target: UpdateTarget, wake: WakeGuard) -> Self {
        let (report, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            target,
            token: CancellationToken::new(),
            permits: Semaphore::new(MAX_CONCURRENT_SOURCES),
            wake,
            progress: AtomicUsize::new(0),
            has_downloads: AtomicBool::new(false),
            state: Mutex::new(RunState {
                jobs: 1,
                ..RunState::default()
            }),
            report,
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn next_progress(&self) -> usize {
        self.progress.fetch_add(1, Ordering::SeqCst)
    }

    pub fn mark_downloads(&self) {
        self.has_downloads.store(true, Ordering::SeqCst);
    }

    pub fn has_downloads(&self) -> bool {
        self.has_downloads.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.state().queued.len()
    }

    pub fn has_category(&self, id: i32) -> bool {
        self.state().category_ids.contains(&id)
    }

    pub fn add_categories(&self, ids: impl IntoIterator<Item = i32>) {
        self.state().category_ids.extend(ids);
    }

    pub fn record_skipped(&self, skipped: Vec<(LibraryManga, String)>) {
        let mut state = self.state();
        for (manga, reason) in skipped {
            state.skipped.insert(manga.id, (manga, reason));
        }
    }

    pub fn record_failure(&self, manga: &LibraryManga, message: String) {
        self.state().failed.insert(manga.id, (manga.clone(), message));
    }

    pub fn record_update(&self, manga: &LibraryManga, chapters: Vec<Chapter>) {
        self.state().new_updates.insert(manga.id, (manga.clone(), chapters));
    }

    /// Appends manga not yet seen by this run to their source queues and
    /// claims a job per source that has no worker. Returns `None` once the
    /// run is finalizing.
    pub fn enqueue(&self, manga: Vec<LibraryManga>, is_unmetered: impl Fn(i64) -> bool) -> Option<Enqueued> {
        let mut state = self.state();
        if state.finalizing {
            return None;
        }

        let mut touched = Vec::new();
        for manga in manga {
            if state.queued.insert(manga.id, manga.source).is_some() {
                continue;
            }
            if !touched.contains(&manga.source) {
                touched.push(manga.source);
            }
            state.queues.entry(manga.source).or_default().push_back(manga);
        }

        let mut per_source: HashMap<i64, usize> = HashMap::new();
        for source in state.queued.values() {
            *per_source.entry(*source).or_default() += 1;
        }
        let largest_metered_queue = per_source
            .into_iter()
            .filter(|(source, _)| !is_unmetered(*source))
            .map(|(_, count)| count)
            .max()
            .unwrap_or(0);

        let mut idle_sources = Vec::new();
        for source in touched {
            if state.active_sources.insert(source) {
                state.jobs += 1;
                idle_sources.push(source);
            }
        }

        Some(Enqueued {
            idle_sources,
            largest_metered_queue,
        })
    }

    /// Next manga for the worker of `source`. An empty queue retires the
    /// worker under the same lock that `enqueue` appends under.
    pub fn next_for(&self, source: i64) -> Option<LibraryManga> {
        let mut state = self.state();
        let next = state.queues.get_mut(&source).and_then(VecDeque::pop_front);
        if next.is_none() {
            state.queues.remove(&source);
            state.active_sources.remove(&source);
        }
        next
    }

    /// Retires a worker that stopped early, dropping whatever it left queued.
    pub fn abandon_source(&self, source: i64) -> usize {
        let mut state = self.state();
        state.active_sources.remove(&source);
        state.queues.remove(&source).map_or(0, |q| q.len())
    }

    /// Returns a job token; true when this was the last one and the caller
    /// must finalize.
    pub fn release_job(&self) -> bool {
        let mut state = self.state();
        state.jobs -= 1;
        if state.jobs > 0 || state.finalizing {
            return false;
        }
        state.finalizing = true;
        true
    }

    /// Forces the job count to zero; true when the caller must finalize.
    pub fn force_finalization(&self) -> bool {
        let mut state = self.state();
        state.jobs = 0;
        !std::mem::replace(&mut state.finalizing, true)
    }

    /// Drains new updates and failures; skips are copied.
    pub fn take_outcome(&self) -> Outcome {
        let mut state = self.state();
        let mut updates: Vec<_> = state.new_updates.drain().map(|(_, v)| v).collect();
        let mut failed: Vec<_> = state.failed.drain().map(|(_, v)| v).collect();
        let mut skipped: Vec<_> = state.skipped.values().cloned().collect();
        updates.sort_by(|a, b| a.0.title.cmp(&b.0.title));
        failed.sort_by(|a, b| a.0.title.cmp(&b.0.title));
        skipped.sort_by(|a, b| a.0.title.cmp(&b.0.title));
        Outcome { updates, failed, skipped }
    }

    pub fn complete(&self, report: RunReport) {
        self.report.send_replace(Some(report));
    }

    pub async fn wait(&self) -> RunReport {
        let mut rx = self.report.subscribe();
        let result = rx.wait_for(Option::is_some).await.ok().and_then(|r| r.clone());
        result.unwrap_or_else(|| RunReport::empty(self.id, self.target))
    }
}

impl RunReport {
    pub(crate) fn empty(run_id: Uuid, target: UpdateTarget) -> Self {
        Self {
            run_id,
            target,
            cancelled: false,
            updates: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            skipped_report: PathBuf::new(),
            errors_report: PathBuf::new(),
        }
    }
}
