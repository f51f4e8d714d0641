use super::run::Run;
use super::{UpdateManager, QUEUE_WARNING_THRESHOLD};
use crate::error::{Result, UpdaterError};
use crate::events::UpdateEvent;
use crate::models::{Chapter, LibraryManga};
use crate::traits::SyncResult;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

impl UpdateManager {
    /// Queues manga on the run and starts a worker for every source without
    /// one. Returns false if the run is already finalizing.
    pub(super) fn dispatch(&self, run: &Arc<Run>, manga: Vec<LibraryManga>) -> bool {
        let sources = &self.deps().sources;
        let Some(enqueued) = run.enqueue(manga, |id| sources.is_unmetered(id)) else {
            return false;
        };

        if enqueued.largest_metered_queue > QUEUE_WARNING_THRESHOLD {
            warn!(
                "Source queue of {} manga exceeds {}; the source may rate limit this client",
                enqueued.largest_metered_queue, QUEUE_WARNING_THRESHOLD
            );
            self.deps().notifier.show_queue_size_warning();
        }

        for source in enqueued.idle_sources {
            self.spawn_worker(Arc::clone(run), source);
        }
        true
    }

    /// The job token for `source` was claimed by `Run::enqueue`.
    fn spawn_worker(&self, run: Arc<Run>, source: i64) {
        let manager = self.clone();
        tokio::spawn(async move {
            let drained = AssertUnwindSafe(manager.drain_source(&run, source))
                .catch_unwind()
                .await;

            let has_downloads = match drained {
                Ok(Ok(has_downloads)) => has_downloads,
                stopped => {
                    match stopped {
                        Ok(Err(e)) if e.is_cancelled() => {}
                        Ok(Err(e)) => error!("Worker for source {} failed: {}", source, e),
                        _ => error!("Worker for source {} panicked", source),
                    }
                    // A worker that stopped early never retired itself.
                    let dropped = run.abandon_source(source);
                    if dropped > 0 {
                        warn!("Dropped {} queued manga of source {}", dropped, source);
                    }
                    false
                }
            };

            if has_downloads {
                run.mark_downloads();
            }
            if run.release_job() {
                manager.finalize(&run).await;
            }
        });
    }

    async fn drain_source(&self, run: &Run, source: i64) -> Result<bool> {
        let _permit = tokio::select! {
            _ = run.token.cancelled() => return Err(UpdaterError::Cancelled),
            permit = run.permits.acquire() => permit.map_err(|_| UpdaterError::Cancelled)?,
        };

        let mut has_downloads = false;
        while let Some(manga) = run.next_for(source) {
            let progress = run.next_progress();
            if self.update_manga_chapters(run, &manga, progress).await? {
                has_downloads = true;
            }
        }
        debug!("Source {} drained", source);
        Ok(has_downloads)
    }

    /// Updates one manga's chapters. Returns whether downloads were queued.
    /// Only cancellation escapes as an error; anything else lands in the
    /// run's failed map.
    async fn update_manga_chapters(&self, run: &Run, manga: &LibraryManga, progress: usize) -> Result<bool> {
        if run.is_cancelled() {
            return Ok(false);
        }
        self.deps().notifier.show_progress(manga, progress, run.total());

        match self.fetch_and_sync(run, manga).await {
            Ok(has_downloads) => Ok(has_downloads),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!("Failed updating {}: {}", manga.title, e);
                run.record_failure(manga, e.to_string());
                Ok(false)
            }
        }
    }

    async fn fetch_and_sync(&self, run: &Run, manga: &LibraryManga) -> Result<bool> {
        let deps = self.deps();
        let source = deps
            .sources
            .get(manga.source)
            .ok_or(UpdaterError::SourceNotFound(manga.source))?;

        let fetched = tokio::select! {
            _ = run.token.cancelled() => return Err(UpdaterError::Cancelled),
            fetched = source.fetch_chapter_list(manga) => fetched?,
        };
        if fetched.is_empty() {
            return Ok(false);
        }

        let SyncResult { mut added, removed } = deps.chapter_sync.sync(deps.store.as_ref(), &fetched, manga).await?;

        // Added chapters are already persisted; record them before queueing downloads.
        let mut has_downloads = false;
        if !added.is_empty() {
            added.sort_by(|a, b| a.chapter_number.total_cmp(&b.chapter_number));
            run.record_update(manga, added.clone());
            if self.settings().auto_download.should_download(manga) {
                deps.downloads.enqueue(manga, &added).await?;
                has_downloads = true;
            }
        }

        if self.settings().delete_removed_chapters && !removed.is_empty() {
            let downloaded: Vec<Chapter> = removed
                .iter()
                .filter(|c| deps.downloads.is_chapter_downloaded(manga, c))
                .cloned()
                .collect();
            if !downloaded.is_empty() {
                if let Err(e) = deps.downloads.delete_chapters(manga, &downloaded).await {
                    warn!("Could not delete removed chapters of {}: {}", manga.title, e);
                }
            }
        }

        if !added.is_empty() || !removed.is_empty() {
            debug!("{}: {} new, {} removed chapters", manga.title, added.len(), removed.len());
            self.emit(UpdateEvent::MangaUpdated {
                run_id: run.id,
                manga_id: manga.id,
            });
        }
        Ok(has_downloads)
    }
}
