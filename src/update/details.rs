use super::run::Run;
use super::UpdateManager;
use crate::error::{Result, UpdaterError};
use crate::models::LibraryManga;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

impl UpdateManager {
    /// Refreshes metadata and covers, one source group per permit. Failures
    /// are logged and the manga skipped.
    pub(super) async fn update_details(&self, run: &Run, manga: &[LibraryManga]) {
        let total = manga.len();
        let counter = AtomicUsize::new(0);

        let mut groups: Vec<(i64, Vec<&LibraryManga>)> = Vec::new();
        for m in manga {
            match groups.iter_mut().find(|(source, _)| *source == m.source) {
                Some((_, group)) => group.push(m),
                None => groups.push((m.source, vec![m])),
            }
        }

        let counter = &counter;
        join_all(groups.into_iter().map(|(_, group)| async move {
            let Ok(_permit) = run.permits.acquire().await else {
                return;
            };
            for m in group {
                if run.is_cancelled() {
                    return;
                }
                self.deps()
                    .notifier
                    .show_progress(m, counter.fetch_add(1, Ordering::SeqCst), total);
                if let Err(e) = self.refresh_details(m).await {
                    warn!("Failed to refresh details of {}: {}", m.title, e);
                }
            }
        }))
        .await;

        self.deps().notifier.cancel_progress();
    }

    async fn refresh_details(&self, manga: &LibraryManga) -> Result<()> {
        let deps = self.deps();
        let source = deps
            .sources
            .get(manga.source)
            .ok_or(UpdaterError::SourceNotFound(manga.source))?;
        let details = source.fetch_manga_details(manga).await?;

        let mut updated = manga.clone();
        updated.copy_from(&details);
        updated.initialized = true;

        if updated.thumbnail_url != manga.thumbnail_url {
            if let Some(old) = &manga.thumbnail_url {
                if let Err(e) = deps.covers.delete_from_cache(old).await {
                    warn!("Could not invalidate cover of {}: {}", manga.title, e);
                }
            }
        }
        if let Some(url) = &updated.thumbnail_url {
            if let Err(e) = deps.covers.ensure_cached(url).await {
                warn!("Could not cache cover of {}: {}", manga.title, e);
            }
        }

        deps.store.update_manga(&updated).await?;
        debug!("Refreshed details of {}", updated.title);
        Ok(())
    }

    /// Refreshes tracker state for each manga in order.
    pub(super) async fn update_tracking(&self, run: &Run, manga: &[LibraryManga]) {
        let deps = self.deps();
        for (index, m) in manga.iter().enumerate() {
            if run.is_cancelled() {
                break;
            }
            deps.notifier.show_progress(m, index, manga.len());
            if let Err(e) = deps.trackers.refresh_manga(deps.store.as_ref(), m).await {
                warn!("Failed to load tracks of {}: {}", m.title, e);
            }
        }
        deps.notifier.cancel_progress();
    }
}
