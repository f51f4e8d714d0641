use crate::error::Result;
use crate::models::{Chapter, LibraryManga, Track};
use crate::traits::LibraryStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A remote reading tracker (AniList, MyAnimeList, Kitsu, ...).
#[async_trait::async_trait]
pub trait TrackService: Send + Sync {
    fn id(&self) -> i32;

    fn name(&self) -> &str;

    fn is_logged_in(&self) -> bool;

    /// Services that also accept local read progress.
    fn supports_two_way_sync(&self) -> bool {
        false
    }

    /// Fetches the remote view of a track.
    async fn refresh(&self, track: &Track) -> Result<Track>;

    /// Pushes a track and returns what the service stored.
    async fn update(&self, track: &Track) -> Result<Track>;
}

#[derive(Default, Clone)]
pub struct TrackManager {
    services: HashMap<i32, Arc<dyn TrackService>>,
}

impl TrackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn TrackService>) {
        self.services.insert(service.id(), service);
    }

    pub fn get(&self, id: i32) -> Option<Arc<dyn TrackService>> {
        self.services.get(&id).cloned()
    }

    /// Refreshes every track of `manga` whose service is logged in.
    /// Failures are logged per track and do not stop the others.
    pub async fn refresh_manga(&self, store: &dyn LibraryStore, manga: &LibraryManga) -> Result<()> {
        for track in store.tracks(manga.id).await? {
            let Some(service) = self.get(track.service_id).filter(|s| s.is_logged_in()) else {
                continue;
            };
            if let Err(e) = refresh_track(store, service.as_ref(), manga, &track).await {
                warn!("Failed to refresh {} track of {}: {}", service.name(), manga.title, e);
            }
        }
        Ok(())
    }
}

async fn refresh_track(
    store: &dyn LibraryStore,
    service: &dyn TrackService,
    manga: &LibraryManga,
    track: &Track,
) -> Result<()> {
    let refreshed = service.refresh(track).await?;
    store.upsert_track(&refreshed).await?;

    if service.supports_two_way_sync() {
        let chapters = store.chapters(manga.id).await?;
        sync_chapters_with_tracker_two_way(store, service, &chapters, refreshed).await?;
    }
    Ok(())
}

/// Marks local chapters up to the remote progress as read, then raises the
/// remote progress to the highest chapter read locally.
pub async fn sync_chapters_with_tracker_two_way(
    store: &dyn LibraryStore,
    service: &dyn TrackService,
    chapters: &[Chapter],
    mut track: Track,
) -> Result<Track> {
    let newly_read: Vec<Chapter> = chapters
        .iter()
        .filter(|c| !c.read && c.is_recognized_number() && c.chapter_number <= track.last_chapter_read)
        .map(|c| Chapter { read: true, ..c.clone() })
        .collect();

    if !newly_read.is_empty() {
        debug!("Marking {} chapters read from {}", newly_read.len(), service.name());
        store.update_chapters(&newly_read).await?;
    }

    let local_progress = chapters
        .iter()
        .filter(|c| c.read && c.is_recognized_number())
        .map(|c| c.chapter_number)
        .fold(f64::NEG_INFINITY, f64::max);

    if local_progress > track.last_chapter_read {
        track.last_chapter_read = local_progress;
        track = service.update(&track).await?;
        store.upsert_track(&track).await?;
    }

    Ok(track)
}
