use crate::error::Result;
use crate::models::{Chapter, LibraryManga, MangaDetails, SourceChapter, Track};
use std::path::{Path, PathBuf};

/// A content provider that lists chapters and metadata for the manga it hosts
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    fn id(&self) -> i64;

    fn name(&self) -> &str;

    /// Unmetered sources are exempt from the queue-size warning
    fn is_unmetered(&self) -> bool {
        false
    }

    async fn fetch_chapter_list(&self, manga: &LibraryManga) -> Result<Vec<SourceChapter>>;

    async fn fetch_manga_details(&self, manga: &LibraryManga) -> Result<MangaDetails>;

    /// Image urls of a chapter in reading order
    async fn fetch_page_list(&self, chapter: &Chapter) -> Result<Vec<String>>;

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}

/// Read/write access to the library's manga, chapters and tracks
#[async_trait::async_trait]
pub trait LibraryStore: Send + Sync {
    async fn library_manga(&self) -> Result<Vec<LibraryManga>>;

    async fn category_ids(&self) -> Result<Vec<i32>>;

    async fn chapters(&self, manga_id: i64) -> Result<Vec<Chapter>>;

    /// Applies a chapter sync all-or-nothing and returns the added chapters
    /// with their assigned ids
    async fn apply_chapter_changes(&self, changes: &ChapterChanges) -> Result<Vec<Chapter>>;

    async fn update_chapters(&self, chapters: &[Chapter]) -> Result<()>;

    async fn update_manga(&self, manga: &LibraryManga) -> Result<()>;

    async fn tracks(&self, manga_id: i64) -> Result<Vec<Track>>;

    async fn upsert_track(&self, track: &Track) -> Result<()>;
}

/// Writes computed by a chapter sync
#[derive(Debug, Clone, Default)]
pub struct ChapterChanges {
    pub added: Vec<Chapter>,
    pub changed: Vec<Chapter>,
    pub removed: Vec<Chapter>,
}

impl ChapterChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Chapters produced by reconciling a source listing with the library
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub added: Vec<Chapter>,
    pub removed: Vec<Chapter>,
}

/// Reconciles freshly fetched chapters with the stored ones
#[async_trait::async_trait]
pub trait ChapterSync: Send + Sync {
    async fn sync(
        &self,
        store: &dyn LibraryStore,
        fetched: &[SourceChapter],
        manga: &LibraryManga,
    ) -> Result<SyncResult>;
}

#[async_trait::async_trait]
pub trait DownloadGateway: Send + Sync {
    async fn enqueue(&self, manga: &LibraryManga, chapters: &[Chapter]) -> Result<()>;

    fn is_chapter_downloaded(&self, manga: &LibraryManga, chapter: &Chapter) -> bool;

    async fn delete_chapters(&self, manga: &LibraryManga, chapters: &[Chapter]) -> Result<()>;

    /// Starts draining the queue unless a drain is already running
    fn start_service(&self);

    fn is_running(&self) -> bool;
}

#[async_trait::async_trait]
pub trait CoverCache: Send + Sync {
    async fn delete_from_cache(&self, thumbnail_url: &str) -> Result<bool>;

    async fn ensure_cached(&self, thumbnail_url: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Progress,
    Skipped,
    Errors,
}

/// Renders progress and results of an update run
pub trait Notifier: Send + Sync {
    fn show_progress(&self, manga: &LibraryManga, current: usize, total: usize);

    fn show_queue_size_warning(&self);

    fn show_result(&self, updates: &[(LibraryManga, Vec<Chapter>)]);

    fn show_skipped(&self, titles: &[String], report: &Path);

    fn show_errors(&self, titles: &[String], report: &Path);

    fn cancel_progress(&self);

    fn is_channel_enabled(&self, channel: NotificationChannel) -> bool;
}

/// Jobs that run after a library update completes
pub trait FollowUps: Send + Sync {
    fn update_shortcuts(&self);

    fn run_extension_updates(&self);
}
