//! In-memory collaborators shared by the unit tests.

use crate::error::{Result, UpdaterError};
use crate::models::{Chapter, LibraryManga, MangaDetails, MangaStatus, SourceChapter, Track};
use crate::traits::{
    ChapterChanges, CoverCache, DownloadGateway, FollowUps, LibraryStore, NotificationChannel, Notifier, Source,
};
use crate::tracking::TrackService;
use crate::wake::WakeLock;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn library_manga(id: i64, title: &str, source: i64) -> LibraryManga {
    LibraryManga {
        id,
        source,
        url: format!("/manga/{}", id),
        title: title.to_string(),
        author: None,
        artist: None,
        description: None,
        genre: None,
        status: MangaStatus::Ongoing,
        thumbnail_url: None,
        favorite: true,
        initialized: true,
        category: 0,
        unread: 0,
        read_count: 0,
        total_chapters: 0,
    }
}

pub fn chapter(id: i64, manga_id: i64, number: f64) -> Chapter {
    Chapter {
        id,
        manga_id,
        url: format!("/manga/{}/chapter/{}", manga_id, number),
        name: format!("Chapter {}", number),
        scanlator: None,
        read: false,
        bookmark: false,
        last_page_read: 0,
        chapter_number: number,
        source_order: 0,
        date_fetch: Utc::now(),
        date_upload: None,
    }
}

pub fn source_chapter(url: &str, number: f64) -> SourceChapter {
    SourceChapter {
        url: url.to_string(),
        name: format!("Chapter {}", number),
        chapter_number: number,
        scanlator: None,
        date_upload: None,
    }
}

#[derive(Default)]
struct Library {
    manga: Vec<LibraryManga>,
    categories: Vec<i32>,
    chapters: Vec<Chapter>,
    tracks: Vec<Track>,
    updated_manga: Vec<LibraryManga>,
}

#[derive(Default)]
pub struct MemoryLibrary {
    inner: Mutex<Library>,
    next_id: AtomicI64,
    failing_writes: AtomicBool,
}

impl MemoryLibrary {
    fn lock(&self) -> std::sync::MutexGuard<'_, Library> {
        self.inner.lock().unwrap()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn add_manga(&self, manga: LibraryManga) {
        self.lock().manga.push(manga);
    }

    pub fn add_category(&self, id: i32) {
        self.lock().categories.push(id);
    }

    pub fn add_track(&self, track: Track) {
        self.lock().tracks.push(track);
    }

    /// Stores chapters in listing order; urls in `read` start out read.
    pub fn add_chapters(&self, chapters: &[SourceChapter], manga_id: i64, read: &[&str]) {
        let stored: Vec<Chapter> = chapters
            .iter()
            .enumerate()
            .map(|(order, c)| {
                let mut chapter = Chapter::from_source(manga_id, c, order as i32);
                chapter.id = self.next_id();
                chapter.read = read.contains(&c.url.as_str());
                chapter
            })
            .collect();
        self.lock().chapters.extend(stored);
    }

    /// Makes every later chapter sync write fail without touching the library.
    pub fn fail_chapter_writes(&self) {
        self.failing_writes.store(true, Ordering::SeqCst);
    }

    pub fn updated_manga(&self) -> Vec<LibraryManga> {
        self.lock().updated_manga.clone()
    }
}

#[async_trait::async_trait]
impl LibraryStore for MemoryLibrary {
    async fn library_manga(&self) -> Result<Vec<LibraryManga>> {
        Ok(self.lock().manga.clone())
    }

    async fn category_ids(&self) -> Result<Vec<i32>> {
        Ok(self.lock().categories.clone())
    }

    async fn chapters(&self, manga_id: i64) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self
            .lock()
            .chapters
            .iter()
            .filter(|c| c.manga_id == manga_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|c| c.source_order);
        Ok(chapters)
    }

    async fn apply_chapter_changes(&self, changes: &ChapterChanges) -> Result<Vec<Chapter>> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(UpdaterError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "database is locked",
            )));
        }
        let added: Vec<Chapter> = changes
            .added
            .iter()
            .map(|c| Chapter { id: self.next_id(), ..c.clone() })
            .collect();

        let mut library = self.lock();
        let removed: HashSet<i64> = changes.removed.iter().map(|c| c.id).collect();
        library.chapters.retain(|c| !removed.contains(&c.id));
        for chapter in &changes.changed {
            if let Some(stored) = library.chapters.iter_mut().find(|c| c.id == chapter.id) {
                *stored = chapter.clone();
            }
        }
        library.chapters.extend(added.iter().cloned());
        Ok(added)
    }

    async fn update_chapters(&self, chapters: &[Chapter]) -> Result<()> {
        let mut library = self.lock();
        for chapter in chapters {
            if let Some(stored) = library.chapters.iter_mut().find(|c| c.id == chapter.id) {
                *stored = chapter.clone();
            }
        }
        Ok(())
    }

    async fn update_manga(&self, manga: &LibraryManga) -> Result<()> {
        let mut library = self.lock();
        for stored in library.manga.iter_mut().filter(|m| m.id == manga.id) {
            *stored = LibraryManga { category: stored.category, ..manga.clone() };
        }
        library.updated_manga.push(manga.clone());
        Ok(())
    }

    async fn tracks(&self, manga_id: i64) -> Result<Vec<Track>> {
        Ok(self.lock().tracks.iter().filter(|t| t.manga_id == manga_id).cloned().collect())
    }

    async fn upsert_track(&self, track: &Track) -> Result<()> {
        let mut library = self.lock();
        match library
            .tracks
            .iter_mut()
            .find(|t| t.manga_id == track.manga_id && t.service_id == track.service_id)
        {
            Some(stored) => *stored = track.clone(),
            None => library.tracks.push(track.clone()),
        }
        Ok(())
    }
}

/// Tracks how many fetches are in flight across every source sharing it.
#[derive(Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Scripted {
    Chapters(Vec<SourceChapter>),
    Error(String),
    Panic,
}

/// A source whose responses are scripted per manga id.
pub struct FakeSource {
    id: i64,
    name: String,
    unmetered: bool,
    delay: Duration,
    chapters: Mutex<HashMap<i64, Scripted>>,
    details: Mutex<HashMap<i64, MangaDetails>>,
    fetched: Mutex<Vec<i64>>,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl FakeSource {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            unmetered: false,
            delay: Duration::ZERO,
            chapters: Mutex::new(HashMap::new()),
            details: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            gauge: None,
        }
    }

    pub fn unmetered(mut self) -> Self {
        self.unmetered = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn with_chapters(self, manga_id: i64, chapters: Vec<SourceChapter>) -> Self {
        self.chapters.lock().unwrap().insert(manga_id, Scripted::Chapters(chapters));
        self
    }

    pub fn with_error(self, manga_id: i64, message: &str) -> Self {
        self.chapters.lock().unwrap().insert(manga_id, Scripted::Error(message.to_string()));
        self
    }

    pub fn panicking_for(self, manga_id: i64) -> Self {
        self.chapters.lock().unwrap().insert(manga_id, Scripted::Panic);
        self
    }

    pub fn with_details(self, manga_id: i64, details: MangaDetails) -> Self {
        self.details.lock().unwrap().insert(manga_id, details);
        self
    }

    /// Manga ids in the order their chapter lists were requested.
    pub fn fetched(&self) -> Vec<i64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Source for FakeSource {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_unmetered(&self) -> bool {
        self.unmetered
    }

    async fn fetch_chapter_list(&self, manga: &LibraryManga) -> Result<Vec<SourceChapter>> {
        self.fetched.lock().unwrap().push(manga.id);
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }

        let panics = matches!(self.chapters.lock().unwrap().get(&manga.id), Some(Scripted::Panic));
        if panics {
            panic!("source {} blew up on manga {}", self.id, manga.id);
        }

        match self.chapters.lock().unwrap().get(&manga.id) {
            Some(Scripted::Chapters(chapters)) => Ok(chapters.clone()),
            Some(Scripted::Error(message)) => Err(UpdaterError::scraping(message.clone())),
            Some(Scripted::Panic) | None => Ok(Vec::new()),
        }
    }

    async fn fetch_manga_details(&self, manga: &LibraryManga) -> Result<MangaDetails> {
        self.details
            .lock()
            .unwrap()
            .get(&manga.id)
            .cloned()
            .ok_or_else(|| UpdaterError::scraping("details unavailable"))
    }

    async fn fetch_page_list(&self, chapter: &Chapter) -> Result<Vec<String>> {
        Ok(vec![format!("{}/1.jpg", chapter.url), format!("{}/2.jpg", chapter.url)])
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        Ok(url.as_bytes().to_vec())
    }
}

/// Download gateway that records every call.
#[derive(Default)]
pub struct RecordingDownloads {
    pub enqueued: Mutex<Vec<(i64, Vec<f64>)>>,
    pub deleted: Mutex<Vec<(i64, Vec<String>)>>,
    pub downloaded_urls: Mutex<HashSet<String>>,
    pub service_starts: AtomicUsize,
    pub running: AtomicBool,
    failing: AtomicBool,
}

impl RecordingDownloads {
    /// Makes queueing and deleting fail from now on.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpdaterError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "download directory is read-only",
            )));
        }
        Ok(())
    }

    pub fn mark_downloaded(&self, url: &str) {
        self.downloaded_urls.lock().unwrap().insert(url.to_string());
    }

    pub fn enqueued(&self) -> Vec<(i64, Vec<f64>)> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(i64, Vec<String>)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn service_starts(&self) -> usize {
        self.service_starts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DownloadGateway for RecordingDownloads {
    async fn enqueue(&self, manga: &LibraryManga, chapters: &[Chapter]) -> Result<()> {
        self.check()?;
        let numbers = chapters.iter().map(|c| c.chapter_number).collect();
        self.enqueued.lock().unwrap().push((manga.id, numbers));
        Ok(())
    }

    fn is_chapter_downloaded(&self, _manga: &LibraryManga, chapter: &Chapter) -> bool {
        self.downloaded_urls.lock().unwrap().contains(&chapter.url)
    }

    async fn delete_chapters(&self, manga: &LibraryManga, chapters: &[Chapter]) -> Result<()> {
        self.check()?;
        let urls = chapters.iter().map(|c| c.url.clone()).collect();
        self.deleted.lock().unwrap().push((manga.id, urls));
        Ok(())
    }

    fn start_service(&self) {
        self.service_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Notifier that records what it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
    pub progress: Mutex<Vec<(i64, usize, usize)>>,
    pub queue_warnings: AtomicUsize,
    pub results: Mutex<Vec<Vec<(i64, Vec<f64>)>>>,
    pub skipped: Mutex<Vec<(Vec<String>, PathBuf)>>,
    pub errors: Mutex<Vec<(Vec<String>, PathBuf)>>,
    pub progress_cancels: AtomicUsize,
    pub disabled: Mutex<HashSet<&'static str>>,
}

impl RecordingNotifier {
    pub fn disable_errors(&self) {
        self.disabled.lock().unwrap().insert("errors");
    }

    pub fn results(&self) -> Vec<Vec<(i64, Vec<f64>)>> {
        self.results.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(Vec<String>, PathBuf)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn skipped(&self) -> Vec<(Vec<String>, PathBuf)> {
        self.skipped.lock().unwrap().clone()
    }

    pub fn queue_warnings(&self) -> usize {
        self.queue_warnings.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn show_progress(&self, manga: &LibraryManga, current: usize, total: usize) {
        self.progress.lock().unwrap().push((manga.id, current, total));
    }

    fn show_queue_size_warning(&self) {
        self.queue_warnings.fetch_add(1, Ordering::SeqCst);
    }

    fn show_result(&self, updates: &[(LibraryManga, Vec<Chapter>)]) {
        let mut summary: Vec<(i64, Vec<f64>)> = updates
            .iter()
            .map(|(m, chapters)| (m.id, chapters.iter().map(|c| c.chapter_number).collect()))
            .collect();
        summary.sort_by_key(|(id, _)| *id);
        self.results.lock().unwrap().push(summary);
    }

    fn show_skipped(&self, titles: &[String], report: &Path) {
        self.skipped.lock().unwrap().push((titles.to_vec(), report.to_path_buf()));
    }

    fn show_errors(&self, titles: &[String], report: &Path) {
        self.errors.lock().unwrap().push((titles.to_vec(), report.to_path_buf()));
    }

    fn cancel_progress(&self) {
        self.progress_cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_channel_enabled(&self, channel: NotificationChannel) -> bool {
        let key = match channel {
            NotificationChannel::Progress => "progress",
            NotificationChannel::Skipped => "skipped",
            NotificationChannel::Errors => "errors",
        };
        !self.disabled.lock().unwrap().contains(key)
    }
}

#[derive(Default)]
pub struct CountingWakeLock {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingWakeLock {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self, _tag: &str) -> Result<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, _tag: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cover cache that only records which urls it was handed.
#[derive(Default)]
pub struct RecordingCovers {
    pub deleted: Mutex<Vec<String>>,
    pub ensured: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingCovers {
    /// Every `ensure_cached` takes `delay` after recording its url.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl CoverCache for RecordingCovers {
    async fn delete_from_cache(&self, thumbnail_url: &str) -> Result<bool> {
        self.deleted.lock().unwrap().push(thumbnail_url.to_string());
        Ok(true)
    }

    async fn ensure_cached(&self, thumbnail_url: &str) -> Result<PathBuf> {
        self.ensured.lock().unwrap().push(thumbnail_url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(PathBuf::from(thumbnail_url))
    }
}

#[derive(Default)]
pub struct RecordingFollowUps {
    pub shortcut_refreshes: AtomicUsize,
    pub extension_updates: AtomicUsize,
}

impl FollowUps for RecordingFollowUps {
    fn update_shortcuts(&self) {
        self.shortcut_refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn run_extension_updates(&self) {
        self.extension_updates.fetch_add(1, Ordering::SeqCst);
    }
}

/// A tracker with scripted remote progress.
pub struct FakeTracker {
    id: i32,
    logged_in: bool,
    two_way: bool,
    failing: bool,
    remote_progress: Option<f64>,
    refreshed: AtomicUsize,
    pushed: Mutex<Vec<f64>>,
}

impl FakeTracker {
    pub fn new(id: i32, logged_in: bool) -> Self {
        Self {
            id,
            logged_in,
            two_way: false,
            failing: false,
            remote_progress: None,
            refreshed: AtomicUsize::new(0),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub fn two_way(mut self) -> Self {
        self.two_way = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_remote_progress(mut self, progress: f64) -> Self {
        self.remote_progress = Some(progress);
        self
    }

    pub fn refreshed(&self) -> usize {
        self.refreshed.load(Ordering::SeqCst)
    }

    pub fn pushed(&self) -> Vec<f64> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TrackService for FakeTracker {
    fn id(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        "Fake tracker"
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    fn supports_two_way_sync(&self) -> bool {
        self.two_way
    }

    async fn refresh(&self, track: &Track) -> Result<Track> {
        self.refreshed.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(UpdaterError::tracker("service unavailable"));
        }
        let mut refreshed = track.clone();
        if let Some(progress) = self.remote_progress {
            refreshed.last_chapter_read = progress;
        }
        Ok(refreshed)
    }

    async fn update(&self, track: &Track) -> Result<Track> {
        self.pushed.lock().unwrap().push(track.last_chapter_read);
        Ok(track.clone())
    }
}

/// An `UpdateManager` over `store` and `sources` with recording collaborators
/// and no restrictions.
pub fn update_manager(store: Arc<MemoryLibrary>, sources: Vec<Arc<FakeSource>>) -> crate::update::UpdateManager {
    use crate::update::{Collaborators, UpdateManager};

    let mut registry = crate::sources::SourceRegistry::new();
    for source in sources {
        registry.register(source);
    }
    let deps = Collaborators {
        store,
        sources: Arc::new(registry),
        chapter_sync: Arc::new(crate::sync::SourceChapterSync),
        downloads: Arc::new(RecordingDownloads::default()),
        covers: Arc::new(RecordingCovers::default()),
        notifier: Arc::new(RecordingNotifier::default()),
        trackers: Arc::new(crate::tracking::TrackManager::new()),
        follow_ups: Arc::new(RecordingFollowUps::default()),
        wake_lock: Arc::new(CountingWakeLock::default()),
    };
    let settings = crate::config::LibraryUpdateConfig {
        manga_restrictions: Vec::new(),
        refresh_covers_too: false,
        ..Default::default()
    };
    UpdateManager::new(deps, settings, std::env::temp_dir().join("libupdater-test-reports"))
}
