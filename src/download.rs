use crate::error::{Result, UpdaterError};
use crate::models::{Chapter, LibraryManga};
use crate::sources::SourceRegistry;
use crate::storage::StorageManager;
use crate::traits::DownloadGateway;
use futures::future::try_join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Download {
    pub manga: LibraryManga,
    pub chapter: Chapter,
}

/// FIFO of chapters to download, drained by a single background task.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

struct Inner {
    storage: StorageManager,
    sources: Arc<SourceRegistry>,
    queue: Mutex<VecDeque<Download>>,
    running: AtomicBool,
}

impl DownloadManager {
    pub fn new(storage: StorageManager, sources: Arc<SourceRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                sources,
                queue: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock_queue().len()
    }
}

impl Inner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Download>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.lock_queue().pop_front();
            let Some(download) = next else {
                self.running.store(false, Ordering::SeqCst);
                // Work enqueued between the empty pop and the store above must not be stranded.
                if self.lock_queue().is_empty() || self.running.swap(true, Ordering::SeqCst) {
                    break;
                }
                continue;
            };

            match self.download(&download).await {
                Ok(()) => info!("Downloaded {} - {}", download.manga.title, download.chapter.name),
                Err(e) => warn!(
                    "Failed to download {} - {}: {}",
                    download.manga.title, download.chapter.name, e
                ),
            }
        }
        info!("Download queue drained");
    }

    async fn download(&self, download: &Download) -> Result<()> {
        let source = self
            .sources
            .get(download.manga.source)
            .ok_or(UpdaterError::SourceNotFound(download.manga.source))?;

        let urls = source.fetch_page_list(&download.chapter).await?;
        let pages = try_join_all(urls.iter().map(|url| source.fetch_image(url))).await?;

        self.storage
            .write_archive(source.name(), &download.manga.title, &download.chapter, pages)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DownloadGateway for DownloadManager {
    async fn enqueue(&self, manga: &LibraryManga, chapters: &[Chapter]) -> Result<()> {
        let mut queue = self.inner.lock_queue();
        for chapter in chapters {
            if self.is_chapter_downloaded(manga, chapter)
                || queue.iter().any(|d| d.chapter.id == chapter.id)
            {
                continue;
            }
            queue.push_back(Download {
                manga: manga.clone(),
                chapter: chapter.clone(),
            });
        }
        Ok(())
    }

    fn is_chapter_downloaded(&self, manga: &LibraryManga, chapter: &Chapter) -> bool {
        let source_name = self.inner.sources.name_or_stub(manga.source);
        self.inner.storage.is_downloaded(&source_name, &manga.title, chapter)
    }

    async fn delete_chapters(&self, manga: &LibraryManga, chapters: &[Chapter]) -> Result<()> {
        let source_name = self.inner.sources.name_or_stub(manga.source);
        self.inner
            .lock_queue()
            .retain(|d| !chapters.iter().any(|c| c.id == d.chapter.id));

        for chapter in chapters {
            self.inner.storage.remove_chapter(&source_name, &manga.title, chapter).await?;
        }
        Ok(())
    }

    fn start_service(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting download service with {} queued chapters", self.queue_len());
        tokio::spawn(Arc::clone(&self.inner).drain());
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}
