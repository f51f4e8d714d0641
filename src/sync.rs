use crate::error::{Result, UpdaterError};
use crate::models::{Chapter, LibraryManga, SourceChapter};
use crate::traits::{ChapterChanges, ChapterSync, LibraryStore, SyncResult};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Default reconciler: matches chapters by url.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceChapterSync;

#[async_trait::async_trait]
impl ChapterSync for SourceChapterSync {
    async fn sync(
        &self,
        store: &dyn LibraryStore,
        fetched: &[SourceChapter],
        manga: &LibraryManga,
    ) -> Result<SyncResult> {
        if fetched.is_empty() {
            return Err(UpdaterError::NoChaptersFound);
        }

        let stored = store.chapters(manga.id).await?;
        let stored_by_url: HashMap<&str, &Chapter> = stored.iter().map(|c| (c.url.as_str(), c)).collect();

        let mut seen = HashSet::new();
        let mut to_add = Vec::new();
        let mut to_change = Vec::new();

        for (index, remote) in fetched.iter().enumerate() {
            // Sources occasionally list the same chapter twice.
            if !seen.insert(remote.url.as_str()) {
                continue;
            }
            let source_order = index as i32;
            match stored_by_url.get(remote.url.as_str()) {
                None => to_add.push(Chapter::from_source(manga.id, remote, source_order)),
                Some(local) if differs(local, remote, source_order) => {
                    let mut changed = (*local).clone();
                    changed.name = remote.name.clone();
                    changed.chapter_number = remote.chapter_number;
                    changed.scanlator = remote.scanlator.clone();
                    changed.date_upload = remote.date_upload.or(local.date_upload);
                    changed.source_order = source_order;
                    to_change.push(changed);
                }
                Some(_) => {}
            }
        }

        let removed: Vec<Chapter> = stored
            .iter()
            .filter(|c| !seen.contains(c.url.as_str()))
            .cloned()
            .collect();

        // A re-uploaded chapter keeps the progress of the one it replaces.
        for chapter in to_add.iter_mut().filter(|c| c.is_recognized_number()) {
            if let Some(previous) = removed
                .iter()
                .find(|r| r.read && r.chapter_number == chapter.chapter_number)
            {
                chapter.read = previous.read;
                chapter.bookmark = previous.bookmark;
                chapter.last_page_read = previous.last_page_read;
            }
        }

        let changes = ChapterChanges {
            added: to_add,
            changed: to_change,
            removed,
        };
        let added = if changes.is_empty() {
            Vec::new()
        } else {
            store.apply_chapter_changes(&changes).await?
        };
        let ChapterChanges { changed, removed, .. } = changes;

        debug!(
            "Synced {}: {} added, {} changed, {} removed",
            manga.title,
            added.len(),
            changed.len(),
            removed.len()
        );

        Ok(SyncResult { added, removed })
    }
}

fn differs(local: &Chapter, remote: &SourceChapter, source_order: i32) -> bool {
    local.name != remote.name
        || local.chapter_number != remote.chapter_number
        || local.scanlator != remote.scanlator
        || local.source_order != source_order
        || (remote.date_upload.is_some() && local.date_upload != remote.date_upload)
}
