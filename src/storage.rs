use crate::error::Result;
use crate::models::Chapter;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::FileOptions;

/// Lays out downloaded chapters as `<base>/<source>/<manga>/<chapter>.cbz`.
#[derive(Debug, Clone)]
pub struct StorageManager {
    base_path: PathBuf,
}

impl StorageManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn manga_dir(&self, source_name: &str, manga_title: &str) -> PathBuf {
        self.base_path
            .join(sanitize_filename(source_name))
            .join(sanitize_filename(manga_title))
    }

    pub fn chapter_archive_path(&self, source_name: &str, manga_title: &str, chapter: &Chapter) -> PathBuf {
        let mut name = sanitize_filename(&chapter.name);
        if let Some(scanlator) = chapter.scanlator.as_deref().filter(|s| !s.is_empty()) {
            name = format!("{}_{}", sanitize_filename(scanlator), name);
        }
        self.manga_dir(source_name, manga_title).join(format!("{}.cbz", name))
    }

    pub fn is_downloaded(&self, source_name: &str, manga_title: &str, chapter: &Chapter) -> bool {
        self.chapter_archive_path(source_name, manga_title, chapter).is_file()
    }

    /// Packs the pages, in order, into a CBZ archive and returns its path.
    pub async fn write_archive(
        &self,
        source_name: &str,
        manga_title: &str,
        chapter: &Chapter,
        pages: Vec<Vec<u8>>,
    ) -> Result<PathBuf> {
        let archive = self.chapter_archive_path(source_name, manga_title, chapter);
        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let target = archive.clone();
        tokio::task::spawn_blocking(move || write_zip(&target, pages)).await??;

        info!("Created chapter archive: {:?}", archive);
        Ok(archive)
    }

    pub async fn remove_chapter(&self, source_name: &str, manga_title: &str, chapter: &Chapter) -> Result<bool> {
        let archive = self.chapter_archive_path(source_name, manga_title, chapter);

        if archive.exists() {
            tokio::fs::remove_file(&archive).await?;
            info!("Removed chapter archive: {:?}", archive);
            return Ok(true);
        }

        Ok(false)
    }
}

fn write_zip(path: &Path, pages: Vec<Vec<u8>>) -> Result<()> {
    // Archives appear atomically; a partial file is never visible under the final name.
    let partial = path.with_extension("cbz.part");
    let file = std::fs::File::create(&partial)?;
    let mut zip = zip::ZipWriter::new(file);

    for (index, page) in pages.iter().enumerate() {
        zip.start_file(format!("{:03}.jpg", index + 1), FileOptions::default())?;
        zip.write_all(page)?;
    }

    zip.finish()?;
    std::fs::rename(&partial, path)?;
    Ok(())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .trim_matches(' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceChapter;
    use std::io::Read;

    fn chapter(name: &str) -> Chapter {
        Chapter::from_source(
            1,
            &SourceChapter {
                url: "/c".into(),
                name: name.into(),
                chapter_number: 1.0,
                scanlator: None,
                date_upload: None,
            },
            0,
        )
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("Re:Zero / Part 1?"), "Re_Zero _ Part 1_");
        assert_eq!(sanitize_filename("..hidden.."), "hidden");
    }

    #[tokio::test]
    async fn archives_are_written_detected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        let chapter = chapter("Chapter 1");

        assert!(!storage.is_downloaded("Src", "Alpha", &chapter));
        let path = storage
            .write_archive("Src", "Alpha", &chapter, vec![b"one".to_vec(), b"two".to_vec()])
            .await
            .unwrap();
        assert!(storage.is_downloaded("Src", "Alpha", &chapter));

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut second = String::new();
        archive.by_name("002.jpg").unwrap().read_to_string(&mut second).unwrap();
        assert_eq!(second, "two");

        assert!(storage.remove_chapter("Src", "Alpha", &chapter).await.unwrap());
        assert!(!storage.is_downloaded("Src", "Alpha", &chapter));
        assert!(!storage.remove_chapter("Src", "Alpha", &chapter).await.unwrap());
    }
}
