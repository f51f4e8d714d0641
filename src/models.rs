use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Category id used for manga that are not filed into any category.
pub const DEFAULT_CATEGORY: i32 = 0;

/// A favorited manga as seen by the library, one row per category it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct LibraryManga {
    pub id: i64,
    pub source: i64,
    pub url: String,
    pub title: String,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub status: MangaStatus,
    pub thumbnail_url: Option<String>,
    pub favorite: bool,
    pub initialized: bool,
    pub category: i32,
    pub unread: i64,
    pub read_count: i64,
    pub total_chapters: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Chapter {
    pub id: i64,
    pub manga_id: i64,
    pub url: String,
    pub name: String,
    pub scanlator: Option<String>,
    pub read: bool,
    pub bookmark: bool,
    pub last_page_read: i32,
    pub chapter_number: f64,
    pub source_order: i32,
    pub date_fetch: DateTime<Utc>,
    pub date_upload: Option<DateTime<Utc>>,
}

/// A chapter as listed by a source, before it is reconciled with the library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceChapter {
    pub url: String,
    pub name: String,
    pub chapter_number: f64,
    pub scanlator: Option<String>,
    pub date_upload: Option<DateTime<Utc>>,
}

/// Manga metadata as listed by a source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MangaDetails {
    pub title: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub status: MangaStatus,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Track {
    pub id: i64,
    pub manga_id: i64,
    pub service_id: i32,
    pub remote_id: i64,
    pub title: String,
    pub last_chapter_read: f64,
    pub total_chapters: i32,
    pub status: i32,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MangaStatus {
    #[default]
    Unknown,
    Ongoing,
    Completed,
    Licensed,
    PublishingFinished,
    Cancelled,
    OnHiatus,
}

/// Which orchestration path a run executes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UpdateTarget {
    Chapters,
    Details,
    Tracking,
}

impl LibraryManga {
    pub fn has_read(&self) -> bool {
        self.read_count > 0
    }

    /// Copies the source's view of the manga over the local record.
    pub fn copy_from(&mut self, details: &MangaDetails) {
        if let Some(title) = details.title.as_ref().filter(|t| !t.is_empty()) {
            self.title = title.clone();
        }
        if details.author.is_some() {
            self.author = details.author.clone();
        }
        if details.artist.is_some() {
            self.artist = details.artist.clone();
        }
        if details.description.is_some() {
            self.description = details.description.clone();
        }
        if details.genre.is_some() {
            self.genre = details.genre.clone();
        }
        if details.thumbnail_url.is_some() {
            self.thumbnail_url = details.thumbnail_url.clone();
        }
        self.status = details.status;
    }
}

impl Chapter {
    pub fn from_source(manga_id: i64, chapter: &SourceChapter, source_order: i32) -> Self {
        Self {
            id: 0,
            manga_id,
            url: chapter.url.clone(),
            name: chapter.name.clone(),
            scanlator: chapter.scanlator.clone(),
            read: false,
            bookmark: false,
            last_page_read: 0,
            chapter_number: chapter.chapter_number,
            source_order,
            date_fetch: Utc::now(),
            date_upload: chapter.date_upload,
        }
    }

    pub fn is_recognized_number(&self) -> bool {
        self.chapter_number >= 0.0
    }
}

impl std::fmt::Display for MangaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MangaStatus::Unknown => write!(f, "Unknown"),
            MangaStatus::Ongoing => write!(f, "Ongoing"),
            MangaStatus::Completed => write!(f, "Completed"),
            MangaStatus::Licensed => write!(f, "Licensed"),
            MangaStatus::PublishingFinished => write!(f, "Publishing finished"),
            MangaStatus::Cancelled => write!(f, "Cancelled"),
            MangaStatus::OnHiatus => write!(f, "On hiatus"),
        }
    }
}

impl std::fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateTarget::Chapters => write!(f, "chapters"),
            UpdateTarget::Details => write!(f, "details"),
            UpdateTarget::Tracking => write!(f, "tracking"),
        }
    }
}
