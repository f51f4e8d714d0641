use crate::error::Result;
use crate::models::*;
use crate::traits::{ChapterChanges, LibraryStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::info;

const LIBRARY_QUERY: &str = r#"
    SELECT m.id, m.source, m.url, m.title, m.author, m.artist, m.description, m.genre,
           m.status, m.thumbnail_url, m.favorite, m.initialized,
           COALESCE(mc.category_id, 0) AS category,
           (SELECT COUNT(*) FROM chapters c WHERE c.manga_id = m.id AND c.read = 0) AS unread,
           (SELECT COUNT(*) FROM chapters c WHERE c.manga_id = m.id AND c.read = 1) AS read_count,
           (SELECT COUNT(*) FROM chapters c WHERE c.manga_id = m.id) AS total_chapters
    FROM manga m
    LEFT JOIN manga_categories mc ON mc.manga_id = m.id
    WHERE m.favorite = 1
"#;

pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        if let Some(path) = database_url.strip_prefix("sqlite:") {
            let path = std::path::Path::new(path);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    info!("Creating directory: {:?}", parent);
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        info!("Database connected successfully");
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        info!("Initializing database schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS manga (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source INTEGER NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                artist TEXT,
                description TEXT,
                genre TEXT,
                status TEXT NOT NULL DEFAULT 'unknown',
                thumbnail_url TEXT,
                favorite INTEGER NOT NULL DEFAULT 1,
                initialized INTEGER NOT NULL DEFAULT 0,
                UNIQUE(source, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                sort INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS manga_categories (
                manga_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                FOREIGN KEY (manga_id) REFERENCES manga (id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories (id) ON DELETE CASCADE,
                UNIQUE(manga_id, category_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                manga_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                scanlator TEXT,
                read INTEGER NOT NULL DEFAULT 0,
                bookmark INTEGER NOT NULL DEFAULT 0,
                last_page_read INTEGER NOT NULL DEFAULT 0,
                chapter_number REAL NOT NULL DEFAULT -1,
                source_order INTEGER NOT NULL DEFAULT 0,
                date_fetch DATETIME NOT NULL,
                date_upload DATETIME,
                FOREIGN KEY (manga_id) REFERENCES manga (id) ON DELETE CASCADE,
                UNIQUE(manga_id, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                manga_id INTEGER NOT NULL,
                service_id INTEGER NOT NULL,
                remote_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                last_chapter_read REAL NOT NULL DEFAULT 0,
                total_chapters INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                score REAL NOT NULL DEFAULT 0,
                FOREIGN KEY (manga_id) REFERENCES manga (id) ON DELETE CASCADE,
                UNIQUE(manga_id, service_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_manga_source ON manga (source)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chapters_manga_id ON chapters (manga_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_manga_id ON tracks (manga_id)")
            .execute(&self.pool)
            .await?;

        info!("Database schema initialized successfully");
        Ok(())
    }

    // Manga operations
    pub async fn create_manga(&self, source: i64, url: &str, title: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO manga (source, url, title, favorite, initialized)
            VALUES (?, ?, ?, 1, 0)
            "#,
        )
        .bind(source)
        .bind(url)
        .bind(title)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_manga_id_by_url(&self, source: i64, url: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM manga WHERE source = ? AND url = ?")
            .bind(source)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    // Category operations
    pub async fn create_category(&self, name: &str) -> Result<i32> {
        sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;

        let id = sqlx::query_scalar::<_, i32>("SELECT id FROM categories WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn set_manga_category(&self, manga_id: i64, category_id: i32) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO manga_categories (manga_id, category_id) VALUES (?, ?)")
            .bind(manga_id)
            .bind(category_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LibraryStore for Database {
    async fn library_manga(&self) -> Result<Vec<LibraryManga>> {
        let manga_list = sqlx::query_as::<_, LibraryManga>(LIBRARY_QUERY)
            .fetch_all(&self.pool)
            .await?;

        Ok(manga_list)
    }

    async fn category_ids(&self) -> Result<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>("SELECT id FROM categories ORDER BY sort, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn chapters(&self, manga_id: i64) -> Result<Vec<Chapter>> {
        let chapters = sqlx::query_as::<_, Chapter>(
            "SELECT * FROM chapters WHERE manga_id = ? ORDER BY source_order",
        )
        .bind(manga_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(chapters)
    }

    async fn apply_chapter_changes(&self, changes: &ChapterChanges) -> Result<Vec<Chapter>> {
        let mut tx = self.pool.begin().await?;
        let mut added = Vec::with_capacity(changes.added.len());

        for chapter in &changes.added {
            let id = insert_chapter(&mut tx, chapter).await?;
            added.push(Chapter { id, ..chapter.clone() });
        }
        for chapter in &changes.changed {
            update_chapter(&mut tx, chapter).await?;
        }
        for chapter in &changes.removed {
            sqlx::query("DELETE FROM chapters WHERE id = ?")
                .bind(chapter.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(added)
    }

    async fn update_chapters(&self, chapters: &[Chapter]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chapter in chapters {
            update_chapter(&mut tx, chapter).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_manga(&self, manga: &LibraryManga) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE manga
            SET title = ?, author = ?, artist = ?, description = ?, genre = ?, status = ?,
                thumbnail_url = ?, favorite = ?, initialized = ?
            WHERE id = ?
            "#,
        )
        .bind(&manga.title)
        .bind(&manga.author)
        .bind(&manga.artist)
        .bind(&manga.description)
        .bind(&manga.genre)
        .bind(manga.status)
        .bind(&manga.thumbnail_url)
        .bind(manga.favorite)
        .bind(manga.initialized)
        .bind(manga.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn tracks(&self, manga_id: i64) -> Result<Vec<Track>> {
        let tracks = sqlx::query_as::<_, Track>("SELECT * FROM tracks WHERE manga_id = ?")
            .bind(manga_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(tracks)
    }

    async fn upsert_track(&self, track: &Track) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracks (manga_id, service_id, remote_id, title, last_chapter_read,
                                total_chapters, status, score)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(manga_id, service_id) DO UPDATE SET
                remote_id = excluded.remote_id,
                title = excluded.title,
                last_chapter_read = excluded.last_chapter_read,
                total_chapters = excluded.total_chapters,
                status = excluded.status,
                score = excluded.score
            "#,
        )
        .bind(track.manga_id)
        .bind(track.service_id)
        .bind(track.remote_id)
        .bind(&track.title)
        .bind(track.last_chapter_read)
        .bind(track.total_chapters)
        .bind(track.status)
        .bind(track.score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

async fn insert_chapter(conn: &mut SqliteConnection, chapter: &Chapter) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO chapters (manga_id, url, name, scanlator, read, bookmark, last_page_read,
                              chapter_number, source_order, date_fetch, date_upload)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(chapter.manga_id)
    .bind(&chapter.url)
    .bind(&chapter.name)
    .bind(&chapter.scanlator)
    .bind(chapter.read)
    .bind(chapter.bookmark)
    .bind(chapter.last_page_read)
    .bind(chapter.chapter_number)
    .bind(chapter.source_order)
    .bind(chapter.date_fetch)
    .bind(chapter.date_upload)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn update_chapter(conn: &mut SqliteConnection, chapter: &Chapter) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE chapters
        SET name = ?, scanlator = ?, read = ?, bookmark = ?, last_page_read = ?,
            chapter_number = ?, source_order = ?, date_upload = ?
        WHERE id = ?
        "#,
    )
    .bind(&chapter.name)
    .bind(&chapter.scanlator)
    .bind(chapter.read)
    .bind(chapter.bookmark)
    .bind(chapter.last_page_read)
    .bind(chapter.chapter_number)
    .bind(chapter.source_order)
    .bind(chapter.date_upload)
    .bind(chapter.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
