use crate::error::Result;
use crate::models::LibraryManga;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,
    #[serde(default)]
    pub library: LibraryUpdateConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub downloads_path: String,
    pub covers_path: String,
    pub reports_path: String,
    pub thumbnail_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Numeric source id stored with every manga of this site.
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub rate_limit_ms: u64,
    /// Unmetered sites are not rate sensitive and never trigger the queue-size warning.
    #[serde(default)]
    pub unmetered: bool,
    pub user_agent: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub selectors: SelectorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorsConfig {
    pub chapter_list: String,
    pub chapter_link: String,
    pub chapter_date: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub status: Option<String>,
    pub cover: Option<String>,
    pub page_image: String,
}

/// Library update preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryUpdateConfig {
    /// Hours between periodic updates; zero or negative disables them.
    pub interval_hours: i64,
    pub device_restrictions: Vec<DeviceRestriction>,
    /// Categories to update when no category is requested; empty means all.
    pub categories: Vec<i32>,
    pub exclude_categories: Vec<i32>,
    pub manga_restrictions: Vec<MangaRestriction>,
    pub refresh_covers_too: bool,
    pub delete_removed_chapters: bool,
    pub auto_download: AutoDownloadConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRestriction {
    OnlyOnWifi,
    Charging,
    BatteryNotLow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MangaRestriction {
    /// Skip manga whose publication is complete.
    NonCompleted,
    /// Skip manga that still have unread chapters.
    HasUnread,
    /// Skip manga that have chapters but none read.
    NonRead,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoDownloadConfig {
    pub enabled: bool,
    /// Only manga in these categories are downloaded; empty means all.
    pub categories: Vec<i32>,
    pub exclude_categories: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub skipped_enabled: bool,
    pub errors_enabled: bool,
    pub progress_bar: bool,
}

impl Config {
    /// Loads a TOML file, letting `LIBUPDATER__SECTION__KEY` variables override it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("LIBUPDATER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get_site_config(&self, site_name: &str) -> Option<&SiteConfig> {
        self.sites.get(site_name)
    }

    pub fn reports_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.reports_path)
    }
}

impl AutoDownloadConfig {
    pub fn should_download(&self, manga: &LibraryManga) -> bool {
        if !self.enabled || self.exclude_categories.contains(&manga.category) {
            return false;
        }
        self.categories.is_empty() || self.categories.contains(&manga.category)
    }
}

impl Default for LibraryUpdateConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            device_restrictions: vec![DeviceRestriction::OnlyOnWifi],
            categories: Vec::new(),
            exclude_categories: Vec::new(),
            manga_restrictions: vec![MangaRestriction::NonCompleted],
            refresh_covers_too: true,
            delete_removed_chapters: true,
            auto_download: AutoDownloadConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            skipped_enabled: true,
            errors_enabled: true,
            progress_bar: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut sites = HashMap::new();

        sites.insert("madara".to_string(), SiteConfig {
            id: 1,
            name: "Madara".to_string(),
            base_url: "https://madara.example".to_string(),
            rate_limit_ms: 1500,
            unmetered: false,
            user_agent: Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()),
            headers: None,
            selectors: SelectorsConfig {
                chapter_list: "li.wp-manga-chapter".to_string(),
                chapter_link: "a".to_string(),
                chapter_date: Some("span.chapter-release-date".to_string()),
                title: "div.post-title h1".to_string(),
                author: Some("div.author-content a".to_string()),
                artist: Some("div.artist-content a".to_string()),
                description: Some("div.summary__content".to_string()),
                genre: Some("div.genres-content a".to_string()),
                status: Some("div.post-status div.summary-content".to_string()),
                cover: Some("div.summary_image img".to_string()),
                page_image: "div.page-break img".to_string(),
            },
        });

        Config {
            database: DatabaseConfig {
                url: "sqlite:data/library.db".to_string(),
                max_connections: 10,
            },
            storage: StorageConfig {
                downloads_path: "./downloads".to_string(),
                covers_path: "./data/covers".to_string(),
                reports_path: "./data/reports".to_string(),
                thumbnail_size: 300,
            },
            sites,
            library: LibraryUpdateConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MangaStatus;

    fn manga_in(category: i32) -> LibraryManga {
        LibraryManga {
            id: 1,
            source: 1,
            url: "/m".into(),
            title: "M".into(),
            author: None,
            artist: None,
            description: None,
            genre: None,
            status: MangaStatus::Ongoing,
            thumbnail_url: None,
            favorite: true,
            initialized: true,
            category,
            unread: 0,
            read_count: 0,
            total_chapters: 0,
        }
    }

    #[test]
    fn saved_default_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        Config::default().save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.database.max_connections, 10);
        assert_eq!(loaded.get_site_config("madara").map(|s| s.id), Some(1));
        assert_eq!(loaded.library.manga_restrictions, vec![MangaRestriction::NonCompleted]);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
            [database]
            url = "sqlite::memory:"
            max_connections = 1

            [storage]
            downloads_path = "d"
            covers_path = "c"
            reports_path = "r"
            thumbnail_size = 100
            "#,
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.sites.is_empty());
        assert!(loaded.notifications.errors_enabled);
        assert_eq!(loaded.library.interval_hours, 24);
    }

    #[test]
    fn auto_download_respects_category_lists() {
        let mut policy = AutoDownloadConfig::default();
        assert!(!policy.should_download(&manga_in(1)));

        policy.enabled = true;
        assert!(policy.should_download(&manga_in(1)));

        policy.categories = vec![2];
        assert!(!policy.should_download(&manga_in(1)));
        assert!(policy.should_download(&manga_in(2)));

        policy.exclude_categories = vec![2];
        assert!(!policy.should_download(&manga_in(2)));
    }
}
