use crate::config::{SelectorsConfig, SiteConfig};
use crate::error::{Result, UpdaterError};
use crate::http::HttpClient;
use crate::models::{Chapter, LibraryManga, MangaDetails, MangaStatus, SourceChapter};
use crate::traits::Source;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use tracing::{debug, info};
use url::Url;

/// HTML source for Madara-style sites, driven by the CSS selectors in the site config.
pub struct MadaraSource {
    id: i64,
    name: String,
    base_url: Url,
    unmetered: bool,
    http_client: HttpClient,
    selectors: Selectors,
}

struct Selectors {
    chapter_list: Selector,
    chapter_link: Selector,
    chapter_date: Option<Selector>,
    title: Selector,
    author: Option<Selector>,
    artist: Option<Selector>,
    description: Option<Selector>,
    genre: Option<Selector>,
    status: Option<Selector>,
    cover: Option<Selector>,
    page_image: Selector,
}

impl MadaraSource {
    pub fn new(config: &SiteConfig) -> Result<Self> {
        Ok(Self {
            id: config.id,
            name: config.name.clone(),
            base_url: Url::parse(&config.base_url)?,
            unmetered: config.unmetered,
            http_client: HttpClient::new(config)?,
            selectors: Selectors::parse(&config.selectors)?,
        })
    }

    fn absolute(&self, href: &str) -> Result<String> {
        Ok(self.base_url.join(href)?.to_string())
    }

    fn parse_chapters(&self, html: &str) -> Vec<SourceChapter> {
        let document = Html::parse_document(html);
        let mut chapters = Vec::new();

        for row in document.select(&self.selectors.chapter_list) {
            let Some(link) = row.select(&self.selectors.chapter_link).next() else {
                continue;
            };
            let name = text_of(link);
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let Ok(url) = self.absolute(href) else {
                debug!("[MADARA] skipping chapter with bad url: {}", href);
                continue;
            };

            let date_upload = self
                .selectors
                .chapter_date
                .as_ref()
                .and_then(|sel| row.select(sel).next())
                .and_then(|el| NaiveDate::parse_from_str(&text_of(el), "%B %d, %Y").ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc());

            chapters.push(SourceChapter {
                chapter_number: parse_chapter_number(&name),
                url,
                name,
                scanlator: None,
                date_upload,
            });
        }

        chapters
    }

    fn parse_details(&self, html: &str) -> MangaDetails {
        let document = Html::parse_document(html);
        let first = |sel: &Option<Selector>| {
            sel.as_ref()
                .and_then(|s| document.select(s).next())
                .map(text_of)
                .filter(|t| !t.is_empty())
        };

        let genre = self.selectors.genre.as_ref().map(|sel| {
            document.select(sel).map(text_of).filter(|g| !g.is_empty()).collect::<Vec<_>>().join(", ")
        });

        let thumbnail_url = self
            .selectors
            .cover
            .as_ref()
            .and_then(|sel| document.select(sel).next())
            .and_then(|img| img.value().attr("data-src").or_else(|| img.value().attr("src")))
            .and_then(|src| self.absolute(src.trim()).ok());

        MangaDetails {
            title: document.select(&self.selectors.title).next().map(text_of),
            author: first(&self.selectors.author),
            artist: first(&self.selectors.artist),
            description: first(&self.selectors.description),
            genre: genre.filter(|g| !g.is_empty()),
            status: first(&self.selectors.status)
                .map(|s| parse_status(&s))
                .unwrap_or_default(),
            thumbnail_url,
        }
    }

    fn parse_pages(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.selectors.page_image)
            .filter_map(|img| img.value().attr("data-src").or_else(|| img.value().attr("src")))
            .filter_map(|src| self.absolute(src.trim()).ok())
            .collect()
    }
}

#[async_trait::async_trait]
impl Source for MadaraSource {
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
        let url = self.absolute(&manga.url)?;
        info!("[MADARA] Fetching chapters for {} from {}", manga.title, url);

        let html = self.http_client.get(&url).await?;
        let chapters = self.parse_chapters(&html);

        debug!("[MADARA] Found {} chapters for {}", chapters.len(), manga.title);
        Ok(chapters)
    }

    async fn fetch_manga_details(&self, manga: &LibraryManga) -> Result<MangaDetails> {
        let url = self.absolute(&manga.url)?;
        let html = self.http_client.get(&url).await?;
        Ok(self.parse_details(&html))
    }

    async fn fetch_page_list(&self, chapter: &Chapter) -> Result<Vec<String>> {
        let html = self.http_client.get(&self.absolute(&chapter.url)?).await?;
        let pages = self.parse_pages(&html);
        if pages.is_empty() {
            return Err(UpdaterError::scraping(format!("no images found in {}", chapter.url)));
        }
        Ok(pages)
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        self.http_client.get_bytes(url).await
    }
}

impl Selectors {
    fn parse(config: &SelectorsConfig) -> Result<Self> {
        let optional = |css: &Option<String>| css.as_deref().map(selector).transpose();
        Ok(Self {
            chapter_list: selector(&config.chapter_list)?,
            chapter_link: selector(&config.chapter_link)?,
            chapter_date: optional(&config.chapter_date)?,
            title: selector(&config.title)?,
            author: optional(&config.author)?,
            artist: optional(&config.artist)?,
            description: optional(&config.description)?,
            genre: optional(&config.genre)?,
            status: optional(&config.status)?,
            cover: optional(&config.cover)?,
            page_image: selector(&config.page_image)?,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| UpdaterError::scraping(format!("invalid selector {:?}: {:?}", css, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the chapter number from a chapter name, `-1.0` when there is none.
pub fn parse_chapter_number(name: &str) -> f64 {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| {
        Regex::new(r"(?i)(?:chapter|ch\.?|episode|ep\.?)\s*([0-9]+(?:\.[0-9]+)?)").expect("valid regex")
    });
    static BARE: OnceLock<Regex> = OnceLock::new();
    let bare = BARE.get_or_init(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)").expect("valid regex"));

    number
        .captures(name)
        .or_else(|| bare.captures(name))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(-1.0)
}

fn parse_status(text: &str) -> MangaStatus {
    let text = text.to_lowercase();
    if text.contains("ongoing") {
        MangaStatus::Ongoing
    } else if text.contains("completed") || text.contains("finished") {
        MangaStatus::Completed
    } else if text.contains("hiatus") {
        MangaStatus::OnHiatus
    } else if text.contains("cancelled") || text.contains("canceled") || text.contains("dropped") {
        MangaStatus::Cancelled
    } else if text.contains("licensed") {
        MangaStatus::Licensed
    } else {
        MangaStatus::Unknown
    }
}
