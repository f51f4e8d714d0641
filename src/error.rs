use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ZIP compression error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Manga not found: {0}")]
    MangaNotFound(i64),

    #[error("Source not found: {0}")]
    SourceNotFound(i64),

    #[error("No chapters found")]
    NoChaptersFound,

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Update cancelled")]
    Cancelled,
}

impl UpdaterError {
    pub fn scraping(msg: impl Into<String>) -> Self {
        Self::Scraping(msg.into())
    }

    pub fn tracker(msg: impl Into<String>) -> Self {
        Self::Tracker(msg.into())
    }

    /// Cancellation is voluntary termination and never counts as a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Join(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
