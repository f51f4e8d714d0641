use crate::error::Result;
use crate::traits::CoverCache;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Cover thumbnails on disk, keyed by a UUID v5 of the cover url.
pub struct DiskCoverCache {
    dir: PathBuf,
    thumbnail_size: u32,
    client: reqwest::Client,
}

impl DiskCoverCache {
    pub fn new(dir: impl Into<PathBuf>, thumbnail_size: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            dir: dir.into(),
            thumbnail_size,
            client,
        })
    }

    pub fn path_for(&self, thumbnail_url: &str) -> PathBuf {
        let key = Uuid::new_v5(&Uuid::NAMESPACE_URL, thumbnail_url.as_bytes());
        self.dir.join(format!("{}.jpg", key))
    }

    async fn fetch(&self, thumbnail_url: &str, target: PathBuf) -> Result<()> {
        let response = self.client.get(thumbnail_url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let size = self.thumbnail_size;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let cover = image::load_from_memory(&bytes)?;
            cover.thumbnail(size, size).to_rgb8().save(&target)?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CoverCache for DiskCoverCache {
    async fn delete_from_cache(&self, thumbnail_url: &str) -> Result<bool> {
        let path = self.path_for(thumbnail_url);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Invalidated cover {}", thumbnail_url);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_cached(&self, thumbnail_url: &str) -> Result<PathBuf> {
        let path = self.path_for(thumbnail_url);
        if !tokio::fs::try_exists(&path).await? {
            self.fetch(thumbnail_url, path.clone()).await?;
            debug!("Cached cover {}", thumbnail_url);
        }
        Ok(path)
    }
}
