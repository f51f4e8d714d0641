pub mod madara;

use crate::config::Config;
use crate::error::Result;
use crate::traits::Source;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use madara::MadaraSource;

/// Registry of sources keyed by their numeric id
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<i64, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one HTML source per configured site.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (key, site) in &config.sites {
            info!("Registering source '{}' ({}) as id {}", key, site.base_url, site.id);
            registry.register(Arc::new(MadaraSource::new(site)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.id(), source);
    }

    pub fn get(&self, id: i64) -> Option<Arc<dyn Source>> {
        self.sources.get(&id).cloned()
    }

    /// Display name of a source, with a stub name for ids that are not installed.
    pub fn name_or_stub(&self, id: i64) -> String {
        match self.sources.get(&id) {
            Some(source) => source.name().to_string(),
            None => format!("Unknown source ({})", id),
        }
    }

    pub fn is_unmetered(&self, id: i64) -> bool {
        self.sources.get(&id).is_some_and(|s| s.is_unmetered())
    }
}
