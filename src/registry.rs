use crate::checkers::mangafox::MangafoxSearcher;
use crate::config::SiteConfig;
use crate::downloaders::mangafox::MangafoxResolver;
use crate::error::{MirrorError, Result};
use crate::scanners::mangafox::MangafoxScanner;
use crate::traits::{CatalogDiscoverer, CatalogSearcher, ContentResolver};
use crate::utils::HttpClient;
use std::collections::HashMap;
use std::sync::Arc;

/// The collaborators one site type provides.
#[derive(Clone)]
pub struct SiteBundle {
    pub discoverer: Arc<dyn CatalogDiscoverer>,
    pub resolver: Arc<dyn ContentResolver>,
    pub searcher: Arc<dyn CatalogSearcher>,
}

/// Registry for managing site implementations
pub struct SiteRegistry {
    sites: HashMap<String, SiteBundle>,
}

impl SiteRegistry {
    /// Registers the built-in sites, all sharing one transport built from `config`.
    pub fn new(config: &SiteConfig) -> Result<Self> {
        let mut registry = Self {
            sites: HashMap::new(),
        };

        let http_client = HttpClient::new(config)?;
        registry.register(
            "mangafox",
            SiteBundle {
                discoverer: Arc::new(MangafoxScanner::new(http_client.clone(), &config.selectors)?),
                resolver: Arc::new(MangafoxResolver::new(http_client.clone(), &config.selectors)?),
                searcher: Arc::new(MangafoxSearcher::new(http_client, config)?),
            },
        );

        Ok(registry)
    }

    pub fn register(&mut self, name: &str, bundle: SiteBundle) {
        self.sites.insert(name.to_string(), bundle);
    }

    pub fn get(&self, name: &str) -> Result<SiteBundle> {
        self.sites
            .get(name)
            .cloned()
            .ok_or_else(|| MirrorError::site_not_supported(name))
    }
}
