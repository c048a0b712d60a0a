use crate::error::Result;
use crate::models::{SearchResult, SeriesHandle, VolumeSpec};

/// Trait for sites that can list a series as volumes of chapters
#[async_trait::async_trait]
pub trait CatalogDiscoverer: Send + Sync {
    /// Discover the volume tree of a series, volumes and chapters oldest first
    async fn discover(&self, series: &SeriesHandle) -> Result<Vec<VolumeSpec>>;
}

/// Trait for resolving reader pages into page counts and image payloads.
///
/// A missing document region is reported as [`crate::error::MirrorError::Scraping`]
/// so the engine can retry it like any other transient failure.
#[async_trait::async_trait]
pub trait ContentResolver: Send + Sync {
    /// Raw text of the page-count indicator on a reader page
    async fn page_count_text(&self, page_url: &str) -> Result<String>;

    /// URL of the image shown on a reader page
    async fn asset_url(&self, page_url: &str) -> Result<String>;

    /// Download an image payload
    async fn fetch_asset(&self, asset_url: &str) -> Result<Vec<u8>>;
}

/// Trait for catalog title search
#[async_trait::async_trait]
pub trait CatalogSearcher: Send + Sync {
    async fn search(&self, title: &str) -> Result<Vec<SearchResult>>;
}
