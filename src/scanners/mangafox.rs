use crate::config::SelectorsConfig;
use crate::downloaders::mangafox::parse_selector;
use crate::error::{MirrorError, Result};
use crate::models::{SeriesHandle, VolumeSpec};
use crate::traits::CatalogDiscoverer;
use crate::utils::HttpClient;
use scraper::{Html, Selector};
use tracing::{debug, info};

/// Reads the volume/chapter tree from a series page. The page lists volumes
/// and chapters newest first; the discovered tree is oldest first.
pub struct MangafoxScanner {
    http_client: HttpClient,
    chapter_list: Selector,
    anchor: Selector,
}

impl MangafoxScanner {
    pub fn new(http_client: HttpClient, selectors: &SelectorsConfig) -> Result<Self> {
        Ok(Self {
            http_client,
            chapter_list: parse_selector(&selectors.chapter_list)?,
            anchor: parse_selector("a[href]")?,
        })
    }

    pub(crate) fn parse_volumes(&self, html: &str, series_url: &str) -> Vec<VolumeSpec> {
        let document = Html::parse_document(html);
        let base = url::Url::parse(&format!("{series_url}/")).ok();
        // Compare against the normalized form that `absolutize` produces.
        let prefix = base
            .as_ref()
            .map(|base| base.as_str().to_string())
            .unwrap_or_else(|| format!("{series_url}/"));

        let mut volumes = Vec::new();
        let blocks: Vec<_> = document.select(&self.chapter_list).collect();

        for block in blocks.into_iter().rev() {
            // Paths relative to the series, oldest chapter first.
            let links: Vec<String> = block
                .select(&self.anchor)
                .filter_map(|a| a.value().attr("href"))
                .map(|href| absolutize(base.as_ref(), href))
                .filter_map(|href| href.strip_prefix(&prefix).map(str::to_string))
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();

            let Some(first) = links.first() else {
                debug!("[MANGAFOX SCANNER] Skipping chapter list without series links");
                continue;
            };

            let name = match first.find("/c") {
                Some(index) => first[..index].to_string(),
                None => String::new(),
            };
            let chapter_prefix = if name.is_empty() {
                "c".to_string()
            } else {
                format!("{name}/c")
            };

            let chapters: Vec<String> = links
                .iter()
                .filter_map(|link| link.strip_prefix(&chapter_prefix))
                .filter_map(|rest| rest.split('/').next())
                .filter(|chapter| !chapter.is_empty())
                .map(str::to_string)
                .collect();

            debug!("[MANGAFOX SCANNER] Volume {:?}: {} chapters", name, chapters.len());
            volumes.push(VolumeSpec::new(name, chapters));
        }

        volumes
    }
}

fn absolutize(base: Option<&url::Url>, href: &str) -> String {
    base.and_then(|base| base.join(href.trim()).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| href.trim().to_string())
}

#[async_trait::async_trait]
impl CatalogDiscoverer for MangafoxScanner {
    async fn discover(&self, series: &SeriesHandle) -> Result<Vec<VolumeSpec>> {
        info!("[MANGAFOX SCANNER] Scanning series from: {}", series.url());

        let html = self.http_client.get(series.url()).await?;
        let volumes = self.parse_volumes(&html, series.url());

        if volumes.is_empty() {
            return Err(MirrorError::scraping(format!("no chapter lists found on {}", series.url())));
        }

        let chapters: usize = volumes.iter().map(|volume| volume.chapters.len()).sum();
        info!("[MANGAFOX SCANNER] Found {} volumes, {} chapters", volumes.len(), chapters);
        Ok(volumes)
    }
}
