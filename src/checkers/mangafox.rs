use crate::config::SiteConfig;
use crate::downloaders::mangafox::parse_selector;
use crate::error::Result;
use crate::models::SearchResult;
use crate::traits::CatalogSearcher;
use crate::utils::HttpClient;
use futures::future::join_all;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{info, warn};

/// Title search against the site's ajax endpoint. Each row is
/// `[id, name, slug, genre, author]`; the series page of every hit is then
/// fetched for its summary and cover.
pub struct MangafoxSearcher {
    http_client: HttpClient,
    base_url: String,
    summary: Selector,
    cover: Selector,
}

impl MangafoxSearcher {
    pub fn new(http_client: HttpClient, config: &SiteConfig) -> Result<Self> {
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            summary: parse_selector(&config.selectors.summary)?,
            cover: parse_selector(&config.selectors.cover)?,
        })
    }

    fn search_url(&self, title: &str) -> Result<String> {
        let url = url::Url::parse_with_params(
            &format!("{}/ajax/search.php", self.base_url),
            &[("term", title)],
        )?;
        Ok(url.to_string())
    }

    fn hit_from_row(&self, row: &[Value]) -> Option<SearchResult> {
        let slug = field(row, 2);
        if slug.is_empty() {
            return None;
        }

        Some(SearchResult {
            name: field(row, 1),
            url: format!("{}/manga/{}", self.base_url, slug),
            genre: field(row, 3),
            author: field(row, 4),
            image: String::new(),
            description: String::new(),
        })
    }

    fn fill_details(&self, hit: &mut SearchResult, html: &str) {
        let document = Html::parse_document(html);

        if let Some(summary) = document.select(&self.summary).next() {
            hit.description = summary
                .text()
                .next()
                .map(|text| text.trim().to_string())
                .unwrap_or_default();
        }

        if let Some(cover) = document.select(&self.cover).find_map(|img| img.value().attr("src")) {
            hit.image = cover.to_string();
        }
    }

    async fn with_details(&self, mut hit: SearchResult) -> SearchResult {
        match self.http_client.get(&hit.url).await {
            Ok(html) => self.fill_details(&mut hit, &html),
            Err(e) => warn!("[MANGAFOX SEARCH] Failed to load details for {}: {}", hit.url, e),
        }
        hit
    }
}

fn field(row: &[Value], index: usize) -> String {
    match row.get(index) {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[async_trait::async_trait]
impl CatalogSearcher for MangafoxSearcher {
    async fn search(&self, title: &str) -> Result<Vec<SearchResult>> {
        info!("🔍 [MANGAFOX SEARCH] Searching for: {}", title);

        let rows: Vec<Vec<Value>> = self.http_client.get_json(&self.search_url(title)?).await?;
        let hits: Vec<SearchResult> = rows.iter().filter_map(|row| self.hit_from_row(row)).collect();

        let results = join_all(hits.into_iter().map(|hit| self.with_details(hit))).await;
        info!("[MANGAFOX SEARCH] {} results for {}", results.len(), title);
        Ok(results)
    }
}
