use crate::config::SelectorsConfig;
use crate::error::{MirrorError, Result};
use crate::traits::ContentResolver;
use crate::utils::HttpClient;
use scraper::{Html, Selector};
use tracing::debug;

pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| MirrorError::scraping(format!("invalid selector {selector:?}: {e:?}")))
}

/// Reader-page resolver for Manga Fox style sites: the page count lives in
/// the top bar as `... of N`, the page image is `img#image`.
pub struct MangafoxResolver {
    http_client: HttpClient,
    page_count: Selector,
    image: Selector,
}

impl MangafoxResolver {
    pub fn new(http_client: HttpClient, selectors: &SelectorsConfig) -> Result<Self> {
        Ok(Self {
            http_client,
            page_count: parse_selector(&selectors.page_count)?,
            image: parse_selector(&selectors.image)?,
        })
    }

    /// Last text node of the first page-count element.
    fn extract_page_count_text(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let element = document.select(&self.page_count).next()?;

        let last_text = element
            .children()
            .filter_map(|node| node.value().as_text().map(|text| text.trim().to_string()))
            .filter(|text| !text.is_empty())
            .last();

        Some(last_text.unwrap_or_else(|| element.text().collect::<String>()))
    }

    fn extract_image_url(&self, html: &str, page_url: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let src = document
            .select(&self.image)
            .find_map(|img| img.value().attr("src"))?
            .trim();

        if src.is_empty() {
            return None;
        }

        // Relative sources are resolved against the reader page.
        match url::Url::parse(page_url).and_then(|base| base.join(src)) {
            Ok(absolute) => Some(absolute.to_string()),
            Err(_) => Some(src.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl ContentResolver for MangafoxResolver {
    async fn page_count_text(&self, page_url: &str) -> Result<String> {
        let html = self.http_client.get(page_url).await?;
        debug!("[MANGAFOX RESOLVER] HTML length: {} for {}", html.len(), page_url);

        self.extract_page_count_text(&html)
            .ok_or_else(|| MirrorError::scraping(format!("page count not found on {page_url}")))
    }

    async fn asset_url(&self, page_url: &str) -> Result<String> {
        let html = self.http_client.get(page_url).await?;

        self.extract_image_url(&html, page_url)
            .ok_or_else(|| MirrorError::scraping(format!("page image not found on {page_url}")))
    }

    async fn fetch_asset(&self, asset_url: &str) -> Result<Vec<u8>> {
        self.http_client.get_bytes(asset_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;

    fn resolver() -> MangafoxResolver {
        let config = SiteConfig::default();
        MangafoxResolver::new(HttpClient::new(&config).unwrap(), &config.selectors).unwrap()
    }

    const READER_PAGE: &str = r#"
        <html><body>
          <div id="top_bar">
            <div class="l">
              <div>
                <select class="m"><option>1</option><option>2</option></select>
                of 45
              </div>
            </div>
          </div>
          <a href="2.html"><img id="image" src="//img.example/store/manga/1/01.jpg?v=3" /></a>
        </body></html>
    "#;

    #[test]
    fn page_count_text_is_last_text_node() {
        let text = resolver().extract_page_count_text(READER_PAGE).unwrap();
        assert_eq!(text.trim(), "of 45");
    }

    #[test]
    fn image_url_is_resolved_against_page() {
        let url = resolver()
            .extract_image_url(READER_PAGE, "http://mangafox.me/manga/x/c001/1.html")
            .unwrap();
        assert_eq!(url, "http://img.example/store/manga/1/01.jpg?v=3");
    }

    #[test]
    fn missing_regions_yield_none() {
        let resolver = resolver();
        let html = "<html><body><p>Loading...</p></body></html>";
        assert!(resolver.extract_page_count_text(html).is_none());
        assert!(resolver.extract_image_url(html, "http://h/1.html").is_none());
    }

    #[test]
    fn invalid_selector_is_reported() {
        let selectors = SelectorsConfig {
            image: "img[[".to_string(),
            ..SelectorsConfig::default()
        };
        let client = HttpClient::new(&SiteConfig::default()).unwrap();
        assert!(MangafoxResolver::new(client, &selectors).is_err());
    }
}
