use crate::error::Result;
use crate::retry::{BackoffKind, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "MANGAMIRROR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub site: SiteConfig,
    pub download: DownloadConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: String,
    /// Zip each finished chapter into `Chapter <id>.cbz` in its volume directory.
    pub archive: bool,
    /// Extensions (lowercase, no dot) that count as an image payload.
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,
    pub site_type: String,
    pub rate_limit_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub selectors: SelectorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorsConfig {
    pub chapter_list: String,
    pub page_count: String,
    pub image: String,
    pub summary: String,
    pub cover: String,
}

/// Fan-out caps per level. Zero means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_concurrent_volumes: usize,
    pub max_concurrent_chapters: usize,
    pub max_concurrent_pages: usize,
    pub progress_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub leaf: RetrySettings,
    pub discovery: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Zero retries forever.
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Config {
    /// Loads the TOML file at `path` (if present) and layers
    /// `MANGAMIRROR__SECTION__KEY` environment overrides on top.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            backoff: self.backoff,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: "./downloads".to_string(),
            archive: false,
            extensions: ["jpg", "jpeg", "png", "webp", "gif"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "Manga Fox".to_string(),
            base_url: "http://mangafox.me".to_string(),
            site_type: "mangafox".to_string(),
            rate_limit_ms: 0,
            timeout_secs: 60,
            user_agent: Some("MangaMirror/0.1 (Series Mirroring Tool)".to_string()),
            headers: None,
            selectors: SelectorsConfig::default(),
        }
    }
}

impl Default for SelectorsConfig {
    fn default() -> Self {
        Self {
            chapter_list: ".chlist".to_string(),
            page_count: "#top_bar > * > div".to_string(),
            image: "img#image".to_string(),
            summary: "p[class*='summary']".to_string(),
            cover: "[class*='cover'] > img".to_string(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_volumes: 0,
            max_concurrent_chapters: 0,
            max_concurrent_pages: 0,
            progress_interval_ms: 3000,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff: BackoffKind::None,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}
