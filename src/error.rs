use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("ZIP compression error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Scraping error: {0}")]
    Scraping(String),

    #[error("Malformed page count at {url}: {text:?}")]
    MalformedPageCount { url: String, text: String },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid volume selection: {0}")]
    InvalidSelection(usize),

    #[error("Volumes have not been discovered yet")]
    NotDiscovered,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Site not supported: {0}")]
    SiteNotSupported(String),

    #[error("Series URL required")]
    MissingUrl,

    #[error("Operation cancelled")]
    Cancelled,
}

impl MirrorError {
    pub fn scraping(msg: impl Into<String>) -> Self {
        Self::Scraping(msg.into())
    }

    pub fn malformed_page_count(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self::MalformedPageCount {
            url: url.into(),
            text: text.into(),
        }
    }

    pub fn site_not_supported(site: impl Into<String>) -> Self {
        Self::SiteNotSupported(site.into())
    }

    /// Failures the engine absorbs and retries: network, structural misses,
    /// disk writes and malformed discovery text.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Io(_) | Self::Scraping(_) | Self::MalformedPageCount { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
