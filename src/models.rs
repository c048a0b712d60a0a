use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifies one remote series and where it is mirrored to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesHandle {
    url: String,
    root: PathBuf,
}

/// A discovered volume: its URL segment (empty for an unlabeled volume)
/// and its chapter ids, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub chapters: Vec<String>,
}

/// Identity of a single page image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetLocator {
    pub series_url: String,
    pub volume: String,
    pub chapter: String,
    pub page: u32,
}

/// One hit from a catalog title search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub url: String,
    pub genre: String,
    pub author: String,
    pub image: String,
    pub description: String,
}

impl SeriesHandle {
    pub const DEFAULT_ROOT: &'static str = "./downloads";

    pub fn new(url: impl Into<String>, root: Option<PathBuf>) -> Result<Self> {
        let url = url.into();
        let url = url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(MirrorError::MissingUrl);
        }

        Ok(Self {
            url,
            root: root.unwrap_or_else(|| PathBuf::from(Self::DEFAULT_ROOT)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn locator(&self, volume: &str, chapter: &str, page: u32) -> AssetLocator {
        AssetLocator {
            series_url: self.url.clone(),
            volume: volume.to_string(),
            chapter: chapter.to_string(),
            page,
        }
    }
}

impl VolumeSpec {
    pub const DEFAULT_LABEL: &'static str = "01";

    pub fn new(name: impl Into<String>, chapters: Vec<String>) -> Self {
        Self {
            name: name.into(),
            chapters,
        }
    }

    /// Label used in the `Volume <label>` directory. Unlabeled volumes map to
    /// `01`; `v03` maps to `03`.
    pub fn label(&self) -> &str {
        volume_label(&self.name)
    }
}

pub fn volume_label(name: &str) -> &str {
    if name.is_empty() {
        VolumeSpec::DEFAULT_LABEL
    } else {
        name.strip_prefix('v').unwrap_or(name)
    }
}

impl AssetLocator {
    /// Reader page that hosts this asset.
    pub fn page_url(&self) -> String {
        if self.volume.is_empty() {
            format!("{}/c{}/{}.html", self.series_url, self.chapter, self.page)
        } else {
            format!("{}/{}/c{}/{}.html", self.series_url, self.volume, self.chapter, self.page)
        }
    }
}

impl std::fmt::Display for AssetLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Volume {} Chapter {} Page {}", volume_label(&self.volume), self.chapter, self.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_requires_url() {
        assert!(matches!(SeriesHandle::new("  ", None), Err(MirrorError::MissingUrl)));

        let series = SeriesHandle::new("http://mangafox.me/manga/bleach/", None).unwrap();
        assert_eq!(series.url(), "http://mangafox.me/manga/bleach");
        assert_eq!(series.root(), &PathBuf::from("./downloads"));
    }

    #[test]
    fn page_urls_include_volume_segment_only_when_labeled() {
        let series = SeriesHandle::new("http://h/manga/x", None).unwrap();

        assert_eq!(series.locator("v02", "10.5", 3).page_url(), "http://h/manga/x/v02/c10.5/3.html");
        assert_eq!(series.locator("", "7", 1).page_url(), "http://h/manga/x/c7/1.html");
    }

    #[test]
    fn unlabeled_volume_uses_default_label() {
        assert_eq!(VolumeSpec::new("", vec![]).label(), "01");
        assert_eq!(VolumeSpec::new("v03", vec![]).label(), "03");
        assert_eq!(VolumeSpec::new("TBD", vec![]).label(), "TBD");
    }
}
