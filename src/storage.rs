use crate::config::StorageConfig;
use crate::error::Result;
use crate::models::{volume_label, AssetLocator};
use crate::traits::ContentResolver;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use zip::write::FileOptions;

/// What a store call did with a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Payload fetched and moved into place.
    Stored(PathBuf),
    /// A file was already at the final path; nothing was fetched.
    AlreadyPresent(PathBuf),
    /// The asset URL is not a recognized image; nothing to store.
    Skipped,
}

/// Maps asset locators onto the on-disk layout and writes payloads.
///
/// Layout: `<root>/Volume <label>/Chapter <id>/<NN>.<ext>`. The mapping is
/// the only resumption record, so it must never depend on anything but the
/// locator and the extension.
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
    extensions: Vec<String>,
    archive: bool,
}

impl StorageManager {
    pub fn new(root: impl Into<PathBuf>, config: &StorageConfig) -> Self {
        Self {
            root: root.into(),
            extensions: config.extensions.iter().map(|ext| ext.to_lowercase()).collect(),
            archive: config.archive,
        }
    }

    pub fn archive_enabled(&self) -> bool {
        self.archive
    }

    pub fn volume_dir(&self, volume: &str) -> PathBuf {
        self.root
            .join(format!("Volume {}", sanitize_filename(volume_label(volume))))
    }

    pub fn chapter_dir(&self, volume: &str, chapter: &str) -> PathBuf {
        self.volume_dir(volume)
            .join(format!("Chapter {}", sanitize_filename(chapter)))
    }

    /// Final path of a page with the given extension.
    pub fn page_path(&self, locator: &AssetLocator, extension: &str) -> PathBuf {
        self.chapter_dir(&locator.volume, &locator.chapter)
            .join(format!("{:02}.{}", locator.page, extension))
    }

    pub async fn ensure_chapter_dir(&self, volume: &str, chapter: &str) -> Result<PathBuf> {
        let path = self.chapter_dir(volume, chapter);
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Recognized image extension of an asset URL, judged on the URL path.
    pub fn asset_extension(&self, asset_url: &str) -> Option<String> {
        let path = match url::Url::parse(asset_url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => asset_url.split(['?', '#']).next().unwrap_or_default().to_string(),
        };

        let extension = Path::new(&path).extension()?.to_str()?.to_lowercase();
        self.extensions.contains(&extension).then_some(extension)
    }

    /// Any already-stored file for this page, whatever its extension.
    pub async fn existing_page(&self, locator: &AssetLocator) -> Option<PathBuf> {
        for extension in &self.extensions {
            let path = self.page_path(locator, extension);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    /// Stores one page. Existence of the final path is the idempotence check;
    /// payloads are written to a sibling `.part` file and renamed into place,
    /// and the partial file is removed on any failure.
    pub async fn store(
        &self,
        resolver: &dyn ContentResolver,
        locator: &AssetLocator,
        asset_url: &str,
    ) -> Result<StoreOutcome> {
        let Some(extension) = self.asset_extension(asset_url) else {
            debug!(url = asset_url, "Not a recognized image, nothing to store");
            return Ok(StoreOutcome::Skipped);
        };

        let path = self.page_path(locator, &extension);
        if tokio::fs::try_exists(&path).await? {
            debug!(path = %path.display(), "Page already stored");
            return Ok(StoreOutcome::AlreadyPresent(path));
        }

        let partial = partial_path(&path);
        match self.write_payload(resolver, asset_url, &partial, &path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Stored page");
                Ok(StoreOutcome::Stored(path))
            }
            Err(e) => {
                warn!(url = asset_url, path = %path.display(), error = %e, "Failed to store page");
                remove_if_exists(&partial).await;
                Err(e)
            }
        }
    }

    async fn write_payload(
        &self,
        resolver: &dyn ContentResolver,
        asset_url: &str,
        partial: &Path,
        path: &Path,
    ) -> Result<()> {
        let bytes = resolver.fetch_asset(asset_url).await?;

        let mut file = tokio::fs::File::create(partial).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(partial, path).await?;
        Ok(())
    }

    /// Zips the pages of a finished chapter into `Chapter <id>.cbz` inside
    /// the volume directory.
    pub async fn archive_chapter(&self, volume: &str, chapter: &str) -> Result<PathBuf> {
        let pages_dir = self.chapter_dir(volume, chapter);
        let archive_path = self
            .volume_dir(volume)
            .join(format!("Chapter {}.cbz", sanitize_filename(chapter)));

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(&pages_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_path = entry.path();
            let recognized = file_path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()));
            if entry.file_type().await?.is_file() && recognized {
                pages.push(file_path);
            }
        }
        pages.sort();

        let partial = partial_path(&archive_path);
        let target = archive_path.clone();
        let written = tokio::task::spawn_blocking(move || write_zip(&pages, &partial, &target))
            .await
            .map_err(std::io::Error::other)?;

        if let Err(e) = written {
            remove_if_exists(&partial_path(&archive_path)).await;
            return Err(e);
        }

        info!("📦 Created chapter archive: {:?}", archive_path);
        Ok(archive_path)
    }
}

fn write_zip(pages: &[PathBuf], partial: &Path, target: &Path) -> Result<()> {
    let file = std::fs::File::create(partial)?;
    let mut zip = zip::ZipWriter::new(file);

    for page in pages {
        let name = page
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        // Images are already compressed.
        zip.start_file(name, FileOptions::default().compression_method(zip::CompressionMethod::Stored))?;
        zip.write_all(&std::fs::read(page)?)?;
    }

    zip.finish()?;
    std::fs::rename(partial, target)?;
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial file");
        }
    }
}

pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches(' ')
        .to_string()
}
