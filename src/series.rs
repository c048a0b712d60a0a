use crate::config::Config;
use crate::engine::{Limits, MirrorEngine};
use crate::error::{MirrorError, Result};
use crate::models::{SeriesHandle, VolumeSpec};
use crate::progress::ProgressStore;
use crate::storage::StorageManager;
use crate::traits::{CatalogDiscoverer, ContentResolver};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Outcome of a `save_volumes` call, by volume label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SaveReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A series being mirrored: discovers its volume tree once, then drives
/// volume tasks and owns the session's [`ProgressStore`].
pub struct Series {
    handle: SeriesHandle,
    volumes: Option<Vec<VolumeSpec>>,
    discoverer: Arc<dyn CatalogDiscoverer>,
    resolver: Arc<dyn ContentResolver>,
    config: Config,
    progress: Arc<ProgressStore>,
    cancel: CancellationToken,
}

impl Series {
    pub fn new(
        handle: SeriesHandle,
        discoverer: Arc<dyn CatalogDiscoverer>,
        resolver: Arc<dyn ContentResolver>,
        config: &Config,
    ) -> Self {
        Self {
            handle,
            volumes: None,
            discoverer,
            resolver,
            config: config.clone(),
            progress: Arc::new(ProgressStore::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses an already known volume tree instead of discovering it.
    pub fn with_volumes(mut self, volumes: Vec<VolumeSpec>) -> Self {
        self.register_volumes(&volumes);
        self.volumes = Some(volumes);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shared view of per-volume progress for pollers.
    pub fn progress(&self) -> Arc<ProgressStore> {
        self.progress.clone()
    }

    fn register_volumes(&self, volumes: &[VolumeSpec]) {
        for (index, volume) in volumes.iter().enumerate() {
            self.progress.register(index, volume.label());
        }
    }

    /// Discovers the volume tree, retrying under the discovery policy.
    pub async fn discover(&mut self) -> Result<&[VolumeSpec]> {
        let policy = self.config.retry.discovery.policy();
        let discoverer = self.discoverer.as_ref();
        let handle = &self.handle;

        let volumes = policy
            .run(handle.url(), &self.cancel, move || async move { discoverer.discover(handle).await })
            .await?;

        self.register_volumes(&volumes);
        Ok(self.volumes.insert(volumes).as_slice())
    }

    fn engine(&self) -> MirrorEngine {
        let storage = StorageManager::new(self.handle.root().clone(), &self.config.storage);
        MirrorEngine::new(Arc::new(self.handle.clone()), self.resolver.clone(), Arc::new(storage))
            .with_policies(self.config.retry.leaf.policy(), self.config.retry.discovery.policy())
            .with_limits(Limits::from_config(&self.config.download))
            .with_cancellation(self.cancel.clone())
    }

    /// Mirrors the selected volumes (all of them by default) concurrently and
    /// returns once every one has reached a terminal state.
    pub async fn save_volumes(&self, selection: Option<&[usize]>) -> Result<SaveReport> {
        let volumes = self.volumes.as_deref().ok_or(MirrorError::NotDiscovered)?;

        // A volume selected twice is mirrored once.
        let indices: Vec<usize> = match selection {
            Some(selected) => {
                let mut seen = HashSet::new();
                selected.iter().copied().filter(|index| seen.insert(*index)).collect()
            }
            None => (0..volumes.len()).collect(),
        };
        if let Some(invalid) = indices.iter().find(|index| **index >= volumes.len()) {
            return Err(MirrorError::InvalidSelection(*invalid));
        }

        info!(
            "🚀 Mirroring {} of {} volumes from {} into {:?}",
            indices.len(),
            volumes.len(),
            self.handle.url(),
            self.handle.root()
        );

        let engine = self.engine();
        let tasks = indices.iter().map(|&index| {
            let engine = engine.clone();
            let volume = volumes[index].clone();
            let progress = self.progress.clone();
            tokio::spawn(async move {
                let result = engine.run_volume(index, &volume, &progress).await;
                (volume.label().to_string(), result)
            })
        });

        let mut report = SaveReport::default();
        for (position, joined) in join_all(tasks).await.into_iter().enumerate() {
            match joined {
                Ok((label, Ok(()))) => report.completed.push(label),
                Ok((label, Err(e))) => report.failed.push((label, e.to_string())),
                Err(join_error) => {
                    let index = indices[position];
                    let label = volumes[index].label().to_string();
                    self.progress.fail(index, join_error.to_string());
                    report.failed.push((label, join_error.to_string()));
                }
            }
        }

        info!(
            "📊 Mirroring finished: {} volumes completed, {} failed",
            report.completed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn save_volume(&self, index: usize) -> Result<SaveReport> {
        self.save_volumes(Some(&[index])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::VolumeState;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCatalog {
        volumes: Vec<VolumeSpec>,
        failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CatalogDiscoverer for FixedCatalog {
        async fn discover(&self, _series: &SeriesHandle) -> Result<Vec<VolumeSpec>> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(MirrorError::scraping("chapter list not rendered"));
            }
            Ok(self.volumes.clone())
        }
    }

    /// Every chapter has two pages; chapter "bad" never shows a page count.
    struct TwoPageSite;

    #[async_trait::async_trait]
    impl ContentResolver for TwoPageSite {
        async fn page_count_text(&self, page_url: &str) -> Result<String> {
            if page_url.contains("/cbad/") {
                Ok("N/A of pages".to_string())
            } else {
                Ok("of 2".to_string())
            }
        }

        async fn asset_url(&self, page_url: &str) -> Result<String> {
            Ok(page_url.replace(".html", ".jpg"))
        }

        async fn fetch_asset(&self, _asset_url: &str) -> Result<Vec<u8>> {
            Ok(b"image".to_vec())
        }
    }

    /// Four pages per chapter, counting image downloads.
    #[derive(Default)]
    struct CountingSite {
        fetches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContentResolver for CountingSite {
        async fn page_count_text(&self, _page_url: &str) -> Result<String> {
            Ok("of 4".to_string())
        }

        async fn asset_url(&self, page_url: &str) -> Result<String> {
            Ok(page_url.replace(".html", ".jpg"))
        }

        async fn fetch_asset(&self, _asset_url: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(b"image".to_vec())
        }
    }

    fn series(root: PathBuf, volumes: Vec<VolumeSpec>, config: &Config) -> Series {
        let handle = SeriesHandle::new("http://h/manga/x", Some(root)).unwrap();
        let catalog = Arc::new(FixedCatalog {
            volumes,
            failures: AtomicUsize::new(2),
        });
        Series::new(handle, catalog, Arc::new(TwoPageSite), config)
    }

    fn tree() -> Vec<VolumeSpec> {
        vec![
            VolumeSpec::new("", vec!["1".to_string(), "2".to_string()]),
            VolumeSpec::new("v02", vec!["3".to_string()]),
        ]
    }

    #[tokio::test]
    async fn save_before_discovery_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let series = series(dir.path().to_path_buf(), tree(), &Config::default());
        assert!(matches!(series.save_volumes(None).await, Err(MirrorError::NotDiscovered)));
    }

    #[tokio::test]
    async fn discovery_retries_and_registers_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let mut series = series(dir.path().to_path_buf(), tree(), &Config::default());

        let volumes = series.discover().await.unwrap();
        assert_eq!(volumes.len(), 2);

        let states = series.progress().states();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|(_, _, state)| matches!(state, VolumeState::NotStarted)));
    }

    #[tokio::test]
    async fn saves_all_volumes_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut series = series(dir.path().to_path_buf(), tree(), &Config::default());
        series.discover().await.unwrap();

        let report = series.save_volumes(None).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.completed.len(), 2);

        assert!(dir.path().join("Volume 01/Chapter 2/02.jpg").exists());
        assert!(dir.path().join("Volume 02/Chapter 3/01.jpg").exists());
        assert!(series.progress().is_idle());
        match series.progress().state(0) {
            VolumeState::Completed(snapshot) => assert_eq!(snapshot.completed, 4),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn selection_limits_work_and_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let series = series(dir.path().to_path_buf(), vec![], &Config::default()).with_volumes(tree());

        assert!(matches!(
            series.save_volumes(Some(&[5])).await,
            Err(MirrorError::InvalidSelection(5))
        ));

        let report = series.save_volume(1).await.unwrap();
        assert_eq!(report.completed, vec!["02".to_string()]);
        assert!(!dir.path().join("Volume 01").exists());
        assert!(matches!(series.progress().state(0), VolumeState::NotStarted));
    }

    #[tokio::test]
    async fn repeated_selection_mirrors_volume_once() {
        let dir = tempfile::tempdir().unwrap();
        let site = Arc::new(CountingSite::default());
        let handle = SeriesHandle::new("http://h/manga/x", Some(dir.path().to_path_buf())).unwrap();
        let catalog = Arc::new(FixedCatalog {
            volumes: vec![],
            failures: AtomicUsize::new(0),
        });
        let series = Series::new(handle, catalog, site.clone(), &Config::default())
            .with_volumes(vec![VolumeSpec::new("", vec!["1".to_string()])]);

        let report = series.save_volumes(Some(&[0, 0])).await.unwrap();

        assert_eq!(report.completed, vec!["01".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(site.fetches.load(Ordering::SeqCst), 4);
        match series.progress().state(0) {
            VolumeState::Completed(snapshot) => assert_eq!(snapshot.completed, 4),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn bounded_discovery_reports_failed_volume() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.retry.discovery.max_attempts = 3;
        let volumes = vec![
            VolumeSpec::new("v01", vec!["bad".to_string(), "1".to_string()]),
            VolumeSpec::new("v02", vec!["2".to_string()]),
        ];
        let series = series(dir.path().to_path_buf(), vec![], &config).with_volumes(volumes);

        let report = series.save_volumes(None).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.completed, vec!["02".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "01");
        assert!(matches!(series.progress().state(0), VolumeState::Failed { .. }));
    }
}
