//! Live progress of a mirroring session.
//!
//! Every volume being mirrored owns a [`ProgressCounters`] triple that page
//! tasks bump concurrently. The [`ProgressStore`] keeps one [`VolumeState`]
//! per volume; callers that only care about "in flight or not" use
//! [`ProgressStore::in_flight`], which never contains a finished volume.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Concurrently updated counters for one volume.
///
/// `discovered` grows by a chapter's page count once that count is known;
/// zero means nothing is known yet. A page bumps `buffered` once its image
/// URL is resolved and `completed` once the image is on disk.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    discovered: AtomicU64,
    buffered: AtomicU64,
    completed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub discovered: u64,
    pub buffered: u64,
    pub completed: u64,
}

#[derive(Debug, Clone)]
pub enum VolumeState {
    NotStarted,
    InProgress(Arc<ProgressCounters>),
    Completed(ProgressSnapshot),
    Failed {
        snapshot: ProgressSnapshot,
        reason: String,
    },
}

#[derive(Debug, Clone)]
struct VolumeEntry {
    label: String,
    state: VolumeState,
}

/// Session-wide progress, keyed by volume index in discovery order.
#[derive(Debug, Default)]
pub struct ProgressStore {
    volumes: RwLock<BTreeMap<usize, VolumeEntry>>,
}

impl ProgressCounters {
    pub fn add_discovered(&self, pages: u64) {
        self.discovered.fetch_add(pages, Ordering::SeqCst);
    }

    pub fn mark_buffered(&self) {
        self.buffered.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Reads `completed`, then `buffered`, then `discovered`. All three only
    /// grow and each is bumped after the one it is bounded by, so reading in
    /// this order always yields `completed <= buffered <= discovered`.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let completed = self.completed.load(Ordering::SeqCst);
        let buffered = self.buffered.load(Ordering::SeqCst);
        let discovered = self.discovered.load(Ordering::SeqCst);
        ProgressSnapshot {
            discovered,
            buffered,
            completed,
        }
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Done {} Buffered {} Total",
            self.completed, self.buffered, self.discovered
        )
    }
}

impl VolumeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        match self {
            Self::NotStarted => None,
            Self::InProgress(counters) => Some(counters.snapshot()),
            Self::Completed(snapshot) | Self::Failed { snapshot, .. } => Some(*snapshot),
        }
    }
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<usize, VolumeEntry>> {
        // Entries are replaced whole, so a poisoned map is still consistent.
        self.volumes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<usize, VolumeEntry>> {
        self.volumes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, index: usize, label: impl Into<String>) {
        self.write().entry(index).or_insert_with(|| VolumeEntry {
            label: label.into(),
            state: VolumeState::NotStarted,
        });
    }

    /// Resets the volume to fresh `{0,0,0}` counters and returns them.
    pub fn start(&self, index: usize, label: impl Into<String>) -> Arc<ProgressCounters> {
        let counters = Arc::new(ProgressCounters::default());
        self.write().insert(
            index,
            VolumeEntry {
                label: label.into(),
                state: VolumeState::InProgress(counters.clone()),
            },
        );
        counters
    }

    pub fn complete(&self, index: usize) {
        self.finish(index, |snapshot| VolumeState::Completed(snapshot));
    }

    pub fn fail(&self, index: usize, reason: impl Into<String>) {
        let reason = reason.into();
        self.finish(index, |snapshot| VolumeState::Failed { snapshot, reason });
    }

    fn finish(&self, index: usize, terminal: impl FnOnce(ProgressSnapshot) -> VolumeState) {
        let mut volumes = self.write();
        if let Some(entry) = volumes.get_mut(&index) {
            let snapshot = entry.state.snapshot().unwrap_or_default();
            entry.state = terminal(snapshot);
        }
    }

    pub fn state(&self, index: usize) -> VolumeState {
        self.read()
            .get(&index)
            .map(|entry| entry.state.clone())
            .unwrap_or(VolumeState::NotStarted)
    }

    /// Label and state of every known volume, in discovery order.
    pub fn states(&self) -> Vec<(usize, String, VolumeState)> {
        self.read()
            .iter()
            .map(|(index, entry)| (*index, entry.label.clone(), entry.state.clone()))
            .collect()
    }

    /// Snapshots of volumes currently being mirrored. A volume drops out of
    /// this map as soon as its last page is done.
    pub fn in_flight(&self) -> BTreeMap<usize, (String, ProgressSnapshot)> {
        self.read()
            .iter()
            .filter_map(|(index, entry)| match &entry.state {
                VolumeState::InProgress(counters) => {
                    Some((*index, (entry.label.clone(), counters.snapshot())))
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_lifecycle_ends_absent_from_in_flight() {
        let store = ProgressStore::new();
        store.register(0, "01");
        assert!(matches!(store.state(0), VolumeState::NotStarted));
        assert!(store.is_idle());

        let counters = store.start(0, "01");
        assert_eq!(store.in_flight()[&0].1, ProgressSnapshot::default());

        counters.add_discovered(3);
        for _ in 0..3 {
            counters.mark_buffered();
            counters.mark_completed();
        }
        store.complete(0);

        assert!(store.in_flight().get(&0).is_none());
        match store.state(0) {
            VolumeState::Completed(snapshot) => assert_eq!(
                snapshot,
                ProgressSnapshot {
                    discovered: 3,
                    buffered: 3,
                    completed: 3
                }
            ),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn restart_resets_counters() {
        let store = ProgressStore::new();
        let first = store.start(1, "02");
        first.add_discovered(5);
        store.fail(1, "page count never parsed");
        assert!(store.state(1).is_terminal());

        store.start(1, "02");
        assert_eq!(store.in_flight()[&1].1, ProgressSnapshot::default());
    }

    #[test]
    fn snapshots_stay_ordered_under_concurrent_updates() {
        let counters = Arc::new(ProgressCounters::default());
        let writers: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        counters.add_discovered(1);
                        counters.mark_buffered();
                        counters.mark_completed();
                    }
                })
            })
            .collect();

        while writers.iter().any(|w| !w.is_finished()) {
            let snapshot = counters.snapshot();
            assert!(snapshot.completed <= snapshot.buffered);
            assert!(snapshot.buffered <= snapshot.discovered);
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(
            counters.snapshot(),
            ProgressSnapshot {
                discovered: 4000,
                buffered: 4000,
                completed: 4000
            }
        );
    }
}
