//! Resumable mirroring of manga series (series → volumes → chapters → pages)
//! to local storage.
//!
//! [`series::Series`] discovers a series' volume tree through a
//! [`traits::CatalogDiscoverer`] and mirrors it through a
//! [`traits::ContentResolver`], resuming from whatever pages are already on
//! disk. Progress is observable at any time through
//! [`progress::ProgressStore`].

pub mod checkers;
pub mod config;
pub mod downloaders;
pub mod engine;
pub mod error;
pub mod models;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod scanners;
pub mod series;
pub mod storage;
pub mod traits;
pub mod utils;

pub use error::{MirrorError, Result};
pub use series::{SaveReport, Series};
