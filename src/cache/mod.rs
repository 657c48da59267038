//! # Cache Module
//!
//! Persistent audio cache shared by every guild. The store keeps a bounded,
//! content-addressed set of downloaded files on disk; the coordinator sits in
//! front of it and guarantees that each missing track is downloaded exactly
//! once no matter how many guilds ask for it at the same time.

pub mod download;
pub mod store;

pub use download::{DownloadCoordinator, DownloadStats};
pub use store::{sanitize_filename, CacheEntry, CacheStore};
