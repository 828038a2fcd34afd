/// Shared data structures for the application state
///
/// These structs represent the data model that flows between
/// the database layer and the album/download layer.

use std::path::{Path, PathBuf};

/// Value stored in `photos.local_path` when a download failed.
/// The UI renders a fallback image for it.
pub const ERROR_SENTINEL: &str = "error";

/// A user-placed point of interest
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    /// Unique database ID
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Number of result pages Flickr reported for this location on the last search.
    /// Advisory only: used to pick a random page for the next batch.
    pub page_count: Option<u32>,
    /// Display title (e.g. "Paris, France"), set by the caller
    pub title: Option<String>,
    /// Unix timestamp of creation
    pub created_at: i64,
}

/// One photo belonging to exactly one pin
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    /// Unique database ID
    pub id: i64,
    /// Owning pin (never dangling, enforced by the foreign key)
    pub pin_id: i64,
    /// Remote `url_m` from the search result
    pub remote_url: String,
    pub file: PhotoFile,
}

/// Download state of a photo, persisted in the nullable `local_path` column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoFile {
    /// Row created, bytes not on disk yet (placeholder in the UI)
    Pending,
    /// Image written to this path
    Downloaded(PathBuf),
    /// Download failed; stored as [`ERROR_SENTINEL`]
    Failed,
}

impl PhotoFile {
    /// Decode the `local_path` column
    pub fn from_column(value: Option<String>) -> Self {
        match value {
            None => PhotoFile::Pending,
            Some(s) if s == ERROR_SENTINEL => PhotoFile::Failed,
            Some(s) => PhotoFile::Downloaded(PathBuf::from(s)),
        }
    }

    /// Encode for the `local_path` column
    pub fn to_column(&self) -> Option<String> {
        match self {
            PhotoFile::Pending => None,
            PhotoFile::Downloaded(path) => Some(path.to_string_lossy().to_string()),
            PhotoFile::Failed => Some(ERROR_SENTINEL.to_string()),
        }
    }

    /// Path on disk, if the photo was downloaded
    pub fn path(&self) -> Option<&Path> {
        match self {
            PhotoFile::Downloaded(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PhotoFile::Pending)
    }
}
