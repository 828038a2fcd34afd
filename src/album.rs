/// Photo album refresh flow
///
/// Given a pin: pick a random search page, create one placeholder row per
/// result, then download every image in its own task. Each completion
/// records the file path (or the error sentinel) and publishes a refresh
/// event. Downloads are never retried, capped, or cancelled.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::events::{AlbumEvent, EventBus};
use crate::flickr::{PhotoSource, DEFAULT_MAX_PAGE};
use crate::state::data::{Photo, PhotoFile};
use crate::state::library::Library;

/// Pick the search page for the next batch.
///
/// Unknown (or zero) page counts use page 1. Otherwise the page is uniform
/// in `[1, min(page_count, max_page)]`.
pub fn choose_page(page_count: Option<u32>, max_page: u32) -> u32 {
    match page_count {
        Some(pages) if pages > 0 => {
            let limit = pages.min(max_page).max(1);
            fastrand::u32(1..=limit)
        }
        _ => 1,
    }
}

/// File name for a downloaded image: the last path segment of its URL
pub fn file_name_for_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedResponse(format!("no file name in URL {url}")))
}

/// Photos of one batch plus the tasks downloading them.
///
/// Dropping the batch does not cancel the downloads.
#[derive(Debug)]
pub struct DownloadBatch {
    pub pin_id: i64,
    /// Search page the photos came from (`None` for a retry of pending photos)
    pub page: Option<u32>,
    /// Rows as inserted, all pending
    pub photos: Vec<Photo>,
    handles: Vec<JoinHandle<()>>,
}

impl DownloadBatch {
    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    /// Wait for every download of this batch to finish
    pub async fn wait(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Download task for pin {} ended abnormally: {}", self.pin_id, e);
            }
        }
    }
}

/// Drives searches, downloads and deletions for pins.
///
/// Cheap to clone: every clone shares the library, the photo source,
/// the event bus and the in-flight counter.
#[derive(Clone)]
pub struct PhotoAlbum {
    library: Arc<Library>,
    source: Arc<dyn PhotoSource>,
    events: EventBus,
    photo_dir: PathBuf,
    max_page: u32,
    in_flight: Arc<AtomicUsize>,
}

impl PhotoAlbum {
    pub fn new(
        library: Arc<Library>,
        source: Arc<dyn PhotoSource>,
        events: EventBus,
        photo_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            library,
            source,
            events,
            photo_dir: photo_dir.into(),
            max_page: DEFAULT_MAX_PAGE,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override the upper bound for random pages
    pub fn with_max_page(mut self, max_page: u32) -> Self {
        self.max_page = max_page;
        self
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn photo_dir(&self) -> &Path {
        &self.photo_dir
    }

    /// Downloads spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Search a random page near the pin and start downloading every result.
    ///
    /// A failed search is returned as an error and leaves no rows behind.
    pub async fn download_photos_for_pin(&self, pin_id: i64) -> Result<DownloadBatch> {
        let pin = self
            .library
            .get_pin(pin_id)?
            .ok_or(Error::PinNotFound(pin_id))?;

        let page = choose_page(pin.page_count, self.max_page);
        let result = match self.source.search(pin.latitude, pin.longitude, page).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Photo search for pin {} failed: {}", pin_id, e);
                return Err(e);
            }
        };

        self.library.set_pin_page_count(pin_id, result.pages)?;

        let mut photos = Vec::with_capacity(result.urls.len());
        for url in &result.urls {
            photos.push(self.library.insert_photo(pin_id, url)?);
        }

        info!(
            "Pin {}: page {} of {} returned {} photos",
            pin_id,
            page,
            result.pages,
            photos.len()
        );
        self.events.publish(AlbumEvent::BatchStarted {
            pin_id,
            page,
            count: photos.len(),
        });

        let handles = photos
            .iter()
            .map(|photo| self.spawn_download(photo.clone()))
            .collect();

        Ok(DownloadBatch {
            pin_id,
            page: Some(page),
            photos,
            handles,
        })
    }

    /// Replace a pin's photos with a fresh random page.
    /// Every existing photo (row and file) is removed before the search.
    pub async fn new_collection(&self, pin_id: i64) -> Result<DownloadBatch> {
        if self.library.get_pin(pin_id)?.is_none() {
            return Err(Error::PinNotFound(pin_id));
        }

        let removed = self.library.delete_photos_for_pin(pin_id)?;
        for photo in &removed {
            self.remove_unused_file(photo);
        }
        debug!("Pin {}: cleared {} photos for a new collection", pin_id, removed.len());
        self.events.publish(AlbumEvent::PhotosDeleted {
            pin_id,
            count: removed.len(),
        });

        self.download_photos_for_pin(pin_id).await
    }

    /// Restart downloads for photos that never completed
    pub fn retry_pending(&self, pin_id: i64) -> Result<DownloadBatch> {
        let photos = self.library.pending_photos(pin_id)?;
        if !photos.is_empty() {
            info!("Pin {}: retrying {} pending photos", pin_id, photos.len());
        }

        let handles = photos
            .iter()
            .map(|photo| self.spawn_download(photo.clone()))
            .collect();

        Ok(DownloadBatch {
            pin_id,
            page: None,
            photos,
            handles,
        })
    }

    /// Download one photo and record the outcome.
    ///
    /// Any failure becomes [`PhotoFile::Failed`]; nothing is returned as an error.
    pub async fn download_photo_image(&self, photo: &Photo) -> PhotoFile {
        let file = match self.fetch_to_disk(photo).await {
            Ok(path) => PhotoFile::Downloaded(path),
            Err(e) => {
                warn!("Error downloading {}: {}", photo.remote_url, e);
                PhotoFile::Failed
            }
        };

        match self.library.set_photo_file(photo.id, &file) {
            Ok(true) => {
                let event = match file.path() {
                    Some(path) => AlbumEvent::PhotoReady {
                        pin_id: photo.pin_id,
                        photo_id: photo.id,
                        path: path.to_path_buf(),
                    },
                    None => AlbumEvent::PhotoFailed {
                        pin_id: photo.pin_id,
                        photo_id: photo.id,
                    },
                };
                self.events.publish(event);
            }
            // Deleted while downloading; the file is left in place
            Ok(false) => debug!("Photo {} was deleted during download", photo.id),
            Err(e) => warn!("Could not save download result for photo {}: {}", photo.id, e),
        }

        file
    }

    /// Delete one photo and its file. Returns false if it didn't exist.
    pub fn delete_photo(&self, photo_id: i64) -> Result<bool> {
        let Some(photo) = self.library.delete_photo(photo_id)? else {
            return Ok(false);
        };
        self.remove_unused_file(&photo);
        self.events.publish(AlbumEvent::PhotosDeleted {
            pin_id: photo.pin_id,
            count: 1,
        });
        Ok(true)
    }

    /// Delete a pin with all its photos and their files.
    /// Returns how many photos went with it.
    pub fn delete_pin(&self, pin_id: i64) -> Result<usize> {
        let removed = self.library.delete_pin(pin_id)?;
        for photo in &removed {
            self.remove_unused_file(photo);
        }
        info!("Deleted pin {} with {} photos", pin_id, removed.len());
        self.events.publish(AlbumEvent::PhotosDeleted {
            pin_id,
            count: removed.len(),
        });
        Ok(removed.len())
    }

    fn spawn_download(&self, photo: Photo) -> JoinHandle<()> {
        let guard = InFlight::enter(&self.in_flight);
        let album = self.clone();
        tokio::spawn(async move {
            // Released on completion and on panic alike
            let _guard = guard;
            album.download_photo_image(&photo).await;
        })
    }

    /// Best-effort removal of a deleted photo's file.
    /// Files still recorded by another photo (same URL on a nearby pin) are kept.
    fn remove_unused_file(&self, photo: &Photo) {
        let Some(path) = photo.file.path() else {
            return;
        };
        if self.library.path() == Some(path) {
            return;
        }
        match self.library.path_in_use(path) {
            Ok(true) => {
                debug!("Keeping {}, still used by another photo", path.display());
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Could not check whether {} is shared: {}", path.display(), e);
                return;
            }
        }
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }

    async fn fetch_to_disk(&self, photo: &Photo) -> Result<PathBuf> {
        let file_name = file_name_for_url(&photo.remote_url)?;
        let bytes = self.source.fetch(&photo.remote_url).await?;

        let path = self.photo_dir.join(file_name);
        if self.library.path() == Some(path.as_path()) {
            return Err(Error::MalformedResponse(format!(
                "{} would overwrite the database",
                photo.remote_url
            )));
        }

        tokio::fs::create_dir_all(&self.photo_dir).await?;
        tokio::fs::write(&path, &bytes).await?;

        debug!("Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

/// Counts one running download until dropped
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PhotoAlbum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoAlbum")
            .field("library", &self.library)
            .field("photo_dir", &self.photo_dir)
            .field("max_page", &self.max_page)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
