use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use virtual_tourist::{
    Config, DownloadBatch, Error, EventBus, FlickrClient, Library, PhotoAlbum, PhotoFile, Result,
};

const USAGE: &str = "usage: virtual-tourist [delete] <latitude> <longitude>";

/// Application messages (what a map UI would send)
#[derive(Debug, Clone)]
enum Message {
    /// Long-press on the map
    DropPin { latitude: f64, longitude: f64 },
    /// "New Collection" in the album view
    NewCollection(i64),
    /// Tap on a pin in edit mode
    DeletePin(i64),
}

/// Main application state
struct VirtualTourist {
    album: PhotoAlbum,
    /// Status message to display to the user
    status: String,
}

impl VirtualTourist {
    fn new(config: &Config) -> Result<Self> {
        let library = Arc::new(Library::open(&config.db_path)?);
        library.verify_photo_files()?;

        let source = Arc::new(FlickrClient::from_config(config)?);
        let album = PhotoAlbum::new(library.clone(), source, EventBus::default(), &config.photo_dir)
            .with_max_page(config.max_page);

        let status = format!(
            "Ready. {} pins, {} photos.",
            library.pin_count()?,
            library.photo_count()?
        );
        info!("{}", status);

        Ok(VirtualTourist { album, status })
    }

    /// Handle a message, returning the downloads it started (if any)
    async fn update(&mut self, message: Message) -> Result<Option<DownloadBatch>> {
        let library = self.album.library().clone();
        match message {
            Message::DropPin { latitude, longitude } => {
                // Tapping an existing pin opens its album instead
                if let Some(pin) = library.find_pin_at(latitude, longitude)? {
                    let batch = if library.photos_for_pin(pin.id)?.is_empty() {
                        self.album.download_photos_for_pin(pin.id).await?
                    } else {
                        self.album.retry_pending(pin.id)?
                    };
                    self.status = format!("Opened pin {} ({} downloads)", pin.id, batch.len());
                    return Ok(Some(batch));
                }

                let pin = library.insert_pin(latitude, longitude)?;
                let batch = self.album.download_photos_for_pin(pin.id).await?;
                self.status = format!("Dropped pin {} with {} photos", pin.id, batch.len());
                Ok(Some(batch))
            }
            Message::NewCollection(pin_id) => {
                let batch = self.album.new_collection(pin_id).await?;
                self.status = format!("New collection for pin {}: {} photos", pin_id, batch.len());
                Ok(Some(batch))
            }
            Message::DeletePin(pin_id) => {
                let removed = self.album.delete_pin(pin_id)?;
                self.status = format!("Deleted pin {} and {} photos", pin_id, removed);
                Ok(None)
            }
        }
    }
}

fn parse_args() -> Result<(bool, f64, f64)> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let delete = args.first().map(String::as_str) == Some("delete");
    if delete {
        args.remove(0);
    }

    let [latitude, longitude] = args.as_slice() else {
        return Err(Error::Config(USAGE.to_string()));
    };
    let latitude: f64 = latitude
        .parse()
        .map_err(|_| Error::Config(format!("invalid latitude '{latitude}'")))?;
    let longitude: f64 = longitude
        .parse()
        .map_err(|_| Error::Config(format!("invalid longitude '{longitude}'")))?;

    Ok((delete, latitude, longitude))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "virtual_tourist=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (delete, latitude, longitude) = parse_args()?;
    let config = Config::from_env()?;
    let mut app = VirtualTourist::new(&config)?;

    // Stand-in for the album view: redraw on every event
    let mut events = app.album.events().subscribe();
    let redraws = tokio::spawn(async move {
        let mut count = 0usize;
        loop {
            match events.recv().await {
                Ok(event) => {
                    count += 1;
                    info!("Refresh pin {}: {:?}", event.pin_id(), event);
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} refresh events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
        count
    });

    let library = app.album.library().clone();
    let existing = library.find_pin_at(latitude, longitude)?;
    // A pin whose album is complete gets a fresh page
    let album_complete = match &existing {
        Some(pin) => {
            !library.photos_for_pin(pin.id)?.is_empty()
                && library.pending_photos(pin.id)?.is_empty()
        }
        None => false,
    };

    let message = match existing {
        Some(pin) if delete => Message::DeletePin(pin.id),
        None if delete => {
            return Err(Error::Config(format!("no pin at ({latitude}, {longitude})")));
        }
        Some(pin) if album_complete => Message::NewCollection(pin.id),
        _ => Message::DropPin { latitude, longitude },
    };

    if let Some(batch) = app.update(message).await? {
        let pin_id = batch.pin_id;
        batch.wait().await;

        for photo in library.photos_for_pin(pin_id)? {
            match &photo.file {
                PhotoFile::Downloaded(path) => println!("{}\t{}", photo.id, path.display()),
                PhotoFile::Failed => println!("{}\terror\t{}", photo.id, photo.remote_url),
                PhotoFile::Pending => println!("{}\tpending\t{}", photo.id, photo.remote_url),
            }
        }
    }

    println!("{}", app.status);

    // Dropping the album closes the event channel
    drop(app);
    if let Ok(count) = redraws.await {
        info!("{} refresh events delivered", count);
    }

    Ok(())
}
