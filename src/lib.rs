//! Pins, photo albums and Flickr downloads for a virtual tourist map.
//!
//! - [`state`]: SQLite store of pins and photos
//! - [`flickr`]: photo search client
//! - [`album`]: the refresh flow tying search, storage and downloads together
//! - [`events`]: best-effort refresh notifications

pub mod album;
pub mod config;
pub mod error;
pub mod events;
pub mod flickr;
pub mod state;

pub use album::{DownloadBatch, PhotoAlbum};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{AlbumEvent, EventBus};
pub use flickr::{FlickrClient, PhotoSource};
pub use state::data::{Photo, PhotoFile, Pin};
pub use state::library::Library;
