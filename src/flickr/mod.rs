/// Flickr photo search
///
/// This module handles:
/// - Building and sending `flickr.photos.search` requests (client.rs)
/// - Parsing the JSON payload (response.rs)
/// - The [`PhotoSource`] seam the album downloads through

use async_trait::async_trait;

use crate::error::Result;

pub mod client;
pub mod response;

pub use client::FlickrClient;
pub use response::SearchPage;

/// REST endpoint for every Flickr API method
pub const DEFAULT_BASE_URL: &str = "https://api.flickr.com/services/rest/";

pub const SEARCH_METHOD: &str = "flickr.photos.search";

/// `extras` value that adds the medium-size image URL to each result
pub const URL_MEDIUM_EXTRA: &str = "url_m";

/// Photos requested per page (one album)
pub const DEFAULT_PER_PAGE: u32 = 21;

/// Highest page a random batch is drawn from
pub const DEFAULT_MAX_PAGE: u32 = 20;

/// Where album photos come from
#[async_trait]
pub trait PhotoSource: Send + Sync {
    /// Fetch one page of photo URLs near a coordinate
    async fn search(&self, latitude: f64, longitude: f64, page: u32) -> Result<SearchPage>;

    /// Fetch the bytes behind one photo URL
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
