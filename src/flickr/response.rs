/// Wire types for `flickr.photos.search` with `format=json&nojsoncallback=1`

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

const STAT_FAIL: &str = "fail";

/// One page of search results, reduced to what the album needs
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub page: u32,
    /// Total number of pages available for this query
    pub pages: u32,
    /// Medium-size image URLs, in result order
    pub urls: Vec<String>,
}

/// Top-level envelope. On success `photos` is set; on failure
/// `stat` is `"fail"` and `code`/`message` describe the problem.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    stat: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    photos: Option<PhotosPayload>,
}

#[derive(Debug, Deserialize)]
struct PhotosPayload {
    #[serde(default)]
    page: Option<u32>,
    pages: Option<u32>,
    photo: Option<Vec<PhotoEntry>>,
}

#[derive(Debug, Deserialize)]
struct PhotoEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url_m: Option<String>,
}

impl Envelope {
    /// The API error carried by a `"stat": "fail"` payload, if any
    pub(crate) fn api_error(&self) -> Option<Error> {
        if self.stat.as_deref() != Some(STAT_FAIL) {
            return None;
        }
        Some(Error::Api {
            code: self.code.unwrap_or_default(),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

/// Parse a search response body.
///
/// Entries without a `url_m` are skipped; a missing `photos`, `pages` or
/// `photo` key fails the whole page.
pub fn parse_search_response(body: &str) -> Result<SearchPage> {
    let envelope: Envelope = serde_json::from_str(body)?;

    if let Some(err) = envelope.api_error() {
        return Err(err);
    }

    let photos = envelope
        .photos
        .ok_or_else(|| Error::MalformedResponse("missing 'photos'".to_string()))?;
    let pages = photos
        .pages
        .ok_or_else(|| Error::MalformedResponse("missing 'pages'".to_string()))?;
    let entries = photos
        .photo
        .ok_or_else(|| Error::MalformedResponse("missing 'photo'".to_string()))?;

    let urls = entries
        .into_iter()
        .filter_map(|entry| match entry.url_m {
            Some(url) => Some(url),
            None => {
                warn!("Search result {:?} has no url_m, skipping", entry.id);
                None
            }
        })
        .collect();

    Ok(SearchPage {
        page: photos.page.unwrap_or(1),
        pages,
        urls,
    })
}
