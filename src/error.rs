/// Error types shared by the library, the Flickr client and the album flow

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build request URL: {0}")]
    Url(#[from] url::ParseError),

    /// Flickr answered with `"stat": "fail"`
    #[error("Flickr API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Malformed search response: {0}")]
    MalformedResponse(String),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: StatusCode, url: String },

    #[error("Pin {0} does not exist")]
    PinNotFound(i64),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
