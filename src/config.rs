use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::flickr::{DEFAULT_BASE_URL, DEFAULT_MAX_PAGE, DEFAULT_PER_PAGE};
use crate::state::library::Library;

/// Runtime configuration loaded from environment variables.
///
/// Only the API key is required; everything else has a default
/// suitable for a single local user.
#[derive(Debug, Clone)]
pub struct Config {
    /// Flickr API key
    pub api_key: String,
    /// Flickr REST endpoint
    pub base_url: String,
    /// Photos per search page
    pub per_page: u32,
    /// Upper bound for the random search page
    pub max_page: u32,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Directory downloaded images are written to
    pub photo_dir: PathBuf,
    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,
}

impl Config {
    /// Defaults for everything but the key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            per_page: DEFAULT_PER_PAGE,
            max_page: DEFAULT_MAX_PAGE,
            db_path: Library::default_db_path()
                .ok_or_else(|| Error::Config("could not determine user data directory".into()))?,
            photo_dir: default_photo_dir().ok_or_else(|| {
                Error::Config("could not determine user document directory".into())
            })?,
            http_timeout_secs: 30,
        })
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                                   |
    /// |-----------------------------|-------------------------------------------|
    /// | `FLICKR_API_KEY`            | required                                  |
    /// | `FLICKR_BASE_URL`           | `https://api.flickr.com/services/rest/`   |
    /// | `FLICKR_PER_PAGE`           | `21`                                      |
    /// | `FLICKR_MAX_PAGE`           | `20`                                      |
    /// | `VIRTUAL_TOURIST_DB`        | user data dir                             |
    /// | `VIRTUAL_TOURIST_PHOTO_DIR` | user document dir                         |
    /// | `HTTP_TIMEOUT_SECS`         | `30`                                      |
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("FLICKR_API_KEY")
            .map_err(|_| Error::Config("FLICKR_API_KEY must be set".into()))?;
        let mut config = Self::new(api_key)?;

        if let Ok(base_url) = std::env::var("FLICKR_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(per_page) = parse_var("FLICKR_PER_PAGE")? {
            config.per_page = per_page;
        }
        if let Some(max_page) = parse_var("FLICKR_MAX_PAGE")? {
            config.max_page = max_page;
        }
        if let Ok(db_path) = std::env::var("VIRTUAL_TOURIST_DB") {
            config.db_path = PathBuf::from(db_path);
        }
        if let Ok(photo_dir) = std::env::var("VIRTUAL_TOURIST_PHOTO_DIR") {
            config.photo_dir = PathBuf::from(photo_dir);
        }
        if let Some(timeout) = parse_var("HTTP_TIMEOUT_SECS")? {
            config.http_timeout_secs = timeout;
        }

        Ok(config)
    }
}

/// ~/Documents/virtual-tourist/photos, falling back to the data directory.
/// Always a dedicated `photos` directory so it never holds the database.
fn default_photo_dir() -> Option<PathBuf> {
    let mut path = dirs::document_dir().or_else(dirs::data_dir)?;
    path.push("virtual-tourist");
    path.push("photos");
    Some(path)
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} must be a number, got '{value}'"))),
        Err(_) => Ok(None),
    }
}
