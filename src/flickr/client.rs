use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::response::{parse_search_response, Envelope, SearchPage};
use super::{PhotoSource, SEARCH_METHOD, URL_MEDIUM_EXTRA};
use crate::config::Config;
use crate::error::{Error, Result};

/// HTTP client for the Flickr REST API
#[derive(Debug, Clone)]
pub struct FlickrClient {
    http_client: Client,
    base_url: Url,
    api_key: String,
    per_page: u32,
}

impl FlickrClient {
    /// Create a client against `base_url`
    ///
    /// # Errors
    /// * If `base_url` is not a valid URL.
    /// * If the HTTP client can't be built.
    pub fn new(api_key: &str, base_url: &str, per_page: u32, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            api_key: api_key.to_string(),
            per_page,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.api_key,
            &config.base_url,
            config.per_page,
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// Full search URL for one page near a coordinate
    pub fn search_url(&self, latitude: f64, longitude: f64, page: u32) -> Result<Url> {
        let params = [
            ("method", SEARCH_METHOD.to_string()),
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("nojsoncallback", "1".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("extras", URL_MEDIUM_EXTRA.to_string()),
            ("page", page.to_string()),
            ("per_page", self.per_page.to_string()),
        ];
        Ok(Url::parse_with_params(self.base_url.as_str(), &params)?)
    }

    /// Search one page of photos
    ///
    /// # Errors
    /// * If the GET request can't be made.
    /// * If Flickr answers `"stat": "fail"` (mapped to [`Error::Api`]).
    /// * If the body is not the expected JSON.
    pub async fn search_photos(
        &self,
        latitude: f64,
        longitude: f64,
        page: u32,
    ) -> Result<SearchPage> {
        let url = self.search_url(latitude, longitude, page)?;
        debug!("Searching photos near ({}, {}) page {}", latitude, longitude, page);

        let response = self.http_client.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_for_response(&body, status, url));
        }

        parse_search_response(&body)
    }

    /// Download raw image bytes
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Prefer the API's own `fail` message over the bare HTTP status
fn error_for_response(body: &str, status: reqwest::StatusCode, url: Url) -> Error {
    serde_json::from_str::<Envelope>(body)
        .ok()
        .and_then(|envelope| envelope.api_error())
        .unwrap_or_else(|| Error::UnexpectedStatus {
            status,
            url: redact_api_key(url),
        })
}

fn redact_api_key(mut url: Url) -> String {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "api_key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

#[async_trait]
impl PhotoSource for FlickrClient {
    async fn search(&self, latitude: f64, longitude: f64, page: u32) -> Result<SearchPage> {
        self.search_photos(latitude, longitude, page).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_image(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::PhotoAlbum;
    use crate::events::EventBus;
    use crate::flickr::DEFAULT_BASE_URL;
    use crate::state::data::PhotoFile;
    use crate::state::library::Library;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn client() -> FlickrClient {
        FlickrClient::new("secret", DEFAULT_BASE_URL, 21, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn search_url_carries_every_parameter() {
        let url = client().search_url(48.8584, 2.2945, 7).unwrap();
        assert!(url.as_str().starts_with("https://api.flickr.com/services/rest/?"));

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["method"], "flickr.photos.search");
        assert_eq!(query["api_key"], "secret");
        assert_eq!(query["format"], "json");
        assert_eq!(query["nojsoncallback"], "1");
        assert_eq!(query["lat"], "48.8584");
        assert_eq!(query["lon"], "2.2945");
        assert_eq!(query["extras"], "url_m");
        assert_eq!(query["page"], "7");
        assert_eq!(query["per_page"], "21");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = FlickrClient::new("k", "not a url", 21, Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Url(_))));
    }

    #[test]
    fn error_body_prefers_api_message() {
        let url = client().search_url(0.0, 0.0, 1).unwrap();
        let body = r#"{"stat":"fail","code":105,"message":"Service currently unavailable"}"#;
        match error_for_response(body, reqwest::StatusCode::SERVICE_UNAVAILABLE, url.clone()) {
            Error::Api { code, .. } => assert_eq!(code, 105),
            other => panic!("expected API error, got {:?}", other),
        }

        match error_for_response("<html>", reqwest::StatusCode::BAD_GATEWAY, url) {
            Error::UnexpectedStatus { status, url } => {
                assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
                assert!(!url.contains("secret"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    /// Serve canned `(path prefix, status, body)` responses on a local port.
    /// Unmatched paths get a 404. Returns the server's base URL.
    async fn serve(routes: Vec<(&'static str, u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(prefix, _, _)| path.starts_with(prefix))
                    .map(|(_, status, body)| (*status, body.clone()))
                    .unwrap_or((404, String::new()));
                let reason = if status == 200 { "OK" } else { "Error" };

                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        format!("http://{addr}")
    }

    fn local_client(base: &str) -> FlickrClient {
        let base_url = format!("{base}/services/rest/");
        FlickrClient::new("secret", &base_url, 21, Duration::from_secs(5)).unwrap()
    }

    fn search_body(urls: &[String]) -> String {
        let photo: Vec<serde_json::Value> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| serde_json::json!({ "id": i.to_string(), "url_m": url }))
            .collect();
        serde_json::json!({
            "photos": { "page": 1, "pages": 4, "perpage": 21, "photo": photo },
            "stat": "ok"
        })
        .to_string()
    }

    #[tokio::test]
    async fn fetch_image_returns_body_on_success() {
        let base = serve(vec![("/img/", 200, "not really a jpeg".to_string())]).await;

        let bytes = local_client(&base)
            .fetch_image(&format!("{base}/img/a.jpg"))
            .await
            .unwrap();
        assert_eq!(bytes, b"not really a jpeg");
    }

    #[tokio::test]
    async fn fetch_image_rejects_error_status() {
        let base = serve(vec![("/img/", 404, "<html>gone</html>".to_string())]).await;
        let url = format!("{base}/img/gone.jpg");

        match local_client(&base).fetch_image(&url).await {
            Err(Error::UnexpectedStatus { status, url: reported }) => {
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
                assert_eq!(reported, url);
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn search_photos_parses_results() {
        let urls = vec!["https://live.staticflickr.com/1/a.jpg".to_string()];
        let base = serve(vec![("/services/rest/", 200, search_body(&urls))]).await;

        let page = local_client(&base).search_photos(48.8584, 2.2945, 1).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.pages, 4);
        assert_eq!(page.urls, urls);
    }

    #[tokio::test]
    async fn search_photos_maps_fail_stat_on_success_status() {
        let body = r#"{"stat":"fail","code":100,"message":"Invalid API Key"}"#.to_string();
        let base = serve(vec![("/services/rest/", 200, body)]).await;

        match local_client(&base).search_photos(0.0, 0.0, 1).await {
            Err(Error::Api { code, message }) => {
                assert_eq!(code, 100);
                assert_eq!(message, "Invalid API Key");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn search_photos_redacts_key_on_error_status() {
        let base = serve(vec![("/services/rest/", 502, "<html>".to_string())]).await;

        match local_client(&base).search_photos(0.0, 0.0, 1).await {
            Err(Error::UnexpectedStatus { status, url }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
                assert!(!url.contains("secret"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn album_records_sentinel_for_failed_download() {
        // Images and search come from two local servers
        let base = serve(vec![("/img/ok.jpg", 200, "jpeg".to_string())]).await;
        let urls = vec![format!("{base}/img/ok.jpg"), format!("{base}/img/missing.jpg")];
        let search = serve(vec![("/services/rest/", 200, search_body(&urls))]).await;

        let dir = tempdir().unwrap();
        let library = Arc::new(Library::open_in_memory().unwrap());
        let pin = library.insert_pin(48.8584, 2.2945).unwrap();
        let album = PhotoAlbum::new(
            library.clone(),
            Arc::new(local_client(&search)),
            EventBus::default(),
            dir.path().join("photos"),
        );

        let batch = album.download_photos_for_pin(pin.id).await.unwrap();
        assert_eq!(batch.len(), 2);
        batch.wait().await;

        let photos = library.photos_for_pin(pin.id).unwrap();
        let saved = dir.path().join("photos").join("ok.jpg");
        assert_eq!(photos[0].file, PhotoFile::Downloaded(saved.clone()));
        assert_eq!(std::fs::read(&saved).unwrap(), b"jpeg");
        assert_eq!(photos[1].file, PhotoFile::Failed);
        assert_eq!(photos[1].file.to_column().as_deref(), Some("error"));
        assert_eq!(library.get_pin(pin.id).unwrap().unwrap().page_count, Some(4));
    }
}
