//! Async REST client for the catalog endpoints of the signaling service.

use eye_common::config::ServerConfig;
use eye_common::{PastStreamInfo, StreamId, StreamInfo};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{CatalogError, Result};

const DEFAULT_BASE: &str = "http://localhost:8000";

/// `GET /` health payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub service: String,
}

#[derive(Deserialize)]
struct StreamList {
    streams: Vec<StreamInfo>,
}

#[derive(Deserialize)]
struct PastStreamList {
    past_streams: Vec<PastStreamInfo>,
}

/// Async catalog client.
///
/// ```rust,no_run
/// use eye_catalog::CatalogClient;
///
/// #[tokio::main]
/// async fn main() -> eye_catalog::Result<()> {
///     let catalog = CatalogClient::new(None, None)?;
///     for stream in catalog.list_streams().await? {
///         println!("{} at {},{}", stream.id, stream.latitude, stream.longitude);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: Url,
}

impl CatalogClient {
    pub fn new(base_url: Option<&str>, token: Option<&str>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token {
            let token = if token.starts_with("Bearer ") {
                token.to_owned()
            } else {
                format!("Bearer {token}")
            };
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&token)
                    .map_err(|e| CatalogError::Other(e.to_string()))?,
            );
        }
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(CatalogError::Http)?;

        // Trailing slash so `join` appends instead of replacing the last segment.
        let base = base_url.unwrap_or(DEFAULT_BASE).trim_end_matches('/');
        Ok(Self {
            client,
            base_url: Url::parse(&format!("{base}/"))?,
        })
    }

    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        Self::new(Some(&server.base_url), server.token.as_deref())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Internal ──────────────────────────────────────────────────────────────

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// `{base}/past-streams/{id}` with the id percent-encoded as one segment.
    pub(crate) fn past_stream_url(&self, stream_id: &StreamId) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CatalogError::Other(format!("{}: not a hierarchical URL", self.base_url)))?
            .pop_if_empty()
            .extend(["past-streams", stream_id.as_str()]);
        Ok(url)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    async fn request<T: DeserializeOwned>(&self, method: Method, url: Url) -> Result<T> {
        tracing::debug!(%method, %url, "Catalog request");
        let resp = self.client.request(method, url).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, self.url(path)?).await
    }

    // ── Service ───────────────────────────────────────────────────────────────

    pub async fn health(&self) -> Result<ServiceStatus> {
        self.get("/").await
    }

    // ── Streams ───────────────────────────────────────────────────────────────

    /// Broadcasts that are live right now.
    pub async fn list_streams(&self) -> Result<Vec<StreamInfo>> {
        Ok(self.get::<StreamList>("/streams").await?.streams)
    }

    /// Finished broadcasts with a recording.
    pub async fn list_past_streams(&self) -> Result<Vec<PastStreamInfo>> {
        Ok(self.get::<PastStreamList>("/past-streams").await?.past_streams)
    }

    pub async fn get_past_stream(&self, stream_id: &StreamId) -> Result<PastStreamInfo> {
        self.request(Method::GET, self.past_stream_url(stream_id)?).await
    }

    /// Delete a past stream and its recording on the server.
    pub async fn delete_past_stream(&self, stream_id: &StreamId) -> Result<()> {
        let _: Value = self
            .request(Method::DELETE, self.past_stream_url(stream_id)?)
            .await?;
        tracing::info!(stream = %stream_id, "Past stream deleted");
        Ok(())
    }
}

/// Turn a non-2xx response into [`CatalogError::Api`], using the server's
/// `detail` (or `error`) field when present.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| {
            v.get("detail")
                .or_else(|| v.get("error"))
                .and_then(|e| e.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| status.to_string());
    Err(CatalogError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP/1.1 response and report the request line.
    pub(crate) async fn serve_once(
        status: &'static str,
        body: impl Into<Vec<u8>>,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let body = body.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let head = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });
        (base, handle)
    }

    #[test]
    fn base_url_keeps_path_prefix() {
        let client = CatalogClient::new(Some("http://example.org/eye/"), None).unwrap();
        assert_eq!(
            client.url("/past-streams/abc").unwrap().as_str(),
            "http://example.org/eye/past-streams/abc"
        );
    }

    #[test]
    fn past_stream_url_encodes_id() {
        let client = CatalogClient::new(Some("http://example.org/eye"), None).unwrap();
        let id: StreamId = "unit 7/b".parse().unwrap();
        assert_eq!(
            client.past_stream_url(&id).unwrap().as_str(),
            "http://example.org/eye/past-streams/unit%207%2Fb"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(
            CatalogClient::new(Some("not a url"), None),
            Err(CatalogError::Url(_))
        ));
    }

    #[tokio::test]
    async fn lists_live_streams() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"streams":[{"id":"abc123","started_at":"2024-05-01T10:15:30.123456","latitude":52.5,"longitude":13.4,"notes":"","is_active":true}]}"#,
        )
        .await;
        let client = CatalogClient::new(Some(&base), Some("secret")).unwrap();

        let streams = client.list_streams().await.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].id.as_str(), "abc123");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /streams HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn missing_past_stream_is_not_found() {
        let (base, _server) = serve_once("404 Not Found", r#"{"detail":"Stream not found"}"#).await;
        let client = CatalogClient::new(Some(&base), None).unwrap();

        let err = client
            .get_past_stream(&"gone".parse().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "API error 404: Stream not found");
    }

    #[tokio::test]
    async fn listing_and_lookup_handle_spaced_ids() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"past_streams":[{"id":"unit 7","started_at":"2024-05-01T10:15:30","ended_at":"2024-05-01T10:20:30","latitude":52.5,"longitude":13.4,"notes":"","duration_seconds":300.0,"video_filename":"unit 7.webm","video_url":"/recordings/unit%207.webm"}]}"#,
        )
        .await;
        let client = CatalogClient::new(Some(&base), None).unwrap();
        let past = client.list_past_streams().await.unwrap();
        assert_eq!(past[0].id.as_str(), "unit 7");
        server.await.unwrap();

        let (base, server) = serve_once("404 Not Found", r#"{"detail":"Stream not found"}"#).await;
        let client = CatalogClient::new(Some(&base), None).unwrap();
        let err = client.get_past_stream(&past[0].id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(server
            .await
            .unwrap()
            .starts_with("GET /past-streams/unit%207 HTTP/1.1"));
    }

    #[tokio::test]
    async fn delete_sends_delete() {
        let (base, server) = serve_once("200 OK", r#"{"success":true}"#).await;
        let client = CatalogClient::new(Some(&base), None).unwrap();

        client
            .delete_past_stream(&"old42".parse().unwrap())
            .await
            .unwrap();
        assert!(server.await.unwrap().starts_with("DELETE /past-streams/old42 HTTP/1.1"));
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (base, _server) = serve_once(
            "200 OK",
            r#"{"status":"ok","service":"EmergencyEye Signaling Server"}"#,
        )
        .await;
        let client = CatalogClient::new(Some(&base), None).unwrap();
        let status = client.health().await.unwrap();
        assert_eq!(status.status, "ok");
    }
}
