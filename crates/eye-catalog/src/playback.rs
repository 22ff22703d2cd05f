//! Recording playback: resolve a past stream's video and fetch it locally.

use std::path::{Path, PathBuf};

use eye_common::PastStreamInfo;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::{CatalogError, Result};
use crate::rest::{check_status, CatalogClient};

impl CatalogClient {
    /// Absolute URL of the recording, resolved against the server base.
    ///
    /// `video_url` is usually server-relative (`/recordings/…`), but absolute
    /// URLs are passed through untouched.
    pub fn recording_url(&self, stream: &PastStreamInfo) -> Result<Url> {
        let raw = stream.video_url.trim();
        if raw.is_empty() {
            return Err(CatalogError::NoRecording(stream.id.to_string()));
        }
        match Url::parse(raw) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.url(raw),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream the recording into `dir`, returning the written path.
    pub async fn download_recording(&self, stream: &PastStreamInfo, dir: &Path) -> Result<PathBuf> {
        let url = self.recording_url(stream)?;
        let resp = self.http().get(url.clone()).send().await?;
        let mut resp = check_status(resp).await?;

        fs::create_dir_all(dir).await?;
        let path = dir.join(local_file_name(stream));
        let mut file = fs::File::create(&path).await?;

        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(
            stream = %stream.id,
            %url,
            path = %path.display(),
            bytes = written,
            "Recording downloaded"
        );
        Ok(path)
    }
}

/// File name for the local copy: the server's file name with any directory
/// parts stripped, or `{id}.webm` if that leaves nothing usable.
fn local_file_name(stream: &PastStreamInfo) -> String {
    let name = stream
        .video_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        format!("{}.webm", stream.id)
    } else {
        name.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::tests::serve_once;

    fn past(video_filename: &str, video_url: &str) -> PastStreamInfo {
        PastStreamInfo {
            id: "old42".parse().unwrap(),
            started_at: "2024-05-01T09:00:00".into(),
            ended_at: "2024-05-01T09:05:00".into(),
            latitude: 0.0,
            longitude: 0.0,
            notes: String::new(),
            duration_seconds: 300.0,
            video_filename: video_filename.into(),
            video_url: video_url.into(),
        }
    }

    #[test]
    fn resolves_relative_and_absolute_urls() {
        let client = CatalogClient::new(Some("http://localhost:8000"), None).unwrap();

        let url = client
            .recording_url(&past("old42_1a2b.webm", "/recordings/old42_1a2b.webm"))
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/recordings/old42_1a2b.webm");

        let url = client
            .recording_url(&past("x.webm", "https://cdn.example.org/x.webm"))
            .unwrap();
        assert_eq!(url.host_str(), Some("cdn.example.org"));
    }

    #[test]
    fn missing_recording_is_reported() {
        let client = CatalogClient::new(None, None).unwrap();
        let err = client.recording_url(&past("", "")).unwrap_err();
        assert!(matches!(err, CatalogError::NoRecording(id) if id == "old42"));
    }

    #[test]
    fn local_name_strips_directories() {
        assert_eq!(local_file_name(&past("../../etc/passwd", "")), "passwd");
        assert_eq!(local_file_name(&past("a\\b.webm", "")), "b.webm");
        assert_eq!(local_file_name(&past("..", "")), "old42.webm");
        assert_eq!(local_file_name(&past("", "")), "old42.webm");
    }

    #[tokio::test]
    async fn downloads_into_directory() {
        let (base, server) = serve_once("200 OK", b"webm-bytes".to_vec()).await;
        let client = CatalogClient::new(Some(&base), None).unwrap();
        let dir = std::env::temp_dir().join(format!("eye-playback-{}", std::process::id()));

        let path = client
            .download_recording(&past("old42_1a2b.webm", "/recordings/old42_1a2b.webm"), &dir)
            .await
            .unwrap();

        assert_eq!(path, dir.join("old42_1a2b.webm"));
        assert_eq!(fs::read(&path).await.unwrap(), b"webm-bytes");
        assert!(server
            .await
            .unwrap()
            .starts_with("GET /recordings/old42_1a2b.webm HTTP/1.1"));
        let _ = fs::remove_dir_all(&dir).await;
    }
}
