//! Upstream source download.
//!
//! A single HTTP GET, no retries. The archive's integrity is not checked:
//! the release URL is trusted as pinned.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::info;

use crate::error::{BuildError, Result, Stage};
use crate::release::ReleaseDescriptor;

/// Retrieves a release archive into a local file.
pub trait SourceFetcher {
    /// Download `release` to `dest`, returning the number of bytes written.
    fn fetch(&self, release: &ReleaseDescriptor, dest: &Path) -> Result<u64>;
}

/// Fetches over HTTP(S) with a blocking client and no timeout.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .user_agent(concat!("router-kernel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BuildError::Fetch {
                url: String::new(),
                reason: format!("creating HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, release: &ReleaseDescriptor, dest: &Path) -> Result<u64> {
        let url = release.url();
        let fetch_err = |reason: String| BuildError::Fetch {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(fetch_err(format!(
                "unexpected HTTP status code: got {}, want {}",
                status.as_u16(),
                StatusCode::OK.as_u16()
            )));
        }

        let mut out =
            File::create(dest).map_err(|e| BuildError::io(Stage::Fetch, "creating", dest, e))?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut written = 0u64;
        loop {
            let n = response
                .read(&mut buf)
                .map_err(|e| fetch_err(format!("reading response body: {}", e)))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .map_err(|e| BuildError::io(Stage::Fetch, "writing", dest, e))?;
            written += n as u64;
        }
        out.flush()
            .map_err(|e| BuildError::io(Stage::Fetch, "writing", dest, e))?;

        info!(stage = "fetch", %url, bytes = written, dest = %dest.display(), "downloaded");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn release_at(server: &mockito::ServerGuard, name: &str) -> ReleaseDescriptor {
        ReleaseDescriptor::from_url(&format!("{}/pub/{}", server.url(), name)).unwrap()
    }

    #[test]
    fn test_fetch_writes_exact_body() {
        let mut server = mockito::Server::new();
        let body: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let mock = server
            .mock("GET", "/pub/linux-6.7.tar.xz")
            .with_status(200)
            .with_body(&body)
            .create();

        let temp = TempDir::new().unwrap();
        let release = release_at(&server, "linux-6.7.tar.xz");
        let dest = temp.path().join(release.archive_name());
        let written = HttpFetcher::new().unwrap().fetch(&release, &dest).unwrap();

        mock.assert();
        assert_eq!(written, body.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), body);
    }

    #[test]
    fn test_fetch_overwrites_previous_download() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/pub/linux-6.7.tar.xz")
            .with_status(200)
            .with_body("fresh")
            .create();

        let temp = TempDir::new().unwrap();
        let release = release_at(&server, "linux-6.7.tar.xz");
        let dest = temp.path().join(release.archive_name());
        fs::write(&dest, "stale and longer").unwrap();

        HttpFetcher::new().unwrap().fetch(&release, &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "fresh");
    }

    #[test]
    fn test_non_ok_status_is_fetch_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/pub/linux-6.7.tar.xz")
            .with_status(404)
            .create();

        let temp = TempDir::new().unwrap();
        let release = release_at(&server, "linux-6.7.tar.xz");
        let dest = temp.path().join(release.archive_name());
        let err = HttpFetcher::new().unwrap().fetch(&release, &dest).unwrap_err();

        assert_eq!(err.stage(), Stage::Fetch);
        let msg = err.to_string();
        assert!(msg.contains("got 404, want 200"), "got: {msg}");
        assert!(msg.contains("linux-6.7.tar.xz"), "got: {msg}");
        assert!(!dest.exists());
    }

    #[test]
    fn test_full_disk_is_io_error() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/pub/linux-6.7.tar.xz")
            .with_status(200)
            .with_body(vec![0u8; 200 * 1024])
            .create();

        let release = release_at(&server, "linux-6.7.tar.xz");
        let err = HttpFetcher::new().unwrap().fetch(&release, full).unwrap_err();
        match err {
            BuildError::Io { stage, action, path, .. } => {
                assert_eq!(stage, Stage::Fetch);
                assert_eq!(action, "writing");
                assert_eq!(path, full);
            }
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_unwritable_destination_is_io_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/pub/linux-6.7.tar.xz")
            .with_status(200)
            .with_body("archive")
            .create();

        let temp = TempDir::new().unwrap();
        let release = release_at(&server, "linux-6.7.tar.xz");
        let dest = temp.path().join("missing-dir").join(release.archive_name());
        let err = HttpFetcher::new().unwrap().fetch(&release, &dest).unwrap_err();
        assert!(matches!(err, BuildError::Io { stage: Stage::Fetch, .. }));
    }
}
