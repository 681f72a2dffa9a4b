use crate::{artifact_path, ModelError, ModelSpec, Result, MIN_ARTIFACT_BYTES};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
}

impl DownloadProgress {
    /// Fraction in `[0, 1]`. Zero when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

pub fn huggingface_url(repo: &str, filename: &str) -> String {
    format!("https://huggingface.co/{}/resolve/main/{}", repo, filename)
}

/// Fetch the model's weights into `dir`, returning the final artifact path.
///
/// The body is streamed into a `.part` sibling and renamed into place once
/// complete. An artifact already on disk is returned without a request.
pub async fn download_artifact<F>(
    client: &reqwest::Client,
    spec: &ModelSpec,
    dir: &Path,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<PathBuf>
where
    F: FnMut(DownloadProgress),
{
    let dest = artifact_path(spec, dir);
    if let Ok(meta) = std::fs::metadata(&dest) {
        if meta.len() > MIN_ARTIFACT_BYTES {
            tracing::info!(path = ?dest, "Artifact already present, skipping download");
            on_progress(DownloadProgress {
                downloaded_bytes: meta.len(),
                total_bytes: meta.len(),
            });
            return Ok(dest);
        }
    }

    let url = spec.download_url();
    tracing::info!("Downloading {} to {:?}", url, dest);
    fetch_to(client, &url, &dest, spec.size_bytes, cancel, &mut on_progress).await?;
    Ok(dest)
}

async fn fetch_to<F>(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    fallback_total: u64,
    cancel: &CancellationToken,
    on_progress: &mut F,
) -> Result<u64>
where
    F: FnMut(DownloadProgress),
{
    if cancel.is_cancelled() {
        return Err(ModelError::Cancelled);
    }

    let resp = client
        .get(url)
        .header(reqwest::header::USER_AGENT, "localchat/0.1.0")
        .send()
        .await
        .map_err(|e| ModelError::DownloadFailed(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(ModelError::DownloadFailed(format!(
            "HTTP {}: {}",
            resp.status(),
            url
        )));
    }

    let expected = resp.content_length();
    let total = expected.unwrap_or(fallback_total);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = part_path(dest);
    let written = match write_body(resp, &tmp, total, cancel, on_progress).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };

    if let Some(expected) = expected {
        if written != expected {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ModelError::DownloadFailed(format!(
                "incomplete download: {} of {} bytes",
                written, expected
            )));
        }
    }

    tokio::fs::rename(&tmp, dest).await?;

    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".part");
    PathBuf::from(tmp)
}

/// Stream the response body into `tmp`. The caller removes `tmp` on error.
async fn write_body<F>(
    resp: reqwest::Response,
    tmp: &Path,
    total: u64,
    cancel: &CancellationToken,
    on_progress: &mut F,
) -> Result<u64>
where
    F: FnMut(DownloadProgress),
{
    let mut file = tokio::fs::File::create(tmp).await?;
    let mut downloaded: u64 = 0;
    let mut stream = resp.bytes_stream();
    on_progress(DownloadProgress {
        downloaded_bytes: 0,
        total_bytes: total,
    });

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }

        let chunk = chunk.map_err(|e| ModelError::DownloadFailed(e.to_string()))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        on_progress(DownloadProgress {
            downloaded_bytes: downloaded,
            total_bytes: total.max(downloaded),
        });
    }

    file.flush().await?;
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_handles_unknown_total() {
        let p = DownloadProgress {
            downloaded_bytes: 10,
            total_bytes: 0,
        };
        assert_eq!(p.fraction(), 0.0);

        let p = DownloadProgress {
            downloaded_bytes: 50,
            total_bytes: 100,
        };
        assert!((p.fraction() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_existing_artifact_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ModelSpec {
            // Unroutable on purpose: any request would fail the test.
            huggingface_repo: "invalid/repo".to_string(),
            ..ModelSpec::default()
        };
        let path = artifact_path(&spec, dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![1u8; 2048]).unwrap();

        let mut reports = Vec::new();
        let client = reqwest::Client::new();
        let out = download_artifact(
            &client,
            &spec,
            dir.path(),
            &CancellationToken::new(),
            |p| reports.push(p),
        )
        .await
        .unwrap();

        assert_eq!(out, path);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].fraction(), 1.0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = reqwest::Client::new();
        let result = download_artifact(
            &client,
            &ModelSpec::default(),
            dir.path(),
            &cancel,
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(ModelError::Cancelled)));
        assert!(!artifact_path(&ModelSpec::default(), dir.path()).exists());
    }

    /// Serve one canned HTTP response on a local port and return its URL.
    async fn serve_once(head: String, body: Vec<u8>) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/model.gguf", addr)
    }

    #[tokio::test]
    async fn test_truncated_body_is_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("m").join("model.gguf");
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n".to_string(),
            vec![7u8; 1500],
        )
        .await;

        let result = fetch_to(
            &reqwest::Client::new(),
            &url,
            &dest,
            0,
            &CancellationToken::new(),
            &mut |_| {},
        )
        .await;

        assert!(matches!(result, Err(ModelError::DownloadFailed(_))));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_complete_body_is_renamed_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("m").join("model.gguf");
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 2048\r\nConnection: close\r\n\r\n".to_string(),
            vec![7u8; 2048],
        )
        .await;

        let mut last = None;
        let written = fetch_to(
            &reqwest::Client::new(),
            &url,
            &dest,
            0,
            &CancellationToken::new(),
            &mut |p| last = Some(p),
        )
        .await
        .unwrap();

        assert_eq!(written, 2048);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 2048);
        assert!(!part_path(&dest).exists());
        assert_eq!(last.map(|p| p.fraction()), Some(1.0));
    }
}
