//! Process manager for llama-server.

use crate::{Result, RuntimeError};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// A spawned llama-server. The child is killed when this is dropped.
pub struct LlamaServerProcess {
    child: Child,
}

impl LlamaServerProcess {
    pub fn spawn(binary: &Path, model: &Path, port: u16, ctx_size: u32) -> Result<Self> {
        if !binary.exists() {
            return Err(RuntimeError::ServerBinaryNotFound(
                binary.display().to_string(),
            ));
        }

        info!(port, model = ?model, "Starting llama-server");

        let child = Command::new(binary)
            .arg("--model")
            .arg(model)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("--ctx-size")
            .arg(ctx_size.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::ServerStartFailed(e.to_string()))?;

        debug!("llama-server process started with PID: {:?}", child.id());
        Ok(Self { child })
    }

    /// Poll `/health` until the server answers, the process exits, or the
    /// timeout passes.
    pub async fn wait_ready(
        &mut self,
        http: &reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        info!("Waiting for llama-server to become ready...");

        while start.elapsed() < timeout {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(RuntimeError::ServerDied(status.to_string()));
            }
            if check_health(http, base_url).await.is_ok() {
                info!("llama-server is ready");
                return Ok(());
            }
            tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
        }

        Err(RuntimeError::ServerStartTimeout)
    }

    /// Signal the process to exit without waiting for it.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to stop llama-server: {}", e);
        }
    }

    pub fn into_child(self) -> Child {
        self.child
    }
}

pub(crate) async fn check_health(http: &reqwest::Client, base_url: &str) -> Result<()> {
    let url = format!("{}/health", base_url);
    let response = http
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                RuntimeError::ServerNotRunning(base_url.to_string())
            } else {
                RuntimeError::Http(e.to_string())
            }
        })?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(RuntimeError::ServerNotRunning(base_url.to_string()))
    }
}

/// Port the server should bind, taken from its base URL.
pub(crate) fn port_from_url(base_url: &str) -> Option<u16> {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|u| u.port_or_known_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_from_url() {
        assert_eq!(port_from_url("http://127.0.0.1:9000"), Some(9000));
        assert_eq!(port_from_url("http://localhost"), Some(80));
        assert_eq!(port_from_url("not a url"), None);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let result = LlamaServerProcess::spawn(
            Path::new("/nonexistent/llama-server"),
            Path::new("/nonexistent/model.gguf"),
            9000,
            2048,
        );
        assert!(matches!(result, Err(RuntimeError::ServerBinaryNotFound(_))));
    }
}
