use crate::client::LocalServerEngine;
use crate::server::{check_health, port_from_url, LlamaServerProcess};
use crate::{RuntimeConfig, RuntimeError};
use async_trait::async_trait;
use localchat_engine::{
    EngineError, EngineHandle, EngineProvider, InitProgressReport, ProgressFn,
};
use localchat_models::{download_artifact, ModelSpec};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Share of the overall progress bar given to the artifact download.
const FETCH_SHARE: f64 = 0.9;

const FETCH_TEXT: &str = "Fetching model artifact";
const LOAD_TEXT: &str = "Loading model";

pub struct LocalServerProvider {
    config: RuntimeConfig,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

impl LocalServerProvider {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort in-flight downloads when `token` fires (process shutdown).
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    async fn start_engine(
        &self,
        model: &ModelSpec,
        on_progress: &ProgressFn<'_>,
    ) -> crate::Result<LocalServerEngine> {
        on_progress(InitProgressReport::new(FETCH_TEXT, 0.0));
        let artifact = download_artifact(
            &self.http,
            model,
            &self.config.models_dir,
            &self.shutdown,
            |p| {
                let mb = p.downloaded_bytes / 1_000_000;
                let total_mb = p.total_bytes / 1_000_000;
                on_progress(InitProgressReport::new(
                    format!("{} ({} / {} MB)", FETCH_TEXT, mb, total_mb),
                    p.fraction() * FETCH_SHARE,
                ));
            },
        )
        .await?;

        on_progress(InitProgressReport::new(LOAD_TEXT, FETCH_SHARE));
        let base_url = self.config.server_url.trim_end_matches('/').to_string();
        let engine = LocalServerEngine::new(model.id.clone(), base_url.clone(), self.http.clone());

        let Some(binary) = &self.config.server_bin else {
            check_health(&self.http, &base_url).await?;
            tracing::info!(url = %base_url, "Using already-running llama-server");
            return Ok(engine);
        };

        let port = port_from_url(&base_url)
            .ok_or_else(|| RuntimeError::ServerStartFailed(format!("bad server url {}", base_url)))?;
        let mut process = LlamaServerProcess::spawn(binary, &artifact, port, self.config.ctx_size)?;

        if let Err(e) = process
            .wait_ready(&self.http, &base_url, self.config.startup_timeout)
            .await
        {
            process.kill();
            return Err(e);
        }

        Ok(engine.with_process(process.into_child()))
    }
}

#[async_trait]
impl EngineProvider for LocalServerProvider {
    fn name(&self) -> &str {
        "llama-server"
    }

    async fn create(
        &self,
        model: &ModelSpec,
        on_progress: &ProgressFn<'_>,
    ) -> Result<EngineHandle, EngineError> {
        tracing::info!(model = %model.id, "Creating local server engine");
        let engine = self.start_engine(model, on_progress).await?;
        on_progress(InitProgressReport::new(LOAD_TEXT, 1.0));
        let handle: EngineHandle = Arc::new(engine);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_shutdown_aborts_before_download() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let dir = std::env::temp_dir().join("localchat-provider-test");
        let provider = LocalServerProvider::new(RuntimeConfig {
            models_dir: dir,
            ..RuntimeConfig::default()
        })
        .with_shutdown(shutdown);

        let seen = Mutex::new(Vec::new());
        let on_progress = |r: InitProgressReport| seen.lock().unwrap().push(r);
        let result = provider.create(&ModelSpec::default(), &on_progress).await;

        assert!(matches!(result, Err(EngineError::InitFailed(_))));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text.as_deref(), Some(FETCH_TEXT));
    }
}
