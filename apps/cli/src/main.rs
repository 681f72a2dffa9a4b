mod render;
mod terminal;

use anyhow::Context;
use clap::Parser;
use localchat_application::{ChatController, ControllerConfig, ConversationSnapshot, EngineHost};
use localchat_engine::mock::{MockEngine, MockProvider};
use localchat_engine::{EngineProvider, InitProgressReport};
use localchat_events::TracingEventBus;
use localchat_models::ModelSpec;
use localchat_runtime::{LocalServerProvider, RuntimeConfig, DEFAULT_SERVER_URL};
use localchat_storage::Database;
use render::Renderer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use terminal::{Command, InputLines, TerminalConsent};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "localchat",
    version,
    about = "Chat with a local language model, with simulated replies when none is available"
)]
struct Args {
    /// Directory holding the settings database
    #[arg(long, env = "LOCALCHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory holding downloaded model artifacts
    #[arg(long, env = "LOCALCHAT_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Base URL of the OpenAI-compatible inference server
    #[arg(long, env = "LOCALCHAT_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    server_url: String,

    /// llama-server binary to spawn; without it a running server is expected
    #[arg(long, env = "LOCALCHAT_SERVER_BIN")]
    server_bin: Option<PathBuf>,

    #[arg(long, env = "LOCALCHAT_MODEL_ID")]
    model_id: Option<String>,

    /// HuggingFace repository of the GGUF artifact
    #[arg(long, env = "LOCALCHAT_MODEL_REPO")]
    model_repo: Option<String>,

    /// GGUF file inside the repository
    #[arg(long, env = "LOCALCHAT_MODEL_FILE")]
    model_file: Option<String>,

    /// Size shown in the consent prompt
    #[arg(long, env = "LOCALCHAT_MODEL_SIZE")]
    model_size: Option<String>,

    /// Use the scripted engine instead of a real model
    #[arg(long)]
    mock: bool,

    /// Debug logging for localchat crates
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn model_spec(&self) -> ModelSpec {
        let mut spec = ModelSpec::default();
        if let Some(id) = &self.model_id {
            spec.id = id.clone();
        }
        if let Some(repo) = &self.model_repo {
            spec.huggingface_repo = repo.clone();
        }
        if let Some(file) = &self.model_file {
            spec.filename = file.clone();
        }
        if let Some(size) = &self.model_size {
            spec.size_text = size.clone();
        }
        spec
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("localchat")
        })
    }

    fn provider(&self, shutdown: CancellationToken) -> Arc<dyn EngineProvider> {
        if self.mock {
            return Arc::new(mock_provider());
        }
        let mut config = RuntimeConfig {
            server_url: self.server_url.clone(),
            server_bin: self.server_bin.clone(),
            ..RuntimeConfig::default()
        };
        if let Some(dir) = &self.models_dir {
            config.models_dir = dir.clone();
        }
        Arc::new(LocalServerProvider::new(config).with_shutdown(shutdown))
    }
}

fn mock_provider() -> MockProvider {
    let reply = "This reply comes from the scripted engine. Run without --mock to use a real model.";
    let fragments: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
    let engine = MockEngine::new(fragments)
        .with_model_id("scripted")
        .with_fragment_delay(Duration::from_millis(60));

    MockProvider::new(Arc::new(engine))
        .with_reports(vec![
            InitProgressReport::new("Fetching model artifact", 0.3),
            InitProgressReport::new("Fetching model artifact", 0.7),
            InitProgressReport::new("Loading model", 1.0),
        ])
        .with_report_delay(Duration::from_millis(300))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,localchat=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

async fn render_loop(mut updates: watch::Receiver<ConversationSnapshot>) {
    let mut renderer = Renderer::default();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        let written = {
            let mut stdout = std::io::stdout().lock();
            renderer.render(&snapshot, &mut stdout)
        };
        if let Err(e) = written {
            tracing::warn!("Rendering stopped: {}", e);
            return;
        }
        if updates.changed().await.is_err() {
            return;
        }
    }
}

async fn repl(chat: &ChatController, input: &InputLines) -> anyhow::Result<()> {
    loop {
        let line = {
            let mut lines = input.lock().await;
            tokio::select! {
                line = lines.next_line() => line.context("failed to read stdin")?,
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Quit => return Ok(()),
            Command::Stop => {
                if !chat.stop() {
                    println!("(nothing to stop)");
                }
            }
            Command::Download => {
                if chat.download().is_none() {
                    println!("(download not available while {})", chat.state().as_str());
                }
            }
            Command::Say(text) => {
                if chat.submit_turn(text).is_none() {
                    println!("(busy, wait for the current reply)");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let data_dir = args.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let store = Database::open(&data_dir.join("settings.db"))
        .context("failed to open settings database")?;

    let shutdown = CancellationToken::new();
    let model = args.model_spec();
    tracing::info!(model = %model.id, mock = args.mock, "Starting localchat");

    let host = EngineHost::new(
        args.provider(shutdown.clone()),
        model,
        Arc::new(store),
        Arc::new(TracingEventBus),
    );
    let input = terminal::stdin_lines();
    let chat = ChatController::new(
        host.clone(),
        Arc::new(TerminalConsent::new(input.clone())),
        ControllerConfig::default(),
    );
    let renderer = tokio::spawn(render_loop(chat.subscribe()));

    let interrupted = match chat.start() {
        Some(consent) => tokio::select! {
            joined = consent => {
                joined.context("consent task failed")?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        },
        None => false,
    };

    let result = if interrupted {
        Ok(())
    } else {
        repl(&chat, &input).await
    };

    chat.teardown();
    shutdown.cancel();
    renderer.abort();
    if let Some(engine) = host.engine() {
        engine.dispose();
    }
    result
}
