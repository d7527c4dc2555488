//! CLI entry point for docbridge.

mod build_info;
mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Command;
use docbridge::agent::events::ChatEvent;
use docbridge::agent::{ConversationEngine, EngineSettings, TurnOutcome};
use docbridge::api::{ApiClient, ModelClient};
use docbridge::bridge::{
    ControllerDispatch, ControllerThread, ExecutionGate, InvokerSettings, ToolInvoker,
};
use docbridge::config::{load_config, Config};
use docbridge::rpc::events::BridgeEvent;
use docbridge::rpc::ProtocolSession;
use docbridge::server::{self, ServerSettings};
use docbridge::tools::headless::{self, MemoryDocumentHost};
use docbridge::tools::{DocumentHost, ToolRegistry};
use std::io::Write;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CHAT_PROMPT: &str = "You are docbridge, an assistant that reads and edits the \
document open in the host application through tools. Call document_info when unsure what is \
open, and keep edits minimal.";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = cli::Args::parse();

    let loaded = load_config(args.config.as_deref()).context("failed to load configuration")?;
    let mut config = loaded.config;
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    info!(config = %loaded.source, "{}", build_info::startup_line());

    let bridge = HeadlessBridge::start(&config)?;
    match args.command() {
        Command::Serve => run_server(&config, &bridge).await,
        Command::Chat { prompt } => run_chat(&config, &bridge, &prompt.join(" ")).await,
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Controller thread, gate and invoker over the in-memory document host.
struct HeadlessBridge {
    invoker: Arc<ToolInvoker>,
    _controller: ControllerThread,
}

impl HeadlessBridge {
    fn start(config: &Config) -> Result<Self> {
        let dispatch = Arc::new(ControllerDispatch::new());
        let controller = ControllerThread::spawn(Arc::clone(&dispatch))
            .context("failed to start controller thread")?;

        let host = Arc::new(MemoryDocumentHost::with_document(
            "Welcome",
            vec![
                "docbridge is running without a GUI host.".to_string(),
                "Tools edit this in-memory document until a host attaches.".to_string(),
            ],
        ));
        let mut registry = ToolRegistry::new();
        headless::register_tools(&mut registry, &host);
        info!(tools = registry.len(), "tool registry ready");

        let host: Arc<dyn DocumentHost> = host;
        let invoker = Arc::new(ToolInvoker::new(
            dispatch,
            Arc::new(ExecutionGate::new()),
            Arc::new(registry),
            host,
            InvokerSettings {
                gate_wait: config.bridge.gate_wait(),
                process_timeout: config.bridge.process_timeout(),
            },
        ));
        Ok(Self {
            invoker,
            _controller: controller,
        })
    }
}

async fn run_server(config: &Config, bridge: &HeadlessBridge) -> Result<()> {
    let mut session = ProtocolSession::new(Arc::clone(&bridge.invoker));
    if let Some(instructions) = &config.server.instructions {
        session = session.with_instructions(instructions.clone());
    }
    let session = Arc::new(session);
    tokio::spawn(log_bridge_events(session.events().subscribe()));

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    server::serve(
        listener,
        session,
        ServerSettings::from_config(&config.server),
        async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        },
    )
    .await
    .context("protocol server exited unexpectedly")?;
    Ok(())
}

async fn log_bridge_events(mut rx: broadcast::Receiver<BridgeEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => info!(
                kind = ?event.kind,
                tool = %event.tool,
                elapsed_ms = ?event.elapsed_ms,
                payload = %event.payload,
                "bridge event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "bridge event log fell behind")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_chat(config: &Config, bridge: &HeadlessBridge, prompt: &str) -> Result<()> {
    if config.model.api_key.is_empty() {
        warn!(base_url = %config.model.base_url, "no API key configured for the model endpoint");
    }
    let client: Arc<dyn ModelClient> =
        Arc::new(ApiClient::new(&config.model, config.model.timeout()));
    let system_prompt = config
        .chat
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_CHAT_PROMPT);
    let mut engine = ConversationEngine::new(
        client,
        Arc::clone(&bridge.invoker),
        EngineSettings::from_config(config),
        Some(system_prompt),
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    engine.set_cancellation_receiver(Some(cancel_rx));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    engine.set_event_sink(Some(events_tx));
    let printer = tokio::spawn(print_chat_events(events_rx));

    let outcome = engine.run_turn(prompt).await;
    engine.set_event_sink(None);
    let _ = printer.await;

    match outcome.context("chat turn failed")? {
        TurnOutcome::Done { .. } => Ok(()),
        TurnOutcome::Stopped => {
            eprintln!("(stopped)");
            Ok(())
        }
    }
}

async fn print_chat_events(mut rx: mpsc::UnboundedReceiver<ChatEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::TextDelta { text } => {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
            ChatEvent::ToolCallStarted { name, arguments } => {
                eprintln!("\n[tool] {name} {arguments}");
            }
            ChatEvent::ToolCallFinished { name, status, .. } => match status {
                Some(status) => eprintln!("[tool] {name} finished: {status:?}"),
                None => eprintln!("[tool] {name} did not run"),
            },
            ChatEvent::Done { .. } => {
                let _ = writeln!(stdout);
            }
            ChatEvent::ReasoningDelta { .. }
            | ChatEvent::Compacted { .. }
            | ChatEvent::Stopped
            | ChatEvent::Error { .. } => {}
        }
    }
}
