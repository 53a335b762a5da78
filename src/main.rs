use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tailscope_remote::{
    Agent, ClientSink, Coordinator, LocalConnector, PushMessage, WatchInclusion,
};
use tailscope_tail::{TailBackend, detect_file_backend};
use tailscope_types::{LogPath, TrackingMode};

mod config;

/// Client destination and log identifier used by the CLI viewer
const CLI_DESTINATION: &str = "cli";
const CLI_LOG: &str = "console";

/// Push messages buffered for the stdout printer before drops kick in
const SINK_CAPACITY: usize = 256;

/// Tailscope - distributed log tailing with timestamp-ordered aggregation
#[derive(Parser, Debug)]
#[command(name = "tailscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log sources to follow (paths, node://..., docker://..., k8s://...)
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<String>,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Timestamp pattern for grouping lines into records
    #[arg(long, value_name = "PATTERN")]
    format: Option<String>,

    /// File tail flavor (gnu, bsd, solaris); auto-detected when omitted
    #[arg(long, value_name = "BACKEND")]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;
    if let Err(error) = &result {
        eprintln!("Error: {error:#}");
    }
    result
}

async fn run(args: Args) -> Result<()> {
    let settings = config::load(args.config.as_deref())?;

    let file_backend = match &args.backend {
        Some(name) => parse_backend(name)?,
        None => detect_file_backend(&settings.adapters.file.executable)
            .await
            .context("failed to detect the file tail backend")?,
    };

    // agent half: owns the follow processes of this node
    let (intake_tx, intake_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let agent = Agent::new(settings.clone(), file_backend, outbound_tx)?;
    let agent_cancel = CancellationToken::new();
    let agent_task = tokio::spawn(agent.run(intake_rx, agent_cancel.clone()));

    // coordinator half: watches, aggregation, push delivery
    let peers = settings
        .peers
        .iter()
        .map(|peer| (peer.name.clone(), peer.address.clone()))
        .collect();
    let connector = Arc::new(LocalConnector::new(
        settings.node.name.clone(),
        intake_tx,
        peers,
    ));
    let mut coordinator = Coordinator::new(settings, connector);

    let (sink, mut push_rx) = ClientSink::channel(SINK_CAPACITY);
    coordinator.register_client(CLI_DESTINATION, sink);

    // a single bare path stays flat; a format or several sources group
    let mode = if args.format.is_some() || args.paths.len() > 1 {
        TrackingMode::Grouped
    } else {
        TrackingMode::Flat
    };
    let inclusions: Vec<WatchInclusion> = args
        .paths
        .iter()
        .map(|raw| WatchInclusion::new(LogPath::parse(raw), args.format.clone()))
        .collect();
    coordinator
        .open_watch(CLI_DESTINATION, CLI_LOG, mode, inclusions)
        .await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,

            payload = outbound_rx.recv() => match payload {
                Some(payload) => coordinator.route(payload),
                None => break,
            },

            message = push_rx.recv() => match message {
                Some(message) => print_message(&message)?,
                None => break,
            }
        }
    }

    coordinator.shutdown().await;
    agent_cancel.cancel();
    let _ = agent_task.await;

    // drain what the teardown flush still delivered
    while let Ok(message) = push_rx.try_recv() {
        print_message(&message)?;
    }
    Ok(())
}

/// Print one push message as a JSON line on stdout
fn print_message(message: &PushMessage) -> Result<()> {
    let line = serde_json::to_string(message).context("failed to encode push message")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").context("failed to write to stdout")
}

fn parse_backend(name: &str) -> Result<TailBackend> {
    match name.to_ascii_lowercase().as_str() {
        "gnu" => Ok(TailBackend::Gnu),
        "bsd" | "macos" => Ok(TailBackend::Bsd),
        "solaris" => Ok(TailBackend::Solaris),
        other => bail!("unknown tail backend '{other}' (expected gnu, bsd or solaris)"),
    }
}
