use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use buzzline_server::server::{self, Limits, ServerState};
use buzzline_server::store::MemoryQuestionStore;

/// Buzzline Server - real-time quiz buzzer server
#[derive(Parser, Debug)]
#[command(name = "buzzline-server", version, about)]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:9877")]
    bind: String,

    /// Maximum simultaneous connections allowed
    #[arg(short, long, default_value_t = 256)]
    max_connections: usize,

    /// Messages buffered per client before it is dropped as too slow
    #[arg(long, default_value_t = 256)]
    outbound_capacity: usize,

    /// JSON file of questions to load at startup
    #[arg(short, long)]
    questions: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buzzline_server=debug,buzzline_common=debug".into()),
        )
        .init();

    let args = Args::parse();

    let addr: SocketAddr = args.bind.parse()?;

    let bank = MemoryQuestionStore::new();
    match &args.questions {
        Some(path) => {
            let count = bank.seed_from_file(path).await?;
            tracing::info!("Loaded {} questions from {}", count, path.display());
        }
        None => tracing::warn!("No question file given, the question bank is empty"),
    }

    let limits = Limits {
        max_connections: args.max_connections,
        outbound_capacity: args.outbound_capacity.max(1),
    };
    let state = Arc::new(ServerState::new(Arc::new(bank), limits));

    tracing::info!(
        "Starting buzzline server on {} (max {} connections)",
        addr,
        args.max_connections
    );
    server::run(addr, state).await
}
