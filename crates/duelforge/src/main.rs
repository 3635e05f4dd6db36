use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use duelforge::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    /// Length-prefixed frames over raw TCP.
    Tcp,
    /// One binary WebSocket message per frame.
    Websocket,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecKind {
    Bincode,
    /// Human-readable, for debugging clients.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyKind {
    /// Drop missed ticks and wait for the next one.
    Skip,
    /// Run missed ticks back to back.
    CatchUp,
}

impl From<PolicyKind> for TickPolicy {
    fn from(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Skip => TickPolicy::Skip,
            PolicyKind::CatchUp => TickPolicy::CatchUp,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time two-player shape duel server", long_about = None)]
struct Args {
    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// JSON config file; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TransportKind::Tcp)]
    transport: TransportKind,

    #[arg(long, value_enum, default_value_t = CodecKind::Bincode)]
    codec: CodecKind,

    /// Server loop frequency in Hz (overrides the config file)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// What the loop does after a slow tick (overrides the config file)
    #[arg(long, value_enum)]
    tick_policy: Option<PolicyKind>,
}

#[tokio::main]
async fn main() -> Result<(), DuelError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick.tick_rate_hz = tick_rate;
    }
    if let Some(policy) = args.tick_policy {
        config.tick.policy = policy.into();
    }

    let builder = ServerBuilder::new().config(config);
    match (args.transport, args.codec) {
        (TransportKind::Tcp, CodecKind::Bincode) => serve(builder.build(BincodeCodec).await?).await,
        (TransportKind::Tcp, CodecKind::Json) => serve(builder.build(JsonCodec).await?).await,
        (TransportKind::Websocket, CodecKind::Bincode) => {
            serve(builder.build_websocket(BincodeCodec).await?).await
        }
        (TransportKind::Websocket, CodecKind::Json) => {
            serve(builder.build_websocket(JsonCodec).await?).await
        }
    }
}

async fn serve<T: Transport, C: Codec>(server: Server<T, C>) -> Result<(), DuelError> {
    match server.local_addr() {
        Ok(addr) => tracing::info!(%addr, "duelforge listening"),
        Err(e) => tracing::warn!(error = %e, "local address unavailable"),
    }
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await
}
