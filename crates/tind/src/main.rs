//! tind - the tin protocol server daemon.
//!
//! Serves a directory of bare repositories over TCP or HTTP. Equivalent
//! to `tin serve`, packaged for deployments without the full CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use tin_protocol::{ServerAuth, ServerOptions};

#[derive(Parser)]
#[command(name = "tind")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "tin protocol server", long_about = None)]
struct Args {
    /// Multi-repo root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Serve a single repository instead of a root
    #[arg(long)]
    repo: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "9418")]
    port: u16,

    /// Speak HTTP instead of the raw TCP protocol
    #[arg(long)]
    http: bool,

    /// Create missing repositories on push
    #[arg(long)]
    auto_create: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tin_core::init_tracing(args.json, Level::INFO);

    let mut opts = match args.repo {
        Some(repo) => ServerOptions::single_repo(repo),
        None => ServerOptions::multi_repo(args.root),
    };
    opts.auto_create = args.auto_create;
    opts.auth = ServerAuth::from_env();

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!(
        event = "tind.started",
        addr = %addr,
        root = %opts.root.display(),
        http = args.http,
    );

    if args.http {
        axum::serve(listener, tin_protocol::router(Arc::new(opts)))
            .await
            .context("http server failed")?;
    } else {
        tin_protocol::serve_tcp(listener, Arc::new(opts))
            .await
            .context("tcp server failed")?;
    }
    Ok(())
}
