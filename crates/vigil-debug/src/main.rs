//! `vigild` - the vigil debug daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use vigil_debug::config::DebugConfig;
use vigil_debug::{DebugServer, Dispatcher, Session};
use vigil_runtime::Runtime;

#[derive(Debug, Parser)]
#[command(name = "vigild", version, about = "vigil debug daemon")]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Show debug-level logs.
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => DebugConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DebugConfig::from_env(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen.into();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting vigild");
    let runtime = Arc::new(Runtime::with_bootstrap_timeout(
        std::time::Duration::from_millis(config.bootstrap_timeout_ms),
    ));
    let session = Arc::new(Session::new(Arc::clone(&runtime)));
    if config.suspend_on_connect {
        runtime.control().request_pause_all();
    }
    let dispatcher = Arc::new(
        Dispatcher::new(session).with_render_limit(config.render_max_length),
    );
    let server = DebugServer::bind(config.listen.as_str(), dispatcher)
        .with_context(|| format!("binding {}", config.listen))?;

    loop {
        server.serve_one().context("serving connection")?;
    }
}
