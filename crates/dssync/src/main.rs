mod error;
mod listener;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dssync_config::{config_path, load_config_from, profile_to_engine_config};
use dssync_core::Engine;

use crate::error::DaemonError;
use crate::listener::DaemonListener;

/// Keep a local device model in sync with a digitalSTROM server.
#[derive(Debug, Parser)]
#[command(name = "dssyncd", version, about)]
struct Args {
    /// Profile to run (defaults to `default_profile` from the config file).
    #[arg(short, long, env = "DSSYNC_PROFILE")]
    profile: Option<String>,

    /// Config file path.
    #[arg(short, long, env = "DSSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info,dssync_core=debug")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Run a single reconciliation tick and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    if let Err(err) = run(args).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let path = args.config.unwrap_or_else(config_path);
    let shown = path.display().to_string();

    let config = load_config_from(&path).map_err(|e| DaemonError::from_config(e, &shown))?;
    let (profile_name, profile) = config
        .profile(args.profile.as_deref())
        .map_err(|e| DaemonError::from_config(e, &shown))?;
    let engine_config = profile_to_engine_config(profile, &profile_name, &config.defaults)
        .map_err(|e| DaemonError::from_config(e, &shown))?;

    let listener = Arc::new(DaemonListener::new(config, path, profile_name.clone()));
    let engine = Engine::new(engine_config, listener)?;
    let state_file = state::state_path(&profile_name);
    state::preload(&engine, &state_file)?;

    if args.once {
        let report = engine.tick().await;
        info!(?report, "single tick complete");
        engine.stop().await;
        state::save(&engine, &state_file)?;
        return Ok(());
    }

    engine.start().await;
    info!(profile = %profile_name, "running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C, stopping");
    }

    engine.stop().await;
    state::save(&engine, &state_file)?;
    Ok(())
}
