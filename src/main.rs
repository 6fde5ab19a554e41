use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden::branch::{BranchOps, GitBranches};
use warden::config::Config;
use warden::crypto::FieldCipher;
use warden::notify::{Notifier, WebhookNotifier};
use warden::web::{self, AppState};

#[derive(Parser)]
#[command(name = "warden", about = "Chat-driven operations for a game-server fleet")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "APP_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "APP_PORT", default_value_t = 8080)]
    port: u16,

    /// Skip webhook signature verification (local testing only).
    #[arg(long, env = "DEBUG", default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env()?);

    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(config.hook_url.clone()));
    let branches: Arc<dyn BranchOps> = Arc::new(GitBranches::new(&config, notifier.clone()));
    let cipher = FieldCipher::new(&config.patcher_secret);

    let state = AppState {
        config: config.clone(),
        notifier,
        branches,
        cipher,
        debug: cli.debug,
    };

    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("cannot bind {}:{}", cli.host, cli.port))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
