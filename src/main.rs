/// CratePilot - playlist-to-crate backend
///
/// Web backend for turning streaming playlists into DJ crate files: library
/// database uploads, gated import jobs with live progress, and crate file
/// downloads.
mod api;
mod auth;
mod config;
mod context;
mod db;
mod entitlement;
mod error;
mod gates;
mod import;
mod jobs;
mod library;
mod metrics;
mod rate_limit;
mod server;

use config::ServerConfig;
use context::AppContext;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cratepilot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
   ______           __       ____  _ __      __
  / ____/________ _/ /____  / __ \(_) /___  / /_
 / /   / ___/ __ `/ __/ _ \/ /_/ / / / __ \/ __/
/ /___/ /  / /_/ / /_/  __/ ____/ / / /_/ / /_
\____/_/   \__,_/\__/\___/_/   /_/_/\____/\__/

        Playlist-to-crate backend v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
