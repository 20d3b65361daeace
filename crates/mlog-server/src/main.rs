use anyhow::{Context, Result};
use clap::Parser;
use mlog_server::{build_router, config, db::MissionDb, AppState};
use std::net::{IpAddr, SocketAddr};

#[derive(Parser)]
#[command(name = "mlog-server", about = "Mission log API server")]
struct Args {
    /// Path to server configuration TOML file
    #[arg(long, default_value = "~/.config/mlog/server.toml")]
    config: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();

    let config_path = config::expand_home(&args.config);
    let settings = config::Settings::load(&config_path)
        .with_context(|| format!("failed to load settings from {}", config_path.display()))?;

    let db = MissionDb::new(&settings.database_path()).await?;
    let addr = SocketAddr::new(
        settings
            .server
            .host
            .parse::<IpAddr>()
            .with_context(|| format!("invalid host '{}'", settings.server.host))?,
        settings.server.port,
    );

    let state = AppState::new(db, settings);
    state.monitor.start().await;
    let app = build_router(state.clone());

    tracing::info!("mlog-server v{} listening on http://{}", env!("CARGO_PKG_VERSION"), addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.generator.stop().await;
    state.monitor.stop().await;
    state.db.close().await;
    tracing::info!("mlog-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
