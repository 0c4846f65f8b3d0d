mod cli;

use ringcast::{config, server::EventServer, state, streaming::StreamingDispatcher};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;
use tokio::signal;

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting ringcast server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let (registry, producers) = state::build_registry(&config)?;
    if producers.is_empty() {
        tracing::warn!("No jobs configured; every request will answer 404");
    } else {
        tracing::info!(
            jobs = registry.len(),
            streams = producers.len(),
            "job registry built"
        );
    }
    // Producer handles belong to the pipeline layer; a process embedding
    // ringcast passes them to its encoder callbacks. The standalone server
    // keeps them alive so the caches stay writable for attached tooling.
    let _producers = producers;

    let dispatcher = StreamingDispatcher::new(registry);
    let server = EventServer::bind(&config.server, dispatcher).await?;

    let report_interval = Duration::from_secs(60);
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = async {
            loop {
                tokio::time::sleep(report_interval).await;
                server.report();
            }
        } => {}
    }

    server.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(path)?;
    println!(
        "Configuration valid: {} job(s), listening on {}:{}",
        config.jobs.len(),
        config.server.host,
        config.server.port
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "ringcast=trace,ringcast_media=trace".to_string()
        } else {
            "ringcast=info,ringcast_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("ringcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
