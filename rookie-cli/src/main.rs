//! rookie – command-line front end for the package lifecycle engine.
//!
//! Startup order:
//! 1. Parse configuration from environment variables and the command line.
//! 2. Initialise structured tracing (JSON when requested, pretty otherwise).
//! 3. Build the engine with the mirror, `7za` and `adb` collaborators.
//! 4. Run the subcommand and persist the catalog state on exit.

mod cli;
mod config;

use std::collections::HashSet;

use anyhow::{Context, bail};
use clap::Parser;
use rookie_core::{CatalogQuery, Engine, EngineEvent, SortOrder, Status, StatusSet};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: ROOKIE_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // ── 3. Engine ──────────────────────────────────────────────────────────────
    let collaborators = rookie_fetch::collaborators(&cfg.engine)
        .context("failed to set up collaborators")?;
    let engine = Engine::new(cfg.engine.clone(), collaborators);
    engine
        .restore()
        .await
        .with_context(|| format!("failed to load {}", cfg.engine.state_file.display()))?;

    // ── 4. Command ─────────────────────────────────────────────────────────────
    let outcome = run(&engine, &cfg, cli.command).await;
    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "failed to save state");
    }
    outcome
}

async fn run(engine: &Engine, cfg: &Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Refresh => {
            let added = engine.refresh_catalog().await?;
            println!("{added} new entries");
        }

        Commands::List {
            name,
            statuses,
            sort,
            asc,
        } => {
            let order = if asc {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            };
            let mut query = CatalogQuery::new().sort(sort.into(), order);
            if let Some(name) = name {
                query = query.name(name);
            }
            if !statuses.is_empty() {
                query = query.statuses(statuses.into_iter().collect::<StatusSet>());
            }
            for (entry, status) in engine.query(&query).await {
                println!(
                    "{:<22} {:>8} MB  {:<24} {}",
                    status.as_str(),
                    entry.size,
                    entry.last_updated,
                    entry.release_name
                );
            }
        }

        Commands::Status { release } => {
            let Some(entry) = engine.entry(&release).await else {
                bail!("'{release}' is not in the catalog");
            };
            println!("{}: {}", entry.release_name, engine.status(&release).await);
            println!("  package: {} (version {})", entry.package_name, entry.version_code);
            println!("  content: {}", entry.content_id());
        }

        Commands::Download { releases } => {
            if engine.query(&CatalogQuery::new()).await.is_empty() {
                engine.refresh_catalog().await?;
            }
            engine.reconcile_device().await;
            let connected = engine.device().snapshot().connected;
            download(engine, &releases, connected && cfg.engine.auto_install).await?;
        }

        Commands::Cancel { release } => {
            if !engine.cancel_download(&release).await {
                bail!("'{release}' is not queued");
            }
        }

        Commands::Install { release } => {
            engine.reconcile_device().await;
            engine.install(&release).await?;
            println!("{release}: {}", engine.status(&release).await);
        }

        Commands::Uninstall { package } => {
            engine.reconcile_device().await;
            engine.uninstall(&package).await?;
        }

        Commands::Remove { release } => {
            let removed = engine.remove_local_copy(&release).await?;
            if !removed {
                println!("{release}: no local copy found");
            }
        }

        Commands::Watch => watch(engine, cfg).await,
    }
    Ok(())
}

/// Enqueue `releases` and print events until each one settles.
///
/// With `awaiting_install`, `Installable` is not final since auto-install
/// follows it.
async fn download(
    engine: &Engine,
    releases: &[String],
    awaiting_install: bool,
) -> anyhow::Result<()> {
    let mut events = engine.subscribe();
    let mut pending: HashSet<String> = HashSet::new();
    for release in releases {
        match engine.enqueue_download(release).await {
            Ok(()) => {
                pending.insert(release.clone());
            }
            Err(e) => eprintln!("{release}: {e}"),
        }
    }
    engine.resume_downloads().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    while !pending.is_empty() {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => event,
        };
        match event {
            Ok(EngineEvent::StatusChanged {
                release_name,
                status,
            }) if pending.contains(&release_name) => {
                println!("{release_name}: {status}");
                if settled(status, awaiting_install) {
                    pending.remove(&release_name);
                }
            }
            Ok(EngineEvent::DownloadProgress {
                release_name,
                progress,
            }) => {
                eprint!("\r{release_name}: {:5.1}%", progress * 100.0);
                if progress >= 1.0 {
                    eprintln!();
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}

/// Statuses a download run ends in.
fn settled(status: Status, awaiting_install: bool) -> bool {
    match status {
        Status::Queued | Status::Downloading | Status::Decompressing | Status::Installing => false,
        Status::Installable => !awaiting_install,
        _ => true,
    }
}

async fn watch(engine: &Engine, cfg: &Config) {
    let poller = engine.spawn_device_polling();
    let saver = engine.spawn_autosave(cfg.autosave_interval);
    engine.resume_downloads().await;
    info!(
        poll_interval_ms = cfg.engine.poll_interval.as_millis() as u64,
        "watching device"
    );

    let mut events = engine.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => event,
        };
        match event {
            Ok(EngineEvent::StatusChanged {
                release_name,
                status,
            }) => println!("{release_name}: {status}"),
            Ok(EngineEvent::DeviceChanged {
                connected,
                properties,
            }) => match (connected, properties) {
                (true, Some(p)) => println!(
                    "device {} ({}) connected, {} of {} MiB free",
                    p.serial,
                    p.model,
                    p.free_space_kib / 1024,
                    p.total_space_kib / 1024
                ),
                (true, None) => println!("device connected"),
                (false, _) => println!("device disconnected"),
            },
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }

    poller.abort();
    saver.abort();
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
