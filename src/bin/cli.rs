use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;
use virtual_playlist_builder as lib;

use lib::api::spotify::SpotifyClientFactory;
use lib::build::BuildService;
use lib::config::Config;

#[derive(Parser)]
#[command(name = "virtual-playlist-builder", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the periodic scheduled-build sweeper (long-running)
    Serve,
    /// Run one scheduled-build sweep and exit
    Sweep,
    /// Build one playlist now and wait for the outcome
    Build {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        playlist_id: Uuid,
    },
    /// Delete one playlist (local record and built Spotify playlist)
    Delete {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        playlist_id: Uuid,
    },
    /// List a user's playlists and their build state
    Playlists {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Validate config file and exit
    ConfigValidate,
}

fn build_service(cfg: &Config) -> BuildService {
    let factory = Arc::new(SpotifyClientFactory::new(
        cfg.spotify_client_id.clone(),
        cfg.spotify_client_secret.clone(),
        cfg.db_path.clone(),
    ));
    BuildService::new(cfg.db_path.clone(), factory, cfg.max_batch_size_spotify)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Resolve config path: explicit --config overrides; otherwise prefer
    // the system-wide config and fall back to the repository example
    // config for local/dev usage.
    let resolved_config_path: PathBuf = match &cli.config {
        Some(p) => p.clone(),
        None => {
            let etc_path = Path::new("/etc/playlist-builder/config.toml");
            if etc_path.exists() {
                etc_path.to_path_buf()
            } else {
                PathBuf::from("config/example-config.toml")
            }
        }
    };

    let cfg = Config::from_path(&resolved_config_path)
        .with_context(|| format!("loading config from {}", resolved_config_path.display()))?;

    // Initialize log->tracing bridge and structured logging.
    // Logs go to both stdout and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&cfg.log_dir, "playlist-builder.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer().with_writer(non_blocking);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer);

    tracing_subscriber_global::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    // Make sure the schema exists before any subcommand touches the DB.
    {
        let db_path = cfg.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let path_display = db_path.display().to_string();
            lib::db::open_or_create(&db_path)
                .with_context(|| format!("opening DB at {}", path_display))?;
            Ok(())
        })
        .await??;
    }

    match cli.command {
        Commands::Serve => {
            let svc = build_service(&cfg);
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(cfg.sweep_interval_sec));
            tracing::info!(
                "sweeping scheduled playlists every {}s",
                cfg.sweep_interval_sec
            );
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        svc.build_scheduled_playlists().await;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutting down");
                        break;
                    }
                }
            }
        }
        Commands::Sweep => {
            let svc = build_service(&cfg);
            svc.build_scheduled_playlists().await;
        }
        Commands::Build {
            user_id,
            playlist_id,
        } => {
            let svc = build_service(&cfg);
            svc.build_playlist(user_id, playlist_id).await;

            // The build never reports back directly; read the outcome
            // out of the store.
            let db_path = cfg.db_path.clone();
            let playlist = tokio::task::spawn_blocking(move || {
                let conn = lib::db::open(&db_path)?;
                lib::db::get_playlist(&conn, playlist_id)
            })
            .await??;
            match (&playlist.failure_msg, &playlist.spotify_id) {
                (Some(msg), _) => {
                    eprintln!("Build failed: {}", msg);
                    std::process::exit(1);
                }
                (None, Some(spotify_id)) => {
                    println!("Built spotify playlist {}", spotify_id);
                }
                (None, None) => {
                    eprintln!("Build did not produce a playlist");
                    std::process::exit(1);
                }
            }
        }
        Commands::Delete {
            user_id,
            playlist_id,
        } => {
            let svc = build_service(&cfg);
            svc.delete_playlist(user_id, playlist_id).await;
            println!("Delete requested for playlist {}", playlist_id);
        }
        Commands::Playlists { user_id } => {
            let db_path = cfg.db_path.clone();
            let playlists = tokio::task::spawn_blocking(move || {
                let conn = lib::db::open(&db_path)?;
                lib::db::get_playlists(&conn, user_id)
            })
            .await??;
            println!("{} playlist(s):", playlists.len());
            for p in playlists {
                println!(
                    "- {} | {} | schedule: {} | spotify: {} | building: {} | current: {} | last built: {} | failure: {}",
                    p.id,
                    p.name,
                    p.schedule.as_str(),
                    p.spotify_id.as_deref().unwrap_or("-"),
                    p.building,
                    p.current,
                    p.last_built_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".into()),
                    p.failure_msg.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::ConfigValidate => match Config::from_path(resolved_config_path.as_path()) {
            Ok(_) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        },
    }

    Ok(())
}
