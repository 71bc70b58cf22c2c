use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // path to database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Spotify app credentials used to refresh delegated tokens.
    #[serde(default)]
    pub spotify_client_id: String,
    #[serde(default)]
    pub spotify_client_secret: String,

    /// How often the `serve` loop sweeps scheduled playlists.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_sec: u64,

    #[serde(default = "default_max_batch_spotify")]
    pub max_batch_size_spotify: usize,
}

fn default_db_path() -> PathBuf { "/var/lib/playlist-builder/playlist-builder.db".into() }
fn default_log_dir() -> PathBuf { "/var/log/playlist-builder".into() }
fn default_sweep_interval() -> u64 { 3600 }
fn default_max_batch_spotify() -> usize { 100 }

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }
}
