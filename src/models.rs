use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Spotify account that has logged in and delegated playlist access.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub spotify_id: String,
    pub playlists_built: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub token_expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A virtual playlist: the stored specification used to build a real
/// Spotify playlist. `spotify_id` points at the most recently built
/// playlist and is None until the first successful build. `current` is
/// true only while the built playlist still matches the specification.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub public: bool,
    pub schedule: Schedule,
    /// JSON-serialized `Input`.
    pub input: String,
    pub spotify_id: Option<String>,
    pub failure_msg: Option<String>,
    pub building: bool,
    pub current: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_built_at: Option<DateTime<Utc>>,
}

/// The sources of a virtual playlist, in the order their tracks are
/// concatenated into the built playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    #[serde(rename = "trackSources")]
    pub track_sources: Vec<TrackSource>,
}

/// One ingredient of a virtual playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSource {
    pub name: String,
    /// Spotify id of the album or playlist; unused for the liked-songs pool.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub method: ExtractMethod,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Liked,
    Album,
    Playlist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMethod {
    Latest,
    Random,
}

/// How often a playlist is rebuilt automatically. `Never` opts the
/// playlist out of scheduled builds entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    Never,
    Daily,
    Weekly,
    #[serde(rename = "Bi-Weekly")]
    BiWeekly,
    Monthly,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::Never => "Never",
            Schedule::Daily => "Daily",
            Schedule::Weekly => "Weekly",
            Schedule::BiWeekly => "Bi-Weekly",
            Schedule::Monthly => "Monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Schedule> {
        match s {
            "Never" => Some(Schedule::Never),
            "Daily" => Some(Schedule::Daily),
            "Weekly" => Some(Schedule::Weekly),
            "Bi-Weekly" => Some(Schedule::BiWeekly),
            "Monthly" => Some(Schedule::Monthly),
            _ => None,
        }
    }
}

impl Input {
    pub fn from_json(s: &str) -> anyhow::Result<Input> {
        let input: Input = serde_json::from_str(s)
            .map_err(|e| anyhow::anyhow!("parse playlist input: {}", e))?;
        Ok(input)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
