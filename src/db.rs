use crate::models::{Playlist, Schedule, User};
use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../db/schema.sql");

/// Open a connection with a busy timeout so concurrent builds writing
/// to the same file wait instead of failing with SQLITE_BUSY.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

pub fn open_or_create(path: &Path) -> Result<Connection> {
    let conn = open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn row_to_user(r: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: Uuid::parse_str(&r.get::<_, String>(0)?).unwrap_or_default(),
        spotify_id: r.get(1)?,
        playlists_built: r.get(2)?,
        access_token: r.get(3)?,
        refresh_token: r.get(4)?,
        token_type: r.get(5)?,
        token_expiry: from_ts(r.get(6)?),
        created_at: from_ts(r.get(7)?),
        updated_at: from_ts(r.get(8)?),
    })
}

fn row_to_playlist(r: &Row) -> rusqlite::Result<Playlist> {
    let schedule: String = r.get(5)?;
    Ok(Playlist {
        id: Uuid::parse_str(&r.get::<_, String>(0)?).unwrap_or_default(),
        user_id: Uuid::parse_str(&r.get::<_, String>(1)?).unwrap_or_default(),
        name: r.get(2)?,
        description: r.get(3)?,
        public: r.get::<_, i64>(4)? != 0,
        schedule: Schedule::parse(&schedule).unwrap_or(Schedule::Never),
        input: r.get(6)?,
        spotify_id: r.get(7)?,
        failure_msg: r.get(8)?,
        building: r.get::<_, i64>(9)? != 0,
        current: r.get::<_, i64>(10)? != 0,
        created_at: from_ts(r.get(11)?),
        updated_at: from_ts(r.get(12)?),
        last_built_at: r.get::<_, Option<i64>>(13)?.map(from_ts),
    })
}

const PLAYLIST_COLUMNS: &str = "id, user_id, name, description, public, schedule, input, \
     spotify_id, failure_msg, building, current, created_at, updated_at, last_built_at";

/// Insert a new user after a first successful Spotify login.
pub fn create_user(
    conn: &Connection,
    spotify_id: &str,
    access_token: &str,
    refresh_token: &str,
    token_type: &str,
    token_expiry: DateTime<Utc>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO users (id, spotify_id, playlists_built, access_token, refresh_token, token_type, token_expiry, created_at, updated_at) \
         VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id.to_string(), spotify_id, access_token, refresh_token, token_type, ts(token_expiry), now],
    )?;
    Ok(id)
}

pub fn get_user_by_id(conn: &Connection, id: Uuid) -> Result<User> {
    let mut stmt = conn.prepare(
        "SELECT id, spotify_id, playlists_built, access_token, refresh_token, token_type, token_expiry, created_at, updated_at \
         FROM users WHERE id = ?1 LIMIT 1",
    )?;
    let user = stmt
        .query_row(params![id.to_string()], row_to_user)
        .optional()?;
    user.ok_or_else(|| anyhow!("user {} not found", id))
}

/// Replace the delegated token pair after a refresh or re-login.
pub fn update_user_token(
    conn: &Connection,
    id: Uuid,
    access_token: &str,
    refresh_token: &str,
    token_type: &str,
    token_expiry: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE users SET access_token = ?1, refresh_token = ?2, token_type = ?3, token_expiry = ?4, updated_at = ?5 \
         WHERE id = ?6",
        params![access_token, refresh_token, token_type, ts(token_expiry), ts(Utc::now()), id.to_string()],
    )?;
    Ok(())
}

/// Bump `playlists_built` by one. Called once per build attempt, success
/// or failure.
pub fn increment_user_build_count(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE users SET playlists_built = playlists_built + 1, updated_at = ?1 WHERE id = ?2",
        params![ts(Utc::now()), id.to_string()],
    )?;
    Ok(())
}

pub fn create_playlist(
    conn: &Connection,
    user_id: Uuid,
    name: &str,
    description: &str,
    public: bool,
    schedule: Schedule,
    input: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO playlists (id, user_id, name, description, public, schedule, input, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id.to_string(),
            user_id.to_string(),
            name,
            description,
            public as i64,
            schedule.as_str(),
            input,
            now
        ],
    )?;
    Ok(id)
}

/// Rewrite the user-editable parts of a playlist. The built Spotify
/// playlist no longer matches the specification, so `current` is cleared.
pub fn update_playlist_config(
    conn: &Connection,
    id: Uuid,
    name: &str,
    description: &str,
    public: bool,
    schedule: Schedule,
    input: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE playlists SET name = ?1, description = ?2, public = ?3, schedule = ?4, input = ?5, current = 0, updated_at = ?6 \
         WHERE id = ?7",
        params![
            name,
            description,
            public as i64,
            schedule.as_str(),
            input,
            ts(Utc::now()),
            id.to_string()
        ],
    )?;
    Ok(())
}

pub fn get_playlist(conn: &Connection, id: Uuid) -> Result<Playlist> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM playlists WHERE id = ?1 LIMIT 1",
        PLAYLIST_COLUMNS
    ))?;
    let playlist = stmt
        .query_row(params![id.to_string()], row_to_playlist)
        .optional()?;
    playlist.ok_or_else(|| anyhow!("playlist {} not found", id))
}

/// All playlists for one user, oldest first.
pub fn get_playlists(conn: &Connection, user_id: Uuid) -> Result<Vec<Playlist>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM playlists WHERE user_id = ?1 ORDER BY created_at ASC",
        PLAYLIST_COLUMNS
    ))?;
    let rows = stmt.query_map(params![user_id.to_string()], row_to_playlist)?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Every stored playlist, for the scheduled sweep.
pub fn get_all_playlists(conn: &Connection) -> Result<Vec<Playlist>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM playlists ORDER BY created_at ASC",
        PLAYLIST_COLUMNS
    ))?;
    let rows = stmt.query_map([], row_to_playlist)?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Mark a playlist as building before a build attempt starts.
pub fn update_playlist_start_build(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE playlists SET building = 1, updated_at = ?1 WHERE id = ?2",
        params![ts(Utc::now()), id.to_string()],
    )?;
    Ok(())
}

/// Record a successful build: the new Spotify playlist id, a fresh
/// last-built timestamp, cleared failure state, current = true.
pub fn update_playlist_good_build(conn: &Connection, id: Uuid, spotify_id: &str) -> Result<()> {
    let now = ts(Utc::now());
    conn.execute(
        "UPDATE playlists SET spotify_id = ?1, failure_msg = NULL, building = 0, current = 1, last_built_at = ?2, updated_at = ?2 \
         WHERE id = ?3",
        params![spotify_id, now, id.to_string()],
    )?;
    Ok(())
}

/// Record a failed build. `current` is cleared as well: the previous
/// Spotify playlist may already have been unfollowed by the attempt.
pub fn update_playlist_bad_build(conn: &Connection, id: Uuid, failure_msg: &str) -> Result<()> {
    conn.execute(
        "UPDATE playlists SET failure_msg = ?1, building = 0, current = 0, updated_at = ?2 WHERE id = ?3",
        params![failure_msg, ts(Utc::now()), id.to_string()],
    )?;
    Ok(())
}

/// Record a failed delete on the (still existing) playlist row.
pub fn update_playlist_bad_delete(conn: &Connection, id: Uuid, failure_msg: &str) -> Result<()> {
    conn.execute(
        "UPDATE playlists SET failure_msg = ?1, updated_at = ?2 WHERE id = ?3",
        params![failure_msg, ts(Utc::now()), id.to_string()],
    )?;
    Ok(())
}

pub fn delete_playlist(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM playlists WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}
