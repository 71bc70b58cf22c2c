use crate::api::ClientFactory;
use crate::db;
use crate::models::{Input, Playlist, User};
use crate::source;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Builds, rebuilds, and deletes the real Spotify playlists behind
/// stored virtual-playlist specifications.
///
/// Nothing here returns an outcome to the caller: every result of a
/// build or delete attempt lands in the store (failure message,
/// building/current flags, build counter) or in the logs. The spawn_*
/// entry points give HTTP-style callers the accepted-and-forgotten
/// contract.
#[derive(Clone)]
pub struct BuildService {
    pub(crate) db_path: PathBuf,
    pub(crate) clients: Arc<dyn ClientFactory>,
    pub(crate) max_batch_size: usize,
}

impl BuildService {
    pub fn new(db_path: PathBuf, clients: Arc<dyn ClientFactory>, max_batch_size: usize) -> Self {
        Self {
            db_path,
            clients,
            max_batch_size,
        }
    }

    /// Dispatch a build without waiting for it.
    pub fn spawn_build(&self, user_id: Uuid, playlist_id: Uuid) -> tokio::task::JoinHandle<()> {
        let svc = self.clone();
        tokio::spawn(async move { svc.build_playlist(user_id, playlist_id).await })
    }

    /// Dispatch a delete without waiting for it.
    pub fn spawn_delete(&self, user_id: Uuid, playlist_id: Uuid) -> tokio::task::JoinHandle<()> {
        let svc = self.clone();
        tokio::spawn(async move { svc.delete_playlist(user_id, playlist_id).await })
    }

    /// Build the playlist with the stored specification `playlist_id`
    /// for `user_id`, replacing any previously built playlist.
    pub async fn build_playlist(&self, user_id: Uuid, playlist_id: Uuid) {
        // Mark the playlist as building before anything else. If even
        // that fails the store was never mutated and the next sweep can
        // simply retry.
        if let Err(e) = self.start_build(playlist_id).await {
            log::error!("failed to mark playlist {} as building: {:#}", playlist_id, e);
            return;
        }

        match self.run_build(user_id, playlist_id).await {
            Ok(spotify_id) => {
                log::info!(
                    "built playlist {} for user {} -> spotify playlist {}",
                    playlist_id,
                    user_id,
                    spotify_id
                );
                if let Err(e) = self.good_build(playlist_id, &spotify_id).await {
                    self.record_build_failure(user_id, playlist_id, &e).await;
                    return;
                }
                self.increment_build_count(user_id).await;
            }
            Err(e) => {
                log::warn!("build of playlist {} failed: {:#}", playlist_id, e);
                self.record_build_failure(user_id, playlist_id, &e).await;
            }
        }
    }

    /// Everything between "marked building" and "record the outcome".
    async fn run_build(&self, user_id: Uuid, playlist_id: Uuid) -> Result<String> {
        let playlist = self
            .load_playlist(playlist_id)
            .await
            .context("loading playlist")?;
        let input = Input::from_json(&playlist.input)?;
        let user = self.load_user(user_id).await.context("loading user")?;
        let client = self.clients.client_for_user(&user);

        // A rebuild replaces the previous playlist. Unfollow failure
        // aborts the build: proceeding would leave two playlists live.
        if let Some(old_id) = &playlist.spotify_id {
            client
                .unfollow_playlist(&user.spotify_id, old_id)
                .await
                .with_context(|| format!("unfollowing previous playlist {}", old_id))?;
        }

        // Sources concatenate in specification order; duplicates across
        // sources are kept.
        let mut tracks: Vec<String> = Vec::new();
        for src in &input.track_sources {
            let resolved = source::resolve(client.as_ref(), src)
                .await
                .with_context(|| format!("resolving source {}", src.name))?;
            tracks.extend(resolved);
        }

        // Upstream APIs occasionally hand back entries with no id.
        tracks.retain(|t| !t.is_empty());

        let spotify_id = client
            .create_playlist(
                &user.spotify_id,
                &playlist.name,
                &playlist.description,
                playlist.public,
            )
            .await
            .context("creating playlist")?;

        for chunk in tracks.chunks(self.max_batch_size) {
            client
                .add_tracks(&spotify_id, chunk)
                .await
                .context("adding tracks")?;
        }

        Ok(spotify_id)
    }

    /// Delete the specification and unfollow its built playlist, if any.
    pub async fn delete_playlist(&self, user_id: Uuid, playlist_id: Uuid) {
        if let Err(e) = self.run_delete(user_id, playlist_id).await {
            log::warn!("delete of playlist {} failed: {:#}", playlist_id, e);
            self.record_delete_failure(playlist_id, &e).await;
        }
    }

    async fn run_delete(&self, user_id: Uuid, playlist_id: Uuid) -> Result<()> {
        let playlist = self
            .load_playlist(playlist_id)
            .await
            .context("loading playlist")?;
        let user = self.load_user(user_id).await.context("loading user")?;

        if let Some(old_id) = &playlist.spotify_id {
            let client = self.clients.client_for_user(&user);
            client
                .unfollow_playlist(&user.spotify_id, old_id)
                .await
                .with_context(|| format!("unfollowing playlist {}", old_id))?;
        }

        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db::open(&db_path)?;
            db::delete_playlist(&conn, playlist_id)
        })
        .await?
        .context("deleting playlist record")?;
        Ok(())
    }

    /// Write the failure message and clear the building flag, then bump
    /// the user's build counter. Neither bookkeeping failure may mask
    /// the primary failure: both are logged and swallowed.
    async fn record_build_failure(&self, user_id: Uuid, playlist_id: Uuid, err: &anyhow::Error) {
        let msg = format!("{:#}", err);
        let db_path = self.db_path.clone();
        let res = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db::open(&db_path)?;
            db::update_playlist_bad_build(&conn, playlist_id, &msg)
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!(
                "failed to record build failure for playlist {}: {:#}",
                playlist_id,
                e
            ),
            Err(e) => log::error!(
                "failed to record build failure for playlist {}: {}",
                playlist_id,
                e
            ),
        }

        self.increment_build_count(user_id).await;
    }

    async fn record_delete_failure(&self, playlist_id: Uuid, err: &anyhow::Error) {
        let msg = format!("{:#}", err);
        let db_path = self.db_path.clone();
        let res = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db::open(&db_path)?;
            db::update_playlist_bad_delete(&conn, playlist_id, &msg)
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!(
                "failed to record delete failure for playlist {}: {:#}",
                playlist_id,
                e
            ),
            Err(e) => log::error!(
                "failed to record delete failure for playlist {}: {}",
                playlist_id,
                e
            ),
        }
    }

    async fn increment_build_count(&self, user_id: Uuid) {
        let db_path = self.db_path.clone();
        let res = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db::open(&db_path)?;
            db::increment_user_build_count(&conn, user_id)
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!(
                "failed to increment build count for user {}: {:#}",
                user_id,
                e
            ),
            Err(e) => log::error!("failed to increment build count for user {}: {}", user_id, e),
        }
    }

    async fn load_playlist(&self, id: Uuid) -> Result<Playlist> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<Playlist> {
            let conn = db::open(&db_path).with_context(|| {
                format!("opening DB at {}", db_path.display())
            })?;
            db::get_playlist(&conn, id)
        })
        .await?
    }

    async fn load_user(&self, id: Uuid) -> Result<User> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<User> {
            let conn = db::open(&db_path).with_context(|| {
                format!("opening DB at {}", db_path.display())
            })?;
            db::get_user_by_id(&conn, id)
        })
        .await?
    }

    async fn start_build(&self, id: Uuid) -> Result<()> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db::open(&db_path)?;
            db::update_playlist_start_build(&conn, id)
        })
        .await?
    }

    async fn good_build(&self, id: Uuid, spotify_id: &str) -> Result<()> {
        let db_path = self.db_path.clone();
        let spotify_id = spotify_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db::open(&db_path)?;
            db::update_playlist_good_build(&conn, id, &spotify_id)
        })
        .await?
        .context("recording successful build")
    }
}
