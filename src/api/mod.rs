pub mod mock;
pub mod spotify;

use crate::models::User;
use anyhow::Result;
use std::sync::Arc;

/// One entry of a paginated track listing. `href` is the API endpoint of
/// the underlying resource; entries whose href does not reference the
/// track resource (e.g. local files) are not usable as playlist input.
#[derive(Debug, Clone)]
pub struct TrackItem {
    pub id: String,
    pub href: String,
}

/// One page of a track listing plus the source's total item count.
#[derive(Debug, Clone)]
pub struct TrackPage {
    pub items: Vec<TrackItem>,
    pub total: usize,
}

/// MusicClient trait: the operations the build pipeline needs from the
/// remote music service, scoped to one authenticated user.
/// Implementations: spotify::SpotifyClient and mock::MockClient.
#[async_trait::async_trait]
pub trait MusicClient: Send + Sync {
    /// Fetch the external id of the authenticated user.
    async fn current_user(&self) -> Result<String>;

    /// One page of the user's liked-songs pool.
    async fn liked_tracks(&self, limit: usize, offset: usize) -> Result<TrackPage>;

    /// One page of a playlist's tracks.
    async fn playlist_tracks(&self, playlist_id: &str, limit: usize, offset: usize)
        -> Result<TrackPage>;

    /// One page of an album's tracks.
    async fn album_tracks(&self, album_id: &str, limit: usize, offset: usize)
        -> Result<TrackPage>;

    /// Create an empty playlist under the user's account; returns its id.
    async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<String>;

    /// Add tracks to a playlist. Callers must chunk to the service's
    /// per-call limit before calling.
    async fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    /// Remove the playlist from the user's library.
    async fn unfollow_playlist(&self, user_id: &str, playlist_id: &str) -> Result<()>;
}

/// Builds an authenticated client from a stored user's delegated
/// credentials. The seam between the build pipeline and the concrete
/// service client.
pub trait ClientFactory: Send + Sync {
    fn client_for_user(&self, user: &User) -> Arc<dyn MusicClient>;
}
