use super::{ClientFactory, MusicClient, TrackItem, TrackPage};
use crate::models::User;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// A playlist created through the mock, as the service saw it.
#[derive(Debug, Clone)]
pub struct CreatedPlaylist {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub public: bool,
}

/// A simple in-memory client used in tests and when no real credentials
/// are present. Sources are configured up front; every write operation is
/// recorded so tests can assert on exactly what the service received.
pub struct MockClient {
    pub user_id: String,
    liked: Vec<TrackItem>,
    playlists: HashMap<String, Vec<TrackItem>>,
    albums: HashMap<String, Vec<TrackItem>>,
    next_playlist: AtomicUsize,

    pub created: Mutex<Vec<CreatedPlaylist>>,
    /// One entry per add_tracks call, in call order.
    pub added: Mutex<Vec<(String, Vec<String>)>>,
    pub unfollowed: Mutex<Vec<String>>,

    fail_create: bool,
    fail_add: bool,
    fail_unfollow: bool,
}

impl MockClient {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            liked: Vec::new(),
            playlists: HashMap::new(),
            albums: HashMap::new(),
            next_playlist: AtomicUsize::new(1),
            created: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            unfollowed: Mutex::new(Vec::new()),
            fail_create: false,
            fail_add: false,
            fail_unfollow: false,
        }
    }

    pub fn with_liked(mut self, items: Vec<TrackItem>) -> Self {
        self.liked = items;
        self
    }

    pub fn with_playlist(mut self, id: &str, items: Vec<TrackItem>) -> Self {
        self.playlists.insert(id.to_string(), items);
        self
    }

    pub fn with_album(mut self, id: &str, items: Vec<TrackItem>) -> Self {
        self.albums.insert(id.to_string(), items);
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_add(mut self) -> Self {
        self.fail_add = true;
        self
    }

    pub fn failing_unfollow(mut self) -> Self {
        self.fail_unfollow = true;
        self
    }

    /// `count` track items named `<prefix>0..<prefix>N` with track hrefs.
    pub fn track_items(prefix: &str, count: usize) -> Vec<TrackItem> {
        (0..count)
            .map(|n| TrackItem {
                id: format!("{}{}", prefix, n),
                href: format!("https://api.spotify.com/v1/tracks/{}{}", prefix, n),
            })
            .collect()
    }

    /// An item whose href does not reference the track resource, e.g. a
    /// local file entry.
    pub fn local_item(name: &str) -> TrackItem {
        TrackItem {
            id: name.to_string(),
            href: format!("https://api.spotify.com/v1/local/{}", name),
        }
    }

    fn page(items: &[TrackItem], limit: usize, offset: usize) -> TrackPage {
        let total = items.len();
        let slice: &[TrackItem] = if offset >= total {
            &[]
        } else {
            &items[offset..(offset + limit).min(total)]
        };
        TrackPage {
            items: slice.to_vec(),
            total,
        }
    }
}

#[async_trait]
impl MusicClient for MockClient {
    async fn current_user(&self) -> Result<String> {
        Ok(self.user_id.clone())
    }

    async fn liked_tracks(&self, limit: usize, offset: usize) -> Result<TrackPage> {
        Ok(Self::page(&self.liked, limit, offset))
    }

    async fn playlist_tracks(
        &self,
        playlist_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<TrackPage> {
        let items = self
            .playlists
            .get(playlist_id)
            .ok_or_else(|| anyhow!("mock playlist {} not found", playlist_id))?;
        Ok(Self::page(items, limit, offset))
    }

    async fn album_tracks(&self, album_id: &str, limit: usize, offset: usize) -> Result<TrackPage> {
        let items = self
            .albums
            .get(album_id)
            .ok_or_else(|| anyhow!("mock album {} not found", album_id))?;
        Ok(Self::page(items, limit, offset))
    }

    async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<String> {
        if self.fail_create {
            return Err(anyhow!("mock create playlist failure"));
        }
        let id = format!(
            "mock-playlist-{}",
            self.next_playlist.fetch_add(1, Ordering::SeqCst)
        );
        info!("MockClient: create_playlist {} -> {}", name, id);
        self.created.lock().unwrap().push(CreatedPlaylist {
            id: id.clone(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            public,
        });
        Ok(id)
    }

    async fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        if self.fail_add {
            return Err(anyhow!("mock add tracks failure"));
        }
        info!(
            "MockClient: add_tracks {} -> {} tracks",
            playlist_id,
            track_ids.len()
        );
        self.added
            .lock()
            .unwrap()
            .push((playlist_id.to_string(), track_ids.to_vec()));
        Ok(())
    }

    async fn unfollow_playlist(&self, _user_id: &str, playlist_id: &str) -> Result<()> {
        if self.fail_unfollow {
            return Err(anyhow!("mock unfollow failure"));
        }
        info!("MockClient: unfollow_playlist {}", playlist_id);
        self.unfollowed.lock().unwrap().push(playlist_id.to_string());
        Ok(())
    }
}

/// Hands out the same shared MockClient for every user.
pub struct MockFactory {
    client: Arc<MockClient>,
}

impl MockFactory {
    pub fn new(client: Arc<MockClient>) -> Self {
        Self { client }
    }
}

impl ClientFactory for MockFactory {
    fn client_for_user(&self, _user: &User) -> Arc<dyn MusicClient> {
        self.client.clone()
    }
}
