use super::{ClientFactory, MusicClient, TrackItem, TrackPage};
use crate::db;
use crate::models::User;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{TimeZone, Utc};
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::json;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_at: i64, // epoch seconds
}

/// Spotify client backed by the Spotify Web API, scoped to one user's
/// delegated token pair. Tokens are refreshed shortly before expiry and
/// refreshed tokens are persisted back to the user's row.
/// Endpoints may be overridden by SPOTIFY_AUTH_BASE and SPOTIFY_API_BASE
/// env vars (useful for tests).
pub struct SpotifyClient {
    client: Client,
    client_id: String,
    client_secret: String,
    db_path: PathBuf,
    user_id: Uuid,
    token: tokio::sync::Mutex<TokenState>,
}

impl SpotifyClient {
    pub fn new(user: &User, client_id: String, client_secret: String, db_path: PathBuf) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret,
            db_path,
            user_id: user.id,
            token: tokio::sync::Mutex::new(TokenState {
                access_token: user.access_token.clone(),
                refresh_token: user.refresh_token.clone(),
                token_type: user.token_type.clone(),
                expires_at: user.token_expiry.timestamp(),
            }),
        }
    }

    fn auth_base() -> String {
        env::var("SPOTIFY_AUTH_BASE").unwrap_or_else(|_| "https://accounts.spotify.com".into())
    }

    fn api_base() -> String {
        // include v1 path by default
        env::var("SPOTIFY_API_BASE").unwrap_or_else(|_| "https://api.spotify.com/v1".into())
    }

    async fn persist_token_to_db(&self, st: &TokenState) -> Result<()> {
        let db_path = self.db_path.clone();
        let user_id = self.user_id;
        let st = st.clone();
        tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            let conn = db::open(&db_path)?;
            db::update_user_token(
                &conn,
                user_id,
                &st.access_token,
                &st.refresh_token,
                &st.token_type,
                chrono::Utc
                    .timestamp_opt(st.expires_at, 0)
                    .single()
                    .unwrap_or_else(chrono::Utc::now),
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn refresh_token_internal(&self, cur: &mut TokenState) -> Result<()> {
        if cur.refresh_token.is_empty() {
            return Err(anyhow!("no refresh token"));
        }
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", cur.refresh_token.as_str()),
        ];
        let auth_header = format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
        );
        let url = format!("{}/api/token", Self::auth_base());
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, auth_header)
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to refresh token: {} - {}", status, body));
        }
        let j: serde_json::Value = resp.json().await?;
        let access_token = j["access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("no access_token"))?
            .to_string();
        let expires_in = j["expires_in"].as_i64().unwrap_or(3600);
        cur.access_token = access_token;
        cur.token_type = "Bearer".into();
        cur.expires_at = Utc::now().timestamp() + expires_in;
        if let Some(rt) = j["refresh_token"].as_str() {
            cur.refresh_token = rt.to_string();
        }
        self.persist_token_to_db(cur).await?;
        Ok(())
    }

    async fn ensure_token(&self) -> Result<()> {
        let mut lock = self.token.lock().await;
        let now = Utc::now().timestamp();
        if now + 30 >= lock.expires_at {
            debug!("Spotify token is near expiry, refreshing");
            let mut cur = lock.clone();
            self.refresh_token_internal(&mut cur).await?;
            *lock = cur;
        }
        Ok(())
    }

    async fn force_refresh(&self) -> Result<()> {
        let mut lock = self.token.lock().await;
        let mut cur = lock.clone();
        self.refresh_token_internal(&mut cur).await?;
        *lock = cur;
        Ok(())
    }

    async fn get_bearer(&self) -> Result<String> {
        self.ensure_token().await?;
        let lock = self.token.lock().await;
        Ok(format!("Bearer {}", lock.access_token))
    }

    /// Send an authenticated request, refreshing the token and retrying
    /// once on 401. 429 is surfaced as a `rate_limited` error with the
    /// retry-after hint; the caller never retries within a build attempt.
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let bearer = self.get_bearer().await?;
            let mut req = self
                .client
                .request(method.clone(), url)
                .header(AUTHORIZATION, &bearer);
            if let Some(b) = &body {
                req = req.header(CONTENT_TYPE, "application/json").json(b);
            }
            let resp = req.send().await?;
            let status = resp.status();

            if status.as_u16() == 401 && attempt == 1 {
                warn!("Got 401 from {}; attempting token refresh", url);
                self.force_refresh().await?;
                continue;
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());
                return Err(anyhow!("rate_limited: retry_after={:?}", retry_after));
            }
            if !status.is_success() {
                let txt = resp.text().await.unwrap_or_default();
                return Err(anyhow!("spotify request failed: {} => {}", status, txt));
            }
            return Ok(resp);
        }
    }
}

fn item_to_track(v: &serde_json::Value) -> TrackItem {
    TrackItem {
        id: v["id"].as_str().unwrap_or("").to_string(),
        href: v["href"].as_str().unwrap_or("").to_string(),
    }
}

/// Parse a paging object whose items are `{"track": {...}}` wrappers
/// (liked tracks, playlist tracks).
fn parse_wrapped_page(j: &serde_json::Value) -> TrackPage {
    let items = j["items"]
        .as_array()
        .map(|a| a.iter().map(|it| item_to_track(&it["track"])).collect())
        .unwrap_or_default();
    TrackPage {
        items,
        total: j["total"].as_u64().unwrap_or(0) as usize,
    }
}

/// Parse a paging object whose items are bare track objects (album tracks).
fn parse_bare_page(j: &serde_json::Value) -> TrackPage {
    let items = j["items"]
        .as_array()
        .map(|a| a.iter().map(item_to_track).collect())
        .unwrap_or_default();
    TrackPage {
        items,
        total: j["total"].as_u64().unwrap_or(0) as usize,
    }
}

#[async_trait]
impl MusicClient for SpotifyClient {
    async fn current_user(&self) -> Result<String> {
        let url = format!("{}/me", Self::api_base());
        let resp = self.request(Method::GET, &url, None).await?;
        let j: serde_json::Value = resp.json().await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| anyhow!("no id in /me response"))?
            .to_string();
        Ok(id)
    }

    async fn liked_tracks(&self, limit: usize, offset: usize) -> Result<TrackPage> {
        let url = format!(
            "{}/me/tracks?limit={}&offset={}",
            Self::api_base(),
            limit,
            offset
        );
        let resp = self.request(Method::GET, &url, None).await?;
        let j: serde_json::Value = resp.json().await?;
        Ok(parse_wrapped_page(&j))
    }

    async fn playlist_tracks(
        &self,
        playlist_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<TrackPage> {
        let url = format!(
            "{}/playlists/{}/tracks?limit={}&offset={}&fields={}",
            Self::api_base(),
            playlist_id,
            limit,
            offset,
            urlencoding::encode("items(track(id,href)),total")
        );
        let resp = self.request(Method::GET, &url, None).await?;
        let j: serde_json::Value = resp.json().await?;
        Ok(parse_wrapped_page(&j))
    }

    async fn album_tracks(&self, album_id: &str, limit: usize, offset: usize) -> Result<TrackPage> {
        let url = format!(
            "{}/albums/{}/tracks?limit={}&offset={}",
            Self::api_base(),
            album_id,
            limit,
            offset
        );
        let resp = self.request(Method::GET, &url, None).await?;
        let j: serde_json::Value = resp.json().await?;
        Ok(parse_bare_page(&j))
    }

    async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<String> {
        let url = format!(
            "{}/users/{}/playlists",
            Self::api_base(),
            url::form_urlencoded::byte_serialize(user_id.as_bytes()).collect::<String>()
        );
        let body = json!({
            "name": name,
            "description": description,
            "public": public
        });
        let resp = self.request(Method::POST, &url, Some(body)).await?;
        let j: serde_json::Value = resp.json().await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| anyhow!("no id in create playlist response"))?
            .to_string();
        Ok(id)
    }

    async fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        let url = format!("{}/playlists/{}/tracks", Self::api_base(), playlist_id);
        let uris: Vec<String> = track_ids
            .iter()
            .map(|id| format!("spotify:track:{}", id))
            .collect();
        let body = json!({ "uris": uris });
        self.request(Method::POST, &url, Some(body)).await?;
        Ok(())
    }

    async fn unfollow_playlist(&self, _user_id: &str, playlist_id: &str) -> Result<()> {
        // Spotify has no hard delete; the current user unfollows the
        // playlist, which removes it from their library.
        let url = format!("{}/playlists/{}/followers", Self::api_base(), playlist_id);
        self.request(Method::DELETE, &url, None).await?;
        Ok(())
    }
}

/// Builds a SpotifyClient for a stored user from the app credentials.
pub struct SpotifyClientFactory {
    client_id: String,
    client_secret: String,
    db_path: PathBuf,
}

impl SpotifyClientFactory {
    pub fn new(client_id: String, client_secret: String, db_path: PathBuf) -> Self {
        Self {
            client_id,
            client_secret,
            db_path,
        }
    }
}

impl ClientFactory for SpotifyClientFactory {
    fn client_for_user(&self, user: &User) -> Arc<dyn MusicClient> {
        Arc::new(SpotifyClient::new(
            user,
            self.client_id.clone(),
            self.client_secret.clone(),
            self.db_path.clone(),
        ))
    }
}
