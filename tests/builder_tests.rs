use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tempfile::TempDir;
use uuid::Uuid;

use virtual_playlist_builder::api::mock::{MockClient, MockFactory};
use virtual_playlist_builder::build::BuildService;
use virtual_playlist_builder::db;
use virtual_playlist_builder::models::{ExtractMethod, Input, Schedule, SourceKind, TrackSource};

fn setup_db(td: &TempDir) -> (PathBuf, Connection) {
    let db_path = td.path().join("test.db");
    let conn = db::open_or_create(&db_path).unwrap();
    (db_path, conn)
}

fn insert_user(conn: &Connection) -> Uuid {
    db::create_user(
        conn,
        "spotify-user",
        "access",
        "refresh",
        "Bearer",
        Utc::now() + chrono::Duration::hours(1),
    )
    .unwrap()
}

fn liked_input(method: ExtractMethod, count: usize) -> String {
    Input {
        track_sources: vec![TrackSource {
            name: "Liked Songs".into(),
            id: String::new(),
            kind: SourceKind::Liked,
            method,
            count,
        }],
    }
    .to_json()
    .unwrap()
}

fn insert_playlist(conn: &Connection, user_id: Uuid, input: &str) -> Uuid {
    db::create_playlist(
        conn,
        user_id,
        "My Mix",
        "rebuilt by tests",
        false,
        Schedule::Never,
        input,
    )
    .unwrap()
}

fn service(db_path: &Path, mock: &Arc<MockClient>) -> BuildService {
    BuildService::new(
        db_path.to_path_buf(),
        Arc::new(MockFactory::new(mock.clone())),
        100,
    )
}

#[tokio::test]
async fn successful_build_updates_state_and_counter() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 10));

    let mock = Arc::new(MockClient::new("spotify-user").with_liked(MockClient::track_items("liked", 10)));
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    let playlist = db::get_playlist(&conn, playlist_id).unwrap();
    assert!(!playlist.building);
    assert!(playlist.current);
    assert!(playlist.failure_msg.is_none());
    assert!(playlist.last_built_at.is_some());
    assert_eq!(playlist.spotify_id.as_deref(), Some("mock-playlist-1"));

    let user = db::get_user_by_id(&conn, user_id).unwrap();
    assert_eq!(user.playlists_built, 1);

    let created = mock.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "My Mix");
    assert_eq!(created[0].user_id, "spotify-user");
    assert!(!created[0].public);

    // All ten liked tracks, in source order, in a single batch.
    let added = mock.added.lock().unwrap();
    assert_eq!(added.len(), 1);
    let expected: Vec<String> = (0..10).map(|n| format!("liked{}", n)).collect();
    assert_eq!(added[0].1, expected);
}

#[tokio::test]
async fn failed_build_records_failure_and_still_counts() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 20));

    // Only 15 liked tracks for a count of 20: the resolver must fail.
    let mock = Arc::new(MockClient::new("spotify-user").with_liked(MockClient::track_items("liked", 15)));
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    let playlist = db::get_playlist(&conn, playlist_id).unwrap();
    assert!(!playlist.building);
    assert!(!playlist.current);
    assert!(playlist.spotify_id.is_none());
    let msg = playlist.failure_msg.expect("failure message recorded");
    assert!(msg.contains("expected 20"), "unexpected message: {}", msg);

    // The counter increments on failure too.
    let user = db::get_user_by_id(&conn, user_id).unwrap();
    assert_eq!(user.playlists_built, 1);

    assert!(mock.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rebuild_unfollows_previous_playlist() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 3));
    db::update_playlist_good_build(&conn, playlist_id, "old-playlist").unwrap();

    let mock = Arc::new(MockClient::new("spotify-user").with_liked(MockClient::track_items("liked", 3)));
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    assert_eq!(*mock.unfollowed.lock().unwrap(), vec!["old-playlist"]);
    let playlist = db::get_playlist(&conn, playlist_id).unwrap();
    assert_eq!(playlist.spotify_id.as_deref(), Some("mock-playlist-1"));
    assert!(playlist.current);
}

#[tokio::test]
async fn unfollow_failure_aborts_rebuild() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 3));
    db::update_playlist_good_build(&conn, playlist_id, "old-playlist").unwrap();

    let mock = Arc::new(
        MockClient::new("spotify-user")
            .with_liked(MockClient::track_items("liked", 3))
            .failing_unfollow(),
    );
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    // Nothing was created and the failure is on record; current cannot
    // stay true once a rebuild has been attempted against the old
    // playlist.
    assert!(mock.created.lock().unwrap().is_empty());
    let playlist = db::get_playlist(&conn, playlist_id).unwrap();
    assert!(!playlist.building);
    assert!(!playlist.current);
    let msg = playlist.failure_msg.expect("failure message recorded");
    assert!(msg.contains("unfollowing"), "unexpected message: {}", msg);

    let user = db::get_user_by_id(&conn, user_id).unwrap();
    assert_eq!(user.playlists_built, 1);
}

#[tokio::test]
async fn tracks_are_added_in_batches_of_at_most_100() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 250));

    let mock = Arc::new(MockClient::new("spotify-user").with_liked(MockClient::track_items("liked", 250)));
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    let added = mock.added.lock().unwrap();
    assert_eq!(added.len(), 3);
    assert_eq!(added[0].1.len(), 100);
    assert_eq!(added[1].1.len(), 100);
    assert_eq!(added[2].1.len(), 50);
    // Batches cover the full list in order with no gaps or overlaps.
    let all: Vec<String> = added.iter().flat_map(|(_, ids)| ids.clone()).collect();
    let expected: Vec<String> = (0..250).map(|n| format!("liked{}", n)).collect();
    assert_eq!(all, expected);
    assert!(added.iter().all(|(pl, _)| pl == "mock-playlist-1"));
}

#[tokio::test]
async fn sources_concatenate_in_specification_order() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let input = Input {
        track_sources: vec![
            TrackSource {
                name: "Playlist p1".into(),
                id: "p1".into(),
                kind: SourceKind::Playlist,
                method: ExtractMethod::Latest,
                count: 2,
            },
            TrackSource {
                name: "Liked Songs".into(),
                id: String::new(),
                kind: SourceKind::Liked,
                method: ExtractMethod::Latest,
                count: 2,
            },
        ],
    }
    .to_json()
    .unwrap();
    let playlist_id = insert_playlist(&conn, user_id, &input);

    let mock = Arc::new(
        MockClient::new("spotify-user")
            .with_playlist("p1", MockClient::track_items("pl", 2))
            .with_liked(MockClient::track_items("liked", 2)),
    );
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    let added = mock.added.lock().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].1, vec!["pl0", "pl1", "liked0", "liked1"]);
}

#[tokio::test]
async fn empty_track_ids_are_dropped_before_adding() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let input = Input {
        track_sources: vec![TrackSource {
            name: "Playlist p1".into(),
            id: "p1".into(),
            kind: SourceKind::Playlist,
            method: ExtractMethod::Latest,
            count: 3,
        }],
    }
    .to_json()
    .unwrap();
    let playlist_id = insert_playlist(&conn, user_id, &input);

    let mut items = MockClient::track_items("t", 3);
    items[1].id = String::new();
    let mock = Arc::new(MockClient::new("spotify-user").with_playlist("p1", items));
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    let added = mock.added.lock().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].1, vec!["t0", "t2"]);
}

#[tokio::test]
async fn create_failure_records_failure() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 2));

    let mock = Arc::new(
        MockClient::new("spotify-user")
            .with_liked(MockClient::track_items("liked", 2))
            .failing_create(),
    );
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    let playlist = db::get_playlist(&conn, playlist_id).unwrap();
    let msg = playlist.failure_msg.expect("failure message recorded");
    assert!(msg.contains("creating playlist"), "unexpected message: {}", msg);
    assert_eq!(db::get_user_by_id(&conn, user_id).unwrap().playlists_built, 1);
}

#[tokio::test]
async fn add_failure_after_create_records_failure() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 2));

    let mock = Arc::new(
        MockClient::new("spotify-user")
            .with_liked(MockClient::track_items("liked", 2))
            .failing_add(),
    );
    service(&db_path, &mock).build_playlist(user_id, playlist_id).await;

    // The empty playlist exists on the service side; the failure is on
    // record locally.
    assert_eq!(mock.created.lock().unwrap().len(), 1);
    let playlist = db::get_playlist(&conn, playlist_id).unwrap();
    assert!(!playlist.building);
    let msg = playlist.failure_msg.expect("failure message recorded");
    assert!(msg.contains("adding tracks"), "unexpected message: {}", msg);
}

#[tokio::test]
async fn spawn_build_runs_in_background() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id, &liked_input(ExtractMethod::Latest, 2));

    let mock = Arc::new(MockClient::new("spotify-user").with_liked(MockClient::track_items("liked", 2)));
    let handle = service(&db_path, &mock).spawn_build(user_id, playlist_id);
    handle.await.unwrap();

    let playlist = db::get_playlist(&conn, playlist_id).unwrap();
    assert_eq!(playlist.spotify_id.as_deref(), Some("mock-playlist-1"));
}
