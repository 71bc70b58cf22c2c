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

fn insert_playlist(conn: &Connection, user_id: Uuid) -> Uuid {
    let input = Input {
        track_sources: vec![TrackSource {
            name: "Liked Songs".into(),
            id: String::new(),
            kind: SourceKind::Liked,
            method: ExtractMethod::Latest,
            count: 1,
        }],
    }
    .to_json()
    .unwrap();
    db::create_playlist(conn, user_id, "My Mix", "", false, Schedule::Never, &input).unwrap()
}

fn service(db_path: &Path, mock: &Arc<MockClient>) -> BuildService {
    BuildService::new(
        db_path.to_path_buf(),
        Arc::new(MockFactory::new(mock.clone())),
        100,
    )
}

#[tokio::test]
async fn delete_unfollows_and_removes_record() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id);
    db::update_playlist_good_build(&conn, playlist_id, "built-playlist").unwrap();

    let mock = Arc::new(MockClient::new("spotify-user"));
    service(&db_path, &mock).delete_playlist(user_id, playlist_id).await;

    assert_eq!(*mock.unfollowed.lock().unwrap(), vec!["built-playlist"]);
    assert!(db::get_playlist(&conn, playlist_id).is_err());
}

#[tokio::test]
async fn delete_without_built_playlist_skips_unfollow() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id);

    let mock = Arc::new(MockClient::new("spotify-user"));
    service(&db_path, &mock).delete_playlist(user_id, playlist_id).await;

    assert!(mock.unfollowed.lock().unwrap().is_empty());
    assert!(db::get_playlist(&conn, playlist_id).is_err());
}

#[tokio::test]
async fn spawn_delete_runs_in_background() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id);

    let mock = Arc::new(MockClient::new("spotify-user"));
    let handle = service(&db_path, &mock).spawn_delete(user_id, playlist_id);
    handle.await.unwrap();

    assert!(db::get_playlist(&conn, playlist_id).is_err());
}

#[tokio::test]
async fn delete_failure_keeps_record_with_message() {
    let td = TempDir::new().unwrap();
    let (db_path, conn) = setup_db(&td);
    let user_id = insert_user(&conn);
    let playlist_id = insert_playlist(&conn, user_id);
    db::update_playlist_good_build(&conn, playlist_id, "built-playlist").unwrap();

    let mock = Arc::new(MockClient::new("spotify-user").failing_unfollow());
    service(&db_path, &mock).delete_playlist(user_id, playlist_id).await;

    let playlist = db::get_playlist(&conn, playlist_id).expect("record still exists");
    let msg = playlist.failure_msg.expect("failure message recorded");
    assert!(msg.contains("unfollowing"), "unexpected message: {}", msg);
    // Deletes are not build attempts; the counter is untouched.
    assert_eq!(db::get_user_by_id(&conn, user_id).unwrap().playlists_built, 0);
}
