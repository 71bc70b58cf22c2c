use crate::api::{MusicClient, TrackItem, TrackPage};
use crate::models::{ExtractMethod, SourceKind, TrackSource};
use anyhow::{anyhow, Result};

/// Largest page the track-listing endpoints will serve.
pub const PAGE_LIMIT: usize = 50;

/// Resolve one track source into an ordered list of track ids.
///
/// Under-filled sources are always an error, never a silent truncation:
/// asking for more tracks than the source holds fails the whole build.
pub async fn resolve(client: &dyn MusicClient, source: &TrackSource) -> Result<Vec<String>> {
    match source.method {
        ExtractMethod::Latest => latest_tracks(client, source).await,
        ExtractMethod::Random => random_tracks(client, source).await,
    }
}

async fn fetch_page(
    client: &dyn MusicClient,
    source: &TrackSource,
    limit: usize,
    offset: usize,
) -> Result<TrackPage> {
    match source.kind {
        SourceKind::Liked => client.liked_tracks(limit, offset).await,
        SourceKind::Album => client.album_tracks(&source.id, limit, offset).await,
        SourceKind::Playlist => client.playlist_tracks(&source.id, limit, offset).await,
    }
}

/// Entries whose href does not reference the track resource (local
/// files and other oddities) are unusable and get dropped.
fn is_track(item: &TrackItem) -> bool {
    item.href.contains("/tracks/")
}

fn exhausted(source: &TrackSource) -> anyhow::Error {
    anyhow!(
        "expected {} tracks in {} but the source ran out",
        source.count,
        source.name
    )
}

/// The first `count` tracks of the source, in source order.
async fn latest_tracks(client: &dyn MusicClient, source: &TrackSource) -> Result<Vec<String>> {
    let want = source.count;
    let mut tracks = Vec::with_capacity(want);
    let mut fetched = 0usize;
    let mut offset = 0usize;

    while fetched < want {
        let limit = PAGE_LIMIT.min(want - fetched);
        let page = fetch_page(client, source, limit, offset).await?;
        // Fullness is judged on the raw page; a short page means the
        // source ran out before `count` was satisfied. Non-track items
        // are dropped after this check and are not re-fetched, so the
        // result can come back shorter than `count`.
        if page.items.len() != limit {
            return Err(exhausted(source));
        }
        fetched += limit;
        offset += limit;
        tracks.extend(
            page.items
                .into_iter()
                .filter(is_track)
                .map(|item| item.id),
        );
    }
    Ok(tracks)
}

/// `count` tracks drawn uniformly without replacement from the source.
///
/// A 1-item probe learns the total, `count` distinct offsets are sampled
/// and sorted ascending, then one forward pass over the source picks
/// them off. Sorting first keeps the pass linear: external calls stay
/// O(total / PAGE_LIMIT) no matter how scattered the draws are.
async fn random_tracks(client: &dyn MusicClient, source: &TrackSource) -> Result<Vec<String>> {
    let want = source.count;
    let probe = fetch_page(client, source, 1, 0).await?;
    let total = probe.total;
    if total < want {
        return Err(exhausted(source));
    }

    let mut picks = rand::seq::index::sample(&mut rand::thread_rng(), total, want).into_vec();
    picks.sort_unstable();

    let mut tracks = Vec::with_capacity(want);
    let mut next = 0usize;
    let mut offset = 0usize;
    while next < picks.len() {
        let page = fetch_page(client, source, PAGE_LIMIT, offset).await?;
        if page.items.is_empty() {
            // The source shrank underneath the pass.
            return Err(exhausted(source));
        }
        for (i, item) in page.items.iter().enumerate() {
            if next < picks.len() && picks[next] == offset + i {
                if is_track(item) {
                    tracks.push(item.id.clone());
                }
                next += 1;
            }
        }
        offset += page.items.len();
    }
    Ok(tracks)
}
