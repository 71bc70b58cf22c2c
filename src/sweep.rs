use crate::build::BuildService;
use crate::db;
use crate::models::{Playlist, Schedule};
use anyhow::Result;
use chrono::{DateTime, Days, Months, Utc};
use futures::future::join_all;

/// When a playlist on the given schedule is next due, counted from its
/// last successful build.
pub fn next_deadline(last_built_at: DateTime<Utc>, schedule: Schedule) -> DateTime<Utc> {
    match schedule {
        // Callers skip Never before computing a deadline.
        Schedule::Never => last_built_at,
        Schedule::Daily => last_built_at
            .checked_add_days(Days::new(1))
            .unwrap_or(last_built_at),
        Schedule::Weekly => last_built_at
            .checked_add_days(Days::new(7))
            .unwrap_or(last_built_at),
        Schedule::BiWeekly => last_built_at
            .checked_add_days(Days::new(14))
            .unwrap_or(last_built_at),
        Schedule::Monthly => last_built_at
            .checked_add_months(Months::new(1))
            .unwrap_or(last_built_at),
    }
}

impl BuildService {
    /// Build every stored playlist whose recurrence deadline has passed.
    ///
    /// Eligible builds run concurrently; the sweep waits for all of them
    /// before returning, so an external periodic trigger can run sweeps
    /// back to back without overlap.
    pub async fn build_scheduled_playlists(&self) {
        log::info!("starting scheduled build sweep");

        let db_path = self.db_path.clone();
        let playlists: Vec<Playlist> =
            match tokio::task::spawn_blocking(move || -> Result<Vec<Playlist>> {
                let conn = db::open(&db_path)?;
                db::get_all_playlists(&conn)
            })
            .await
            {
                Ok(Ok(p)) => p,
                // Without the full list no partial sweep is possible; the
                // next scheduled invocation retries from scratch.
                Ok(Err(e)) => {
                    log::error!("failed to get all playlists from store: {:#}", e);
                    return;
                }
                Err(e) => {
                    log::error!("failed to get all playlists from store: {}", e);
                    return;
                }
            };

        let now = Utc::now();
        let mut built = 0usize;
        let mut never_scheduled = 0usize;
        let mut never_manually_built = 0usize;
        let mut not_due = 0usize;
        let mut handles = Vec::new();

        for p in &playlists {
            if p.schedule == Schedule::Never {
                never_scheduled += 1;
                continue;
            }
            // A playlist must be built manually once before automatic
            // scheduling kicks in.
            let last_built_at = match p.last_built_at {
                Some(t) => t,
                None => {
                    never_manually_built += 1;
                    continue;
                }
            };
            if now < next_deadline(last_built_at, p.schedule) {
                not_due += 1;
                continue;
            }

            log::info!(
                "building playlist {} on schedule {}",
                p.id,
                p.schedule.as_str()
            );
            built += 1;
            handles.push(self.spawn_build(p.user_id, p.id));
        }

        let _ = join_all(handles).await;

        log::info!(
            "sweep summary: total={} built={} never_scheduled={} never_manually_built={} not_due={}",
            playlists.len(),
            built,
            never_scheduled,
            never_manually_built,
            not_due
        );
    }
}
