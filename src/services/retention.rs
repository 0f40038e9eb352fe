//! Scheduled housekeeping (§4.6): daily deletes at 03:00 UTC, cache sweep
//! every 6h, orphan-session closure hourly, rollup vacuum weekly. Each unit
//! of work is independent; a failure in one is logged by the scheduler and
//! never aborts the rest of the schedule.

use crate::config::RetentionConfig;
use crate::services::realtime::{RealtimeBus, ServerMessage};
use crate::store::{cache, events, rollups, sessions, views, Store};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct RetentionService {
    store: Store,
    config: RetentionConfig,
    realtime: Arc<RealtimeBus>,
}

impl RetentionService {
    pub fn new(store: Store, config: RetentionConfig, realtime: Arc<RealtimeBus>) -> Self {
        Self { store, config, realtime }
    }

    /// Deletes raw views/clicks/sessions past their respective retention
    /// windows. Returns the total row count removed, for logging.
    pub async fn run_daily_deletes(&self) -> anyhow::Result<u64> {
        let now = Utc::now();
        let views_cutoff = now - chrono::Duration::days(self.config.views_days);
        let clicks_cutoff = now - chrono::Duration::days(self.config.clicks_days);
        let sessions_cutoff = now - chrono::Duration::days(self.config.sessions_days);

        let deleted_views = views::delete_views_older_than(&self.store.pool, views_cutoff).await?;
        let deleted_clicks = views::delete_clicks_older_than(&self.store.pool, clicks_cutoff).await?;
        let deleted_sessions = sessions::delete_sessions_older_than(&self.store.pool, sessions_cutoff).await?;

        Ok(deleted_views + deleted_clicks + deleted_sessions)
    }

    pub async fn sweep_cache(&self) -> anyhow::Result<u64> {
        cache::sweep_expired(&self.store.pool, Utc::now()).await
    }

    pub async fn close_orphan_sessions(&self) -> anyhow::Result<u64> {
        sessions::close_orphans(&self.store.pool, Utc::now()).await
    }

    /// Rollup tables older than `retention.rollupsDays` (default 2 years).
    pub async fn vacuum_rollups(&self) -> anyhow::Result<u64> {
        let cutoff = crate::types::date_bucket(Utc::now() - chrono::Duration::days(self.config.rollups_days));
        rollups::delete_rollups_older_than(&self.store.pool, cutoff).await
    }

    /// Redelivers `realtime_events` rows that a crash between Ingest's
    /// outbox insert and its `mark_processed` call left unprocessed.
    /// Anything still unprocessed after a minute is stale, not racing.
    pub async fn redeliver_stale_events(&self) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::minutes(1);
        let stale = events::fetch_unprocessed_older_than(&self.store.pool, cutoff, 500).await?;
        let count = stale.len() as u64;
        for row in stale {
            let message = ServerMessage::AnalyticsRealtime {
                profile_id: row.profile_id.clone(),
                data: serde_json::json!({ "kind": row.kind, "event": row.payload }),
                timestamp: row.timestamp,
            };
            self.realtime.publish(&row.profile_id, message).await;
            if let Err(err) = events::mark_processed(&self.store.pool, row.id).await {
                warn!(error = %err, id = row.id, "failed to mark redelivered realtime event processed");
            }
        }
        Ok(count)
    }

    /// Processed `realtime_events` rows past `retention.eventsDays`.
    pub async fn sweep_events(&self) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.events_days);
        events::delete_processed_older_than(&self.store.pool, cutoff).await
    }
}
