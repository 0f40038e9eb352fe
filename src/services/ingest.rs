//! `trackView` / `trackClick` / `batchTrackViews` / `endSession` (§4.1).
//!
//! Each event is one logical operation: insert the raw row, upsert the
//! session, upsert today's rollup hint, publish to Realtime. Postgres's
//! row lock on the session/rollup UPSERT already serializes concurrent
//! writers to the same key; the retry loop below only fires on the rarer
//! serialization/deadlock errors that a transactional store can still
//! surface under contention.

use crate::chain::{ChainAdapter, Existence};
use crate::config::AnalyticsConfig;
use crate::deadline;
use crate::enrich;
use crate::error::{AppError, AppResult};
use crate::services::realtime::{RealtimeBus, ServerMessage};
use crate::store::{events, rollups, sessions, views, Store};
use crate::types::{date_bucket, generate_session_id};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

pub struct TrackViewInput {
    pub profile_id: String,
    pub session_id: Option<String>,
    pub visitor_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct TrackClickInput {
    pub profile_id: String,
    pub link_index: i32,
    pub link_title: Option<String>,
    pub link_url: Option<String>,
    pub session_id: Option<String>,
    pub visitor_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct IngestService {
    store: Store,
    realtime: Arc<RealtimeBus>,
    chain: Arc<dyn ChainAdapter>,
    verify_profile_on_ingest: bool,
    deadline: Duration,
}

impl IngestService {
    pub fn new(
        store: Store,
        realtime: Arc<RealtimeBus>,
        chain: Arc<dyn ChainAdapter>,
        config: &AnalyticsConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            realtime,
            chain,
            verify_profile_on_ingest: config.verify_profile_on_ingest,
            deadline,
        }
    }

    /// §9 Open Question: skipped by default. When enabled, chain failures
    /// are treated as unknown and accepted rather than rejected, to avoid
    /// losing events during a chain outage.
    async fn check_profile(&self, profile_id: &str) -> AppResult<()> {
        if !self.verify_profile_on_ingest {
            return Ok(());
        }
        match self.chain.profile_exists(profile_id).await {
            Existence::NotExists => Err(AppError::NotFound(format!("profile {profile_id} not found"))),
            Existence::Exists | Existence::Unknown => Ok(()),
        }
    }

    /// Returns `(viewId, sessionId)` -- the session id is whichever one the
    /// caller supplied, or the one freshly minted if they didn't, so callers
    /// can echo it back per the `/api/track/view` response contract (§6).
    pub async fn track_view(&self, input: TrackViewInput) -> AppResult<(i64, String)> {
        if input.profile_id.trim().is_empty() {
            return Err(AppError::Validation("profileId must not be empty".into()));
        }
        self.check_profile(&input.profile_id).await?;

        let now = input.timestamp.unwrap_or_else(Utc::now);
        let session_id = input.session_id.clone().unwrap_or_else(generate_session_id);
        let geo = enrich::geo_of(input.visitor_ip.as_deref());
        let device = enrich::device_of(input.user_agent.as_deref());

        let view_id = retry_on_conflict(|| async {
            let view = views::NewProfileView {
                profile_id: input.profile_id.clone(),
                session_id: Some(session_id.clone()),
                visitor_ip: input.visitor_ip.clone(),
                user_agent: input.user_agent.clone(),
                referrer: input.referrer.clone(),
                geo: geo.clone(),
                device: device.clone(),
                timestamp: now,
            };
            let id = views::insert_view(&self.store.pool, &view).await?;
            sessions::upsert_on_view(
                &self.store.pool,
                &session_id,
                &input.profile_id,
                input.visitor_ip.as_deref(),
                input.user_agent.as_deref(),
                &geo,
                &device,
                now,
            )
            .await?;
            rollups::daily_stats_increment_view(&self.store.pool, &input.profile_id, date_bucket(now)).await?;
            Ok(id)
        });
        let view_id = deadline::with_deadline(self.deadline, view_id).await?;

        let payload = serde_json::json!({ "sessionId": session_id, "viewId": view_id });
        self.publish_durable(
            &input.profile_id,
            "view",
            payload.clone(),
            now,
            ServerMessage::NewView {
                profile_id: input.profile_id.clone(),
                data: payload,
                timestamp: now,
            },
        )
        .await;

        info!(profile_id = %input.profile_id, view_id, "view tracked");
        Ok((view_id, session_id))
    }

    /// Returns `(clickId, sessionId)`, same rationale as `track_view`.
    pub async fn track_click(&self, input: TrackClickInput) -> AppResult<(i64, String)> {
        if input.profile_id.trim().is_empty() {
            return Err(AppError::Validation("profileId must not be empty".into()));
        }
        if input.link_index < 0 {
            return Err(AppError::Validation("linkIndex must be non-negative".into()));
        }
        self.check_profile(&input.profile_id).await?;

        let now = input.timestamp.unwrap_or_else(Utc::now);
        let session_id = input.session_id.clone().unwrap_or_else(generate_session_id);
        let geo = enrich::geo_of(input.visitor_ip.as_deref());
        let device = enrich::device_of(input.user_agent.as_deref());

        let click_id = retry_on_conflict(|| async {
            let click = views::NewLinkClick {
                profile_id: input.profile_id.clone(),
                link_index: input.link_index,
                link_title: input.link_title.clone(),
                link_url: input.link_url.clone(),
                session_id: Some(session_id.clone()),
                visitor_ip: input.visitor_ip.clone(),
                user_agent: input.user_agent.clone(),
                referrer: input.referrer.clone(),
                geo: geo.clone(),
                device: device.clone(),
                timestamp: now,
            };
            let id = views::insert_click(&self.store.pool, &click).await?;
            sessions::upsert_on_click(
                &self.store.pool,
                &session_id,
                &input.profile_id,
                input.visitor_ip.as_deref(),
                input.user_agent.as_deref(),
                &geo,
                &device,
                now,
            )
            .await?;
            rollups::daily_stats_increment_click(&self.store.pool, &input.profile_id, date_bucket(now)).await?;
            rollups::link_stats_increment_click(
                &self.store.pool,
                &input.profile_id,
                input.link_index,
                date_bucket(now),
                input.link_title.as_deref(),
                input.link_url.as_deref(),
            )
            .await?;
            Ok(id)
        });
        let click_id = deadline::with_deadline(self.deadline, click_id).await?;

        let payload = serde_json::json!({
            "sessionId": session_id,
            "clickId": click_id,
            "linkIndex": input.link_index,
        });
        self.publish_durable(
            &input.profile_id,
            "click",
            payload.clone(),
            now,
            ServerMessage::NewClick {
                profile_id: input.profile_id.clone(),
                data: payload,
                timestamp: now,
            },
        )
        .await;

        info!(profile_id = %input.profile_id, click_id, link_index = input.link_index, "click tracked");
        Ok((click_id, session_id))
    }

    /// Per-event semantics, looped. §4.1 permits a bulk raw insert as an
    /// optimization but requires per-event session/rollup upserts unless
    /// batch-equivalence can be proven; we take the always-correct path.
    pub async fn batch_track_views(&self, inputs: Vec<TrackViewInput>) -> AppResult<Vec<(i64, String)>> {
        let mut ids = Vec::with_capacity(inputs.len());
        for input in inputs {
            ids.push(self.track_view(input).await?);
        }
        Ok(ids)
    }

    pub async fn end_session(&self, session_id: &str) -> AppResult<Option<sessions::SessionRow>> {
        let now = Utc::now();
        sessions::end_session(&self.store.pool, session_id, now).await.map_err(AppError::Internal)
    }

    pub async fn get_session(&self, session_id: &str) -> AppResult<Option<sessions::SessionRow>> {
        sessions::get_session(&self.store.pool, session_id).await.map_err(AppError::Internal)
    }

    /// Records the outbox row before publishing and marks it processed right
    /// after -- a crash between the two leaves an unprocessed row for
    /// Retention to redeliver. `RealtimeBus::publish` never surfaces delivery
    /// failure (it drops on a full subscriber buffer), so this can't await
    /// actual delivery; it only guards the in-process-publish-never-ran case.
    async fn publish_durable(
        &self,
        profile_id: &str,
        kind: &str,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
        message: ServerMessage,
    ) {
        let event = events::NewRealtimeEvent {
            profile_id: profile_id.to_string(),
            kind: kind.to_string(),
            payload,
            timestamp,
        };
        match events::insert_event(&self.store.pool, &event).await {
            Ok(id) => {
                self.realtime.publish(profile_id, message).await;
                if let Err(err) = events::mark_processed(&self.store.pool, id).await {
                    warn!(error = %err, id, "failed to mark realtime event processed, Retention will redeliver");
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to record realtime outbox row, publishing in-process only");
                self.realtime.publish(profile_id, message).await;
            }
        }
    }
}

async fn retry_on_conflict<F, Fut, T>(mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < 3 && is_serialization_conflict(&err) => {
                attempt += 1;
                let backoff_ms = rand::thread_rng().gen_range(20..120) * attempt;
                warn!(attempt, backoff_ms, "retrying after store conflict");
                sleep(Duration::from_millis(backoff_ms as u64)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_serialization_conflict(err: &anyhow::Error) -> bool {
    err.downcast_ref::<tokio_postgres::Error>()
        .and_then(|e| e.code())
        .map(|code| code.code() == "40001" || code.code() == "40P01")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_on_conflict_passes_through_success() {
        let result = retry_on_conflict(|| async { Ok::<_, anyhow::Error>(42) }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn retry_on_conflict_propagates_non_conflict_errors() {
        let result: anyhow::Result<()> = retry_on_conflict(|| async { Err(anyhow::anyhow!("boom")) }).await;
        assert!(result.is_err());
    }
}
