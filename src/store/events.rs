//! Durable outbox for the Realtime fan-out (§3: `RealtimeEvent`). Ingest
//! records one row per dispatched notification before marking it processed;
//! Retention re-delivers anything left unprocessed (a crash between insert
//! and in-process publish) and sweeps old processed rows. The in-process
//! `RealtimeBus` broadcast remains the primary delivery path -- this table
//! only backstops it for at-least-once fan-out and audit/replay.

use anyhow::Result;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

#[derive(Debug, Clone)]
pub struct NewRealtimeEvent {
    pub profile_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RealtimeEventRow {
    pub id: i64,
    pub profile_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

fn row_to_event(row: &Row) -> RealtimeEventRow {
    RealtimeEventRow {
        id: row.get("id"),
        profile_id: row.get("profile_id"),
        kind: row.get("kind"),
        payload: row.get("payload"),
        timestamp: row.get("timestamp"),
    }
}

pub async fn insert_event(pool: &Pool, event: &NewRealtimeEvent) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "INSERT INTO realtime_events (profile_id, kind, payload, timestamp, processed)
             VALUES ($1, $2, $3, $4, FALSE) RETURNING id",
            &[&event.profile_id, &event.kind, &event.payload, &event.timestamp],
        )
        .await?;
    Ok(row.get(0))
}

pub async fn mark_processed(pool: &Pool, id: i64) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute("UPDATE realtime_events SET processed = TRUE WHERE id = $1", &[&id])
        .await?;
    Ok(())
}

/// Rows still unprocessed after `older_than` -- the in-process publish that
/// should have marked them either never ran (crash) or is still racing;
/// Retention re-delivers these and marks them processed.
pub async fn fetch_unprocessed_older_than(
    pool: &Pool,
    older_than: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RealtimeEventRow>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, profile_id, kind, payload, timestamp FROM realtime_events
             WHERE processed = FALSE AND timestamp < $1 ORDER BY timestamp LIMIT $2",
            &[&older_than, &limit],
        )
        .await?;
    Ok(rows.iter().map(row_to_event).collect())
}

pub async fn delete_processed_older_than(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    Ok(client
        .execute("DELETE FROM realtime_events WHERE processed = TRUE AND timestamp < $1", &[&cutoff])
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_carries_expected_fields() {
        let e = NewRealtimeEvent {
            profile_id: "p1".into(),
            kind: "view".into(),
            payload: serde_json::json!({"sessionId": "s1"}),
            timestamp: Utc::now(),
        };
        assert_eq!(e.kind, "view");
        assert_eq!(e.profile_id, "p1");
    }
}
