use crate::types::{Device, Geo};
use anyhow::Result;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use tokio_postgres::Row;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub session_id: String,
    pub profile_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub page_views: i32,
    pub link_clicks: i32,
}

fn row_to_session(row: &Row) -> SessionRow {
    SessionRow {
        session_id: row.get("session_id"),
        profile_id: row.get("profile_id"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        duration_secs: row.get("duration_secs"),
        page_views: row.get("page_views"),
        link_clicks: row.get("link_clicks"),
    }
}

/// Upserts the session row touched by a view event: creates it with
/// `pageViews=1, linkClicks=0` if absent, otherwise bumps `pageViews` and
/// recomputes `endTime`/`duration`. The single `INSERT ... ON CONFLICT`
/// statement is what gives us the "one writer wins, others retry"
/// serialization the spec calls for -- Postgres handles the row lock.
pub async fn upsert_on_view(
    pool: &Pool,
    session_id: &str,
    profile_id: &str,
    visitor_ip: Option<&str>,
    user_agent: Option<&str>,
    geo: &Geo,
    device: &Device,
    now: DateTime<Utc>,
) -> Result<SessionRow> {
    let client = pool.get().await?;
    let device_type = device.device_type.to_string();
    let row = client
        .query_one(
            r#"
            INSERT INTO sessions (
                session_id, profile_id, visitor_ip, user_agent,
                country, region, city, device_type, browser, os,
                start_time, end_time, duration_secs, page_views, link_clicks
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,NULL,NULL,1,0)
            ON CONFLICT (session_id) DO UPDATE SET
                end_time = $11,
                duration_secs = EXTRACT(EPOCH FROM ($11 - sessions.start_time))::BIGINT,
                page_views = sessions.page_views + 1
            RETURNING session_id, profile_id, start_time, end_time, duration_secs, page_views, link_clicks
            "#,
            &[
                &session_id,
                &profile_id,
                &visitor_ip,
                &user_agent,
                &geo.country,
                &geo.region,
                &geo.city,
                &device_type,
                &device.browser,
                &device.os,
                &now,
            ],
        )
        .await?;
    Ok(row_to_session(&row))
}

/// Same as `upsert_on_view` but bumps `linkClicks` instead of `pageViews`.
pub async fn upsert_on_click(
    pool: &Pool,
    session_id: &str,
    profile_id: &str,
    visitor_ip: Option<&str>,
    user_agent: Option<&str>,
    geo: &Geo,
    device: &Device,
    now: DateTime<Utc>,
) -> Result<SessionRow> {
    let client = pool.get().await?;
    let device_type = device.device_type.to_string();
    let row = client
        .query_one(
            r#"
            INSERT INTO sessions (
                session_id, profile_id, visitor_ip, user_agent,
                country, region, city, device_type, browser, os,
                start_time, end_time, duration_secs, page_views, link_clicks
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,NULL,NULL,0,1)
            ON CONFLICT (session_id) DO UPDATE SET
                end_time = $11,
                duration_secs = EXTRACT(EPOCH FROM ($11 - sessions.start_time))::BIGINT,
                link_clicks = sessions.link_clicks + 1
            RETURNING session_id, profile_id, start_time, end_time, duration_secs, page_views, link_clicks
            "#,
            &[
                &session_id,
                &profile_id,
                &visitor_ip,
                &user_agent,
                &geo.country,
                &geo.region,
                &geo.city,
                &device_type,
                &device.browser,
                &device.os,
                &now,
            ],
        )
        .await?;
    Ok(row_to_session(&row))
}

pub async fn get_session(pool: &Pool, session_id: &str) -> Result<Option<SessionRow>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT session_id, profile_id, start_time, end_time, duration_secs, page_views, link_clicks
             FROM sessions WHERE session_id = $1",
            &[&session_id],
        )
        .await?;
    Ok(row.as_ref().map(row_to_session))
}

/// Idempotent: only closes the session if `endTime` is still unset.
pub async fn end_session(pool: &Pool, session_id: &str, now: DateTime<Utc>) -> Result<Option<SessionRow>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE sessions SET
                end_time = $2,
                duration_secs = EXTRACT(EPOCH FROM ($2 - start_time))::BIGINT
            WHERE session_id = $1 AND end_time IS NULL
            RETURNING session_id, profile_id, start_time, end_time, duration_secs, page_views, link_clicks
            "#,
            &[&session_id, &now],
        )
        .await?;
    Ok(row.as_ref().map(row_to_session))
}

/// Closes sessions that have been open for more than 24h, per Retention
/// §4.6: `endTime = now - 24h`.
pub async fn close_orphans(pool: &Pool, now: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    let cutoff = now - chrono::Duration::hours(24);
    Ok(client
        .execute(
            r#"
            UPDATE sessions SET
                end_time = $1,
                duration_secs = EXTRACT(EPOCH FROM ($1 - start_time))::BIGINT
            WHERE end_time IS NULL AND start_time < $1
            "#,
            &[&cutoff],
        )
        .await?)
}

pub async fn delete_sessions_older_than(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    Ok(client
        .execute("DELETE FROM sessions WHERE start_time < $1", &[&cutoff])
        .await?)
}

/// Count of sessions for a profile with `startTime` in `[day_start, day_end)`,
/// used by the Aggregator for `DailyStats.sessions`/`avgDuration`/`bounceRate`.
pub async fn sessions_in_day(
    pool: &Pool,
    profile_id: &str,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
) -> Result<Vec<SessionRow>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT session_id, profile_id, start_time, end_time, duration_secs, page_views, link_clicks
             FROM sessions WHERE profile_id = $1 AND start_time >= $2 AND start_time < $3",
            &[&profile_id, &day_start, &day_end],
        )
        .await?;
    Ok(rows.iter().map(row_to_session).collect())
}

/// `activeUsers` for the realtime snapshot: open sessions started in the
/// last 5 minutes.
pub async fn active_session_count(pool: &Pool, profile_id: &str, since: DateTime<Utc>) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT count(*) FROM sessions WHERE profile_id = $1 AND end_time IS NULL AND start_time >= $2",
            &[&profile_id, &since],
        )
        .await?;
    Ok(row.get(0))
}
