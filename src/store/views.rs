use crate::types::{Device, Geo};
use anyhow::Result;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

/// Parameters for a single raw view insert; already enriched.
#[derive(Debug, Clone)]
pub struct NewProfileView {
    pub profile_id: String,
    pub session_id: Option<String>,
    pub visitor_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub geo: Geo,
    pub device: Device,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLinkClick {
    pub profile_id: String,
    pub link_index: i32,
    pub link_title: Option<String>,
    pub link_url: Option<String>,
    pub session_id: Option<String>,
    pub visitor_ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub geo: Geo,
    pub device: Device,
    pub timestamp: DateTime<Utc>,
}

/// Inserts one raw `ProfileView` row and returns its generated id.
pub async fn insert_view(pool: &Pool, view: &NewProfileView) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO profile_views (
                profile_id, session_id, visitor_ip, user_agent, referrer,
                country, region, city, device_type, browser, os, timestamp
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            RETURNING id
            "#,
            &[
                &view.profile_id,
                &view.session_id,
                &view.visitor_ip,
                &view.user_agent,
                &view.referrer,
                &view.geo.country,
                &view.geo.region,
                &view.geo.city,
                &view.device.device_type.to_string(),
                &view.device.browser,
                &view.device.os,
                &view.timestamp,
            ],
        )
        .await?;
    Ok(row.get(0))
}

pub async fn insert_click(pool: &Pool, click: &NewLinkClick) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO link_clicks (
                profile_id, link_index, link_title, link_url, session_id,
                visitor_ip, user_agent, referrer,
                country, region, city, device_type, browser, os, timestamp
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            RETURNING id
            "#,
            &[
                &click.profile_id,
                &click.link_index,
                &click.link_title,
                &click.link_url,
                &click.session_id,
                &click.visitor_ip,
                &click.user_agent,
                &click.referrer,
                &click.geo.country,
                &click.geo.region,
                &click.geo.city,
                &click.device.device_type.to_string(),
                &click.device.browser,
                &click.device.os,
                &click.timestamp,
            ],
        )
        .await?;
    Ok(row.get(0))
}

/// Full projection of a raw view row, used by Query's raw-path aggregation
/// (geographic/device/referrer breakdowns need every enrichment column).
#[derive(Debug, Clone)]
pub struct ProfileViewDetail {
    pub session_id: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub referrer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LinkClickDetail {
    pub session_id: Option<String>,
    pub link_index: i32,
    pub link_title: Option<String>,
    pub link_url: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub referrer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn row_to_view_detail(row: &Row) -> ProfileViewDetail {
    ProfileViewDetail {
        session_id: row.get("session_id"),
        country: row.get("country"),
        region: row.get("region"),
        city: row.get("city"),
        device_type: row.get("device_type"),
        browser: row.get("browser"),
        os: row.get("os"),
        referrer: row.get("referrer"),
        timestamp: row.get("timestamp"),
    }
}

fn row_to_click_detail(row: &Row) -> LinkClickDetail {
    LinkClickDetail {
        session_id: row.get("session_id"),
        link_index: row.get("link_index"),
        link_title: row.get("link_title"),
        link_url: row.get("link_url"),
        country: row.get("country"),
        region: row.get("region"),
        city: row.get("city"),
        device_type: row.get("device_type"),
        browser: row.get("browser"),
        os: row.get("os"),
        referrer: row.get("referrer"),
        timestamp: row.get("timestamp"),
    }
}

pub async fn views_detailed_in_range(
    pool: &Pool,
    profile_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ProfileViewDetail>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT session_id, country, region, city, device_type, browser, os, referrer, timestamp
             FROM profile_views
             WHERE profile_id = $1 AND timestamp >= $2 AND timestamp < $3",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_view_detail).collect())
}

pub async fn clicks_detailed_in_range(
    pool: &Pool,
    profile_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<LinkClickDetail>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT session_id, link_index, link_title, link_url, country, region, city, device_type, browser, os, referrer, timestamp
             FROM link_clicks
             WHERE profile_id = $1 AND timestamp >= $2 AND timestamp < $3",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_click_detail).collect())
}

pub async fn count_views_since(pool: &Pool, profile_id: &str, since: DateTime<Utc>) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT count(*) FROM profile_views WHERE profile_id = $1 AND timestamp >= $2",
            &[&profile_id, &since],
        )
        .await?;
    Ok(row.get(0))
}

pub async fn count_clicks_since(pool: &Pool, profile_id: &str, since: DateTime<Utc>) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT count(*) FROM link_clicks WHERE profile_id = $1 AND timestamp >= $2",
            &[&profile_id, &since],
        )
        .await?;
    Ok(row.get(0))
}

/// Distinct non-null `sessionId` count over a range, queried directly rather
/// than fetched row-by-row -- used by the rollup shortcut to recompute exact
/// uniques across a multi-day range, since per-day `DailyStats.uniqueViews`
/// values cannot simply be summed when a session spans a UTC day boundary.
pub async fn distinct_view_sessions_in_range(
    pool: &Pool,
    profile_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT count(DISTINCT session_id) FROM profile_views
             WHERE profile_id = $1 AND timestamp >= $2 AND timestamp < $3 AND session_id IS NOT NULL",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(row.get(0))
}

pub async fn distinct_click_sessions_in_range(
    pool: &Pool,
    profile_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            "SELECT count(DISTINCT session_id) FROM link_clicks
             WHERE profile_id = $1 AND timestamp >= $2 AND timestamp < $3 AND session_id IS NOT NULL",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(row.get(0))
}

pub async fn delete_views_older_than(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    Ok(client
        .execute("DELETE FROM profile_views WHERE timestamp < $1", &[&cutoff])
        .await?)
}

pub async fn delete_clicks_older_than(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    Ok(client
        .execute("DELETE FROM link_clicks WHERE timestamp < $1", &[&cutoff])
        .await?)
}
