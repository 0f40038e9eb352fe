use anyhow::Result;
use chrono::NaiveDate;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

// ---------------------------------------------------------------------
// Ingest-side best-effort increments. Aggregator is the source of truth;
// these are hints that get overwritten wholesale on the next rollup run.
// ---------------------------------------------------------------------

pub async fn daily_stats_increment_view(pool: &Pool, profile_id: &str, date: NaiveDate) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO daily_stats (profile_id, date, views) VALUES ($1, $2, 1)
            ON CONFLICT (profile_id, date) DO UPDATE SET views = daily_stats.views + 1
            "#,
            &[&profile_id, &date],
        )
        .await?;
    Ok(())
}

pub async fn daily_stats_increment_click(pool: &Pool, profile_id: &str, date: NaiveDate) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO daily_stats (profile_id, date, clicks) VALUES ($1, $2, 1)
            ON CONFLICT (profile_id, date) DO UPDATE SET clicks = daily_stats.clicks + 1
            "#,
            &[&profile_id, &date],
        )
        .await?;
    Ok(())
}

/// `linkTitle`/`linkUrl` are set on create only -- Aggregator overwrites
/// them from observed data on the next run, per §4.1.
pub async fn link_stats_increment_click(
    pool: &Pool,
    profile_id: &str,
    link_index: i32,
    date: NaiveDate,
    link_title: Option<&str>,
    link_url: Option<&str>,
) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO link_stats (profile_id, link_index, date, link_title, link_url, clicks)
            VALUES ($1, $2, $3, COALESCE($4, 'Untitled'), COALESCE($5, ''), 1)
            ON CONFLICT (profile_id, link_index, date) DO UPDATE SET clicks = link_stats.clicks + 1
            "#,
            &[&profile_id, &link_index, &date, &link_title, &link_url],
        )
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Aggregator-side full replacement upserts. Per-key UPSERT overwrites all
// aggregated values atomically -- never additive.
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DailyStatsComputed {
    pub profile_id: String,
    pub date: NaiveDate,
    pub views: i64,
    pub unique_views: i64,
    pub clicks: i64,
    pub unique_clicks: i64,
    pub sessions: i64,
    pub avg_duration: Option<f64>,
    pub bounce_rate: f64,
}

pub async fn daily_stats_upsert_full(pool: &Pool, row: &DailyStatsComputed) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO daily_stats (profile_id, date, views, unique_views, clicks, unique_clicks, sessions, avg_duration, bounce_rate)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (profile_id, date) DO UPDATE SET
                views = EXCLUDED.views,
                unique_views = EXCLUDED.unique_views,
                clicks = EXCLUDED.clicks,
                unique_clicks = EXCLUDED.unique_clicks,
                sessions = EXCLUDED.sessions,
                avg_duration = EXCLUDED.avg_duration,
                bounce_rate = EXCLUDED.bounce_rate
            "#,
            &[
                &row.profile_id,
                &row.date,
                &row.views,
                &row.unique_views,
                &row.clicks,
                &row.unique_clicks,
                &row.sessions,
                &row.avg_duration,
                &row.bounce_rate,
            ],
        )
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LinkStatsComputed {
    pub profile_id: String,
    pub link_index: i32,
    pub date: NaiveDate,
    pub link_title: String,
    pub link_url: String,
    pub clicks: i64,
    pub unique_clicks: i64,
    pub ctr: f64,
}

pub async fn link_stats_upsert_full(pool: &Pool, row: &LinkStatsComputed) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO link_stats (profile_id, link_index, date, link_title, link_url, clicks, unique_clicks, ctr)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (profile_id, link_index, date) DO UPDATE SET
                link_title = EXCLUDED.link_title,
                link_url = EXCLUDED.link_url,
                clicks = EXCLUDED.clicks,
                unique_clicks = EXCLUDED.unique_clicks,
                ctr = EXCLUDED.ctr
            "#,
            &[
                &row.profile_id,
                &row.link_index,
                &row.date,
                &row.link_title,
                &row.link_url,
                &row.clicks,
                &row.unique_clicks,
                &row.ctr,
            ],
        )
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GeoStatsComputed {
    pub profile_id: String,
    pub country: String,
    pub city: String,
    pub date: NaiveDate,
    pub region: Option<String>,
    pub views: i64,
    pub clicks: i64,
}

pub async fn geo_stats_upsert_full(pool: &Pool, row: &GeoStatsComputed) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO geo_stats (profile_id, country, city, date, region, views, clicks)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (profile_id, country, city, date) DO UPDATE SET
                region = EXCLUDED.region,
                views = EXCLUDED.views,
                clicks = EXCLUDED.clicks
            "#,
            &[
                &row.profile_id,
                &row.country,
                &row.city,
                &row.date,
                &row.region,
                &row.views,
                &row.clicks,
            ],
        )
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DeviceStatsComputed {
    pub profile_id: String,
    pub device_type: String,
    pub browser: String,
    pub os: String,
    pub date: NaiveDate,
    pub views: i64,
    pub clicks: i64,
}

pub async fn device_stats_upsert_full(pool: &Pool, row: &DeviceStatsComputed) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO device_stats (profile_id, device_type, browser, os, date, views, clicks)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (profile_id, device_type, browser, os, date) DO UPDATE SET
                views = EXCLUDED.views,
                clicks = EXCLUDED.clicks
            "#,
            &[
                &row.profile_id,
                &row.device_type,
                &row.browser,
                &row.os,
                &row.date,
                &row.views,
                &row.clicks,
            ],
        )
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReferrerStatsComputed {
    pub profile_id: String,
    pub referrer: String,
    pub date: NaiveDate,
    pub referrer_type: String,
    pub views: i64,
    pub clicks: i64,
}

pub async fn referrer_stats_upsert_full(pool: &Pool, row: &ReferrerStatsComputed) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO referrer_stats (profile_id, referrer, date, referrer_type, views, clicks)
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (profile_id, referrer, date) DO UPDATE SET
                referrer_type = EXCLUDED.referrer_type,
                views = EXCLUDED.views,
                clicks = EXCLUDED.clicks
            "#,
            &[
                &row.profile_id,
                &row.referrer,
                &row.date,
                &row.referrer_type,
                &row.views,
                &row.clicks,
            ],
        )
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------
// Read path (Query's rollup shortcut).
// ---------------------------------------------------------------------

fn row_to_daily(row: &Row) -> DailyStatsComputed {
    DailyStatsComputed {
        profile_id: row.get("profile_id"),
        date: row.get("date"),
        views: row.get("views"),
        unique_views: row.get("unique_views"),
        clicks: row.get("clicks"),
        unique_clicks: row.get("unique_clicks"),
        sessions: row.get("sessions"),
        avg_duration: row.get("avg_duration"),
        bounce_rate: row.get::<_, Option<f64>>("bounce_rate").unwrap_or(0.0),
    }
}

pub async fn daily_stats_range(
    pool: &Pool,
    profile_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DailyStatsComputed>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT profile_id, date, views, unique_views, clicks, unique_clicks, sessions, avg_duration, bounce_rate
             FROM daily_stats WHERE profile_id = $1 AND date >= $2 AND date < $3 ORDER BY date",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_daily).collect())
}

fn row_to_link(row: &Row) -> LinkStatsComputed {
    LinkStatsComputed {
        profile_id: row.get("profile_id"),
        link_index: row.get("link_index"),
        date: row.get("date"),
        link_title: row.get("link_title"),
        link_url: row.get("link_url"),
        clicks: row.get("clicks"),
        unique_clicks: row.get("unique_clicks"),
        ctr: row.get("ctr"),
    }
}

pub async fn link_stats_range(
    pool: &Pool,
    profile_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<LinkStatsComputed>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT profile_id, link_index, date, link_title, link_url, clicks, unique_clicks, ctr
             FROM link_stats WHERE profile_id = $1 AND date >= $2 AND date < $3",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_link).collect())
}

fn row_to_geo(row: &Row) -> GeoStatsComputed {
    GeoStatsComputed {
        profile_id: row.get("profile_id"),
        country: row.get("country"),
        city: row.get("city"),
        date: row.get("date"),
        region: row.get("region"),
        views: row.get("views"),
        clicks: row.get("clicks"),
    }
}

pub async fn geo_stats_range(
    pool: &Pool,
    profile_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<GeoStatsComputed>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT profile_id, country, city, date, region, views, clicks
             FROM geo_stats WHERE profile_id = $1 AND date >= $2 AND date < $3",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_geo).collect())
}

fn row_to_device(row: &Row) -> DeviceStatsComputed {
    DeviceStatsComputed {
        profile_id: row.get("profile_id"),
        device_type: row.get("device_type"),
        browser: row.get("browser"),
        os: row.get("os"),
        date: row.get("date"),
        views: row.get("views"),
        clicks: row.get("clicks"),
    }
}

pub async fn device_stats_range(
    pool: &Pool,
    profile_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DeviceStatsComputed>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT profile_id, device_type, browser, os, date, views, clicks
             FROM device_stats WHERE profile_id = $1 AND date >= $2 AND date < $3",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_device).collect())
}

fn row_to_referrer(row: &Row) -> ReferrerStatsComputed {
    ReferrerStatsComputed {
        profile_id: row.get("profile_id"),
        referrer: row.get("referrer"),
        date: row.get("date"),
        referrer_type: row.get("referrer_type"),
        views: row.get("views"),
        clicks: row.get("clicks"),
    }
}

pub async fn referrer_stats_range(
    pool: &Pool,
    profile_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ReferrerStatsComputed>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT profile_id, referrer, date, referrer_type, views, clicks
             FROM referrer_stats WHERE profile_id = $1 AND date >= $2 AND date < $3",
            &[&profile_id, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_referrer).collect())
}

/// Distinct profiles with at least one raw event in `[day_start, day_end)`,
/// the driver set for a single Aggregator pass.
pub async fn profiles_with_events_on(
    pool: &Pool,
    day_start: chrono::DateTime<chrono::Utc>,
    day_end: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<String>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT DISTINCT profile_id FROM (
                SELECT profile_id FROM profile_views WHERE timestamp >= $1 AND timestamp < $2
                UNION
                SELECT profile_id FROM link_clicks WHERE timestamp >= $1 AND timestamp < $2
            ) t
            "#,
            &[&day_start, &day_end],
        )
        .await?;
    Ok(rows.iter().map(|r| r.get(0)).collect())
}

pub async fn delete_rollups_older_than(pool: &Pool, cutoff: NaiveDate) -> Result<u64> {
    let client = pool.get().await?;
    let mut total = 0u64;
    total += client
        .execute("DELETE FROM daily_stats WHERE date < $1", &[&cutoff])
        .await?;
    total += client
        .execute("DELETE FROM link_stats WHERE date < $1", &[&cutoff])
        .await?;
    total += client
        .execute("DELETE FROM geo_stats WHERE date < $1", &[&cutoff])
        .await?;
    total += client
        .execute("DELETE FROM device_stats WHERE date < $1", &[&cutoff])
        .await?;
    total += client
        .execute("DELETE FROM referrer_stats WHERE date < $1", &[&cutoff])
        .await?;
    Ok(total)
}
