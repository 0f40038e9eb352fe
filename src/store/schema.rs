use anyhow::Result;
use deadpool_postgres::Pool;
use tracing::info;

/// Creates the ten tables of the persisted state layout (§6) if they don't
/// already exist, plus the `(profileId, timestamp)` / `(profileId, date)`
/// secondary indexes the spec calls for.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    info!("initializing analytics schema...");
    let client = pool.get().await?;

    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS profile_views (
                id BIGSERIAL PRIMARY KEY,
                profile_id TEXT NOT NULL,
                session_id TEXT,
                visitor_ip TEXT,
                user_agent TEXT,
                referrer TEXT,
                country TEXT,
                region TEXT,
                city TEXT,
                device_type TEXT,
                browser TEXT,
                os TEXT,
                timestamp TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_profile_views_profile_ts
                ON profile_views (profile_id, timestamp);

            CREATE TABLE IF NOT EXISTS link_clicks (
                id BIGSERIAL PRIMARY KEY,
                profile_id TEXT NOT NULL,
                link_index INTEGER NOT NULL,
                link_title TEXT,
                link_url TEXT,
                session_id TEXT,
                visitor_ip TEXT,
                user_agent TEXT,
                referrer TEXT,
                country TEXT,
                region TEXT,
                city TEXT,
                device_type TEXT,
                browser TEXT,
                os TEXT,
                timestamp TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_link_clicks_profile_ts
                ON link_clicks (profile_id, timestamp);

            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                profile_id TEXT NOT NULL,
                visitor_ip TEXT,
                user_agent TEXT,
                country TEXT,
                region TEXT,
                city TEXT,
                device_type TEXT,
                browser TEXT,
                os TEXT,
                start_time TIMESTAMPTZ NOT NULL,
                end_time TIMESTAMPTZ,
                duration_secs BIGINT,
                page_views INTEGER NOT NULL DEFAULT 0,
                link_clicks INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_profile
                ON sessions (profile_id);

            CREATE TABLE IF NOT EXISTS daily_stats (
                profile_id TEXT NOT NULL,
                date DATE NOT NULL,
                views BIGINT NOT NULL DEFAULT 0,
                unique_views BIGINT NOT NULL DEFAULT 0,
                clicks BIGINT NOT NULL DEFAULT 0,
                unique_clicks BIGINT NOT NULL DEFAULT 0,
                sessions BIGINT NOT NULL DEFAULT 0,
                avg_duration DOUBLE PRECISION,
                bounce_rate DOUBLE PRECISION,
                PRIMARY KEY (profile_id, date)
            );
            CREATE INDEX IF NOT EXISTS idx_daily_stats_profile_date
                ON daily_stats (profile_id, date);

            CREATE TABLE IF NOT EXISTS link_stats (
                profile_id TEXT NOT NULL,
                link_index INTEGER NOT NULL,
                date DATE NOT NULL,
                link_title TEXT NOT NULL DEFAULT 'Untitled',
                link_url TEXT NOT NULL DEFAULT '',
                clicks BIGINT NOT NULL DEFAULT 0,
                unique_clicks BIGINT NOT NULL DEFAULT 0,
                ctr DOUBLE PRECISION NOT NULL DEFAULT 0,
                PRIMARY KEY (profile_id, link_index, date)
            );
            CREATE INDEX IF NOT EXISTS idx_link_stats_profile_date
                ON link_stats (profile_id, date);

            CREATE TABLE IF NOT EXISTS geo_stats (
                profile_id TEXT NOT NULL,
                country TEXT NOT NULL,
                city TEXT NOT NULL,
                date DATE NOT NULL,
                region TEXT,
                views BIGINT NOT NULL DEFAULT 0,
                clicks BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (profile_id, country, city, date)
            );
            CREATE INDEX IF NOT EXISTS idx_geo_stats_profile_date
                ON geo_stats (profile_id, date);

            CREATE TABLE IF NOT EXISTS device_stats (
                profile_id TEXT NOT NULL,
                device_type TEXT NOT NULL,
                browser TEXT NOT NULL DEFAULT '',
                os TEXT NOT NULL DEFAULT '',
                date DATE NOT NULL,
                views BIGINT NOT NULL DEFAULT 0,
                clicks BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (profile_id, device_type, browser, os, date)
            );
            CREATE INDEX IF NOT EXISTS idx_device_stats_profile_date
                ON device_stats (profile_id, date);

            CREATE TABLE IF NOT EXISTS referrer_stats (
                profile_id TEXT NOT NULL,
                referrer TEXT NOT NULL,
                date DATE NOT NULL,
                referrer_type TEXT NOT NULL,
                views BIGINT NOT NULL DEFAULT 0,
                clicks BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (profile_id, referrer, date)
            );
            CREATE INDEX IF NOT EXISTS idx_referrer_stats_profile_date
                ON referrer_stats (profile_id, date);

            CREATE TABLE IF NOT EXISTS analytics_cache (
                key TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS realtime_events (
                id BIGSERIAL PRIMARY KEY,
                profile_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload JSONB NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE
            );
            CREATE INDEX IF NOT EXISTS idx_realtime_events_unprocessed
                ON realtime_events (processed, timestamp);
            "#,
        )
        .await?;

    info!("analytics schema ready");
    Ok(())
}
