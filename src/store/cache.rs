use anyhow::Result;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Reads a cached payload by key, returning `None` if absent or expired.
/// Expired rows are left for the sweep in Retention rather than deleted
/// inline -- a read should never block on a write.
pub async fn get<T: DeserializeOwned>(pool: &Pool, key: &str, now: DateTime<Utc>) -> Result<Option<T>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT payload FROM analytics_cache WHERE key = $1 AND expires_at > $2",
            &[&key, &now],
        )
        .await?;
    match row {
        Some(row) => {
            let payload: serde_json::Value = row.get("payload");
            Ok(Some(serde_json::from_value(payload)?))
        }
        None => Ok(None),
    }
}

pub async fn set<T: Serialize>(pool: &Pool, key: &str, value: &T, expires_at: DateTime<Utc>) -> Result<()> {
    let client = pool.get().await?;
    let payload = serde_json::to_value(value)?;
    client
        .execute(
            r#"
            INSERT INTO analytics_cache (key, payload, expires_at) VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET payload = EXCLUDED.payload, expires_at = EXCLUDED.expires_at
            "#,
            &[&key, &payload, &expires_at],
        )
        .await?;
    Ok(())
}

pub async fn invalidate(pool: &Pool, key: &str) -> Result<()> {
    let client = pool.get().await?;
    client.execute("DELETE FROM analytics_cache WHERE key = $1", &[&key]).await?;
    Ok(())
}

/// Deletes every row whose TTL has lapsed. Run on the 6h sweep in
/// Retention (§4.6).
pub async fn sweep_expired(pool: &Pool, now: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    Ok(client
        .execute("DELETE FROM analytics_cache WHERE expires_at <= $1", &[&now])
        .await?)
}

/// Cache key for a single `getAnalytics` call, composed from the profile,
/// the resolved time range, and the period bucket so that distinct query
/// shapes never collide.
pub fn analytics_key(profile_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, period: &str) -> String {
    format!("analytics:{profile_id}:{period}:{}:{}", start.timestamp(), end.timestamp())
}
