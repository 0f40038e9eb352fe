use anyhow::Result;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

/// Create the PostgreSQL connection pool backing the Store.
pub async fn create_pool(url: &str, max_connections: usize) -> Result<Pool> {
    info!("connecting to analytics store...");

    let mut cfg = Config::new();
    cfg.url = Some(url.to_string());
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_connections));

    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

    let client = pool.get().await?;
    client.query("SELECT 1", &[]).await?;

    info!("analytics store connection pool ready");
    Ok(pool)
}
