pub mod cache;
pub mod events;
pub mod pool;
pub mod rollups;
pub mod schema;
pub mod sessions;
pub mod views;

use anyhow::Result;
use deadpool_postgres::Pool;

/// Thin handle around the connection pool, held once in `AppState` and
/// cloned freely (the pool itself is an `Arc` internally).
#[derive(Clone)]
pub struct Store {
    pub pool: Pool,
}

impl Store {
    pub async fn connect(url: &str, max_connections: usize) -> Result<Self> {
        let pool = pool::create_pool(url, max_connections).await?;
        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }
}
