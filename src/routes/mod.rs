pub mod ingest;
pub mod query;
pub mod realtime;

use crate::AppState;
use axum::Router;

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .nest("/track", ingest::create_routes())
        .nest("/analytics", query::create_routes())
        .nest("/realtime", realtime::create_routes())
}
