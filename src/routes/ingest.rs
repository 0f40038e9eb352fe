//! `/api/track/*` handlers -- thin adapters from JSON/HTTP onto
//! `IngestService` (§6).

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::AppError;
use crate::services::ingest::{TrackClickInput, TrackViewInput};
use crate::types::ApiResponse;
use crate::AppState;

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/view", post(track_view))
        .route("/click", post(track_click))
        .route("/batch/views", post(batch_track_views))
        .route("/session/end", post(end_session))
        .route("/session/:session_id", get(get_session))
}

fn client_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackViewRequest {
    profile_id: String,
    session_id: Option<String>,
    referrer: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackViewData {
    view_id: i64,
    session_id: String,
}

async fn track_view(
    State(state): State<AppState>,
    method: Method,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<TrackViewRequest>,
) -> Response {
    let input = TrackViewInput {
        profile_id: body.profile_id,
        session_id: body.session_id,
        visitor_ip: client_ip(&headers, connect_info),
        user_agent: user_agent(&headers),
        referrer: body.referrer,
        timestamp: body.timestamp,
    };
    match state.ingest.track_view(input).await {
        Ok((view_id, session_id)) => {
            let data = TrackViewData { view_id, session_id };
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => err.respond(&method, "/api/track/view"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackClickRequest {
    profile_id: String,
    link_index: i32,
    link_title: Option<String>,
    link_url: Option<String>,
    session_id: Option<String>,
    referrer: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackClickData {
    click_id: i64,
    session_id: String,
}

async fn track_click(
    State(state): State<AppState>,
    method: Method,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<TrackClickRequest>,
) -> Response {
    let input = TrackClickInput {
        profile_id: body.profile_id,
        link_index: body.link_index,
        link_title: body.link_title,
        link_url: body.link_url,
        session_id: body.session_id,
        visitor_ip: client_ip(&headers, connect_info),
        user_agent: user_agent(&headers),
        referrer: body.referrer,
        timestamp: body.timestamp,
    };
    match state.ingest.track_click(input).await {
        Ok((click_id, session_id)) => {
            let data = TrackClickData { click_id, session_id };
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => err.respond(&method, "/api/track/click"),
    }
}

#[derive(Debug, Deserialize)]
struct BatchViewEntry {
    #[serde(rename = "profileId")]
    profile_id: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    referrer: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BatchTrackViewsRequest {
    views: Vec<BatchViewEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchTrackViewsData {
    tracked_count: usize,
}

async fn batch_track_views(
    State(state): State<AppState>,
    method: Method,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<BatchTrackViewsRequest>,
) -> Response {
    let ip = client_ip(&headers, connect_info);
    let ua = user_agent(&headers);
    let inputs = body
        .views
        .into_iter()
        .map(|v| TrackViewInput {
            profile_id: v.profile_id,
            session_id: v.session_id,
            visitor_ip: ip.clone(),
            user_agent: ua.clone(),
            referrer: v.referrer,
            timestamp: v.timestamp,
        })
        .collect();

    match state.ingest.batch_track_views(inputs).await {
        Ok(ids) => {
            let data = BatchTrackViewsData { tracked_count: ids.len() };
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => err.respond(&method, "/api/track/batch/views"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionRequest {
    session_id: String,
}

async fn end_session(State(state): State<AppState>, method: Method, Json(body): Json<EndSessionRequest>) -> Response {
    match state.ingest.end_session(&body.session_id).await {
        Ok(session) => (StatusCode::OK, Json(ApiResponse::success(session))).into_response(),
        Err(err) => err.respond(&method, "/api/track/session/end"),
    }
}

async fn get_session(State(state): State<AppState>, method: Method, Path(session_id): Path<String>) -> Response {
    match state.ingest.get_session(&session_id).await {
        Ok(Some(session)) => (StatusCode::OK, Json(ApiResponse::success(session))).into_response(),
        Ok(None) => {
            AppError::NotFound(format!("session {session_id} not found")).respond(&method, "/api/track/session")
        }
        Err(err) => err.respond(&method, "/api/track/session"),
    }
}
