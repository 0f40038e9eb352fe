//! `/api/analytics/*` handlers -- thin adapters onto `QueryService` (§6).

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::query::{AnalyticsReport, GeoPoint, LinkPerf};
use crate::types::{Period, PeriodPreset, TimeRange};
use crate::types::ApiResponse;
use crate::AppState;

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/profile/:profile_id", get(get_profile_analytics))
        .route("/profile/:profile_id/summary", get(get_profile_summary))
        .route("/profile/:profile_id/realtime", get(get_profile_realtime))
        .route("/links/:profile_id", get(get_link_analytics))
        .route("/geo/:profile_id", get(get_geo_analytics))
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    period: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// `90d` and `1y` windows are reported at coarser granularity than `7d`/`30d`
/// -- the distilled spec names the bucketing granularities (`hour/day/week/
/// month`) but leaves the preset-to-granularity mapping to the implementer
/// (§9 Open Question); we widen the bucket as the range grows so
/// `timeSeriesData` stays a reasonable size.
fn bucket_for_preset(preset: PeriodPreset) -> Period {
    match preset {
        PeriodPreset::SevenDays | PeriodPreset::ThirtyDays => Period::Day,
        PeriodPreset::NinetyDays => Period::Week,
        PeriodPreset::OneYear => Period::Month,
    }
}

fn resolve_range(query: &RangeQuery, default_preset: &str) -> Result<(TimeRange, Period), AppError> {
    let now = Utc::now();
    if let (Some(start), Some(end)) = (query.start, query.end) {
        if end < start {
            return Err(AppError::Validation("end must not precede start".into()));
        }
        return Ok((TimeRange { start, end }, Period::Day));
    }

    let preset_str = query.period.as_deref().unwrap_or(default_preset);
    let preset: PeriodPreset = preset_str
        .parse()
        .map_err(|_| AppError::Validation(format!("unknown period preset: {preset_str}")))?;
    Ok((TimeRange::from_preset(preset, now), bucket_for_preset(preset)))
}

async fn get_profile_analytics(
    State(state): State<AppState>,
    method: Method,
    Path(profile_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let (range, period) = match resolve_range(&query, &state.config.analytics.default_period) {
        Ok(v) => v,
        Err(err) => return err.respond(&method, "/api/analytics/profile"),
    };
    match state.query.get_analytics(&profile_id, range, period).await {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(report))).into_response(),
        Err(err) => AppError::from(err).respond(&method, "/api/analytics/profile"),
    }
}

async fn get_profile_summary(State(state): State<AppState>, method: Method, Path(profile_id): Path<String>) -> Response {
    let now = Utc::now();
    let range = TimeRange::from_preset(PeriodPreset::ThirtyDays, now);
    match state.query.get_analytics(&profile_id, range, Period::Day).await {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(report))).into_response(),
        Err(err) => AppError::from(err).respond(&method, "/api/analytics/profile/summary"),
    }
}

async fn get_profile_realtime(State(state): State<AppState>, method: Method, Path(profile_id): Path<String>) -> Response {
    match state.query.get_realtime_analytics(&profile_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::success(snapshot))).into_response(),
        Err(err) => AppError::from(err).respond(&method, "/api/analytics/profile/realtime"),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkSlice {
    total_links: i64,
    average_clicks_per_link: f64,
    top_link: Option<LinkPerf>,
    link_performance: Vec<LinkPerf>,
}

impl From<AnalyticsReport> for LinkSlice {
    fn from(r: AnalyticsReport) -> Self {
        Self {
            total_links: r.total_links,
            average_clicks_per_link: r.average_clicks_per_link,
            top_link: r.top_link,
            link_performance: r.link_performance,
        }
    }
}

async fn get_link_analytics(
    State(state): State<AppState>,
    method: Method,
    Path(profile_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let (range, period) = match resolve_range(&query, &state.config.analytics.default_period) {
        Ok(v) => v,
        Err(err) => return err.respond(&method, "/api/analytics/links"),
    };
    match state.query.get_analytics(&profile_id, range, period).await {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(LinkSlice::from(report)))).into_response(),
        Err(err) => AppError::from(err).respond(&method, "/api/analytics/links"),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeoSlice {
    geographic_data: Vec<GeoPoint>,
}

async fn get_geo_analytics(
    State(state): State<AppState>,
    method: Method,
    Path(profile_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let (range, period) = match resolve_range(&query, &state.config.analytics.default_period) {
        Ok(v) => v,
        Err(err) => return err.respond(&method, "/api/analytics/geo"),
    };
    match state.query.get_analytics(&profile_id, range, period).await {
        Ok(report) => {
            let data = GeoSlice { geographic_data: report.geographic_data };
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => AppError::from(err).respond(&method, "/api/analytics/geo"),
    }
}
