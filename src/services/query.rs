//! Dashboard read path: `getAnalytics` (cached, range-scoped) and
//! `getRealTimeAnalytics` (always fresh, never cached) -- §4.4.

use crate::deadline;
use crate::store::{cache, rollups, sessions, views, Store};
use crate::types::{classify_referrer, date_bucket, midnight_utc, referrer_hostname, Period, TimeRange};
use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub profile_views: i64,
    pub unique_views: i64,
    pub total_clicks: i64,
    pub unique_clicks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPerf {
    pub link_index: i32,
    pub link_title: String,
    pub link_url: String,
    pub clicks: i64,
    pub unique_clicks: i64,
    pub ctr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub country: String,
    pub region: Option<String>,
    pub city: String,
    pub views: i64,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePoint {
    pub device_type: String,
    pub browser: String,
    pub os: String,
    pub views: i64,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerPoint {
    pub referrer: String,
    pub referrer_type: String,
    pub views: i64,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    pub bucket: String,
    pub views: i64,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub totals: Totals,
    pub total_links: i64,
    pub average_clicks_per_link: f64,
    pub top_link: Option<LinkPerf>,
    pub time_series_data: Vec<TimeSeriesPoint>,
    pub geographic_data: Vec<GeoPoint>,
    pub device_data: Vec<DevicePoint>,
    pub referrer_data: Vec<ReferrerPoint>,
    pub link_performance: Vec<LinkPerf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSnapshot {
    pub active_users: i64,
    pub recent_views: i64,
    pub recent_clicks: i64,
}

fn period_label(period: Period) -> &'static str {
    match period {
        Period::Hour => "hour",
        Period::Day => "day",
        Period::Week => "week",
        Period::Month => "month",
    }
}

fn bucket_label(ts: DateTime<Utc>, period: Period) -> String {
    match period {
        Period::Hour => ts.format("%Y-%m-%d %H:00").to_string(),
        Period::Day => ts.format("%Y-%m-%d").to_string(),
        Period::Week => {
            let iso = ts.iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }
        Period::Month => ts.format("%Y-%m").to_string(),
    }
}

#[derive(Clone)]
pub struct QueryService {
    store: Store,
    cache_ttl_secs: i64,
    deadline: Duration,
}

impl QueryService {
    pub fn new(store: Store, cache_ttl_secs: i64, deadline: Duration) -> Self {
        Self { store, cache_ttl_secs, deadline }
    }

    pub async fn get_analytics(&self, profile_id: &str, range: TimeRange, period: Period) -> Result<AnalyticsReport> {
        let now = Utc::now();
        let key = cache::analytics_key(profile_id, range.start, range.end, period_label(period));

        let report = deadline::with_deadline(self.deadline, async {
            if let Some(hit) = cache::get::<AnalyticsReport>(&self.store.pool, &key, now).await? {
                return Ok(hit);
            }

            let today_start = midnight_utc(date_bucket(now));
            let report = if period == Period::Day && range.ends_before_today(today_start) {
                self.build_from_rollups(profile_id, range).await?
            } else {
                self.build_from_raw(profile_id, range, period).await?
            };

            let expires_at = now + chrono::Duration::seconds(self.cache_ttl_secs);
            cache::set(&self.store.pool, &key, &report, expires_at).await?;
            Ok(report)
        })
        .await
        .map_err(anyhow::Error::from)?;

        Ok(report)
    }

    /// Never consults the cache -- this is the freshness path (§4.4).
    pub async fn get_realtime_analytics(&self, profile_id: &str) -> Result<RealtimeSnapshot> {
        deadline::with_deadline(self.deadline, async {
            let now = Utc::now();
            let active_users =
                sessions::active_session_count(&self.store.pool, profile_id, now - chrono::Duration::minutes(5))
                    .await?;
            let recent_views =
                views::count_views_since(&self.store.pool, profile_id, now - chrono::Duration::seconds(60)).await?;
            let recent_clicks =
                views::count_clicks_since(&self.store.pool, profile_id, now - chrono::Duration::seconds(60)).await?;
            Ok(RealtimeSnapshot { active_users, recent_views, recent_clicks })
        })
        .await
        .map_err(anyhow::Error::from)
    }

    async fn build_from_raw(&self, profile_id: &str, range: TimeRange, period: Period) -> Result<AnalyticsReport> {
        let pool = &self.store.pool;
        let view_rows = views::views_detailed_in_range(pool, profile_id, range.start, range.end).await?;
        let click_rows = views::clicks_detailed_in_range(pool, profile_id, range.start, range.end).await?;

        let profile_views = view_rows.len() as i64;
        let unique_views = distinct_sessions(view_rows.iter().map(|r| r.session_id.as_deref()));
        let total_clicks = click_rows.len() as i64;

        let mut buckets: HashMap<String, (i64, i64)> = HashMap::new();
        for v in &view_rows {
            buckets.entry(bucket_label(v.timestamp, period)).or_insert((0, 0)).0 += 1;
        }
        for c in &click_rows {
            buckets.entry(bucket_label(c.timestamp, period)).or_insert((0, 0)).1 += 1;
        }
        let mut time_series_data: Vec<TimeSeriesPoint> = buckets
            .into_iter()
            .map(|(bucket, (views, clicks))| TimeSeriesPoint { bucket, views, clicks })
            .collect();
        time_series_data.sort_by(|a, b| a.bucket.cmp(&b.bucket));

        struct GeoAcc {
            region: Option<String>,
            views: i64,
            clicks: i64,
        }
        let mut geo: HashMap<(String, String), GeoAcc> = HashMap::new();
        for v in &view_rows {
            if let Some(country) = &v.country {
                let key = (country.clone(), v.city.clone().unwrap_or_default());
                let acc = geo.entry(key).or_insert(GeoAcc { region: v.region.clone(), views: 0, clicks: 0 });
                acc.views += 1;
            }
        }
        for c in &click_rows {
            if let Some(country) = &c.country {
                let key = (country.clone(), c.city.clone().unwrap_or_default());
                if let Some(acc) = geo.get_mut(&key) {
                    acc.clicks += 1;
                } else {
                    geo.insert(key, GeoAcc { region: c.region.clone(), views: 0, clicks: 1 });
                }
            }
        }
        let mut geographic_data: Vec<GeoPoint> = geo
            .into_iter()
            .map(|((country, city), acc)| GeoPoint { country, region: acc.region, city, views: acc.views, clicks: acc.clicks })
            .collect();
        geographic_data.sort_by(|a, b| b.views.cmp(&a.views));
        geographic_data.truncate(10);

        struct DeviceAcc {
            views: i64,
            clicks: i64,
        }
        let mut device: HashMap<(String, String, String), DeviceAcc> = HashMap::new();
        for v in &view_rows {
            let key = (
                v.device_type.clone().unwrap_or_default(),
                v.browser.clone().unwrap_or_default(),
                v.os.clone().unwrap_or_default(),
            );
            device.entry(key).or_insert(DeviceAcc { views: 0, clicks: 0 }).views += 1;
        }
        for c in &click_rows {
            let key = (
                c.device_type.clone().unwrap_or_default(),
                c.browser.clone().unwrap_or_default(),
                c.os.clone().unwrap_or_default(),
            );
            device.entry(key).or_insert(DeviceAcc { views: 0, clicks: 0 }).clicks += 1;
        }
        let device_data: Vec<DevicePoint> = device
            .into_iter()
            .map(|((device_type, browser, os), acc)| DevicePoint { device_type, browser, os, views: acc.views, clicks: acc.clicks })
            .collect();

        struct RefAcc {
            views: i64,
            clicks: i64,
        }
        let mut referrer: HashMap<String, RefAcc> = HashMap::new();
        for v in &view_rows {
            let raw = v.referrer.clone().unwrap_or_default();
            referrer.entry(raw).or_insert(RefAcc { views: 0, clicks: 0 }).views += 1;
        }
        for c in &click_rows {
            let raw = c.referrer.clone().unwrap_or_default();
            referrer.entry(raw).or_insert(RefAcc { views: 0, clicks: 0 }).clicks += 1;
        }
        let mut referrer_data: Vec<ReferrerPoint> = referrer
            .into_iter()
            .map(|(raw, acc)| ReferrerPoint {
                referrer_type: classify_referrer(&raw).to_string(),
                referrer: referrer_hostname(&raw),
                views: acc.views,
                clicks: acc.clicks,
            })
            .collect();
        referrer_data.sort_by(|a, b| b.views.cmp(&a.views));
        referrer_data.truncate(10);

        struct LinkAcc {
            title: String,
            url: String,
            clicks: i64,
            sessions: HashSet<String>,
        }
        let mut links: HashMap<i32, LinkAcc> = HashMap::new();
        for c in &click_rows {
            let acc = links.entry(c.link_index).or_insert(LinkAcc {
                title: c.link_title.clone().unwrap_or_else(|| "Untitled".to_string()),
                url: c.link_url.clone().unwrap_or_default(),
                clicks: 0,
                sessions: HashSet::new(),
            });
            acc.clicks += 1;
            if let Some(sid) = &c.session_id {
                acc.sessions.insert(sid.clone());
            }
        }
        let total_views_in_range = profile_views.max(1);
        let mut link_performance: Vec<LinkPerf> = links
            .into_iter()
            .map(|(link_index, acc)| LinkPerf {
                link_index,
                link_title: acc.title,
                link_url: acc.url,
                clicks: acc.clicks,
                unique_clicks: acc.sessions.len() as i64,
                ctr: if profile_views == 0 { 0.0 } else { 100.0 * acc.clicks as f64 / total_views_in_range as f64 },
            })
            .collect();
        link_performance.sort_by(|a, b| b.clicks.cmp(&a.clicks));

        let total_links = link_performance.len() as i64;
        let average_clicks_per_link = if total_links == 0 { 0.0 } else { total_clicks as f64 / total_links as f64 };
        let top_link = link_performance.first().cloned();

        Ok(AnalyticsReport {
            totals: Totals {
                profile_views,
                unique_views,
                total_clicks,
                unique_clicks: distinct_sessions(click_rows.iter().map(|r| r.session_id.as_deref())),
            },
            total_links,
            average_clicks_per_link,
            top_link,
            time_series_data,
            geographic_data,
            device_data,
            referrer_data,
            link_performance,
        })
    }

    /// Equivalent-by-value shortcut for ranges that end before today,
    /// reading pre-aggregated rollups instead of scanning raw tables.
    async fn build_from_rollups(&self, profile_id: &str, range: TimeRange) -> Result<AnalyticsReport> {
        let pool = &self.store.pool;
        let start = date_bucket(range.start);
        let end = date_bucket(range.end);

        let daily = rollups::daily_stats_range(pool, profile_id, start, end).await?;
        let link = rollups::link_stats_range(pool, profile_id, start, end).await?;
        let geo = rollups::geo_stats_range(pool, profile_id, start, end).await?;
        let device = rollups::device_stats_range(pool, profile_id, start, end).await?;
        let referrer = rollups::referrer_stats_range(pool, profile_id, start, end).await?;

        let profile_views: i64 = daily.iter().map(|d| d.views).sum();
        let total_clicks: i64 = daily.iter().map(|d| d.clicks).sum();

        // A session can span a UTC day boundary, so summing each day's
        // already-distinct `uniqueViews`/`uniqueClicks` can double-count it
        // relative to the raw path's single distinct-count over the whole
        // range. Recompute the exact uniques directly instead of summing
        // the per-day rollup values (§8: shortcut and raw paths must agree).
        let unique_views = views::distinct_view_sessions_in_range(pool, profile_id, range.start, range.end).await?;
        let unique_clicks = views::distinct_click_sessions_in_range(pool, profile_id, range.start, range.end).await?;

        let mut time_series_data: Vec<TimeSeriesPoint> = daily
            .iter()
            .map(|d| TimeSeriesPoint { bucket: d.date.format("%Y-%m-%d").to_string(), views: d.views, clicks: d.clicks })
            .collect();
        time_series_data.sort_by(|a, b| a.bucket.cmp(&b.bucket));

        let mut geo_acc: HashMap<(String, String), (Option<String>, i64, i64)> = HashMap::new();
        for g in &geo {
            let entry = geo_acc.entry((g.country.clone(), g.city.clone())).or_insert((g.region.clone(), 0, 0));
            entry.1 += g.views;
            entry.2 += g.clicks;
        }
        let mut geographic_data: Vec<GeoPoint> = geo_acc
            .into_iter()
            .map(|((country, city), (region, views, clicks))| GeoPoint { country, region, city, views, clicks })
            .collect();
        geographic_data.sort_by(|a, b| b.views.cmp(&a.views));
        geographic_data.truncate(10);

        let mut device_acc: HashMap<(String, String, String), (i64, i64)> = HashMap::new();
        for d in &device {
            let entry = device_acc.entry((d.device_type.clone(), d.browser.clone(), d.os.clone())).or_insert((0, 0));
            entry.0 += d.views;
            entry.1 += d.clicks;
        }
        let device_data: Vec<DevicePoint> = device_acc
            .into_iter()
            .map(|((device_type, browser, os), (views, clicks))| DevicePoint { device_type, browser, os, views, clicks })
            .collect();

        let mut referrer_acc: HashMap<String, (String, i64, i64)> = HashMap::new();
        for r in &referrer {
            let entry = referrer_acc.entry(r.referrer.clone()).or_insert((r.referrer_type.clone(), 0, 0));
            entry.1 += r.views;
            entry.2 += r.clicks;
        }
        let mut referrer_data: Vec<ReferrerPoint> = referrer_acc
            .into_iter()
            .map(|(raw, (referrer_type, views, clicks))| ReferrerPoint { referrer: referrer_hostname(&raw), referrer_type, views, clicks })
            .collect();
        referrer_data.sort_by(|a, b| b.views.cmp(&a.views));
        referrer_data.truncate(10);

        let mut link_acc: HashMap<i32, (String, String, i64, i64)> = HashMap::new();
        for l in &link {
            let entry = link_acc.entry(l.link_index).or_insert((l.link_title.clone(), l.link_url.clone(), 0, 0));
            entry.2 += l.clicks;
            entry.3 += l.unique_clicks;
        }
        let mut link_performance: Vec<LinkPerf> = link_acc
            .into_iter()
            .map(|(link_index, (link_title, link_url, clicks, unique_clicks))| LinkPerf {
                link_index,
                link_title,
                link_url,
                clicks,
                unique_clicks,
                ctr: if profile_views == 0 { 0.0 } else { 100.0 * clicks as f64 / profile_views as f64 },
            })
            .collect();
        link_performance.sort_by(|a, b| b.clicks.cmp(&a.clicks));

        let total_links = link_performance.len() as i64;
        let average_clicks_per_link = if total_links == 0 { 0.0 } else { total_clicks as f64 / total_links as f64 };
        let top_link = link_performance.first().cloned();

        Ok(AnalyticsReport {
            totals: Totals { profile_views, unique_views, total_clicks, unique_clicks },
            total_links,
            average_clicks_per_link,
            top_link,
            time_series_data,
            geographic_data,
            device_data,
            referrer_data,
            link_performance,
        })
    }
}

fn distinct_sessions<'a>(ids: impl Iterator<Item = Option<&'a str>>) -> i64 {
    ids.flatten().collect::<HashSet<_>>().len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_label_formats_match_spec() {
        let ts = DateTime::parse_from_rfc3339("2026-03-05T14:32:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(bucket_label(ts, Period::Hour), "2026-03-05 14:00");
        assert_eq!(bucket_label(ts, Period::Day), "2026-03-05");
        assert_eq!(bucket_label(ts, Period::Month), "2026-03");
        assert!(bucket_label(ts, Period::Week).starts_with("2026-W"));
    }

    #[test]
    fn distinct_sessions_ignores_none() {
        let ids = vec![Some("a"), Some("b"), None, Some("a")];
        assert_eq!(distinct_sessions(ids.into_iter()), 2);
    }
}
