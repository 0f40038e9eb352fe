//! Scheduled (02:00 UTC daily) and ad-hoc recomputation of the five rollup
//! tables for a closed day (§4.3). Each profile's pass is independent and
//! idempotent -- re-running the Aggregator for a day it has already
//! processed produces identical rows.

use crate::store::rollups::{
    self, DailyStatsComputed, DeviceStatsComputed, GeoStatsComputed, LinkStatsComputed, ReferrerStatsComputed,
};
use crate::store::{sessions, views, Store};
use crate::types::classify_referrer;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// `min(32, 2 * available parallelism)`, per §5's bounded per-profile
/// worker pool.
fn worker_pool_size() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    (2 * cores).min(32)
}

#[derive(Clone)]
pub struct AggregatorService {
    store: Store,
}

impl AggregatorService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Processes `day` (UTC) for every profile with at least one raw event
    /// in `[day, day+1)`. Errors on one profile are logged and do not stop
    /// the run.
    pub async fn run_for_day(&self, day: NaiveDate) -> anyhow::Result<usize> {
        let day_start = crate::types::midnight_utc(day);
        let day_end = day_start + chrono::Duration::days(1);

        let profiles = rollups::profiles_with_events_on(&self.store.pool, day_start, day_end).await?;
        info!(date = %day, profile_count = profiles.len(), "aggregator run starting");

        let semaphore = Arc::new(Semaphore::new(worker_pool_size()));
        let mut handles = Vec::with_capacity(profiles.len());
        for profile_id in profiles {
            let permit = semaphore.clone().acquire_owned().await?;
            let store = self.store.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = process_profile_day(&store, &profile_id, day, day_start, day_end).await {
                    error!(profile_id = %profile_id, date = %day, error = %err, "aggregator pass failed for profile");
                }
            }));
        }

        let mut processed = 0;
        for handle in handles {
            if handle.await.is_ok() {
                processed += 1;
            }
        }
        info!(date = %day, processed, "aggregator run complete");
        Ok(processed)
    }

    pub async fn run_for_yesterday(&self) -> anyhow::Result<usize> {
        let yesterday = crate::types::date_bucket(Utc::now() - chrono::Duration::days(1));
        self.run_for_day(yesterday).await
    }
}

async fn process_profile_day(
    store: &Store,
    profile_id: &str,
    day: NaiveDate,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
) -> anyhow::Result<()> {
    let view_rows = views::views_detailed_in_range(&store.pool, profile_id, day_start, day_end).await?;
    let click_rows = views::clicks_detailed_in_range(&store.pool, profile_id, day_start, day_end).await?;
    let session_rows = sessions::sessions_in_day(&store.pool, profile_id, day_start, day_end).await?;

    let views_count = view_rows.len() as i64;
    let clicks_count = click_rows.len() as i64;
    let unique_views = distinct(view_rows.iter().map(|v| v.session_id.as_deref()));
    let unique_clicks = distinct(click_rows.iter().map(|c| c.session_id.as_deref()));

    let sessions_count = session_rows.len() as i64;
    let durations: Vec<i64> = session_rows.iter().filter_map(|s| s.duration_secs).collect();
    let avg_duration = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
    };
    let single_page_sessions = session_rows.iter().filter(|s| s.page_views == 1).count() as i64;
    let bounce_rate = if sessions_count == 0 { 0.0 } else { 100.0 * single_page_sessions as f64 / sessions_count as f64 };

    rollups::daily_stats_upsert_full(
        &store.pool,
        &DailyStatsComputed {
            profile_id: profile_id.to_string(),
            date: day,
            views: views_count,
            unique_views,
            clicks: clicks_count,
            unique_clicks,
            sessions: sessions_count,
            avg_duration,
            bounce_rate,
        },
    )
    .await?;

    // LinkStats: group clicks by linkIndex.
    struct LinkAcc {
        title: String,
        url: String,
        clicks: i64,
        sessions: HashSet<String>,
    }
    let mut links: HashMap<i32, LinkAcc> = HashMap::new();
    for c in &click_rows {
        let acc = links.entry(c.link_index).or_insert(LinkAcc {
            title: "Untitled".to_string(),
            url: String::new(),
            clicks: 0,
            sessions: HashSet::new(),
        });
        if let Some(title) = &c.link_title {
            acc.title = title.clone();
        }
        if let Some(url) = &c.link_url {
            acc.url = url.clone();
        }
        acc.clicks += 1;
        if let Some(sid) = &c.session_id {
            acc.sessions.insert(sid.clone());
        }
    }
    for (link_index, acc) in links {
        let ctr = if views_count == 0 { 0.0 } else { 100.0 * acc.clicks as f64 / views_count as f64 };
        if let Err(err) = rollups::link_stats_upsert_full(
            &store.pool,
            &LinkStatsComputed {
                profile_id: profile_id.to_string(),
                link_index,
                date: day,
                link_title: acc.title,
                link_url: acc.url,
                clicks: acc.clicks,
                unique_clicks: acc.sessions.len() as i64,
                ctr,
            },
        )
        .await
        {
            warn!(profile_id, link_index, error = %err, "link stats upsert failed, skipping key");
        }
    }

    // GeoStats: views keyed by (country, city, region), outer-joined with clicks.
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
            let acc = geo.entry(key).or_insert(GeoAcc { region: c.region.clone(), views: 0, clicks: 0 });
            acc.clicks += 1;
        }
    }
    for ((country, city), acc) in geo {
        if let Err(err) = rollups::geo_stats_upsert_full(
            &store.pool,
            &GeoStatsComputed { profile_id: profile_id.to_string(), country, city, date: day, region: acc.region, views: acc.views, clicks: acc.clicks },
        )
        .await
        {
            warn!(profile_id, error = %err, "geo stats upsert failed, skipping key");
        }
    }

    // DeviceStats keyed by (deviceType, browser, os); null browser/os default to "".
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
    for ((device_type, browser, os), acc) in device {
        if let Err(err) = rollups::device_stats_upsert_full(
            &store.pool,
            &DeviceStatsComputed { profile_id: profile_id.to_string(), device_type, browser, os, date: day, views: acc.views, clicks: acc.clicks },
        )
        .await
        {
            warn!(profile_id, error = %err, "device stats upsert failed, skipping key");
        }
    }

    // ReferrerStats keyed by raw referrer value.
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
    for (raw, acc) in referrer {
        let referrer_type = classify_referrer(&raw).to_string();
        if let Err(err) = rollups::referrer_stats_upsert_full(
            &store.pool,
            &ReferrerStatsComputed { profile_id: profile_id.to_string(), referrer: raw, date: day, referrer_type, views: acc.views, clicks: acc.clicks },
        )
        .await
        {
            warn!(profile_id, error = %err, "referrer stats upsert failed, skipping key");
        }
    }

    Ok(())
}

fn distinct<'a>(ids: impl Iterator<Item = Option<&'a str>>) -> i64 {
    ids.flatten().collect::<HashSet<_>>().len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_pool_is_bounded() {
        assert!(worker_pool_size() <= 32);
        assert!(worker_pool_size() >= 2);
    }
}
