//! Long-lived background tasks spawned once at startup: the daily
//! Aggregator/Retention runs and the three housekeeping sweeps of §4.6.
//! There is no cron-style dependency in the stack this crate inherits, so
//! each job is a `tokio::spawn`ed loop that sleeps until its next
//! occurrence (daily jobs) or on a fixed `tokio::time::interval` (sweeps).

use crate::services::aggregator::AggregatorService;
use crate::services::retention::RetentionService;
use chrono::{NaiveTime, Utc};
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{error, info};

/// Spawns every scheduled job and returns immediately; the jobs run for
/// the lifetime of the process.
pub fn spawn_all(aggregator: AggregatorService, retention: RetentionService) {
    spawn_daily_at(2, 0, "aggregator", move || {
        let aggregator = aggregator.clone();
        async move {
            match aggregator.run_for_yesterday().await {
                Ok(count) => info!(profiles = count, "aggregator run finished"),
                Err(err) => error!(error = %err, "aggregator run failed"),
            }
        }
    });

    {
        let retention = retention.clone();
        spawn_daily_at(3, 0, "retention.daily_deletes", move || {
            let retention = retention.clone();
            async move {
                match retention.run_daily_deletes().await {
                    Ok(deleted) => info!(deleted, "retention daily deletes finished"),
                    Err(err) => error!(error = %err, "retention daily deletes failed"),
                }
            }
        });
    }

    {
        let retention = retention.clone();
        spawn_interval(Duration::from_secs(6 * 3600), "retention.cache_sweep", move || {
            let retention = retention.clone();
            async move {
                match retention.sweep_cache().await {
                    Ok(swept) => info!(swept, "cache sweep finished"),
                    Err(err) => error!(error = %err, "cache sweep failed"),
                }
            }
        });
    }

    {
        let retention = retention.clone();
        spawn_interval(Duration::from_secs(3600), "retention.orphan_closure", move || {
            let retention = retention.clone();
            async move {
                match retention.close_orphan_sessions().await {
                    Ok(closed) => info!(closed, "orphan session closure finished"),
                    Err(err) => error!(error = %err, "orphan session closure failed"),
                }
            }
        });
    }

    {
        let retention = retention.clone();
        spawn_interval(Duration::from_secs(7 * 24 * 3600), "retention.vacuum_rollups", move || {
            let retention = retention.clone();
            async move {
                match retention.vacuum_rollups().await {
                    Ok(deleted) => info!(deleted, "rollup vacuum finished"),
                    Err(err) => error!(error = %err, "rollup vacuum failed"),
                }
            }
        });
    }

    {
        let retention = retention.clone();
        spawn_interval(Duration::from_secs(60), "retention.redeliver_stale_events", move || {
            let retention = retention.clone();
            async move {
                match retention.redeliver_stale_events().await {
                    Ok(redelivered) if redelivered > 0 => info!(redelivered, "stale realtime events redelivered"),
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "realtime event redelivery failed"),
                }
            }
        });
    }

    spawn_interval(Duration::from_secs(24 * 3600), "retention.sweep_events", move || {
        let retention = retention.clone();
        async move {
            match retention.sweep_events().await {
                Ok(swept) => info!(swept, "realtime event sweep finished"),
                Err(err) => error!(error = %err, "realtime event sweep failed"),
            }
        }
    });
}

fn spawn_interval<F, Fut>(period: Duration, name: &'static str, mut job: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            info!(job = name, "scheduled job starting");
            job().await;
        }
    });
}

fn spawn_daily_at<F, Fut>(hour: u32, minute: u32, name: &'static str, mut job: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            sleep(duration_until_next(hour, minute)).await;
            info!(job = name, "scheduled job starting");
            job().await;
        }
    });
}

fn duration_until_next(hour: u32, minute: u32) -> Duration {
    let now = Utc::now();
    let target_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
    let today_target = now.date_naive().and_time(target_time).and_utc();
    let next = if today_target > now { today_target } else { today_target + chrono::Duration::days(1) };
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_until_next_is_never_negative_or_huge() {
        let d = duration_until_next(2, 0);
        assert!(d.as_secs() <= 24 * 3600);
    }
}
