//! Stand-in for the on-chain profile store Ingest and Realtime consult for
//! profile-existence checks. A real deployment points `chain.baseUrl` at the
//! platform's indexer; this adapter is a thin HTTP pass-through, in the
//! style of the Tinybird backend our Store borrows its upsert idioms from.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Only the fields Ingest/Realtime actually consume -- the upstream
/// profile object carries much more.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub view_count: i64,
    pub links: Vec<serde_json::Value>,
    pub verified: bool,
    pub owner: String,
    pub walrus_site_id: Option<String>,
}

/// Outcome of a profile-existence probe. Network/timeout failures are
/// `Unknown`, never `NotExists` -- §6 is explicit that we must not treat
/// chain unavailability as evidence of absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Exists,
    NotExists,
    Unknown,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn profile_exists(&self, profile_id: &str) -> Existence;
    async fn get_profile(&self, profile_id: &str) -> Option<Profile>;
}

#[derive(Clone)]
pub struct HttpChainAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChainAdapter {
    pub fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn profile_url(&self, profile_id: &str) -> String {
        format!("{}/profiles/{}", self.base_url.trim_end_matches('/'), profile_id)
    }
}

#[async_trait]
impl ChainAdapter for HttpChainAdapter {
    async fn profile_exists(&self, profile_id: &str) -> Existence {
        match self.client.get(self.profile_url(profile_id)).send().await {
            Ok(resp) if resp.status().is_success() => Existence::Exists,
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => Existence::NotExists,
            Ok(resp) => {
                warn!(profile_id, status = %resp.status(), "chain adapter returned unexpected status");
                Existence::Unknown
            }
            Err(err) => {
                debug!(profile_id, error = %err, "chain adapter request failed, treating as unknown");
                Existence::Unknown
            }
        }
    }

    async fn get_profile(&self, profile_id: &str) -> Option<Profile> {
        let resp = self.client.get(self.profile_url(profile_id)).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<Profile>().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existence_variants_are_distinct() {
        assert_ne!(Existence::Exists, Existence::NotExists);
        assert_ne!(Existence::Exists, Existence::Unknown);
    }
}
