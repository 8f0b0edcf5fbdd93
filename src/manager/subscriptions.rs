use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{now_ts, push_unique, Manager};
use crate::error::{Error, Result};
use crate::fetch::fetch_text;
use crate::model::{default_true, generate_id, Subscription, SubscriptionFormat, Tunnel, TunnelSource};
use crate::subscription::parse_subscription;

fn default_update_interval() -> u32 {
    24
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize, Serialize, Validate, Clone, Debug)]
pub struct SubscriptionCreateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(min = 1, max = 2048))]
    pub url: String,

    #[serde(default)]
    pub format: SubscriptionFormat,

    #[serde(default = "default_true")]
    pub auto_update: bool,

    /// Hours.
    #[serde(default = "default_update_interval")]
    #[validate(range(min = 1, max = 720))]
    pub update_interval: u32,
}

#[derive(Deserialize, Serialize, Validate, Clone, Debug, Default)]
pub struct SubscriptionUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 2048))]
    pub url: Option<String>,

    pub format: Option<SubscriptionFormat>,

    pub auto_update: Option<bool>,

    #[validate(range(min = 1, max = 720))]
    pub update_interval: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AutoUpdateSummary {
    pub refreshed: Vec<String>,
    /// `(subscription id, error)` pairs.
    pub failed: Vec<(String, String)>,
}

impl AutoUpdateSummary {
    pub fn changed(&self) -> bool {
        !self.refreshed.is_empty()
    }
}

fn check_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Invalid(format!("subscription url must be http(s): {url}")))
    }
}

// ============================================================================
// Operations
// ============================================================================

impl Manager {
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.repo.subscriptions().await?)
    }

    /// Download and parse `sub`, returning tunnels owned by it. An empty
    /// result is an error so a broken feed never wipes existing tunnels.
    async fn fetch_tunnels(&self, sub: &Subscription) -> Result<Vec<Tunnel>> {
        let body = fetch_text(
            &sub.url,
            self.fetch.subscription_timeout(),
            &self.fetch.user_agent,
        )
        .await?;

        let tunnels = parse_subscription(&body, sub.format);
        if tunnels.is_empty() {
            return Err(Error::EmptySubscription(sub.name.clone()));
        }
        Ok(tunnels
            .into_iter()
            .map(|mut t| {
                t.source = TunnelSource::Subscription;
                t.subscription_id = Some(sub.id.clone());
                t
            })
            .collect())
    }

    /// Replace every tunnel owned by `sub_id` with `fresh`. Returns the ids
    /// that disappeared. Caller holds the write lock.
    async fn replace_owned_tunnels(&self, sub_id: &str, fresh: Vec<Tunnel>) -> Result<HashSet<String>> {
        let mut tunnels = self.repo.tunnels().await?;
        let removed: HashSet<String> = tunnels
            .iter()
            .filter(|t| t.subscription_id.as_deref() == Some(sub_id))
            .map(|t| t.id.clone())
            .collect();
        tunnels.retain(|t| t.subscription_id.as_deref() != Some(sub_id));
        push_unique(&mut tunnels, fresh);
        self.repo.save_tunnels(&tunnels).await?;
        Ok(removed)
    }

    pub async fn create_subscription(&self, req: SubscriptionCreateRequest) -> Result<Subscription> {
        req.validate()?;
        check_url(req.url.trim())?;

        let mut sub = Subscription {
            id: generate_id(),
            name: req.name.trim().to_string(),
            url: req.url.trim().to_string(),
            format: req.format,
            auto_update: req.auto_update,
            update_interval: req.update_interval,
            last_update: 0,
            tunnels_count: 0,
        };

        let tunnels = self.fetch_tunnels(&sub).await?;
        sub.tunnels_count = tunnels.len();
        sub.last_update = now_ts();

        let _guard = self.write_lock().await;
        let mut all = self.repo.tunnels().await?;
        push_unique(&mut all, tunnels);
        self.repo.save_tunnels(&all).await?;

        let mut subs = self.repo.subscriptions().await?;
        subs.push(sub.clone());
        self.repo.save_subscriptions(&subs).await?;

        tracing::info!(id = %sub.id, name = %sub.name, tunnels = sub.tunnels_count, "subscription added");
        Ok(sub)
    }

    /// Re-fetch and replace the subscription's tunnels wholesale. On any
    /// failure the stored tunnels stay untouched.
    pub async fn refresh_subscription(&self, id: &str) -> Result<Subscription> {
        let target = self
            .repo
            .subscriptions()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::not_found("subscription", id))?;
        let tunnels = self.fetch_tunnels(&target).await?;
        let count = tunnels.len();

        let _guard = self.write_lock().await;
        let mut subs = self.repo.subscriptions().await?;
        // deleted while the fetch was in flight
        let index = subs
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| Error::not_found("subscription", id))?;
        let removed = self.replace_owned_tunnels(id, tunnels).await?;
        self.prune_group_members(&removed).await?;

        let sub = &mut subs[index];
        sub.tunnels_count = count;
        sub.last_update = now_ts();
        let updated = sub.clone();
        self.repo.save_subscriptions(&subs).await?;

        tracing::info!(id, tunnels = count, "subscription refreshed");
        Ok(updated)
    }

    /// Metadata only; tunnels are refreshed separately.
    pub async fn update_subscription(&self, id: &str, req: SubscriptionUpdateRequest) -> Result<Subscription> {
        req.validate()?;
        if let Some(url) = &req.url {
            check_url(url.trim())?;
        }

        let _guard = self.write_lock().await;
        let mut subs = self.repo.subscriptions().await?;
        let sub = subs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::not_found("subscription", id))?;

        if let Some(name) = req.name {
            sub.name = name.trim().to_string();
        }
        if let Some(url) = req.url {
            sub.url = url.trim().to_string();
        }
        if let Some(format) = req.format {
            sub.format = format;
        }
        if let Some(auto_update) = req.auto_update {
            sub.auto_update = auto_update;
        }
        if let Some(interval) = req.update_interval {
            sub.update_interval = interval;
        }

        let updated = sub.clone();
        self.repo.save_subscriptions(&subs).await?;
        Ok(updated)
    }

    /// Remove the subscription and exactly the tunnels it owns. Returns the
    /// number of tunnels removed.
    pub async fn delete_subscription(&self, id: &str) -> Result<usize> {
        let _guard = self.write_lock().await;
        let mut subs = self.repo.subscriptions().await?;
        let before = subs.len();
        subs.retain(|s| s.id != id);
        if subs.len() == before {
            return Err(Error::not_found("subscription", id));
        }

        let removed = self.replace_owned_tunnels(id, Vec::new()).await?;
        self.prune_group_members(&removed).await?;
        self.repo.save_subscriptions(&subs).await?;

        tracing::info!(id, tunnels = removed.len(), "subscription deleted");
        Ok(removed.len())
    }

    pub async fn due_subscriptions(&self, now: i64) -> Result<Vec<Subscription>> {
        Ok(self
            .repo
            .subscriptions()
            .await?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect())
    }

    /// Refresh every subscription that is due. One failure does not stop
    /// the others.
    pub async fn auto_update(&self, now: i64) -> Result<AutoUpdateSummary> {
        let mut summary = AutoUpdateSummary::default();
        for sub in self.due_subscriptions(now).await? {
            match self.refresh_subscription(&sub.id).await {
                Ok(_) => summary.refreshed.push(sub.id),
                Err(err) => {
                    tracing::warn!(id = %sub.id, name = %sub.name, error = %err, "auto-update failed");
                    summary.failed.push((sub.id, err.to_string()));
                }
            }
        }
        Ok(summary)
    }
}
