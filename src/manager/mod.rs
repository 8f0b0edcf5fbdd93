//! CRUD operations over the stored entities.
//!
//! Every operation loads the collection it needs, mutates it and saves it
//! back while holding the manager's write lock, so two overlapping edits
//! never save from the same stale snapshot. Network fetches and latency
//! checks run before the lock is taken. Nothing here touches nft, dnsmasq
//! or sing-box; callers that need the change applied go through
//! [`crate::engine::Engine`].

mod devices;
mod groups;
mod rules;
mod subscriptions;
mod tunnels;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::FetchSettings;
use crate::error::Result;
use crate::model::{generate_id, Tunnel};
use crate::store::Repository;

pub use devices::{DeviceCreateRequest, DeviceUpdateRequest};
pub use groups::{GroupCreateRequest, GroupUpdateRequest};
pub use rules::{RuleCreateRequest, RuleUpdateRequest};
pub use subscriptions::{AutoUpdateSummary, SubscriptionCreateRequest, SubscriptionUpdateRequest};
pub use tunnels::{ImportSummary, TunnelCreateRequest, TunnelUpdateRequest};

#[derive(Clone)]
pub struct Manager {
    repo: Repository,
    fetch: FetchSettings,
    writes: Arc<Mutex<()>>,
}

impl Manager {
    pub fn new(repo: Repository, fetch: FetchSettings) -> Self {
        Self {
            repo,
            fetch,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Held from the first load to the last save of a mutation. Not
    /// reentrant: private helpers expect the caller to hold it already.
    pub(crate) async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Drop `removed` tunnel ids from every group's member list.
    async fn prune_group_members(&self, removed: &HashSet<String>) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }
        let mut groups = self.repo.groups().await?;
        let mut changed = false;
        for group in &mut groups {
            let before = group.tunnels.len();
            group.tunnels.retain(|id| !removed.contains(id));
            changed |= group.tunnels.len() != before;
        }
        if changed {
            self.repo.save_groups(&groups).await?;
        }
        Ok(())
    }
}

/// Re-roll `tunnel.id` until it is not in `taken`, then claim it.
fn claim_id(taken: &mut HashSet<String>, tunnel: &mut Tunnel) {
    while !taken.insert(tunnel.id.clone()) {
        tunnel.id = generate_id();
    }
}

/// Append `added` to `tunnels`, re-rolling any id already present in the
/// collection or earlier in `added`.
pub(crate) fn push_unique(tunnels: &mut Vec<Tunnel>, added: impl IntoIterator<Item = Tunnel>) {
    let mut taken: HashSet<String> = tunnels.iter().map(|t| t.id.clone()).collect();
    for mut tunnel in added {
        claim_id(&mut taken, &mut tunnel);
        tunnels.push(tunnel);
    }
}

/// Like [`push_unique`] for a single tunnel; returns the stored copy.
pub(crate) fn push_one_unique(tunnels: &mut Vec<Tunnel>, mut tunnel: Tunnel) -> Tunnel {
    let mut taken: HashSet<String> = tunnels.iter().map(|t| t.id.clone()).collect();
    claim_id(&mut taken, &mut tunnel);
    tunnels.push(tunnel.clone());
    tunnel
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Trimmed, non-empty entries.
pub(crate) fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProtocolSettings, TrojanSettings};

    fn tunnel(id: &str) -> Tunnel {
        let mut t = Tunnel::new(
            id,
            "t.example.com",
            443,
            ProtocolSettings::Trojan(TrojanSettings {
                password: "pw".into(),
            }),
        );
        t.id = id.into();
        t
    }

    #[test]
    fn colliding_ids_are_rerolled() {
        let mut tunnels = vec![tunnel("aaaa0001")];
        push_unique(
            &mut tunnels,
            vec![tunnel("aaaa0001"), tunnel("bbbb0002"), tunnel("bbbb0002")],
        );

        let ids: HashSet<&str> = tunnels.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(tunnels.len(), 4);
        assert_eq!(ids.len(), 4);
        assert_eq!(tunnels[0].id, "aaaa0001");
        assert_eq!(tunnels[2].id, "bbbb0002");
    }

    #[test]
    fn single_insert_returns_the_stored_id() {
        let mut tunnels = vec![tunnel("aaaa0001")];
        let stored = push_one_unique(&mut tunnels, tunnel("aaaa0001"));
        assert_ne!(stored.id, "aaaa0001");
        assert_eq!(tunnels[1].id, stored.id);
    }
}
