use serde::{Deserialize, Serialize};
use validator::Validate;

use super::Manager;
use crate::error::{Error, Result};
use crate::model::{generate_id, GroupType, TunnelGroup};

const DEFAULT_TOLERANCE: u32 = 50;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize, Serialize, Validate, Clone, Debug)]
pub struct GroupCreateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[serde(rename = "type", default = "default_group_type")]
    pub kind: GroupType,

    #[serde(default)]
    pub tunnels: Vec<String>,

    pub interval: Option<String>,

    #[validate(range(max = 10000))]
    pub tolerance: Option<u32>,
}

fn default_group_type() -> GroupType {
    GroupType::Urltest
}

#[derive(Deserialize, Serialize, Validate, Clone, Debug, Default)]
pub struct GroupUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub kind: Option<GroupType>,

    pub tunnels: Option<Vec<String>>,

    pub interval: Option<String>,

    #[validate(range(max = 10000))]
    pub tolerance: Option<u32>,
}

// ============================================================================
// Operations
// ============================================================================

impl Manager {
    pub async fn list_groups(&self) -> Result<Vec<TunnelGroup>> {
        Ok(self.repo.groups().await?)
    }

    /// Every member id must name a stored tunnel.
    async fn check_members(&self, members: &[String]) -> Result<()> {
        let tunnels = self.repo.tunnels().await?;
        match members
            .iter()
            .find(|id| !tunnels.iter().any(|t| &t.id == *id))
        {
            Some(missing) => Err(Error::not_found("tunnel", missing.clone())),
            None => Ok(()),
        }
    }

    pub async fn create_group(&self, req: GroupCreateRequest) -> Result<TunnelGroup> {
        req.validate()?;
        let _guard = self.write_lock().await;
        self.check_members(&req.tunnels).await?;

        let name = req.name.trim().to_string();
        let tag = TunnelGroup::tag_for(&name);
        let mut groups = self.repo.groups().await?;
        if groups.iter().any(|g| g.tag == tag) {
            tracing::warn!(tag = %tag, "another group already uses this tag; only the first is emitted");
        }

        let group = TunnelGroup {
            id: generate_id(),
            tag,
            name,
            kind: req.kind,
            tunnels: req.tunnels,
            interval: req
                .interval
                .or_else(|| req.kind.default_interval().map(str::to_string)),
            tolerance: match req.kind {
                GroupType::Urltest => Some(req.tolerance.unwrap_or(DEFAULT_TOLERANCE)),
                _ => req.tolerance,
            },
        };
        groups.push(group.clone());
        self.repo.save_groups(&groups).await?;
        tracing::info!(id = %group.id, tag = %group.tag, "group created");
        Ok(group)
    }

    pub async fn update_group(&self, id: &str, req: GroupUpdateRequest) -> Result<TunnelGroup> {
        req.validate()?;
        let _guard = self.write_lock().await;
        if let Some(members) = &req.tunnels {
            self.check_members(members).await?;
        }

        let mut groups = self.repo.groups().await?;
        let group = groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::not_found("group", id))?;

        if let Some(name) = req.name {
            group.rename(name.trim());
        }
        if let Some(kind) = req.kind {
            group.kind = kind;
        }
        if let Some(members) = req.tunnels {
            group.tunnels = members;
        }
        if let Some(interval) = req.interval {
            group.interval = Some(interval);
        }
        if let Some(tolerance) = req.tolerance {
            group.tolerance = Some(tolerance);
        }

        let updated = group.clone();
        self.repo.save_groups(&groups).await?;
        Ok(updated)
    }

    pub async fn delete_group(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock().await;
        let mut groups = self.repo.groups().await?;
        let before = groups.len();
        groups.retain(|g| g.id != id);
        if groups.len() == before {
            return Err(Error::not_found("group", id));
        }
        self.repo.save_groups(&groups).await?;
        Ok(())
    }
}
