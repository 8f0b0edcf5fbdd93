use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{clean_list, Manager};
use crate::error::{Error, Result};
use crate::model::{default_true, generate_id, RoutingRule, RoutingTable};

// ============================================================================
// Request Types
// ============================================================================

/// Also used by [`Manager::replace_rules`], where `id` keeps an existing
/// rule's identity.
#[derive(Deserialize, Serialize, Validate, Clone, Debug)]
pub struct RuleCreateRequest {
    #[serde(default)]
    pub id: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub name: String,

    /// Not checked here; rules pointing at unknown outbounds are dropped when
    /// the config is generated.
    #[validate(length(min = 1, max = 128))]
    pub outbound: String,

    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub domain_keywords: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub service_id: Option<String>,
}

#[derive(Deserialize, Serialize, Validate, Clone, Debug, Default)]
pub struct RuleUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 128))]
    pub outbound: Option<String>,

    pub domains: Option<Vec<String>>,

    pub domain_keywords: Option<Vec<String>>,

    pub enabled: Option<bool>,
}

impl RuleCreateRequest {
    fn into_rule(self) -> RoutingRule {
        RoutingRule {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(generate_id),
            name: self.name.trim().to_string(),
            outbound: self.outbound.trim().to_string(),
            domains: clean_list(self.domains),
            domain_keywords: clean_list(self.domain_keywords),
            enabled: self.enabled,
            service_id: self.service_id,
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

impl Manager {
    pub async fn routing_table(&self) -> Result<RoutingTable> {
        Ok(self.repo.routing().await?)
    }

    /// Appended at the end, i.e. lowest priority.
    pub async fn create_rule(&self, req: RuleCreateRequest) -> Result<RoutingRule> {
        req.validate()?;
        let _guard = self.write_lock().await;
        let mut table = self.repo.routing().await?;
        let mut rule = req.into_rule();
        if table.rules.iter().any(|r| r.id == rule.id) {
            rule.id = generate_id();
        }
        table.rules.push(rule.clone());
        self.repo.save_routing(&table).await?;
        Ok(rule)
    }

    pub async fn update_rule(&self, id: &str, req: RuleUpdateRequest) -> Result<RoutingRule> {
        req.validate()?;
        let _guard = self.write_lock().await;
        let mut table = self.repo.routing().await?;
        let rule = table
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found("rule", id))?;

        if let Some(name) = req.name {
            rule.name = name.trim().to_string();
        }
        if let Some(outbound) = req.outbound {
            rule.outbound = outbound.trim().to_string();
        }
        if let Some(domains) = req.domains {
            rule.domains = clean_list(domains);
        }
        if let Some(keywords) = req.domain_keywords {
            rule.domain_keywords = clean_list(keywords);
        }
        if let Some(enabled) = req.enabled {
            rule.enabled = enabled;
        }

        let updated = rule.clone();
        self.repo.save_routing(&table).await?;
        Ok(updated)
    }

    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock().await;
        let mut table = self.repo.routing().await?;
        let before = table.rules.len();
        table.rules.retain(|r| r.id != id);
        if table.rules.len() == before {
            return Err(Error::not_found("rule", id));
        }
        self.repo.save_routing(&table).await?;
        Ok(())
    }

    pub async fn toggle_rule(&self, id: &str) -> Result<RoutingRule> {
        let _guard = self.write_lock().await;
        let mut table = self.repo.routing().await?;
        let rule = table
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found("rule", id))?;
        rule.enabled = !rule.enabled;
        let updated = rule.clone();
        self.repo.save_routing(&table).await?;
        Ok(updated)
    }

    /// `None` clears the explicit default.
    pub async fn set_default_outbound(&self, outbound: Option<String>) -> Result<RoutingTable> {
        let _guard = self.write_lock().await;
        let mut table = self.repo.routing().await?;
        table.default_outbound = outbound
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty());
        self.repo.save_routing(&table).await?;
        Ok(table)
    }

    /// Replace the whole rule list, in the given order. Supplied ids are
    /// kept; missing or duplicate ones get a fresh id.
    pub async fn replace_rules(&self, rules: Vec<RuleCreateRequest>) -> Result<RoutingTable> {
        for rule in &rules {
            rule.validate()?;
        }
        let mut seen = HashSet::new();
        let rules: Vec<RoutingRule> = rules
            .into_iter()
            .map(|req| {
                let mut rule = req.into_rule();
                if !seen.insert(rule.id.clone()) {
                    rule.id = generate_id();
                    seen.insert(rule.id.clone());
                }
                rule
            })
            .collect();

        let _guard = self.write_lock().await;
        let mut table = self.repo.routing().await?;
        table.rules = rules;
        self.repo.save_routing(&table).await?;
        Ok(table)
    }

    /// Move the listed rules to the front in the given order; unlisted rules
    /// follow in their previous order. Unknown ids are ignored.
    pub async fn reorder_rules(&self, ids: &[String]) -> Result<RoutingTable> {
        let _guard = self.write_lock().await;
        let mut table = self.repo.routing().await?;
        let mut rest = std::mem::take(&mut table.rules);
        let mut ordered = Vec::with_capacity(rest.len());
        for id in ids {
            if let Some(pos) = rest.iter().position(|r| &r.id == id) {
                ordered.push(rest.remove(pos));
            }
        }
        ordered.append(&mut rest);
        table.rules = ordered;
        self.repo.save_routing(&table).await?;
        Ok(table)
    }
}
