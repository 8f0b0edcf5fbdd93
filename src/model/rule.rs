use serde::{Deserialize, Serialize};

use super::default_true;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Tag of a tunnel, a group or `direct-out`.
    pub outbound: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub domain_keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

/// Domain matchers of a rule after normalisation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainMatchers {
    pub domains: Vec<String>,
    pub suffixes: Vec<String>,
    pub keywords: Vec<String>,
}

impl DomainMatchers {
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.suffixes.is_empty() && self.keywords.is_empty()
    }
}

impl RoutingRule {
    /// Split the domain list into exact domains and suffixes (`*.x`, `.x`).
    pub fn matchers(&self) -> DomainMatchers {
        let mut out = DomainMatchers::default();
        for raw in &self.domains {
            let d = raw.trim().to_lowercase();
            if let Some(rest) = d.strip_prefix("*.").or_else(|| d.strip_prefix('.')) {
                if !rest.is_empty() {
                    out.suffixes.push(rest.to_string());
                }
            } else if !d.is_empty() {
                out.domains.push(d);
            }
        }
        out.keywords = self
            .domain_keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        out
    }
}

/// Contents of `routing_rules.json`. Rule order is priority order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default)]
    pub default_outbound: Option<String>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}
