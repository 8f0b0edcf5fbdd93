use serde::{Deserialize, Serialize};

use super::slugify;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    #[default]
    Selector,
    Urltest,
    Fallback,
}

impl GroupType {
    /// Probe interval used when the group does not carry one.
    pub fn default_interval(&self) -> Option<&'static str> {
        match self {
            GroupType::Selector => None,
            GroupType::Urltest => Some("5m"),
            GroupType::Fallback => Some("1m"),
        }
    }
}

impl std::str::FromStr for GroupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "selector" => Ok(GroupType::Selector),
            "urltest" => Ok(GroupType::Urltest),
            "fallback" => Ok(GroupType::Fallback),
            other => Err(format!("unknown group type: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TunnelGroup {
    pub id: String,
    pub name: String,
    pub tag: String,
    #[serde(rename = "type", default)]
    pub kind: GroupType,
    /// Member tunnel ids, in priority order.
    #[serde(default)]
    pub tunnels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Milliseconds; only meaningful for urltest groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u32>,
}

impl TunnelGroup {
    pub fn tag_for(name: &str) -> String {
        format!("group-{}", slugify(name))
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.tag = Self::tag_for(&self.name);
    }
}
