use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionFormat {
    #[default]
    Auto,
    Base64,
    Clash,
    Singbox,
}

impl FromStr for SubscriptionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "base64" => Ok(Self::Base64),
            "clash" => Ok(Self::Clash),
            "singbox" | "sing-box" => Ok(Self::Singbox),
            other => Err(format!("unknown subscription format: {other}")),
        }
    }
}

fn default_update_interval() -> u32 {
    24
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub format: SubscriptionFormat,
    #[serde(default)]
    pub auto_update: bool,
    /// Hours between automatic refreshes.
    #[serde(default = "default_update_interval")]
    pub update_interval: u32,
    /// Unix seconds of the last successful fetch.
    #[serde(default)]
    pub last_update: i64,
    #[serde(default)]
    pub tunnels_count: usize,
}

impl Subscription {
    pub fn is_due(&self, now: i64) -> bool {
        self.auto_update && now - self.last_update >= i64::from(self.update_interval) * 3600
    }
}
