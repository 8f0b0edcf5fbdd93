use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Format of a downloadable list source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Keenetic when the payload contains `route add`, plain IPs otherwise.
    #[default]
    Auto,
    Keenetic,
    Ip,
    Plain,
    Domains,
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SourceType::Auto),
            "keenetic" => Ok(SourceType::Keenetic),
            "ip" => Ok(SourceType::Ip),
            "plain" => Ok(SourceType::Plain),
            "domains" => Ok(SourceType::Domains),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceSource {
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: SourceType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub custom_domains: Vec<String>,
    #[serde(default)]
    pub ip_ranges: Vec<String>,
    #[serde(default)]
    pub custom_ips: Vec<String>,
    #[serde(default)]
    pub sources: Vec<ServiceSource>,
}

/// Contents of `services.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceList {
    #[serde(default)]
    pub services: Vec<Service>,
}

impl ServiceList {
    pub fn get(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(|s| s.enabled)
    }
}
