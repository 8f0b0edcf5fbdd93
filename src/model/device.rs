use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a device's traffic is routed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    /// Subject only to the global list-membership rule.
    #[default]
    Default,
    VpnAll,
    DirectAll,
    /// Tunneled only for the destinations of its own services and lists.
    Custom,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Default => "default",
            DeviceMode::VpnAll => "vpn_all",
            DeviceMode::DirectAll => "direct_all",
            DeviceMode::Custom => "custom",
        }
    }
}

impl FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(DeviceMode::Default),
            "vpn_all" => Ok(DeviceMode::VpnAll),
            "direct_all" => Ok(DeviceMode::DirectAll),
            "custom" => Ok(DeviceMode::Custom),
            other => Err(format!("unknown device mode: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub mode: DeviceMode,
    /// Service ids scoped to this device in custom mode.
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub custom_domains: Vec<String>,
    #[serde(default)]
    pub custom_ips: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
}

/// Contents of `devices.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl DeviceList {
    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    /// Id derived from `name`: every character outside `[a-z0-9]` of the
    /// lower-cased name becomes `_`, then `_1`, `_2`, ... until unused.
    pub fn unique_id(&self, name: &str) -> String {
        let base: String = name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() || c.is_ascii_digit() {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        let mut id = base.clone();
        let mut counter = 1;
        while self.get(&id).is_some() {
            id = format!("{base}_{counter}");
            counter += 1;
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> Device {
        Device {
            id: id.into(),
            name: id.into(),
            ip: "192.168.1.10".into(),
            mac: String::new(),
            mode: DeviceMode::Default,
            services: vec![],
            custom_domains: vec![],
            custom_ips: vec![],
            enabled: true,
        }
    }

    #[test]
    fn ids_get_numeric_suffix_on_collision() {
        let mut list = DeviceList::default();
        assert_eq!(list.unique_id("Living Room TV"), "living_room_tv");

        list.devices.push(device("living_room_tv"));
        assert_eq!(list.unique_id("Living-Room TV"), "living_room_tv_1");

        list.devices.push(device("living_room_tv_1"));
        assert_eq!(list.unique_id("living room tv"), "living_room_tv_2");
    }

    #[test]
    fn stored_device_without_enabled_is_disabled() {
        let raw = serde_json::json!({"id": "pc", "name": "PC", "ip": "10.0.0.2", "mode": "vpn_all"});
        let d: Device = serde_json::from_value(raw).unwrap();
        assert!(!d.enabled);
        assert_eq!(d.mode, DeviceMode::VpnAll);
    }
}
