use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

// ============================================================================
// Defaults
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/opt/pinpoint/data")
}

fn default_singbox_config_path() -> PathBuf {
    PathBuf::from("/etc/sing-box/config.json")
}

fn default_singbox_restart() -> Vec<String> {
    vec!["/etc/init.d/sing-box".to_string(), "restart".to_string()]
}

fn default_restart_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_probe_url() -> String {
    "https://www.gstatic.com/generate_204".to_string()
}

fn default_interface_name() -> String {
    "tun1".to_string()
}

fn default_tun_address() -> String {
    "10.0.0.1/30".to_string()
}

fn default_mtu() -> u32 {
    1400
}

fn default_stack() -> String {
    "gvisor".to_string()
}

fn default_nft_binary() -> String {
    "nft".to_string()
}

fn default_family() -> String {
    "inet".to_string()
}

fn default_table() -> String {
    "pinpoint".to_string()
}

fn default_chain() -> String {
    "prerouting".to_string()
}

fn default_tunnel_nets_set() -> String {
    "tunnel_nets".to_string()
}

fn default_tunnel_ips_set() -> String {
    "tunnel_ips".to_string()
}

fn default_mark() -> String {
    "0x100".to_string()
}

fn default_nft_timeout_secs() -> u64 {
    10
}

fn default_dnsmasq_config_path() -> PathBuf {
    PathBuf::from("/tmp/dnsmasq.d/pinpoint.conf")
}

fn default_dnsmasq_restart() -> Vec<String> {
    vec!["/etc/init.d/dnsmasq".to_string(), "restart".to_string()]
}

fn default_subscription_timeout_secs() -> u64 {
    30
}

fn default_list_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    "PinPoint/1.1".to_string()
}

fn default_check_interval_secs() -> u64 {
    300
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub singbox: SingBoxSettings,
    #[serde(default)]
    pub nft: NftSettings,
    #[serde(default)]
    pub dnsmasq: DnsmasqSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub subscriptions: SubscriptionSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SingBoxSettings {
    #[serde(default = "default_singbox_config_path")]
    pub config_path: PathBuf,
    /// Defaults to `<data_dir>/singbox_config_backup.json` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default = "default_singbox_restart")]
    pub restart_command: Vec<String>,
    #[serde(default = "default_restart_timeout_secs")]
    pub restart_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_outbound: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default)]
    pub tun: TunSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TunSettings {
    #[serde(default = "default_interface_name")]
    pub interface_name: String,
    #[serde(default = "default_tun_address")]
    pub address: String,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default = "default_stack")]
    pub stack: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NftSettings {
    #[serde(default = "default_nft_binary")]
    pub binary: String,
    #[serde(default = "default_family")]
    pub family: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(default = "default_tunnel_nets_set")]
    pub tunnel_nets_set: String,
    #[serde(default = "default_tunnel_ips_set")]
    pub tunnel_ips_set: String,
    #[serde(default = "default_mark")]
    pub mark: String,
    #[serde(default = "default_nft_timeout_secs")]
    pub command_timeout_secs: u64,
    /// CIDRs loaded into the global set on every reload regardless of services.
    #[serde(default)]
    pub extra_cidrs: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsmasqSettings {
    #[serde(default = "default_dnsmasq_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_dnsmasq_restart")]
    pub restart_command: Vec<String>,
    #[serde(default)]
    pub block_ipv6_domains: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_subscription_timeout_secs")]
    pub subscription_timeout_secs: u64,
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            singbox: SingBoxSettings::default(),
            nft: NftSettings::default(),
            dnsmasq: DnsmasqSettings::default(),
            fetch: FetchSettings::default(),
            subscriptions: SubscriptionSettings::default(),
        }
    }
}

impl Default for SingBoxSettings {
    fn default() -> Self {
        Self {
            config_path: default_singbox_config_path(),
            backup_path: None,
            restart_command: default_singbox_restart(),
            restart_timeout_secs: default_restart_timeout_secs(),
            active_outbound: None,
            log_level: default_log_level(),
            probe_url: default_probe_url(),
            tun: TunSettings::default(),
        }
    }
}

impl Default for TunSettings {
    fn default() -> Self {
        Self {
            interface_name: default_interface_name(),
            address: default_tun_address(),
            mtu: default_mtu(),
            stack: default_stack(),
        }
    }
}

impl Default for NftSettings {
    fn default() -> Self {
        Self {
            binary: default_nft_binary(),
            family: default_family(),
            table: default_table(),
            chain: default_chain(),
            tunnel_nets_set: default_tunnel_nets_set(),
            tunnel_ips_set: default_tunnel_ips_set(),
            mark: default_mark(),
            command_timeout_secs: default_nft_timeout_secs(),
            extra_cidrs: vec![],
        }
    }
}

impl Default for DnsmasqSettings {
    fn default() -> Self {
        Self {
            config_path: default_dnsmasq_config_path(),
            restart_command: default_dnsmasq_restart(),
            block_ipv6_domains: vec![],
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            subscription_timeout_secs: default_subscription_timeout_secs(),
            list_timeout_secs: default_list_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Settings {
    /// Read `config.yaml`; a missing file means all defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(serde_yaml::from_str::<Settings>(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn lists_dir(&self) -> PathBuf {
        self.data_dir.join("lists")
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join("status.json")
    }

    pub fn singbox_backup_path(&self) -> PathBuf {
        self.singbox
            .backup_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("singbox_config_backup.json"))
    }
}

impl SingBoxSettings {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }
}

impl NftSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl FetchSettings {
    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_secs(self.subscription_timeout_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
data_dir: /tmp/pinpoint
nft:
  mark: "0x200"
singbox:
  tun:
    mtu: 1280
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/pinpoint"));
        assert_eq!(settings.nft.mark, "0x200");
        assert_eq!(settings.nft.table, "pinpoint");
        assert_eq!(settings.singbox.tun.mtu, 1280);
        assert_eq!(settings.singbox.tun.interface_name, "tun1");
        assert_eq!(
            settings.singbox_backup_path(),
            PathBuf::from("/tmp/pinpoint/singbox_config_backup.json")
        );
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.yaml")).await.unwrap();
        assert_eq!(settings.fetch.subscription_timeout_secs, 30);
        assert_eq!(settings.subscriptions.check_interval_secs, 300);
    }
}
