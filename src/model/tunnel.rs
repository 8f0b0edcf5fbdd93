use serde::{Deserialize, Serialize};
use std::fmt;

use super::{default_true, generate_id};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    Vless,
    Vmess,
    Shadowsocks,
    Trojan,
    Hysteria2,
}

impl TunnelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelType::Vless => "vless",
            TunnelType::Vmess => "vmess",
            TunnelType::Shadowsocks => "shadowsocks",
            TunnelType::Trojan => "trojan",
            TunnelType::Hysteria2 => "hysteria2",
        }
    }
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelSource {
    #[default]
    Manual,
    Subscription,
    Import,
}

// ============================================================================
// Protocol settings
// ============================================================================

fn default_encryption() -> String {
    "none".to_string()
}

fn default_vmess_security() -> String {
    "auto".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VlessSettings {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flow: String,
    #[serde(default = "default_encryption")]
    pub encryption: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VmessSettings {
    pub uuid: String,
    #[serde(default)]
    pub alter_id: u32,
    #[serde(default = "default_vmess_security")]
    pub security: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksSettings {
    pub method: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrojanSettings {
    pub password: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hysteria2Settings {
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obfs_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obfs_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_mbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_mbps: Option<u32>,
}

/// Protocol-specific settings; the variant is the tunnel's protocol type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolSettings {
    Vless(VlessSettings),
    Vmess(VmessSettings),
    Shadowsocks(ShadowsocksSettings),
    Trojan(TrojanSettings),
    Hysteria2(Hysteria2Settings),
}

impl ProtocolSettings {
    pub fn kind(&self) -> TunnelType {
        match self {
            ProtocolSettings::Vless(_) => TunnelType::Vless,
            ProtocolSettings::Vmess(_) => TunnelType::Vmess,
            ProtocolSettings::Shadowsocks(_) => TunnelType::Shadowsocks,
            ProtocolSettings::Trojan(_) => TunnelType::Trojan,
            ProtocolSettings::Hysteria2(_) => TunnelType::Hysteria2,
        }
    }
}

// ============================================================================
// TLS / transport
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub server_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealitySettings {
    #[serde(default)]
    pub server_name: String,
    pub fingerprint: String,
    pub public_key: String,
    #[serde(default)]
    pub short_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TlsConfig {
    #[default]
    Disabled,
    Tls(TlsSettings),
    Reality(RealitySettings),
}

impl TlsConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TlsConfig::Disabled)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Ws {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
    Grpc {
        #[serde(default)]
        service_name: String,
    },
    Http {
        path: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        host: Vec<String>,
    },
}

// ============================================================================
// Tunnel
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub source: TunnelSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<i64>,
    pub settings: ProtocolSettings,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub transport: Transport,
}

impl Tunnel {
    /// A fresh, enabled tunnel with a new id, plain TCP transport and no TLS.
    pub fn new(
        name: impl Into<String>,
        server: impl Into<String>,
        port: u16,
        settings: ProtocolSettings,
    ) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            enabled: true,
            server: server.into(),
            port,
            source: TunnelSource::Import,
            subscription_id: None,
            latency: None,
            last_check: None,
            settings,
            tls: TlsConfig::Disabled,
            transport: Transport::Tcp,
        }
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn kind(&self) -> TunnelType {
        self.settings.kind()
    }

    /// Outbound tag used in the generated sing-box config.
    pub fn tag(&self) -> String {
        format!("{}-{}", self.kind(), self.id)
    }
}
