//! Typed shape of the generated sing-box configuration document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

// ============================================================================
// Document
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SingBoxConfig {
    pub log: LogConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub route: RouteConfig,
}

impl SingBoxConfig {
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn outbound_tags(&self) -> impl Iterator<Item = &str> {
        self.outbounds.iter().map(Outbound::tag)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    Tun(TunInbound),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TunInbound {
    pub tag: String,
    pub interface_name: String,
    pub inet4_address: String,
    pub mtu: u32,
    pub auto_route: bool,
    pub sniff: bool,
    pub stack: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub auto_detect_interface: bool,
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbound: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_suffix: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_keyword: Vec<String>,
    pub outbound: String,
}

// ============================================================================
// Outbounds
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Direct {
        tag: String,
    },
    Vless(VlessOutbound),
    Vmess(VmessOutbound),
    Shadowsocks(ShadowsocksOutbound),
    Trojan(TrojanOutbound),
    Hysteria2(Hysteria2Outbound),
    Selector {
        tag: String,
        outbounds: Vec<String>,
        default: String,
    },
    Urltest {
        tag: String,
        outbounds: Vec<String>,
        url: String,
        interval: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<u32>,
    },
}

impl Outbound {
    pub fn tag(&self) -> &str {
        match self {
            Outbound::Direct { tag }
            | Outbound::Selector { tag, .. }
            | Outbound::Urltest { tag, .. } => tag.as_str(),
            Outbound::Vless(o) => o.tag.as_str(),
            Outbound::Vmess(o) => o.tag.as_str(),
            Outbound::Shadowsocks(o) => o.tag.as_str(),
            Outbound::Trojan(o) => o.tag.as_str(),
            Outbound::Hysteria2(o) => o.tag.as_str(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VlessOutbound {
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<V2rayTransport>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VmessOutbound {
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    pub alter_id: u32,
    pub security: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<V2rayTransport>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksOutbound {
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    pub method: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrojanOutbound {
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<V2rayTransport>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hysteria2Outbound {
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs: Option<Obfs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_mbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_mbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutboundTls>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obfs {
    #[serde(rename = "type")]
    pub obfs_type: String,
    pub password: String,
}

// ============================================================================
// TLS / transport blocks
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundTls {
    pub enabled: bool,
    pub server_name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utls: Option<Utls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality: Option<Reality>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Utls {
    pub enabled: bool,
    pub fingerprint: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reality {
    pub enabled: bool,
    pub public_key: String,
    pub short_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum V2rayTransport {
    Ws {
        path: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Grpc {
        service_name: String,
    },
    Http {
        path: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        host: Vec<String>,
    },
}
