use serde_json::Value;

use crate::links::LinkError;
use crate::model::{
    Hysteria2Settings, ProtocolSettings, RealitySettings, ShadowsocksSettings, TlsConfig,
    TlsSettings, Transport, TrojanSettings, Tunnel, VlessSettings, VmessSettings,
};

/// Outbound types that are not proxies.
const SKIPPED_TYPES: &[&str] = &["direct", "block", "dns", "selector", "urltest"];

pub(super) fn parse(content: &str) -> Vec<Tunnel> {
    let doc: Value = match serde_json::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(error = %e, "sing-box subscription is not valid JSON");
            return Vec::new();
        }
    };
    let Some(outbounds) = doc.get("outbounds").and_then(Value::as_array) else {
        return Vec::new();
    };

    outbounds
        .iter()
        .filter(|ob| {
            let kind = ob.get("type").and_then(Value::as_str).unwrap_or_default();
            !SKIPPED_TYPES.contains(&kind)
        })
        .filter_map(|ob| match parse_outbound(ob) {
            Ok(tunnel) => Some(tunnel),
            Err(e) => {
                tracing::debug!(error = %e, "skipping sing-box outbound");
                None
            }
        })
        .collect()
}

fn parse_outbound(ob: &Value) -> Result<Tunnel, LinkError> {
    let kind = text(ob, "type").unwrap_or_default();
    let server = text(ob, "server").ok_or(LinkError::MissingField("server"))?;
    let port = match ob.get("server_port") {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| LinkError::InvalidPort(n.to_string()))?,
        Some(Value::String(s)) => s
            .parse::<u16>()
            .map_err(|_| LinkError::InvalidPort(s.clone()))?,
        _ => 443,
    };
    let name = text(ob, "tag").unwrap_or_else(|| kind.clone());

    let settings = match kind.as_str() {
        "vless" => ProtocolSettings::Vless(VlessSettings {
            uuid: text(ob, "uuid").ok_or(LinkError::MissingField("uuid"))?,
            flow: text(ob, "flow").unwrap_or_default(),
            encryption: "none".to_string(),
        }),
        "vmess" => ProtocolSettings::Vmess(VmessSettings {
            uuid: text(ob, "uuid").ok_or(LinkError::MissingField("uuid"))?,
            alter_id: number(ob, "alter_id").unwrap_or(0),
            security: text(ob, "security").unwrap_or_else(|| "auto".to_string()),
        }),
        "shadowsocks" => ProtocolSettings::Shadowsocks(ShadowsocksSettings {
            method: text(ob, "method").ok_or(LinkError::MissingField("method"))?,
            password: text(ob, "password").unwrap_or_default(),
        }),
        "trojan" => ProtocolSettings::Trojan(TrojanSettings {
            password: text(ob, "password").ok_or(LinkError::MissingField("password"))?,
        }),
        "hysteria2" => {
            let obfs = ob.get("obfs");
            ProtocolSettings::Hysteria2(Hysteria2Settings {
                password: text(ob, "password").unwrap_or_default(),
                obfs_type: obfs.and_then(|o| text(o, "type")).unwrap_or_default(),
                obfs_password: obfs.and_then(|o| text(o, "password")).unwrap_or_default(),
                up_mbps: number(ob, "up_mbps").filter(|n| *n > 0),
                down_mbps: number(ob, "down_mbps").filter(|n| *n > 0),
            })
        }
        other => return Err(LinkError::UnsupportedScheme(other.to_string())),
    };

    let tls = match ob.get("tls").filter(|t| t.is_object()) {
        Some(tls) if enabled(tls.get("reality")) => {
            let reality = tls.get("reality");
            TlsConfig::Reality(RealitySettings {
                server_name: text(tls, "server_name").unwrap_or_default(),
                fingerprint: tls
                    .get("utls")
                    .and_then(|u| text(u, "fingerprint"))
                    .unwrap_or_else(|| "chrome".to_string()),
                public_key: reality
                    .and_then(|r| text(r, "public_key"))
                    .unwrap_or_default(),
                short_id: reality.and_then(|r| text(r, "short_id")).unwrap_or_default(),
            })
        }
        Some(tls) if enabled(Some(tls)) => TlsConfig::Tls(TlsSettings {
            server_name: text(tls, "server_name").unwrap_or_else(|| server.clone()),
            fingerprint: tls.get("utls").and_then(|u| text(u, "fingerprint")),
            alpn: tls
                .get("alpn")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            insecure: tls.get("insecure").and_then(Value::as_bool).unwrap_or(false),
        }),
        _ => TlsConfig::Disabled,
    };

    let transport = match ob.get("transport") {
        Some(t) => match text(t, "type").as_deref() {
            Some("ws") => Transport::Ws {
                path: text(t, "path").unwrap_or_else(|| "/".to_string()),
                host: Some(
                    t.get("headers")
                        .and_then(|h| text(h, "Host"))
                        .unwrap_or_else(|| server.clone()),
                ),
            },
            Some("grpc") => Transport::Grpc {
                service_name: text(t, "service_name").unwrap_or_default(),
            },
            Some("http") => Transport::Http {
                path: text(t, "path").unwrap_or_else(|| "/".to_string()),
                host: t
                    .get("host")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            _ => Transport::Tcp,
        },
        None => Transport::Tcp,
    };

    Ok(Tunnel::new(name, server, port, settings)
        .with_tls(tls)
        .with_transport(transport))
}

fn text(map: &Value, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(map: &Value, key: &str) -> Option<u32> {
    map.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn enabled(block: Option<&Value>) -> bool {
    block
        .and_then(|b| b.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
