use serde_yaml::Value;

use crate::links::{leading_number, LinkError};
use crate::model::{
    Hysteria2Settings, ProtocolSettings, RealitySettings, ShadowsocksSettings, TlsConfig,
    TlsSettings, Transport, TrojanSettings, Tunnel, VlessSettings, VmessSettings,
};

pub(super) fn parse(content: &str) -> Vec<Tunnel> {
    let doc: Value = match serde_yaml::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(error = %e, "clash subscription is not valid YAML");
            return Vec::new();
        }
    };
    let Some(proxies) = doc.get("proxies").and_then(Value::as_sequence) else {
        return Vec::new();
    };

    proxies
        .iter()
        .filter_map(|proxy| match parse_proxy(proxy) {
            Ok(tunnel) => Some(tunnel),
            Err(e) => {
                tracing::debug!(error = %e, "skipping clash proxy");
                None
            }
        })
        .collect()
}

fn parse_proxy(proxy: &Value) -> Result<Tunnel, LinkError> {
    let kind = text(proxy, "type").unwrap_or_default().to_lowercase();
    let server = text(proxy, "server").ok_or(LinkError::MissingField("server"))?;
    let port = match text(proxy, "port") {
        Some(p) => p.parse::<u16>().map_err(|_| LinkError::InvalidPort(p))?,
        None => 443,
    };
    let name = text(proxy, "name").unwrap_or_else(|| "Proxy".to_string());

    let settings = match kind.as_str() {
        "vless" => ProtocolSettings::Vless(VlessSettings {
            uuid: text(proxy, "uuid").ok_or(LinkError::MissingField("uuid"))?,
            flow: text(proxy, "flow").unwrap_or_default(),
            encryption: "none".to_string(),
        }),
        "vmess" => ProtocolSettings::Vmess(VmessSettings {
            uuid: text(proxy, "uuid").ok_or(LinkError::MissingField("uuid"))?,
            alter_id: text(proxy, "alterId")
                .and_then(|a| a.parse().ok())
                .unwrap_or(0),
            security: text(proxy, "cipher").unwrap_or_else(|| "auto".to_string()),
        }),
        "ss" | "shadowsocks" => ProtocolSettings::Shadowsocks(ShadowsocksSettings {
            method: text(proxy, "cipher").ok_or(LinkError::MissingField("cipher"))?,
            password: text(proxy, "password").unwrap_or_default(),
        }),
        "trojan" => ProtocolSettings::Trojan(TrojanSettings {
            password: text(proxy, "password").ok_or(LinkError::MissingField("password"))?,
        }),
        "hysteria2" | "hy2" => ProtocolSettings::Hysteria2(Hysteria2Settings {
            password: text(proxy, "password").unwrap_or_default(),
            obfs_type: text(proxy, "obfs").unwrap_or_default(),
            obfs_password: text(proxy, "obfs-password").unwrap_or_default(),
            up_mbps: text(proxy, "up").as_deref().and_then(leading_number),
            down_mbps: text(proxy, "down").as_deref().and_then(leading_number),
        }),
        other => return Err(LinkError::UnsupportedScheme(other.to_string())),
    };

    let sni = text(proxy, "sni").or_else(|| text(proxy, "servername"));
    let fingerprint = text(proxy, "client-fingerprint");
    let implicit_tls = matches!(settings, ProtocolSettings::Trojan(_) | ProtocolSettings::Hysteria2(_));

    let tls = if let Some(reality) = proxy.get("reality-opts").filter(|v| v.is_mapping()) {
        TlsConfig::Reality(RealitySettings {
            server_name: sni.unwrap_or_default(),
            fingerprint: fingerprint.unwrap_or_else(|| "chrome".to_string()),
            public_key: text(reality, "public-key").unwrap_or_default(),
            short_id: text(reality, "short-id").unwrap_or_default(),
        })
    } else if implicit_tls || flag(proxy, "tls") {
        TlsConfig::Tls(TlsSettings {
            server_name: sni.unwrap_or_else(|| server.clone()),
            fingerprint,
            alpn: strings(proxy, "alpn"),
            insecure: flag(proxy, "skip-cert-verify"),
        })
    } else {
        TlsConfig::Disabled
    };

    let transport = match text(proxy, "network").as_deref() {
        Some("ws") => {
            let opts = proxy.get("ws-opts");
            Transport::Ws {
                path: opts
                    .and_then(|o| text(o, "path"))
                    .unwrap_or_else(|| "/".to_string()),
                host: Some(
                    opts.and_then(|o| o.get("headers"))
                        .and_then(|h| text(h, "Host"))
                        .unwrap_or_else(|| server.clone()),
                ),
            }
        }
        Some("grpc") => Transport::Grpc {
            service_name: proxy
                .get("grpc-opts")
                .and_then(|o| text(o, "grpc-service-name"))
                .unwrap_or_default(),
        },
        Some("h2") | Some("http") => {
            let opts = proxy.get("h2-opts");
            let mut host = opts.map(|o| strings(o, "host")).unwrap_or_default();
            if host.is_empty() {
                host.push(server.clone());
            }
            Transport::Http {
                path: opts
                    .and_then(|o| text(o, "path"))
                    .unwrap_or_else(|| "/".to_string()),
                host,
            }
        }
        _ => Transport::Tcp,
    };

    Ok(Tunnel::new(name, server, port, settings)
        .with_tls(tls)
        .with_transport(transport))
}

/// Non-empty scalar as a string.
fn text(map: &Value, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flag(map: &Value, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn strings(map: &Value, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Sequence(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASH: &str = r#"
proxies:
  - name: "reality-node"
    type: vless
    server: 198.51.100.10
    port: 443
    uuid: 11111111-2222-3333-4444-555555555555
    flow: xtls-rprx-vision
    servername: www.microsoft.com
    client-fingerprint: firefox
    reality-opts:
      public-key: PUBKEY
      short-id: "0a"
  - name: ws-node
    type: vmess
    server: ws.example.com
    port: "8080"
    uuid: 22222222-2222-3333-4444-555555555555
    alterId: 0
    cipher: auto
    network: ws
    ws-opts:
      path: /ray
      headers:
        Host: cdn.example.com
  - name: unknown-node
    type: wireguard
    server: wg.example.com
    port: 51820
  - name: trojan-node
    type: trojan
    server: t.example.com
    port: 443
    password: pw
    sni: t-sni.example.com
"#;

    #[test]
    fn parses_supported_proxies_and_skips_unknown() {
        let tunnels = parse(CLASH);
        assert_eq!(tunnels.len(), 3);

        let reality = &tunnels[0];
        assert_eq!(reality.name, "reality-node");
        match &reality.tls {
            TlsConfig::Reality(r) => {
                assert_eq!(r.server_name, "www.microsoft.com");
                assert_eq!(r.fingerprint, "firefox");
                assert_eq!(r.public_key, "PUBKEY");
                assert_eq!(r.short_id, "0a");
            }
            other => panic!("expected reality, got {other:?}"),
        }

        let ws = &tunnels[1];
        assert_eq!(ws.port, 8080);
        assert_eq!(
            ws.transport,
            Transport::Ws {
                path: "/ray".into(),
                host: Some("cdn.example.com".into())
            }
        );

        let trojan = &tunnels[2];
        match &trojan.tls {
            TlsConfig::Tls(t) => assert_eq!(t.server_name, "t-sni.example.com"),
            other => panic!("expected tls, got {other:?}"),
        }
    }
}
