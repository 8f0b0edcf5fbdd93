use serde_json::Value;

use super::{decode_base64, split_alpn, LinkError};
use crate::model::{ProtocolSettings, TlsConfig, TlsSettings, Transport, Tunnel, VmessSettings};

/// `base64(json)`; JSON fields may be strings or numbers.
pub(super) fn parse(rest: &str) -> Result<Tunnel, LinkError> {
    let decoded = decode_base64(rest.trim())?;
    let data: Value =
        serde_json::from_str(&decoded).map_err(|e| LinkError::InvalidJson(e.to_string()))?;

    let server = field(&data, "add").ok_or(LinkError::MissingField("add"))?;
    let uuid = field(&data, "id").ok_or(LinkError::MissingField("id"))?;
    let port = match field(&data, "port") {
        Some(p) => p.parse::<u16>().map_err(|_| LinkError::InvalidPort(p))?,
        None => 443,
    };
    let alter_id = field(&data, "aid")
        .and_then(|a| a.parse::<u32>().ok())
        .unwrap_or(0);

    let settings = VmessSettings {
        uuid,
        alter_id,
        security: field(&data, "scy").unwrap_or_else(|| "auto".to_string()),
    };

    let host = field(&data, "host");
    let path = field(&data, "path");

    let tls = if field(&data, "tls").as_deref() == Some("tls") {
        TlsConfig::Tls(TlsSettings {
            server_name: field(&data, "sni")
                .or_else(|| host.clone())
                .unwrap_or_else(|| server.clone()),
            alpn: split_alpn(field(&data, "alpn").as_deref()),
            ..Default::default()
        })
    } else {
        TlsConfig::Disabled
    };

    let transport = match field(&data, "net").as_deref() {
        Some("ws") => Transport::Ws {
            path: path.unwrap_or_else(|| "/".to_string()),
            host: Some(host.unwrap_or_else(|| server.clone())),
        },
        // vmess links carry the gRPC service name in `path`
        Some("grpc") => Transport::Grpc {
            service_name: path.unwrap_or_default(),
        },
        Some("h2") | Some("http") => Transport::Http {
            path: path.unwrap_or_else(|| "/".to_string()),
            host: vec![host.unwrap_or_else(|| server.clone())],
        },
        _ => Transport::Tcp,
    };

    let name = field(&data, "ps").unwrap_or_else(|| "VMess Server".to_string());
    Ok(
        Tunnel::new(name, server, port, ProtocolSettings::Vmess(settings))
            .with_tls(tls)
            .with_transport(transport),
    )
}

/// Non-empty string or number field as a string.
fn field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
