use super::{parse_host_port, url_decode, LinkError, SplitLink};
use crate::model::{
    ProtocolSettings, RealitySettings, TlsConfig, TlsSettings, Tunnel, VlessSettings,
};

/// `uuid@host:port?params#name`
pub(super) fn parse(rest: &str) -> Result<Tunnel, LinkError> {
    let link = SplitLink::new(rest);
    let (uuid, addr) = link.body.split_once('@').ok_or(LinkError::MissingUserInfo)?;
    let uuid = url_decode(uuid);
    if uuid.is_empty() {
        return Err(LinkError::MissingField("uuid"));
    }
    let (server, port) = parse_host_port(addr)?;

    let settings = VlessSettings {
        uuid,
        flow: link.param("flow").unwrap_or_default().to_string(),
        encryption: link.param("encryption").unwrap_or("none").to_string(),
    };

    let tls = match link.param("security") {
        Some("reality") => TlsConfig::Reality(RealitySettings {
            server_name: link.param("sni").unwrap_or_default().to_string(),
            fingerprint: link.param("fp").unwrap_or("chrome").to_string(),
            public_key: link.param("pbk").unwrap_or_default().to_string(),
            short_id: link.param("sid").unwrap_or_default().to_string(),
        }),
        Some("tls") | Some("xtls") => TlsConfig::Tls(TlsSettings {
            server_name: link.param("sni").unwrap_or(&server).to_string(),
            fingerprint: link.param("fp").map(str::to_string),
            alpn: link.alpn(),
            insecure: false,
        }),
        _ => TlsConfig::Disabled,
    };
    let transport = link.transport(&server);

    Ok(Tunnel::new(
        link.name_or("VLESS Server"),
        server,
        port,
        ProtocolSettings::Vless(settings),
    )
    .with_tls(tls)
    .with_transport(transport))
}
