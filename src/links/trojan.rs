use super::{parse_host_port, url_decode, LinkError, SplitLink};
use crate::model::{ProtocolSettings, TlsConfig, TlsSettings, Tunnel, TrojanSettings};

/// `password@host:port?params#name`; TLS is always on.
pub(super) fn parse(rest: &str) -> Result<Tunnel, LinkError> {
    let link = SplitLink::new(rest);
    let (password, addr) = link.body.rsplit_once('@').ok_or(LinkError::MissingUserInfo)?;
    let password = url_decode(password);
    if password.is_empty() {
        return Err(LinkError::MissingField("password"));
    }
    let (server, port) = parse_host_port(addr)?;

    let tls = TlsConfig::Tls(TlsSettings {
        server_name: link.param("sni").unwrap_or(&server).to_string(),
        fingerprint: link.param("fp").map(str::to_string),
        alpn: link.alpn(),
        insecure: matches!(link.param("allowInsecure"), Some("1") | Some("true")),
    });
    let transport = link.transport(&server);

    Ok(Tunnel::new(
        link.name_or("Trojan Server"),
        server,
        port,
        ProtocolSettings::Trojan(TrojanSettings { password }),
    )
    .with_tls(tls)
    .with_transport(transport))
}
