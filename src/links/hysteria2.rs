use super::{parse_host_port, url_decode, LinkError, SplitLink};
use crate::model::{Hysteria2Settings, ProtocolSettings, TlsConfig, TlsSettings, Tunnel};

/// `[password@]host:port?params#name`; TLS is always on.
pub(super) fn parse(rest: &str) -> Result<Tunnel, LinkError> {
    let link = SplitLink::new(rest);
    let (password, addr) = match link.body.rsplit_once('@') {
        Some((p, a)) => (url_decode(p), a),
        None => (String::new(), link.body),
    };
    let (server, port) = parse_host_port(addr)?;

    let settings = Hysteria2Settings {
        password,
        obfs_type: link.param("obfs").unwrap_or_default().to_string(),
        obfs_password: link.param("obfs-password").unwrap_or_default().to_string(),
        up_mbps: link.param("up").and_then(leading_number),
        down_mbps: link.param("down").and_then(leading_number),
    };

    let tls = TlsConfig::Tls(TlsSettings {
        server_name: link.param("sni").unwrap_or(&server).to_string(),
        fingerprint: None,
        alpn: link.alpn(),
        insecure: link.param("insecure") == Some("1"),
    });

    Ok(Tunnel::new(
        link.name_or("Hysteria2 Server"),
        server,
        port,
        ProtocolSettings::Hysteria2(settings),
    )
    .with_tls(tls))
}

/// `"100"`, `"100 mbps"` -> 100. Zero means "unset".
pub(crate) fn leading_number(value: &str) -> Option<u32> {
    let digits: String = value.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_takes_leading_digits() {
        assert_eq!(leading_number("100 mbps"), Some(100));
        assert_eq!(leading_number("50"), Some(50));
        assert_eq!(leading_number("0"), None);
        assert_eq!(leading_number("fast"), None);
    }
}
