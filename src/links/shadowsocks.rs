use super::{decode_base64, parse_host_port, url_decode, LinkError, SplitLink};
use crate::model::{ProtocolSettings, ShadowsocksSettings, Tunnel};

/// SIP002 `base64(method:password)@host:port[/?plugin=..]#name` or legacy
/// `base64(method:password@host:port)#name`.
pub(super) fn parse(rest: &str) -> Result<Tunnel, LinkError> {
    let link = SplitLink::new(rest);
    let body = link.body.trim_end_matches('/');

    let (method, password, server, port) = match body.rsplit_once('@') {
        Some((user_info, addr)) => {
            let (method, password) = decode_user_info(user_info)?;
            let (server, port) = parse_host_port(addr)?;
            (method, password, server, port)
        }
        None => {
            let decoded = decode_base64(body)?;
            let (user_info, addr) = decoded
                .rsplit_once('@')
                .ok_or(LinkError::MissingUserInfo)?;
            let (method, password) = split_method(user_info)?;
            let (server, port) = parse_host_port(addr)?;
            (method, password, server, port)
        }
    };

    Ok(Tunnel::new(
        link.name_or("Shadowsocks Server"),
        server,
        port,
        ProtocolSettings::Shadowsocks(ShadowsocksSettings { method, password }),
    ))
}

/// SIP002 user info is base64, but 2022 ciphers may appear percent-encoded.
fn decode_user_info(user_info: &str) -> Result<(String, String), LinkError> {
    match decode_base64(user_info) {
        Ok(decoded) if decoded.contains(':') => split_method(&decoded),
        _ => split_method(&url_decode(user_info)),
    }
}

fn split_method(user_info: &str) -> Result<(String, String), LinkError> {
    let (method, password) = user_info
        .split_once(':')
        .ok_or(LinkError::MissingUserInfo)?;
    if method.is_empty() {
        return Err(LinkError::MissingField("method"));
    }
    Ok((method.to_string(), password.to_string()))
}
