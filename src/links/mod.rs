//! Share-link parsing: `vless://`, `vmess://`, `ss://`, `trojan://` and
//! `hy2://`/`hysteria2://` into [`Tunnel`] records.

mod hysteria2;
mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

pub(crate) use hysteria2::leading_number;

use std::collections::HashMap;

use base64::Engine;
use thiserror::Error;

use crate::model::{Transport, Tunnel};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("unsupported link scheme: {0}")]
    UnsupportedScheme(String),
    #[error("missing user info before '@'")]
    MissingUserInfo,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("payload is not valid base64")]
    InvalidBase64,
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Parse one share link. The scheme picks the protocol.
pub fn parse_share_link(link: &str) -> Result<Tunnel, LinkError> {
    let link = link.trim();

    if let Some(rest) = link.strip_prefix("vless://") {
        vless::parse(rest)
    } else if let Some(rest) = link.strip_prefix("vmess://") {
        vmess::parse(rest)
    } else if let Some(rest) = link.strip_prefix("ss://") {
        shadowsocks::parse(rest)
    } else if let Some(rest) = link.strip_prefix("trojan://") {
        trojan::parse(rest)
    } else if let Some(rest) = link
        .strip_prefix("hy2://")
        .or_else(|| link.strip_prefix("hysteria2://"))
    {
        hysteria2::parse(rest)
    } else {
        let scheme = link.split_once("://").map(|(s, _)| s).unwrap_or(link);
        Err(LinkError::UnsupportedScheme(scheme.chars().take(32).collect()))
    }
}

/// Parse every non-empty line as a share link, skipping the ones that fail.
pub fn parse_links(text: &str) -> Vec<Tunnel> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match parse_share_link(line) {
            Ok(tunnel) => Some(tunnel),
            Err(e) => {
                tracing::debug!(error = %e, "skipping share link");
                None
            }
        })
        .collect()
}

// ============================================================================
// Shared helpers
// ============================================================================

/// A link body split into `body?query#name`.
pub(crate) struct SplitLink<'a> {
    pub body: &'a str,
    pub query: HashMap<String, String>,
    pub name: Option<String>,
}

impl<'a> SplitLink<'a> {
    pub fn new(rest: &'a str) -> Self {
        let (content, name) = match rest.rsplit_once('#') {
            Some((c, n)) => (c, Some(url_decode(n)).filter(|n| !n.trim().is_empty())),
            None => (rest, None),
        };
        let (body, query) = match content.split_once('?') {
            Some((b, q)) => (b, parse_query(q)),
            None => (content, HashMap::new()),
        };
        Self { body, query, name }
    }

    /// Non-empty query value.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn name_or(&self, default: &str) -> String {
        self.name.clone().unwrap_or_else(|| default.to_string())
    }

    /// `type=ws|grpc|http|h2` with its path/host/serviceName parameters.
    pub fn transport(&self, server: &str) -> Transport {
        match self.param("type") {
            Some("ws") => Transport::Ws {
                path: self.param("path").unwrap_or("/").to_string(),
                host: Some(self.param("host").unwrap_or(server).to_string()),
            },
            Some("grpc") => Transport::Grpc {
                service_name: self.param("serviceName").unwrap_or_default().to_string(),
            },
            Some("http") | Some("h2") => Transport::Http {
                path: self.param("path").unwrap_or("/").to_string(),
                host: vec![self.param("host").unwrap_or(server).to_string()],
            },
            _ => Transport::Tcp,
        }
    }

    pub fn alpn(&self) -> Vec<String> {
        split_alpn(self.param("alpn"))
    }
}

/// Query string into a map; `+` is a space, blank values are dropped and
/// the last occurrence of a key wins.
pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let key = url_decode(&k.replace('+', " "));
            let value = url_decode(&v.replace('+', " "));
            (!key.is_empty() && !value.trim().is_empty()).then_some((key, value))
        })
        .collect()
}

/// `host:port` or `[v6]:port`.
pub(crate) fn parse_host_port(input: &str) -> Result<(String, u16), LinkError> {
    let input = input.trim().trim_end_matches('/');

    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| LinkError::InvalidAddress(input.to_string()))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| LinkError::InvalidAddress(input.to_string()))?;
        (host, port)
    } else {
        input
            .rsplit_once(':')
            .ok_or_else(|| LinkError::InvalidAddress(input.to_string()))?
    };

    if host.is_empty() {
        return Err(LinkError::InvalidAddress(input.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| LinkError::InvalidPort(port.to_string()))?;
    Ok((host.to_string(), port))
}

/// Decode standard or URL-safe base64, restoring stripped padding.
pub(crate) fn decode_base64(input: &str) -> Result<String, LinkError> {
    let mut cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    while cleaned.ends_with('=') {
        cleaned.pop();
    }
    match cleaned.len() % 4 {
        2 => cleaned.push_str("=="),
        3 => cleaned.push('='),
        _ => {}
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&cleaned)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(&cleaned))
        .map_err(|_| LinkError::InvalidBase64)?;
    String::from_utf8(bytes).map_err(|_| LinkError::InvalidBase64)
}

/// Percent-decode, keeping the input untouched when it is not valid UTF-8.
pub(crate) fn url_decode(input: &str) -> String {
    percent_encoding::percent_decode_str(input)
        .decode_utf8()
        .unwrap_or_else(|_| input.to_string().into())
        .into_owned()
}

pub(crate) fn split_alpn(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
