//! Parsers for downloaded IP and domain lists.
//!
//! Every parser returns a sorted, de-duplicated list.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::model::SourceType;

/// Prefix length of a dotted netmask; anything that is not a valid
/// contiguous mask is treated as a host route.
pub fn mask_to_prefix(mask: &str) -> u32 {
    match mask.parse::<Ipv4Addr>() {
        Ok(addr) => {
            let bits = u32::from(addr);
            let prefix = bits.leading_ones();
            if bits.checked_shl(prefix).unwrap_or(0) == 0 {
                prefix
            } else {
                32
            }
        }
        Err(_) => 32,
    }
}

/// `route add <ip> mask <mask> <gateway>` lines, any case.
pub fn parse_keenetic(content: &str) -> Vec<String> {
    let mut cidrs = BTreeSet::new();
    for line in content.lines().map(str::trim) {
        if !line.to_lowercase().starts_with("route add") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 5 {
            cidrs.insert(format!("{}/{}", parts[2], mask_to_prefix(parts[4])));
        }
    }
    cidrs.into_iter().collect()
}

fn plain_entry(line: &str) -> Option<String> {
    let (addr, prefix) = match line.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (line, None),
    };
    let octets: Vec<&str> = addr.split('.').collect();
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if octets.len() != 4 || !octets.iter().all(|o| numeric(o)) {
        return None;
    }
    match prefix {
        Some(p) if numeric(p) => Some(format!("{addr}/{p}")),
        Some(_) => None,
        None => Some(format!("{addr}/32")),
    }
}

/// One IPv4 address or CIDR per line; bare addresses become `/32` and
/// `#` lines are comments.
pub fn parse_plain(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(plain_entry)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn parse_domains(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.strip_prefix("*.").unwrap_or(l))
        .filter(|l| l.contains('.') && !l.starts_with('.'))
        .map(str::to_lowercase)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parse `content` as `kind`. `Domains` yields domains, everything else
/// CIDRs.
pub fn parse_list(content: &str, kind: SourceType) -> Vec<String> {
    match kind {
        SourceType::Domains => parse_domains(content),
        SourceType::Keenetic => parse_keenetic(content),
        SourceType::Ip | SourceType::Plain => parse_plain(content),
        SourceType::Auto if content.contains("route add") => parse_keenetic(content),
        SourceType::Auto => parse_plain(content),
    }
}
