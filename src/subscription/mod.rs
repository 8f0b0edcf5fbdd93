//! Bulk subscription payloads: base64 link lists, Clash YAML and sing-box
//! JSON.

mod clash;
mod singbox;

use crate::links::{self, decode_base64};
use crate::model::{SubscriptionFormat, Tunnel, TunnelSource};

/// Parse a subscription payload. Bad entries are skipped one by one; the
/// result is empty when nothing usable was found. The caller assigns the
/// owning subscription id.
pub fn parse_subscription(content: &str, format: SubscriptionFormat) -> Vec<Tunnel> {
    let content = content.trim();

    let tunnels = match format {
        SubscriptionFormat::Singbox => singbox::parse(content),
        SubscriptionFormat::Clash => clash::parse(content),
        SubscriptionFormat::Auto if content.starts_with('{') => singbox::parse(content),
        SubscriptionFormat::Auto if looks_like_clash(content) => clash::parse(content),
        SubscriptionFormat::Auto | SubscriptionFormat::Base64 => {
            let decoded = parse_base64(content);
            if decoded.is_empty() {
                links::parse_links(content)
            } else {
                decoded
            }
        }
    };

    tracing::debug!(?format, count = tunnels.len(), "parsed subscription");

    tunnels
        .into_iter()
        .map(|mut tunnel| {
            tunnel.source = TunnelSource::Subscription;
            tunnel
        })
        .collect()
}

fn parse_base64(content: &str) -> Vec<Tunnel> {
    match decode_base64(content) {
        Ok(decoded) => links::parse_links(&decoded),
        Err(_) => Vec::new(),
    }
}

/// Only a payload that opens with the `proxies:` key is taken for Clash.
fn looks_like_clash(content: &str) -> bool {
    content.starts_with("proxies:")
}
