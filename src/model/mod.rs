//! Stored entities: tunnels, groups, subscriptions, routing rules, devices
//! and services.

mod device;
mod group;
mod rule;
mod service;
mod subscription;
mod tunnel;

pub use device::{Device, DeviceList, DeviceMode};
pub use group::{GroupType, TunnelGroup};
pub use rule::{DomainMatchers, RoutingRule, RoutingTable};
pub use service::{Service, ServiceList, ServiceSource, SourceType};
pub use subscription::{Subscription, SubscriptionFormat};
pub use tunnel::{
    Hysteria2Settings, ProtocolSettings, RealitySettings, ShadowsocksSettings, TlsConfig,
    TlsSettings, Transport, TrojanSettings, Tunnel, TunnelSource, TunnelType, VlessSettings,
    VmessSettings,
};

pub(crate) fn default_true() -> bool {
    true
}

/// Short random identifier used for tunnels, groups, rules and subscriptions.
pub fn generate_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Lower-cased slug: ASCII alphanumerics are kept, every other run of
/// characters collapses into a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Fast  Servers!"), "fast-servers");
        assert_eq!(slugify("  EU / US "), "eu-us");
        assert_eq!(slugify("Ünïcode"), "n-code");
    }

    #[test]
    fn generated_ids_are_short_and_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }
}
