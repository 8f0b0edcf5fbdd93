//! Tunnels, groups and routing rules into a sing-box configuration.
//!
//! Generation is a pure function of its inputs: the same tunnels, groups,
//! rules and active outbound always produce the same document. Rules that
//! point at an outbound missing from the output are dropped silently.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::outbound::{
    Hysteria2Outbound, Inbound, LogConfig, Obfs, Outbound, OutboundTls, Reality, RouteConfig,
    RouteRule, ShadowsocksOutbound, SingBoxConfig, TrojanOutbound, TunInbound, Utls,
    V2rayTransport, VlessOutbound, VmessOutbound,
};
use crate::config::{SingBoxSettings, TunSettings};
use crate::model::{
    GroupType, ProtocolSettings, RoutingTable, TlsConfig, Transport, Tunnel, TunnelGroup,
};

pub const DIRECT_TAG: &str = "direct-out";
pub const TUN_INBOUND_TAG: &str = "tun-in";

const DEFAULT_TOLERANCE: u32 = 50;

/// Fixed parts of the document that come from settings.
#[derive(Clone, Debug)]
pub struct GeneratorOptions {
    pub log_level: String,
    pub probe_url: String,
    pub tun: TunSettings,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self::from_settings(&SingBoxSettings::default())
    }
}

impl GeneratorOptions {
    pub fn from_settings(settings: &SingBoxSettings) -> Self {
        Self {
            log_level: settings.log_level.clone(),
            probe_url: settings.probe_url.clone(),
            tun: settings.tun.clone(),
        }
    }
}

/// Build the full configuration document.
pub fn generate(
    tunnels: &[Tunnel],
    groups: &[TunnelGroup],
    routing: &RoutingTable,
    active_outbound: Option<&str>,
    opts: &GeneratorOptions,
) -> SingBoxConfig {
    let enabled: Vec<&Tunnel> = tunnels.iter().filter(|t| t.enabled).collect();

    let mut outbounds = vec![Outbound::Direct {
        tag: DIRECT_TAG.to_string(),
    }];
    outbounds.extend(enabled.iter().map(|t| tunnel_outbound(t)));

    let by_id: HashMap<&str, &Tunnel> = enabled.iter().map(|t| (t.id.as_str(), *t)).collect();
    let mut valid: HashSet<String> = outbounds.iter().map(|o| o.tag().to_string()).collect();

    for group in groups {
        let members = group_members(group, &by_id);
        if members.is_empty() {
            tracing::debug!(group = %group.name, "group has no enabled members, not emitted");
            continue;
        }
        if valid.contains(&group.tag) {
            tracing::warn!(group = %group.name, tag = %group.tag, "duplicate outbound tag, group skipped");
            continue;
        }
        valid.insert(group.tag.clone());
        outbounds.push(group_outbound(group, members, opts));
    }

    let mut rules: Vec<RouteRule> = routing
        .rules
        .iter()
        .filter(|rule| rule.enabled)
        .filter_map(|rule| {
            if !valid.contains(&rule.outbound) {
                tracing::debug!(rule = %rule.name, outbound = %rule.outbound, "rule target is not an active outbound, omitted");
                return None;
            }
            let m = rule.matchers();
            if m.is_empty() {
                return None;
            }
            Some(RouteRule {
                domain: m.domains,
                domain_suffix: m.suffixes,
                domain_keyword: m.keywords,
                outbound: rule.outbound.clone(),
                ..Default::default()
            })
        })
        .collect();

    let default_outbound = [routing.default_outbound.as_deref(), active_outbound]
        .into_iter()
        .flatten()
        .find(|tag| valid.contains(*tag))
        .map(str::to_string)
        .or_else(|| enabled.first().map(|t| t.tag()));

    if let Some(outbound) = default_outbound {
        rules.push(RouteRule {
            inbound: vec![TUN_INBOUND_TAG.to_string()],
            outbound,
            ..Default::default()
        });
    }

    SingBoxConfig {
        log: LogConfig {
            level: opts.log_level.clone(),
        },
        inbounds: vec![Inbound::Tun(TunInbound {
            tag: TUN_INBOUND_TAG.to_string(),
            interface_name: opts.tun.interface_name.clone(),
            inet4_address: opts.tun.address.clone(),
            mtu: opts.tun.mtu,
            auto_route: false,
            sniff: true,
            stack: opts.tun.stack.clone(),
        })],
        outbounds,
        route: RouteConfig {
            auto_detect_interface: true,
            rules,
        },
    }
}

/// Enabled member tags in group order, without duplicates.
fn group_members(group: &TunnelGroup, by_id: &HashMap<&str, &Tunnel>) -> Vec<String> {
    let mut seen = HashSet::new();
    group
        .tunnels
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|t| t.tag())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

fn group_outbound(group: &TunnelGroup, members: Vec<String>, opts: &GeneratorOptions) -> Outbound {
    let interval = || {
        group
            .interval
            .clone()
            .or_else(|| group.kind.default_interval().map(str::to_string))
            .unwrap_or_default()
    };

    match group.kind {
        GroupType::Selector => Outbound::Selector {
            tag: group.tag.clone(),
            default: members
                .first()
                .cloned()
                .unwrap_or_else(|| DIRECT_TAG.to_string()),
            outbounds: members,
        },
        GroupType::Urltest => Outbound::Urltest {
            tag: group.tag.clone(),
            outbounds: members,
            url: opts.probe_url.clone(),
            interval: interval(),
            tolerance: Some(group.tolerance.unwrap_or(DEFAULT_TOLERANCE)),
        },
        // sing-box has no dedicated fallback type; a short-interval urltest
        // without tolerance switches as soon as the current member fails
        GroupType::Fallback => Outbound::Urltest {
            tag: group.tag.clone(),
            outbounds: members,
            url: opts.probe_url.clone(),
            interval: interval(),
            tolerance: None,
        },
    }
}

// ============================================================================
// Per-tunnel outbounds
// ============================================================================

pub fn tunnel_outbound(tunnel: &Tunnel) -> Outbound {
    let tag = tunnel.tag();
    let server = tunnel.server.clone();
    let server_port = tunnel.port;
    let tls = tls_block(tunnel);
    let transport = transport_block(&tunnel.transport);

    match &tunnel.settings {
        ProtocolSettings::Vless(s) => Outbound::Vless(VlessOutbound {
            tag,
            server,
            server_port,
            uuid: s.uuid.clone(),
            flow: Some(s.flow.clone()).filter(|f| !f.is_empty()),
            tls,
            transport,
        }),
        ProtocolSettings::Vmess(s) => Outbound::Vmess(VmessOutbound {
            tag,
            server,
            server_port,
            uuid: s.uuid.clone(),
            alter_id: s.alter_id,
            security: s.security.clone(),
            tls,
            transport,
        }),
        ProtocolSettings::Shadowsocks(s) => Outbound::Shadowsocks(ShadowsocksOutbound {
            tag,
            server,
            server_port,
            method: s.method.clone(),
            password: s.password.clone(),
        }),
        ProtocolSettings::Trojan(s) => Outbound::Trojan(TrojanOutbound {
            tag,
            server,
            server_port,
            password: s.password.clone(),
            tls,
            transport,
        }),
        ProtocolSettings::Hysteria2(s) => Outbound::Hysteria2(Hysteria2Outbound {
            tag,
            server,
            server_port,
            password: s.password.clone(),
            obfs: (!s.obfs_type.is_empty()).then(|| Obfs {
                obfs_type: s.obfs_type.clone(),
                password: s.obfs_password.clone(),
            }),
            up_mbps: s.up_mbps,
            down_mbps: s.down_mbps,
            tls,
        }),
    }
}

fn tls_block(tunnel: &Tunnel) -> Option<OutboundTls> {
    match &tunnel.tls {
        TlsConfig::Disabled => None,
        TlsConfig::Tls(t) => Some(OutboundTls {
            enabled: true,
            server_name: if t.server_name.is_empty() {
                tunnel.server.clone()
            } else {
                t.server_name.clone()
            },
            insecure: t.insecure,
            alpn: t.alpn.clone(),
            utls: t.fingerprint.clone().filter(|f| !f.is_empty()).map(|fingerprint| Utls {
                enabled: true,
                fingerprint,
            }),
            reality: None,
        }),
        TlsConfig::Reality(r) => Some(OutboundTls {
            enabled: true,
            server_name: r.server_name.clone(),
            utls: Some(Utls {
                enabled: true,
                fingerprint: if r.fingerprint.is_empty() {
                    "chrome".to_string()
                } else {
                    r.fingerprint.clone()
                },
            }),
            reality: Some(Reality {
                enabled: true,
                public_key: r.public_key.clone(),
                short_id: r.short_id.clone(),
            }),
            ..Default::default()
        }),
    }
}

fn transport_block(transport: &Transport) -> Option<V2rayTransport> {
    match transport {
        Transport::Tcp => None,
        Transport::Ws { path, host } => {
            let mut headers = BTreeMap::new();
            if let Some(host) = host.as_ref().filter(|h| !h.is_empty()) {
                headers.insert("Host".to_string(), host.clone());
            }
            Some(V2rayTransport::Ws {
                path: path.clone(),
                headers,
            })
        }
        Transport::Grpc { service_name } => Some(V2rayTransport::Grpc {
            service_name: service_name.clone(),
        }),
        Transport::Http { path, host } => Some(V2rayTransport::Http {
            path: path.clone(),
            host: host.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoutingRule, TrojanSettings, VlessSettings};

    fn vless(id: &str) -> Tunnel {
        let mut t = Tunnel::new(
            id,
            "1.2.3.4",
            443,
            ProtocolSettings::Vless(VlessSettings {
                uuid: "u".into(),
                flow: String::new(),
                encryption: "none".into(),
            }),
        );
        t.id = id.into();
        t
    }

    fn group(name: &str, kind: GroupType, members: &[&str]) -> TunnelGroup {
        TunnelGroup {
            id: name.into(),
            name: name.into(),
            tag: TunnelGroup::tag_for(name),
            kind,
            tunnels: members.iter().map(|m| m.to_string()).collect(),
            interval: None,
            tolerance: None,
        }
    }

    fn rule(outbound: &str, domains: &[&str]) -> RoutingRule {
        RoutingRule {
            id: outbound.into(),
            name: outbound.into(),
            outbound: outbound.into(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            domain_keywords: vec![],
            enabled: true,
            service_id: None,
        }
    }

    #[test]
    fn disabled_members_and_empty_groups_are_dropped() {
        let mut b = vless("b");
        b.enabled = false;
        let tunnels = vec![vless("a"), b];
        let groups = vec![
            group("Main", GroupType::Selector, &["b", "a", "a"]),
            group("Empty", GroupType::Urltest, &["b"]),
        ];
        let config = generate(
            &tunnels,
            &groups,
            &RoutingTable::default(),
            None,
            &GeneratorOptions::default(),
        );

        let tags: Vec<&str> = config.outbound_tags().collect();
        assert_eq!(tags, vec![DIRECT_TAG, "vless-a", "group-main"]);
        match &config.outbounds[2] {
            Outbound::Selector { outbounds, default, .. } => {
                assert_eq!(outbounds, &vec!["vless-a".to_string()]);
                assert_eq!(default, "vless-a");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fallback_is_urltest_without_tolerance() {
        let tunnels = vec![vless("a")];
        let groups = vec![group("Backup", GroupType::Fallback, &["a"])];
        let config = generate(
            &tunnels,
            &groups,
            &RoutingTable::default(),
            None,
            &GeneratorOptions::default(),
        );
        assert!(matches!(
            &config.outbounds[2],
            Outbound::Urltest { interval, tolerance: None, .. } if interval == "1m"
        ));
    }

    #[test]
    fn colliding_group_tags_keep_the_first() {
        let tunnels = vec![vless("a"), vless("b")];
        let groups = vec![
            group("EU fast", GroupType::Selector, &["a"]),
            group("EU-Fast!", GroupType::Selector, &["b"]),
        ];
        let config = generate(
            &tunnels,
            &groups,
            &RoutingTable::default(),
            None,
            &GeneratorOptions::default(),
        );
        let groups: Vec<_> = config
            .outbounds
            .iter()
            .filter(|o| matches!(o, Outbound::Selector { .. }))
            .collect();
        assert_eq!(groups.len(), 1);
        assert!(matches!(groups[0], Outbound::Selector { default, .. } if default == "vless-a"));
    }

    #[test]
    fn default_outbound_resolution_order() {
        let tunnels = vec![vless("a"), vless("b")];
        let opts = GeneratorOptions::default();
        let last = |c: &SingBoxConfig| c.route.rules.last().map(|r| r.outbound.clone());

        let mut table = RoutingTable {
            default_outbound: Some("vless-b".into()),
            rules: vec![],
        };
        assert_eq!(last(&generate(&tunnels, &[], &table, Some("vless-a"), &opts)).as_deref(), Some("vless-b"));

        table.default_outbound = Some("gone".into());
        assert_eq!(last(&generate(&tunnels, &[], &table, Some("vless-b"), &opts)).as_deref(), Some("vless-b"));
        assert_eq!(last(&generate(&tunnels, &[], &table, Some("gone"), &opts)).as_deref(), Some("vless-a"));

        let none = generate(&[], &[], &table, None, &opts);
        assert!(none.route.rules.is_empty());
    }

    #[test]
    fn rules_need_a_matcher() {
        let tunnels = vec![vless("a")];
        let table = RoutingTable {
            default_outbound: None,
            rules: vec![rule("vless-a", &[]), rule(DIRECT_TAG, &["*.lan"])],
        };
        let config = generate(&tunnels, &[], &table, None, &GeneratorOptions::default());
        assert_eq!(config.route.rules.len(), 2);
        assert_eq!(config.route.rules[0].outbound, DIRECT_TAG);
        assert_eq!(config.route.rules[0].domain_suffix, vec!["lan"]);
        assert_eq!(config.route.rules[1].inbound, vec![TUN_INBOUND_TAG]);
    }

    #[test]
    fn trojan_outbound_shape() {
        let mut t = Tunnel::new(
            "t",
            "t.example.com",
            443,
            ProtocolSettings::Trojan(TrojanSettings { password: "pw".into() }),
        )
        .with_tls(TlsConfig::Tls(Default::default()))
        .with_transport(Transport::Ws {
            path: "/ws".into(),
            host: Some("cdn.example.com".into()),
        });
        t.id = "x".into();

        let value = serde_json::to_value(tunnel_outbound(&t)).unwrap();
        assert_eq!(value["type"], "trojan");
        assert_eq!(value["tag"], "trojan-x");
        assert_eq!(value["server_port"], 443);
        assert_eq!(value["tls"]["server_name"], "t.example.com");
        assert_eq!(value["transport"]["type"], "ws");
        assert_eq!(value["transport"]["headers"]["Host"], "cdn.example.com");
        assert!(value["tls"].get("insecure").is_none());
    }
}
