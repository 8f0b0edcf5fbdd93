//! The dnsmasq snippet that makes resolved addresses land in the nft set.

use std::collections::BTreeSet;

use crate::config::{DnsmasqSettings, NftSettings};

const HEADER: &[&str] = &[
    "# PinPoint - domain routing via nftset",
    "# Auto-generated - do not edit manually",
    "#",
    "# Addresses resolved for the domains below are added to the",
    "# nftables set used for policy routing",
];

/// Render the configuration file for `domains`.
///
/// Each domain becomes one `nftset=` directive binding its IPv4 answers to
/// the tunnel IP set. Domains in `block_ipv6_domains` are additionally
/// answered with `::` so clients fall back to IPv4.
pub fn render(domains: &BTreeSet<String>, nft: &NftSettings, dnsmasq: &DnsmasqSettings) -> String {
    let mut lines: Vec<String> = HEADER.iter().map(|s| s.to_string()).collect();
    lines.push(String::new());

    lines.extend(domains.iter().filter(|d| !d.is_empty()).map(|domain| {
        format!(
            "nftset=/{domain}/4#{}#{}#{}",
            nft.family, nft.table, nft.tunnel_ips_set
        )
    }));

    if !dnsmasq.block_ipv6_domains.is_empty() {
        lines.push(String::new());
        lines.push("# Force IPv4 for these domains".to_string());
        lines.extend(
            dnsmasq
                .block_ipv6_domains
                .iter()
                .map(|domain| format!("address=/{domain}/::")),
        );
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sorted_nftset_lines_and_ipv6_blocks() {
        let domains: BTreeSet<String> = ["youtube.com", "b.org", "a.net"]
            .into_iter()
            .map(String::from)
            .collect();
        let dnsmasq = DnsmasqSettings {
            block_ipv6_domains: vec!["googlevideo.com".into()],
            ..Default::default()
        };
        let text = render(&domains, &NftSettings::default(), &dnsmasq);

        let directives: Vec<&str> = text.lines().filter(|l| l.starts_with("nftset=")).collect();
        assert_eq!(
            directives,
            vec![
                "nftset=/a.net/4#inet#pinpoint#tunnel_ips",
                "nftset=/b.org/4#inet#pinpoint#tunnel_ips",
                "nftset=/youtube.com/4#inet#pinpoint#tunnel_ips",
            ]
        );
        assert!(text.contains("\naddress=/googlevideo.com/::\n"));
        assert!(text.starts_with("# PinPoint"));
    }

    #[test]
    fn no_ipv6_section_when_nothing_blocked() {
        let text = render(&BTreeSet::new(), &NftSettings::default(), &DnsmasqSettings::default());
        assert!(!text.contains("address="));
    }
}
