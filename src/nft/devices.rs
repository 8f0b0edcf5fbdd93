//! Per-device routing overrides compiled into nft rules and sets.
//!
//! Every rule this module creates carries a `pinpoint: device <id> ...`
//! comment and every set is named `device_<id>`. A compile run first removes
//! everything matching those markers and then recreates the planned state,
//! so running it twice leaves the same rules in place.
//!
//! Rules are inserted at the head of the chain in reverse plan order. The
//! chain then starts with the planned rules in plan order, ahead of the
//! global `tunnel_nets` marking rule.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use super::{Nft, NftError};
use crate::model::{Device, DeviceList, DeviceMode, ServiceList};

pub const RULE_MARKER: &str = "pinpoint: device ";
pub const SET_PREFIX: &str = "device_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedRule {
    pub device_id: String,
    /// Everything between the chain name and the comment.
    pub statement: Vec<String>,
    pub comment: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSet {
    pub name: String,
    pub elements: BTreeSet<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DevicePlan {
    pub sets: Vec<DeviceSet>,
    /// In the order they must appear at the head of the chain.
    pub rules: Vec<PlannedRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub removed_rules: usize,
    pub removed_sets: usize,
    pub added_rules: usize,
    pub added_elements: usize,
    pub failed_commands: usize,
}

pub fn set_name(device_id: &str) -> String {
    let id: String = device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{SET_PREFIX}{id}")
}

/// `a.b.c.d` or `a.b.c.d/len`; anything else cannot go into an ipv4 set.
fn is_ipv4_element(entry: &str) -> bool {
    let (addr, prefix) = match entry.split_once('/') {
        Some((addr, len)) => (addr, Some(len)),
        None => (entry, None),
    };
    addr.parse::<Ipv4Addr>().is_ok()
        && prefix.map_or(true, |len| len.parse::<u8>().is_ok_and(|len| len <= 32))
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Work out the sets and rules for every enabled device.
///
/// `service_cidrs` maps a service id to its downloaded CIDR list. Devices
/// that are disabled, in `default` mode, or whose ip is not an IPv4 address
/// produce nothing.
pub fn plan(
    devices: &DeviceList,
    services: &ServiceList,
    service_cidrs: &BTreeMap<String, Vec<String>>,
    mark: &str,
) -> DevicePlan {
    let mut plan = DevicePlan::default();

    for device in devices.devices.iter().filter(|d| d.enabled) {
        let ip = device.ip.trim();
        if ip.parse::<Ipv4Addr>().is_err() {
            tracing::warn!(device = %device.id, ip, "device ip is not IPv4, skipped");
            continue;
        }
        let rule = |statement: String, label: &str| PlannedRule {
            device_id: device.id.clone(),
            statement: words(&statement),
            comment: format!("{RULE_MARKER}{} {label}", device.id),
        };

        match device.mode {
            DeviceMode::Default => {}
            DeviceMode::VpnAll => plan.rules.push(rule(
                format!("ip saddr {ip} meta mark set {mark} counter"),
                "vpn_all",
            )),
            DeviceMode::DirectAll => {
                plan.rules
                    .push(rule(format!("ip saddr {ip} return"), "direct_all"));
            }
            DeviceMode::Custom => {
                let set = DeviceSet {
                    name: set_name(&device.id),
                    elements: custom_elements(device, services, service_cidrs),
                };
                plan.rules.push(rule(
                    format!("ip saddr {ip} ip daddr @{} meta mark set {mark} counter", set.name),
                    "custom",
                ));
                // keeps the global tunnel_nets rule from also matching this device
                plan.rules
                    .push(rule(format!("ip saddr {ip} return"), "skip global"));
                plan.sets.push(set);
            }
        }
    }
    plan
}

fn custom_elements(
    device: &Device,
    services: &ServiceList,
    service_cidrs: &BTreeMap<String, Vec<String>>,
) -> BTreeSet<String> {
    let mut entries: Vec<&String> = device.custom_ips.iter().collect();
    for service_id in &device.services {
        if let Some(service) = services.get(service_id) {
            entries.extend(&service.custom_ips);
        }
        if let Some(cidrs) = service_cidrs.get(service_id) {
            entries.extend(cidrs);
        }
    }

    entries
        .into_iter()
        .map(|e| e.trim())
        .filter(|e| {
            let ok = is_ipv4_element(e);
            if !ok && !e.is_empty() {
                tracing::debug!(device = %device.id, entry = e, "not an IPv4 element, skipped");
            }
            ok
        })
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Apply
// ============================================================================

/// Remove every previously generated device rule and set, then install
/// `plan`. Failing to list the current rules aborts before anything is
/// added; individual add/delete failures are counted and skipped.
pub async fn compile(nft: &Nft, chain: &str, plan: &DevicePlan) -> Result<CompileReport, NftError> {
    let mut report = CompileReport::default();

    cleanup(nft, chain, &mut report).await?;

    for set in &plan.sets {
        if let Err(err) = nft.add_ipv4_set(&set.name).await {
            tracing::warn!(set = %set.name, error = %err, "failed to create device set");
            report.failed_commands += 1;
            continue;
        }
        for element in &set.elements {
            match nft.add_element(&set.name, element).await {
                Ok(()) => report.added_elements += 1,
                Err(err) => {
                    tracing::debug!(set = %set.name, element, error = %err, "failed to add element");
                    report.failed_commands += 1;
                }
            }
        }
    }

    for rule in plan.rules.iter().rev() {
        match nft.insert_rule(chain, &rule.statement, &rule.comment).await {
            Ok(()) => report.added_rules += 1,
            Err(err) => {
                tracing::warn!(device = %rule.device_id, comment = %rule.comment, error = %err, "failed to insert device rule");
                report.failed_commands += 1;
            }
        }
    }

    tracing::info!(
        removed = report.removed_rules,
        added = report.added_rules,
        elements = report.added_elements,
        failed = report.failed_commands,
        "device rules compiled"
    );
    Ok(report)
}

async fn cleanup(nft: &Nft, chain: &str, report: &mut CompileReport) -> Result<(), NftError> {
    let stale: Vec<u64> = nft
        .list_rules(chain)
        .await?
        .into_iter()
        .filter(|r| r.comment.as_deref().is_some_and(|c| c.starts_with(RULE_MARKER)))
        .map(|r| r.handle)
        .collect();

    for handle in stale.into_iter().rev() {
        match nft.delete_rule(chain, handle).await {
            Ok(()) => report.removed_rules += 1,
            Err(err) => {
                tracing::warn!(handle, error = %err, "failed to delete device rule");
                report.failed_commands += 1;
            }
        }
    }

    // rules referencing the sets are gone, so the sets can be dropped
    for set in nft.list_sets().await? {
        if !set.name.starts_with(SET_PREFIX) {
            continue;
        }
        match nft.delete_set(&set.name).await {
            Ok(()) => report.removed_sets += 1,
            Err(err) => {
                tracing::warn!(set = %set.name, error = %err, "failed to delete device set");
                report.failed_commands += 1;
            }
        }
    }
    Ok(())
}
