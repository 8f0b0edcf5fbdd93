mod common;

use std::sync::Arc;

use common::FakeSystem;
use pinpoint::model::{Device, DeviceList, DeviceMode, Service, ServiceList};
use pinpoint::store::Repository;
use pinpoint::{Engine, Settings};

fn device(id: &str, ip: &str, mode: DeviceMode) -> Device {
    Device {
        id: id.into(),
        name: id.into(),
        ip: ip.into(),
        mac: String::new(),
        mode,
        services: vec![],
        custom_domains: vec![],
        custom_ips: vec![],
        enabled: true,
    }
}

fn youtube() -> Service {
    Service {
        id: "yt".into(),
        name: "YouTube".into(),
        enabled: true,
        domains: vec!["youtube.com".into()],
        custom_domains: vec![],
        ip_ranges: vec!["142.250.0.0/15".into()],
        custom_ips: vec!["8.8.8.8".into()],
        sources: vec![],
    }
}

fn settings(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = dir.join("data");
    settings.dnsmasq.config_path = dir.join("dnsmasq.d").join("pinpoint.conf");
    settings.singbox.config_path = dir.join("sing-box").join("config.json");
    settings
}

async fn engine_with(dir: &std::path::Path, fake: &Arc<FakeSystem>, devices: Vec<Device>) -> Engine {
    let repo = Repository::in_memory();
    repo.save_devices(&DeviceList { devices }).await.unwrap();
    repo.save_services(&ServiceList {
        services: vec![youtube()],
    })
    .await
    .unwrap();
    Engine::new(settings(dir), repo, fake.clone())
}

fn household() -> Vec<Device> {
    let mut phone = device("phone", "192.168.1.10", DeviceMode::Custom);
    phone.services = vec!["yt".into()];
    phone.custom_ips = vec!["1.1.1.1".into(), "2606:4700::1111".into()];

    let mut old = device("old", "192.168.1.40", DeviceMode::VpnAll);
    old.enabled = false;

    vec![
        phone,
        device("tv", "192.168.1.20", DeviceMode::VpnAll),
        device("laptop", "192.168.1.30", DeviceMode::DirectAll),
        old,
        device("printer", "192.168.1.50", DeviceMode::Default),
        device("v6", "fe80::1", DeviceMode::VpnAll),
    ]
}

const EXPECTED_CHAIN: [&str; 5] = [
    "ip saddr 192.168.1.10 ip daddr @device_phone meta mark set 0x100 counter",
    "ip saddr 192.168.1.10 return",
    "ip saddr 192.168.1.20 meta mark set 0x100 counter",
    "ip saddr 192.168.1.30 return",
    "ip daddr @tunnel_nets meta mark set 0x100 counter",
];

#[tokio::test]
async fn compiled_rules_sit_ahead_of_the_global_rule() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeSystem::with_global_rule();
    let engine = engine_with(dir.path(), &fake, household()).await;

    let report = engine.compile_devices().await.unwrap();
    assert_eq!(report.added_rules, 4);
    assert_eq!(report.removed_rules, 0);
    assert_eq!(report.failed_commands, 0);

    let state = fake.state();
    assert_eq!(state.statements(), EXPECTED_CHAIN.to_vec());
    assert_eq!(
        state.rules[0].comment.as_deref(),
        Some("pinpoint: device phone custom")
    );
    assert_eq!(
        state.rules[1].comment.as_deref(),
        Some("pinpoint: device phone skip global")
    );

    // only IPv4 entries make it into the device set
    let set: Vec<&str> = state.sets["device_phone"].iter().map(String::as_str).collect();
    assert_eq!(set, vec!["1.1.1.1", "8.8.8.8"]);
}

#[tokio::test]
async fn compiling_twice_leaves_one_copy() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeSystem::with_global_rule();
    let engine = engine_with(dir.path(), &fake, household()).await;

    engine.compile_devices().await.unwrap();
    let second = engine.compile_devices().await.unwrap();
    assert_eq!(second.removed_rules, 4);
    assert_eq!(second.removed_sets, 1);
    assert_eq!(second.added_rules, 4);

    let state = fake.state();
    assert_eq!(state.statements(), EXPECTED_CHAIN.to_vec());
    let device_sets: Vec<&String> = state
        .sets
        .keys()
        .filter(|name| name.starts_with("device_"))
        .collect();
    assert_eq!(device_sets, vec!["device_phone"]);
}

#[tokio::test]
async fn direct_devices_never_get_a_mark() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeSystem::with_global_rule();
    let engine = engine_with(
        dir.path(),
        &fake,
        vec![device("laptop", "192.168.1.30", DeviceMode::DirectAll)],
    )
    .await;

    engine.compile_devices().await.unwrap();

    let state = fake.state();
    let laptop: Vec<&str> = state
        .statements()
        .into_iter()
        .filter(|s| s.contains("192.168.1.30"))
        .collect();
    assert_eq!(laptop, vec!["ip saddr 192.168.1.30 return"]);
}

#[tokio::test]
async fn removing_a_device_removes_its_rules() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeSystem::with_global_rule();
    let engine = engine_with(dir.path(), &fake, household()).await;
    engine.compile_devices().await.unwrap();

    engine.delete_device("phone").await.unwrap();

    let state = fake.state();
    assert_eq!(state.statements(), EXPECTED_CHAIN[2..].to_vec());
    assert!(!state.sets.contains_key("device_phone"));
}

#[tokio::test]
async fn listing_failure_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeSystem::with_global_rule();
    let engine = engine_with(dir.path(), &fake, household()).await;
    fake.state().fail_listing = true;

    assert!(engine.compile_devices().await.is_err());

    let state = fake.state();
    assert!(!state.calls.iter().any(|c| c.starts_with("nft insert")));
    assert_eq!(state.rules.len(), 1);
}

#[tokio::test]
async fn routing_apply_runs_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeSystem::with_global_rule();
    let mut phone = device("phone", "192.168.1.10", DeviceMode::Custom);
    phone.services = vec!["yt".into()];
    let engine = engine_with(dir.path(), &fake, vec![phone]).await;

    let report = engine.apply_routing().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.services, 1);
    assert_eq!(report.loaded, 2);
    assert_eq!(report.device_rules, 2);

    let dnsmasq = std::fs::read_to_string(dir.path().join("dnsmasq.d/pinpoint.conf")).unwrap();
    assert!(dnsmasq.contains("nftset=/youtube.com/4#inet#pinpoint#tunnel_ips"));

    let status: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("data/status.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(status["enabled_services"], 1);
    assert_eq!(status["total_cidrs"], 1);

    let state = fake.state();
    let global: Vec<&str> = state.sets["tunnel_nets"].iter().map(String::as_str).collect();
    assert_eq!(global, vec!["142.250.0.0/15", "8.8.8.8/32"]);
    let device_set: Vec<&str> = state.sets["device_phone"].iter().map(String::as_str).collect();
    assert_eq!(device_set, vec!["142.250.0.0/15", "8.8.8.8"]);
    assert_eq!(
        state.calls.last().map(String::as_str),
        Some("/etc/init.d/dnsmasq restart")
    );
}

#[tokio::test]
async fn failed_dnsmasq_restart_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeSystem::with_global_rule();
    let engine = engine_with(dir.path(), &fake, vec![]).await;
    fake.state().restart_status = 1;

    let report = engine.apply_routing().await;
    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("restart dnsmasq"));
}
