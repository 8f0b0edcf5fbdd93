//! Per-service IP and domain lists.
//!
//! For every enabled service three files are kept under `lists/`:
//!
//! * `<id>_domains.txt` - explicit domains, custom domains and domains from
//!   `domains` sources
//! * `<id>_static.txt` - ip ranges and custom ips as entered
//! * `<id>.txt` - downloaded CIDRs plus the ip ranges
//!
//! These files feed the dnsmasq snippet, the global `tunnel_nets` set and
//! the per-device sets.

pub mod dnsmasq;
pub mod parse;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{FetchSettings, NftSettings};
use crate::fetch::fetch_text;
use crate::model::{Service, ServiceList, SourceType};
use crate::nft::Nft;

pub use parse::parse_list;

const DOMAINS_SUFFIX: &str = "_domains";
const STATIC_SUFFIX: &str = "_static";

/// Contents of `status.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListStatus {
    pub last_update: String,
    pub last_update_timestamp: i64,
    pub total_cidrs: usize,
    pub total_domains: usize,
    pub enabled_services: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceUpdate {
    pub domains: usize,
    pub statics: usize,
    pub cidrs: usize,
    pub failed_sources: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub failed: usize,
}

pub struct ListAggregator {
    dir: PathBuf,
    timeout: Duration,
    user_agent: String,
}

impl ListAggregator {
    pub fn new(dir: impl Into<PathBuf>, fetch: &FetchSettings) -> Self {
        Self {
            dir: dir.into(),
            timeout: fetch.list_timeout(),
            user_agent: fetch.user_agent.clone(),
        }
    }

    fn file(&self, service_id: &str, suffix: &str) -> PathBuf {
        self.dir.join(format!("{service_id}{suffix}.txt"))
    }

    fn cache_file(&self, url: &str) -> PathBuf {
        let name: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join("cache").join(format!("{name}.txt"))
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refresh the list files of every enabled service. A service whose
    /// files cannot be written is logged and skipped.
    pub async fn update_all(&self, services: &ServiceList) -> BTreeMap<String, ServiceUpdate> {
        let mut results = BTreeMap::new();
        for service in &services.services {
            if !service.enabled {
                tracing::debug!(service = %service.id, "service disabled, lists not refreshed");
                continue;
            }
            match self.update_service(service).await {
                Ok(update) => {
                    results.insert(service.id.clone(), update);
                }
                Err(err) => {
                    tracing::error!(service = %service.id, error = %err, "failed to write service lists");
                }
            }
        }
        results
    }

    pub async fn update_service(&self, service: &Service) -> std::io::Result<ServiceUpdate> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut update = ServiceUpdate::default();

        let mut domains: BTreeSet<String> = service
            .domains
            .iter()
            .chain(&service.custom_domains)
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        let statics: BTreeSet<String> = service
            .ip_ranges
            .iter()
            .chain(&service.custom_ips)
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();
        let mut cidrs: BTreeSet<String> = service
            .ip_ranges
            .iter()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();

        for source in service.sources.iter().filter(|s| !s.url.trim().is_empty()) {
            let Some(content) = self.download(&source.url).await else {
                update.failed_sources += 1;
                continue;
            };
            let entries = parse_list(&content, source.kind);
            tracing::debug!(service = %service.id, url = %source.url, entries = entries.len(), "source parsed");
            if source.kind == SourceType::Domains {
                domains.extend(entries);
            } else {
                cidrs.extend(entries);
            }
        }

        update.domains = domains.len();
        update.statics = statics.len();
        update.cidrs = cidrs.len();

        write_list(&self.file(&service.id, DOMAINS_SUFFIX), &domains).await?;
        write_list(&self.file(&service.id, STATIC_SUFFIX), &statics).await?;
        write_list(&self.file(&service.id, ""), &cidrs).await?;

        tracing::info!(
            service = %service.id,
            domains = update.domains,
            cidrs = update.cidrs,
            failed_sources = update.failed_sources,
            "service lists updated"
        );
        Ok(update)
    }

    /// Fetch `url`, keeping the raw body as a cache. When the fetch fails the
    /// last cached body is used instead, so a flaky source keeps its
    /// previous contribution.
    async fn download(&self, url: &str) -> Option<String> {
        let cache = self.cache_file(url);
        match fetch_text(url, self.timeout, &self.user_agent).await {
            Ok(body) => {
                if let Some(parent) = cache.parent() {
                    if let Err(err) = tokio::fs::create_dir_all(parent).await {
                        tracing::debug!(error = %err, "cannot create list cache dir");
                    }
                }
                if let Err(err) = tokio::fs::write(&cache, &body).await {
                    tracing::debug!(url, error = %err, "cannot cache list source");
                }
                Some(body)
            }
            Err(err) => match tokio::fs::read_to_string(&cache).await {
                Ok(body) => {
                    tracing::warn!(url, error = %err, "download failed, using cached copy");
                    Some(body)
                }
                Err(_) => {
                    tracing::warn!(url, error = %err, "download failed");
                    None
                }
            },
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    async fn read(&self, service_id: &str, suffix: &str) -> Vec<String> {
        read_list(&self.file(service_id, suffix)).await
    }

    /// Downloaded CIDR lists keyed by service id, for every service that has
    /// one on disk.
    pub async fn service_cidrs(&self, services: &ServiceList) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for service in &services.services {
            let cidrs = self.read(&service.id, "").await;
            if !cidrs.is_empty() {
                out.insert(service.id.clone(), cidrs);
            }
        }
        out
    }

    /// Domains of all enabled services, as written to their domain files.
    pub async fn enabled_domains(&self, services: &ServiceList) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for service in services.enabled() {
            out.extend(self.read(&service.id, DOMAINS_SUFFIX).await);
        }
        out
    }

    /// Everything that belongs in `tunnel_nets`: CIDR files and static files
    /// of enabled services plus `extra`. Bare addresses become `/32`.
    pub async fn global_elements(&self, services: &ServiceList, extra: &[String]) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for service in services.enabled() {
            out.extend(
                self.read(&service.id, "")
                    .await
                    .into_iter()
                    .filter(|c| c.contains('/')),
            );
            out.extend(self.read(&service.id, STATIC_SUFFIX).await.into_iter().map(host_cidr));
        }
        out.extend(extra.iter().map(|c| host_cidr(c.trim().to_string())).filter(|c| c != "/32"));
        out
    }

    /// Flush the global set and add every element back, one command each.
    pub async fn load_tunnel_nets(
        &self,
        nft: &Nft,
        settings: &NftSettings,
        services: &ServiceList,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let set = &settings.tunnel_nets_set;

        if let Err(err) = nft.flush_set(set).await {
            tracing::warn!(set = %set, error = %err, "failed to flush set");
            report.failed += 1;
        }
        for element in self.global_elements(services, &settings.extra_cidrs).await {
            match nft.add_element(set, &element).await {
                Ok(()) => report.loaded += 1,
                Err(err) => {
                    tracing::debug!(element, error = %err, "failed to add element");
                    report.failed += 1;
                }
            }
        }
        tracing::info!(set = %set, loaded = report.loaded, failed = report.failed, "global set loaded");
        report
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn status(&self, services: &ServiceList) -> ListStatus {
        let mut total_cidrs = 0;
        let mut total_domains = 0;
        for service in services.enabled() {
            total_cidrs += self.read(&service.id, "").await.len();
            total_domains += self.read(&service.id, DOMAINS_SUFFIX).await.len();
        }
        let now = chrono::Local::now();
        ListStatus {
            last_update: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            last_update_timestamp: now.timestamp(),
            total_cidrs,
            total_domains,
            enabled_services: services.enabled().count(),
        }
    }

    pub async fn write_status(&self, path: &Path, services: &ServiceList) -> std::io::Result<ListStatus> {
        let status = self.status(services).await;
        let body = serde_json::to_string_pretty(&status)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, body).await?;
        Ok(status)
    }
}

fn host_cidr(entry: String) -> String {
    if entry.contains('/') {
        entry
    } else {
        format!("{entry}/32")
    }
}

/// One entry per line; an empty set removes the file.
async fn write_list(path: &Path, entries: &BTreeSet<String>) -> std::io::Result<()> {
    if entries.is_empty() {
        return match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
    }
    let mut body = String::new();
    for entry in entries {
        body.push_str(entry);
        body.push('\n');
    }
    tokio::fs::write(path, body).await
}

async fn read_list(path: &Path) -> Vec<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "cannot read list file");
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceSource;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(id: &str) -> Service {
        Service {
            id: id.into(),
            name: id.into(),
            enabled: true,
            domains: vec!["youtube.com".into()],
            custom_domains: vec!["yt.be".into()],
            ip_ranges: vec!["142.250.0.0/15".into()],
            custom_ips: vec!["8.8.8.8".into()],
            sources: vec![],
        }
    }

    #[tokio::test]
    async fn writes_three_files_per_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ips"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "route add 172.217.0.0 mask 255.255.0.0 0.0.0.0\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domains"))
            .respond_with(ResponseTemplate::new(200).set_body_string("*.googlevideo.com\n"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agg = ListAggregator::new(dir.path(), &FetchSettings::default());
        let mut svc = service("yt");
        svc.sources = vec![
            ServiceSource {
                url: format!("{}/ips", server.uri()),
                kind: SourceType::Auto,
            },
            ServiceSource {
                url: format!("{}/domains", server.uri()),
                kind: SourceType::Domains,
            },
            ServiceSource {
                url: format!("{}/missing", server.uri()),
                kind: SourceType::Plain,
            },
        ];

        let update = agg.update_service(&svc).await.unwrap();
        assert_eq!(update.failed_sources, 1);

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("yt.txt"), "142.250.0.0/15\n172.217.0.0/16\n");
        assert_eq!(read("yt_static.txt"), "142.250.0.0/15\n8.8.8.8\n");
        assert_eq!(read("yt_domains.txt"), "googlevideo.com\nyoutube.com\nyt.be\n");

        let services = ServiceList { services: vec![svc] };
        let global = agg.global_elements(&services, &["1.2.3.4".into()]).await;
        let global: Vec<&str> = global.iter().map(String::as_str).collect();
        assert_eq!(
            global,
            vec!["1.2.3.4/32", "142.250.0.0/15", "172.217.0.0/16", "8.8.8.8/32"]
        );
    }

    #[tokio::test]
    async fn failed_download_falls_back_to_cache() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let agg = ListAggregator::new(dir.path(), &FetchSettings::default());
        let url = format!("{}/list", server.uri());

        let cache = agg.cache_file(&url);
        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        std::fs::write(&cache, "9.9.9.0/24\n").unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut svc = service("q");
        svc.ip_ranges.clear();
        svc.sources = vec![ServiceSource {
            url,
            kind: SourceType::Ip,
        }];
        agg.update_service(&svc).await.unwrap();

        let services = ServiceList { services: vec![svc] };
        assert_eq!(
            agg.service_cidrs(&services).await.get("q"),
            Some(&vec!["9.9.9.0/24".to_string()])
        );
    }

    #[tokio::test]
    async fn disabled_services_do_not_contribute() {
        let dir = tempfile::tempdir().unwrap();
        let agg = ListAggregator::new(dir.path(), &FetchSettings::default());
        let svc = service("yt");
        agg.update_service(&svc).await.unwrap();

        let mut off = svc.clone();
        off.enabled = false;
        let services = ServiceList { services: vec![off] };
        assert!(agg.enabled_domains(&services).await.is_empty());
        assert!(agg.global_elements(&services, &[]).await.is_empty());

        let status = agg.status(&services).await;
        assert_eq!(status.enabled_services, 0);
        assert_eq!(status.total_cidrs, 0);
    }
}
