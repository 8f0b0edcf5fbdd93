use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{now_ts, push_one_unique, push_unique, Manager};
use crate::error::{Error, Result};
use crate::links::parse_share_link;
use crate::model::{default_true, ProtocolSettings, TlsConfig, Transport, Tunnel, TunnelSource};

const LATENCY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize, Serialize, Validate, Clone, Debug)]
pub struct TunnelCreateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(min = 1, max = 255))]
    pub server: String,

    #[validate(range(min = 1))]
    pub port: u16,

    pub settings: ProtocolSettings,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub transport: Transport,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Deserialize, Serialize, Validate, Clone, Debug, Default)]
pub struct TunnelUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 255))]
    pub server: Option<String>,

    #[validate(range(min = 1))]
    pub port: Option<u16>,

    pub enabled: Option<bool>,

    pub settings: Option<ProtocolSettings>,

    pub tls: Option<TlsConfig>,

    pub transport: Option<Transport>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
}

// ============================================================================
// Operations
// ============================================================================

impl Manager {
    pub async fn list_tunnels(&self) -> Result<Vec<Tunnel>> {
        Ok(self.repo.tunnels().await?)
    }

    pub async fn get_tunnel(&self, id: &str) -> Result<Tunnel> {
        self.repo
            .tunnels()
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found("tunnel", id))
    }

    pub async fn create_tunnel(&self, req: TunnelCreateRequest) -> Result<Tunnel> {
        req.validate()?;

        let mut tunnel = Tunnel::new(req.name.trim(), req.server.trim(), req.port, req.settings)
            .with_tls(req.tls)
            .with_transport(req.transport);
        tunnel.source = TunnelSource::Manual;
        tunnel.enabled = req.enabled;

        let tunnel = self.insert_tunnel(tunnel).await?;
        tracing::info!(id = %tunnel.id, name = %tunnel.name, "tunnel created");
        Ok(tunnel)
    }

    /// Store `tunnel`, re-rolling its id if it collides. Returns the stored copy.
    async fn insert_tunnel(&self, tunnel: Tunnel) -> Result<Tunnel> {
        let _guard = self.write_lock().await;
        let mut tunnels = self.repo.tunnels().await?;
        let stored = push_one_unique(&mut tunnels, tunnel);
        self.repo.save_tunnels(&tunnels).await?;
        Ok(stored)
    }

    pub async fn update_tunnel(&self, id: &str, req: TunnelUpdateRequest) -> Result<Tunnel> {
        req.validate()?;

        let _guard = self.write_lock().await;
        let mut tunnels = self.repo.tunnels().await?;
        let tunnel = tunnels
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found("tunnel", id))?;

        if let Some(name) = req.name {
            tunnel.name = name.trim().to_string();
        }
        if let Some(server) = req.server {
            tunnel.server = server.trim().to_string();
        }
        if let Some(port) = req.port {
            tunnel.port = port;
        }
        if let Some(enabled) = req.enabled {
            tunnel.enabled = enabled;
        }
        if let Some(settings) = req.settings {
            tunnel.settings = settings;
        }
        if let Some(tls) = req.tls {
            tunnel.tls = tls;
        }
        if let Some(transport) = req.transport {
            tunnel.transport = transport;
        }

        let updated = tunnel.clone();
        self.repo.save_tunnels(&tunnels).await?;
        Ok(updated)
    }

    /// Remove the tunnel and its id from every group.
    pub async fn delete_tunnel(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock().await;
        let mut tunnels = self.repo.tunnels().await?;
        let before = tunnels.len();
        tunnels.retain(|t| t.id != id);
        if tunnels.len() == before {
            return Err(Error::not_found("tunnel", id));
        }
        self.repo.save_tunnels(&tunnels).await?;
        self.prune_group_members(&HashSet::from([id.to_string()]))
            .await?;
        tracing::info!(id, "tunnel deleted");
        Ok(())
    }

    pub async fn toggle_tunnel(&self, id: &str) -> Result<Tunnel> {
        let _guard = self.write_lock().await;
        let mut tunnels = self.repo.tunnels().await?;
        let tunnel = tunnels
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found("tunnel", id))?;
        tunnel.enabled = !tunnel.enabled;
        let updated = tunnel.clone();
        self.repo.save_tunnels(&tunnels).await?;
        Ok(updated)
    }

    /// Import one share link. Unlike batch import, a bad link is an error.
    pub async fn import_link(&self, link: &str) -> Result<Tunnel> {
        let tunnel = self.insert_tunnel(parse_share_link(link)?).await?;
        tracing::info!(id = %tunnel.id, kind = %tunnel.kind(), "tunnel imported");
        Ok(tunnel)
    }

    /// Import every non-empty line of `text`; lines that do not parse are
    /// counted and skipped.
    pub async fn import_batch(&self, text: &str) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut imported = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match parse_share_link(line) {
                Ok(tunnel) => imported.push(tunnel),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping link");
                    summary.failed += 1;
                }
            }
        }
        summary.imported = imported.len();

        if !imported.is_empty() {
            let _guard = self.write_lock().await;
            let mut tunnels = self.repo.tunnels().await?;
            push_unique(&mut tunnels, imported);
            self.repo.save_tunnels(&tunnels).await?;
        }
        tracing::info!(imported = summary.imported, failed = summary.failed, "batch import finished");
        Ok(summary)
    }

    /// TCP connect to the tunnel's server. Records the latency in
    /// milliseconds, or clears it when the connect fails or times out.
    pub async fn test_latency(&self, id: &str) -> Result<Tunnel> {
        let target = self.get_tunnel(id).await?;
        let latency = tcp_latency(&target.server, target.port).await;

        let _guard = self.write_lock().await;
        let mut tunnels = self.repo.tunnels().await?;
        let tunnel = tunnels
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found("tunnel", id))?;
        tunnel.latency = latency;
        tunnel.last_check = Some(now_ts());
        let updated = tunnel.clone();
        self.repo.save_tunnels(&tunnels).await?;
        Ok(updated)
    }
}

async fn tcp_latency(server: &str, port: u16) -> Option<u32> {
    let started = Instant::now();
    let connect = tokio::time::timeout(
        LATENCY_TIMEOUT,
        tokio::net::TcpStream::connect((server, port)),
    )
    .await;

    match connect {
        Ok(Ok(stream)) => {
            drop(stream);
            Some(u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX))
        }
        Ok(Err(e)) => {
            tracing::debug!(server, port, error = %e, "connect failed");
            None
        }
        Err(_) => {
            tracing::debug!(server, port, "connect timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchSettings;
    use crate::model::{TrojanSettings, TunnelGroup};
    use crate::store::Repository;

    fn manager() -> Manager {
        Manager::new(Repository::in_memory(), FetchSettings::default())
    }

    fn trojan_request(name: &str) -> TunnelCreateRequest {
        TunnelCreateRequest {
            name: name.into(),
            server: "t.example.com".into(),
            port: 443,
            settings: ProtocolSettings::Trojan(TrojanSettings {
                password: "pw".into(),
            }),
            tls: TlsConfig::default(),
            transport: Transport::default(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn create_validates_and_marks_manual() {
        let m = manager();
        let tunnel = m.create_tunnel(trojan_request(" Main ")).await.unwrap();
        assert_eq!(tunnel.name, "Main");
        assert_eq!(tunnel.source, TunnelSource::Manual);
        assert_eq!(tunnel.id.len(), 8);

        let mut bad = trojan_request("x");
        bad.port = 0;
        assert!(matches!(m.create_tunnel(bad).await, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn delete_prunes_groups() {
        let m = manager();
        let a = m.create_tunnel(trojan_request("a")).await.unwrap();
        let b = m.create_tunnel(trojan_request("b")).await.unwrap();
        m.repo
            .save_groups(&[TunnelGroup {
                id: "g".into(),
                name: "G".into(),
                tag: "group-g".into(),
                kind: Default::default(),
                tunnels: vec![a.id.clone(), b.id.clone()],
                interval: None,
                tolerance: None,
            }])
            .await
            .unwrap();

        m.delete_tunnel(&a.id).await.unwrap();
        assert_eq!(m.repo.groups().await.unwrap()[0].tunnels, vec![b.id.clone()]);
        assert!(matches!(m.delete_tunnel(&a.id).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn batch_import_counts_failures() {
        let m = manager();
        let text = "trojan://pw@t.example.com:443#T\n\nnot-a-link\nvless://@1.2.3.4:443\n";
        let summary = m.import_batch(text).await.unwrap();
        assert_eq!(summary, ImportSummary { imported: 1, failed: 2 });
        assert_eq!(m.list_tunnels().await.unwrap().len(), 1);

        assert!(m.import_link("bogus://x").await.is_err());
    }

    #[tokio::test]
    async fn inserted_tunnel_never_reuses_a_stored_id() {
        let m = manager();
        let first = m.create_tunnel(trojan_request("a")).await.unwrap();

        let mut twin = Tunnel::new(
            "b",
            "t.example.com",
            443,
            ProtocolSettings::Trojan(TrojanSettings {
                password: "pw".into(),
            }),
        );
        twin.id = first.id.clone();
        let stored = m.insert_tunnel(twin).await.unwrap();
        assert_ne!(stored.id, first.id);

        m.import_batch("trojan://pw@t.example.com:443#C\ntrojan://pw@t.example.com:443#D\n")
            .await
            .unwrap();
        let tunnels = m.list_tunnels().await.unwrap();
        let ids: HashSet<&str> = tunnels.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(tunnels.len(), 4);
        assert_eq!(ids.len(), 4);

        m.delete_tunnel(&stored.id).await.unwrap();
        assert_eq!(m.get_tunnel(&first.id).await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn concurrent_creates_keep_every_tunnel() {
        let m = manager();
        let (a, b, c) = tokio::join!(
            m.create_tunnel(trojan_request("a")),
            m.create_tunnel(trojan_request("b")),
            m.import_link("trojan://pw@t.example.com:443#c"),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(m.list_tunnels().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn latency_is_recorded_or_cleared() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let m = manager();
        let mut req = trojan_request("local");
        req.server = "127.0.0.1".into();
        req.port = port;
        let tunnel = m.create_tunnel(req).await.unwrap();

        let tested = m.test_latency(&tunnel.id).await.unwrap();
        assert!(tested.latency.is_some());
        assert!(tested.last_check.is_some());

        drop(listener);
        let tested = m.test_latency(&tunnel.id).await.unwrap();
        assert!(tested.latency.is_none());
        assert!(tested.last_check.is_some());
    }
}
