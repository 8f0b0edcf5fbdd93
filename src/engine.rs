//! Pipelines that push stored state out to sing-box, nft and dnsmasq.
//!
//! None of the external tools is transactional, so every pipeline that
//! touches them runs under one lock: a set flush from one run can never
//! interleave with rule inserts from another.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::lists::{dnsmasq, ListAggregator};
use crate::manager::{
    AutoUpdateSummary, DeviceCreateRequest, DeviceUpdateRequest, Manager,
};
use crate::model::Device;
use crate::nft::{devices, CompileReport, Nft};
use crate::singbox::{generate, ConfigApplier, GeneratorOptions, SingBoxConfig};
use crate::store::{JsonFileStore, Repository};

/// Outcome of [`Engine::apply_routing`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct RoutingReport {
    pub success: bool,
    pub services: usize,
    /// Elements loaded into the global set.
    pub loaded: usize,
    pub device_rules: usize,
    pub failed_commands: usize,
    /// One entry per stage that failed outright.
    pub errors: Vec<String>,
}

pub struct Engine {
    settings: Arc<Settings>,
    manager: Manager,
    runner: Arc<dyn CommandRunner>,
    nft: Nft,
    lists: ListAggregator,
    pipeline: Mutex<()>,
}

impl Engine {
    pub fn new(settings: Settings, repo: Repository, runner: Arc<dyn CommandRunner>) -> Self {
        let manager = Manager::new(repo, settings.fetch.clone());
        let nft = Nft::new(&settings.nft, runner.clone());
        let lists = ListAggregator::new(settings.lists_dir(), &settings.fetch);
        Self {
            settings: Arc::new(settings),
            manager,
            runner,
            nft,
            lists,
            pipeline: Mutex::new(()),
        }
    }

    /// JSON files under `data_dir`, real processes.
    pub fn open(settings: Settings) -> Self {
        let repo = Repository::new(Arc::new(JsonFileStore::new(&settings.data_dir)));
        Self::new(settings, repo, Arc::new(SystemRunner))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    // ========================================================================
    // sing-box
    // ========================================================================

    pub async fn generate_config(&self) -> Result<SingBoxConfig> {
        let repo = self.manager.repository();
        let tunnels = repo.tunnels().await?;
        let groups = repo.groups().await?;
        let routing = repo.routing().await?;

        Ok(generate(
            &tunnels,
            &groups,
            &routing,
            self.settings.singbox.active_outbound.as_deref(),
            &GeneratorOptions::from_settings(&self.settings.singbox),
        ))
    }

    /// Generate, write and restart sing-box. `Ok(false)` means the restart
    /// reported failure; a failed apply is not retried.
    pub async fn apply_outbounds(&self) -> Result<bool> {
        let _guard = self.pipeline.lock().await;
        let config = self.generate_config().await?;
        let applier = ConfigApplier::new(
            &self.settings.singbox,
            self.settings.singbox_backup_path(),
            self.runner.clone(),
        );
        Ok(applier.try_apply(&config).await?)
    }

    // ========================================================================
    // Devices
    // ========================================================================

    pub async fn compile_devices(&self) -> Result<CompileReport> {
        let _guard = self.pipeline.lock().await;
        self.compile_devices_locked().await
    }

    async fn compile_devices_locked(&self) -> Result<CompileReport> {
        let repo = self.manager.repository();
        let device_list = repo.devices().await?;
        let services = repo.services().await?;
        let cidrs = self.lists.service_cidrs(&services).await;

        let plan = devices::plan(&device_list, &services, &cidrs, &self.settings.nft.mark);
        Ok(devices::compile(&self.nft, &self.settings.nft.chain, &plan).await?)
    }

    /// Recompile after a device change. The caller holds the pipeline lock
    /// from before the store write, so the rules always match the latest
    /// saved devices. The stored change stands even when compilation fails.
    async fn recompile_after_change(&self) {
        if let Err(err) = self.compile_devices_locked().await {
            tracing::error!(error = %err, "device rules not recompiled");
        }
    }

    pub async fn create_device(&self, req: DeviceCreateRequest) -> Result<Device> {
        let _guard = self.pipeline.lock().await;
        let device = self.manager.create_device(req).await?;
        self.recompile_after_change().await;
        Ok(device)
    }

    pub async fn update_device(&self, id: &str, req: DeviceUpdateRequest) -> Result<Device> {
        let _guard = self.pipeline.lock().await;
        let device = self.manager.update_device(id, req).await?;
        self.recompile_after_change().await;
        Ok(device)
    }

    pub async fn delete_device(&self, id: &str) -> Result<()> {
        let _guard = self.pipeline.lock().await;
        self.manager.delete_device(id).await?;
        self.recompile_after_change().await;
        Ok(())
    }

    pub async fn add_device_service(&self, id: &str, service_id: &str) -> Result<Device> {
        let _guard = self.pipeline.lock().await;
        let device = self.manager.add_device_service(id, service_id).await?;
        self.recompile_after_change().await;
        Ok(device)
    }

    pub async fn remove_device_service(&self, id: &str, service_id: &str) -> Result<Device> {
        let _guard = self.pipeline.lock().await;
        let device = self.manager.remove_device_service(id, service_id).await?;
        self.recompile_after_change().await;
        Ok(device)
    }

    // ========================================================================
    // Lists / dnsmasq / global set
    // ========================================================================

    /// Refresh lists, rewrite the dnsmasq snippet, reload the global set,
    /// recompile device rules and restart dnsmasq. A failing stage is
    /// recorded and the stages after it still run.
    pub async fn apply_routing(&self) -> RoutingReport {
        let _guard = self.pipeline.lock().await;
        let mut report = RoutingReport::default();

        let services = match self.manager.repository().services().await {
            Ok(services) => services,
            Err(err) => {
                report.errors.push(format!("load services: {err}"));
                return report;
            }
        };
        report.services = services.enabled().count();

        self.lists.update_all(&services).await;

        let domains = self.lists.enabled_domains(&services).await;
        let snippet = dnsmasq::render(&domains, &self.settings.nft, &self.settings.dnsmasq);
        if let Err(err) = write_file(&self.settings.dnsmasq.config_path, &snippet).await {
            report.errors.push(format!("write dnsmasq config: {err}"));
        } else {
            tracing::info!(domains = domains.len(), path = %self.settings.dnsmasq.config_path.display(), "dnsmasq config written");
        }

        let load = self
            .lists
            .load_tunnel_nets(&self.nft, &self.settings.nft, &services)
            .await;
        report.loaded = load.loaded;
        report.failed_commands += load.failed;

        match self.compile_devices_locked().await {
            Ok(compiled) => {
                report.device_rules = compiled.added_rules;
                report.failed_commands += compiled.failed_commands;
            }
            Err(err) => report.errors.push(format!("compile device rules: {err}")),
        }

        if let Err(err) = self.restart_dnsmasq().await {
            report.errors.push(format!("restart dnsmasq: {err}"));
        }

        if let Err(err) = self
            .lists
            .write_status(&self.settings.status_path(), &services)
            .await
        {
            tracing::warn!(error = %err, "status file not written");
        }

        report.success = report.errors.is_empty();
        tracing::info!(
            success = report.success,
            loaded = report.loaded,
            failed = report.failed_commands,
            "routing applied"
        );
        report
    }

    async fn restart_dnsmasq(&self) -> Result<()> {
        let output = self
            .runner
            .run_line(
                &self.settings.dnsmasq.restart_command,
                self.settings.singbox.restart_timeout(),
            )
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                command: self.settings.dnsmasq.restart_command.join(" "),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    // ========================================================================
    // Background
    // ========================================================================

    /// Refresh due subscriptions; when any changed, regenerate and apply.
    pub async fn auto_update(&self, now: i64) -> Result<AutoUpdateSummary> {
        let summary = self.manager.auto_update(now).await?;
        if summary.changed() {
            match self.apply_outbounds().await {
                Ok(true) => {}
                Ok(false) => tracing::warn!("sing-box restart failed after subscription update"),
                Err(err) => tracing::error!(error = %err, "config apply failed after subscription update"),
            }
        }
        Ok(summary)
    }

    /// Run [`Engine::auto_update`] every `check_interval_secs` until Ctrl-C.
    pub async fn run_daemon(&self) -> Result<()> {
        let period = Duration::from_secs(self.settings.subscriptions.check_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        tracing::info!(interval_secs = period.as_secs(), "auto-update loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.auto_update(chrono::Utc::now().timestamp()).await {
                        Ok(summary) if summary.changed() || !summary.failed.is_empty() => {
                            tracing::info!(refreshed = summary.refreshed.len(), failed = summary.failed.len(), "subscriptions checked");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::error!(error = %err, "auto-update check failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn write_file(path: &std::path::Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await
}
