use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pinpoint::manager::{DeviceCreateRequest, DeviceUpdateRequest, SubscriptionCreateRequest};
use pinpoint::model::{DeviceMode, SubscriptionFormat};
use pinpoint::{Engine, Settings};

#[derive(Parser, Debug)]
#[command(name = "pinpoint", version, about = "Selective VPN routing for sing-box and nftables")]
struct Cli {
    /// Path to config.yaml
    #[arg(short = 'c', long = "config", default_value = "/opt/pinpoint/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the generated sing-box config
    Generate,
    /// Generate, write and restart sing-box
    Apply,
    /// Import share links (vless://, vmess://, ss://, trojan://, hy2://)
    Import {
        #[arg(required = true)]
        links: Vec<String>,
    },
    /// Manage subscriptions
    Subscription {
        #[command(subcommand)]
        command: SubscriptionCommand,
    },
    /// Refresh lists, dnsmasq, the global set and device rules
    Routing {
        #[command(subcommand)]
        command: RoutingCommand,
    },
    /// Manage per-device routing
    Device {
        #[command(subcommand)]
        command: DeviceCommand,
    },
    /// TCP latency probe for a tunnel
    Test { tunnel_id: String },
    /// Periodically refresh due subscriptions
    Daemon,
}

#[derive(Subcommand, Debug)]
enum SubscriptionCommand {
    Add {
        name: String,
        url: String,
        #[arg(long, default_value = "auto")]
        format: SubscriptionFormat,
        /// Hours between automatic refreshes
        #[arg(long, default_value_t = 24)]
        interval: u32,
        #[arg(long)]
        no_auto_update: bool,
    },
    Refresh { id: String },
    Delete { id: String },
    List,
}

#[derive(Subcommand, Debug)]
enum RoutingCommand {
    Apply,
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    Add {
        name: String,
        ip: String,
        #[arg(long, default_value = "default")]
        mode: DeviceMode,
        #[arg(long, default_value = "")]
        mac: String,
        /// Service ids scoped to the device (custom mode)
        #[arg(long = "service")]
        services: Vec<String>,
        #[arg(long = "ip-entry")]
        custom_ips: Vec<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        mode: Option<DeviceMode>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
    },
    Delete { id: String },
    List,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pinpoint=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .await
        .with_context(|| format!("load {}", cli.config.display()))?;
    let engine = Engine::open(settings);
    let manager = engine.manager();

    match cli.command {
        Command::Generate => {
            let config = engine.generate_config().await?;
            println!("{}", config.to_pretty_json()?);
        }
        Command::Apply => {
            if !engine.apply_outbounds().await.context("apply sing-box config")? {
                anyhow::bail!("sing-box restart failed");
            }
            println!("sing-box config applied");
        }
        Command::Import { links } => {
            let summary = manager.import_batch(&links.join("\n")).await?;
            print_json(&summary)?;
        }
        Command::Subscription { command } => match command {
            SubscriptionCommand::Add {
                name,
                url,
                format,
                interval,
                no_auto_update,
            } => {
                let sub = manager
                    .create_subscription(SubscriptionCreateRequest {
                        name,
                        url,
                        format,
                        auto_update: !no_auto_update,
                        update_interval: interval,
                    })
                    .await?;
                print_json(&sub)?;
            }
            SubscriptionCommand::Refresh { id } => {
                print_json(&manager.refresh_subscription(&id).await?)?;
            }
            SubscriptionCommand::Delete { id } => {
                let removed = manager.delete_subscription(&id).await?;
                println!("subscription {id} deleted, {removed} tunnels removed");
            }
            SubscriptionCommand::List => print_json(&manager.list_subscriptions().await?)?,
        },
        Command::Routing {
            command: RoutingCommand::Apply,
        } => {
            let report = engine.apply_routing().await;
            print_json(&report)?;
            if !report.success {
                anyhow::bail!("routing applied with errors");
            }
        }
        Command::Device { command } => match command {
            DeviceCommand::Add {
                name,
                ip,
                mode,
                mac,
                services,
                custom_ips,
            } => {
                let device = engine
                    .create_device(DeviceCreateRequest {
                        name,
                        ip,
                        mac,
                        mode,
                        services,
                        custom_domains: vec![],
                        custom_ips,
                    })
                    .await?;
                print_json(&device)?;
            }
            DeviceCommand::Update {
                id,
                mode,
                ip,
                enabled,
            } => {
                let device = engine
                    .update_device(
                        &id,
                        DeviceUpdateRequest {
                            mode,
                            ip,
                            enabled,
                            ..Default::default()
                        },
                    )
                    .await?;
                print_json(&device)?;
            }
            DeviceCommand::Delete { id } => {
                engine.delete_device(&id).await?;
                println!("device {id} deleted");
            }
            DeviceCommand::List => print_json(&manager.list_devices().await?)?,
        },
        Command::Test { tunnel_id } => {
            let tunnel = manager.test_latency(&tunnel_id).await?;
            match tunnel.latency {
                Some(ms) => println!("{} ({}:{}): {ms} ms", tunnel.name, tunnel.server, tunnel.port),
                None => println!("{} ({}:{}): unreachable", tunnel.name, tunnel.server, tunnel.port),
            }
        }
        Command::Daemon => engine.run_daemon().await?,
    }

    Ok(())
}
