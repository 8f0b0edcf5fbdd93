//! Selective VPN routing for a router: share links and subscriptions in,
//! sing-box config and nftables device rules out.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod links;
pub mod lists;
pub mod manager;
pub mod model;
pub mod nft;
pub mod singbox;
pub mod store;
pub mod subscription;

pub use config::Settings;
pub use engine::{Engine, RoutingReport};
pub use error::{Error, Result};
