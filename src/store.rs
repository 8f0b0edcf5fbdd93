//! Persistence for the entity collections.
//!
//! The engine only needs "load a collection" and "save a collection"; how the
//! bytes are stored is up to the [`Store`] implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::{DeviceList, RoutingTable, ServiceList, Subscription, Tunnel, TunnelGroup};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed {kind} collection: {source}")]
    Shape {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Tunnels,
    Subscriptions,
    Groups,
    RoutingRules,
    Devices,
    Services,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Tunnels => "tunnels",
            Collection::Subscriptions => "subscriptions",
            Collection::Groups => "groups",
            Collection::RoutingRules => "routing rules",
            Collection::Devices => "devices",
            Collection::Services => "services",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Collection::Tunnels => "tunnels.json",
            Collection::Subscriptions => "subscriptions.json",
            Collection::Groups => "tunnel_groups.json",
            Collection::RoutingRules => "routing_rules.json",
            Collection::Devices => "devices.json",
            Collection::Services => "services.json",
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// `None` when the collection has never been saved.
    async fn load(&self, kind: Collection) -> Result<Option<Value>, StoreError>;
    async fn save(&self, kind: Collection, value: &Value) -> Result<(), StoreError>;
}

// ============================================================================
// JSON files
// ============================================================================

/// One pretty-printed JSON document per collection under `dir`.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: Collection) -> PathBuf {
        self.dir.join(kind.file_name())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load(&self, kind: Collection) -> Result<Option<Value>, StoreError> {
        let path = self.path(kind);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Parse { path, source })
    }

    async fn save(&self, kind: Collection, value: &Value) -> Result<(), StoreError> {
        let path = self.path(kind);
        let write_error = |source| StoreError::Write {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_error)?;

        let body = serde_json::to_string_pretty(value).map_err(|source| StoreError::Shape {
            kind: kind.name(),
            source,
        })?;

        // write-then-rename so a crash never leaves a truncated file
        let tmp = tmp_path(&path);
        tokio::fs::write(&tmp, body).await.map_err(write_error)?;
        tokio::fs::rename(&tmp, &path).await.map_err(write_error)?;
        Ok(())
    }
}

/// A sibling name no other in-flight save shares.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

// ============================================================================
// In memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self, kind: Collection) -> Result<Option<Value>, StoreError> {
        Ok(self.collections.lock().await.get(&kind).cloned())
    }

    async fn save(&self, kind: Collection, value: &Value) -> Result<(), StoreError> {
        self.collections.lock().await.insert(kind, value.clone());
        Ok(())
    }
}

// ============================================================================
// Typed access
// ============================================================================

/// Typed view over a [`Store`]. Cheap to clone.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn load_as<T>(&self, kind: Collection) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        match self.store.load(kind).await? {
            Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Shape {
                kind: kind.name(),
                source,
            }),
            None => Ok(T::default()),
        }
    }

    pub async fn save_as<T>(&self, kind: Collection, data: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(data).map_err(|source| StoreError::Shape {
            kind: kind.name(),
            source,
        })?;
        self.store.save(kind, &value).await
    }

    pub async fn tunnels(&self) -> Result<Vec<Tunnel>, StoreError> {
        self.load_as(Collection::Tunnels).await
    }

    pub async fn save_tunnels(&self, tunnels: &[Tunnel]) -> Result<(), StoreError> {
        self.save_as(Collection::Tunnels, &tunnels).await
    }

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        self.load_as(Collection::Subscriptions).await
    }

    pub async fn save_subscriptions(&self, subs: &[Subscription]) -> Result<(), StoreError> {
        self.save_as(Collection::Subscriptions, &subs).await
    }

    pub async fn groups(&self) -> Result<Vec<TunnelGroup>, StoreError> {
        self.load_as(Collection::Groups).await
    }

    pub async fn save_groups(&self, groups: &[TunnelGroup]) -> Result<(), StoreError> {
        self.save_as(Collection::Groups, &groups).await
    }

    pub async fn routing(&self) -> Result<RoutingTable, StoreError> {
        self.load_as(Collection::RoutingRules).await
    }

    pub async fn save_routing(&self, table: &RoutingTable) -> Result<(), StoreError> {
        self.save_as(Collection::RoutingRules, table).await
    }

    pub async fn devices(&self) -> Result<DeviceList, StoreError> {
        self.load_as(Collection::Devices).await
    }

    pub async fn save_devices(&self, devices: &DeviceList) -> Result<(), StoreError> {
        self.save_as(Collection::Devices, devices).await
    }

    pub async fn services(&self) -> Result<ServiceList, StoreError> {
        self.load_as(Collection::Services).await
    }

    pub async fn save_services(&self, services: &ServiceList) -> Result<(), StoreError> {
        self.save_as(Collection::Services, services).await
    }
}
