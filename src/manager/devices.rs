use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{clean_list, Manager};
use crate::error::{Error, Result};
use crate::model::{Device, DeviceMode, Service, ServiceList};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize, Serialize, Validate, Clone, Debug)]
pub struct DeviceCreateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(min = 7, max = 15))]
    pub ip: String,

    #[serde(default)]
    #[validate(length(max = 17))]
    pub mac: String,

    #[serde(default)]
    pub mode: DeviceMode,

    #[serde(default)]
    pub services: Vec<String>,

    #[serde(default)]
    pub custom_domains: Vec<String>,

    #[serde(default)]
    pub custom_ips: Vec<String>,
}

#[derive(Deserialize, Serialize, Validate, Clone, Debug, Default)]
pub struct DeviceUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(min = 7, max = 15))]
    pub ip: Option<String>,

    #[validate(length(max = 17))]
    pub mac: Option<String>,

    pub mode: Option<DeviceMode>,

    pub services: Option<Vec<String>>,

    pub custom_domains: Option<Vec<String>>,

    pub custom_ips: Option<Vec<String>>,

    pub enabled: Option<bool>,
}

fn check_ip(ip: &str) -> Result<()> {
    ip.trim()
        .parse::<Ipv4Addr>()
        .map(drop)
        .map_err(|_| Error::Invalid(format!("device ip must be an IPv4 address: {ip}")))
}

// ============================================================================
// Operations
// ============================================================================

impl Manager {
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.repo.devices().await?.devices)
    }

    pub async fn get_device(&self, id: &str) -> Result<Device> {
        self.repo
            .devices()
            .await?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("device", id))
    }

    pub async fn create_device(&self, req: DeviceCreateRequest) -> Result<Device> {
        req.validate()?;
        check_ip(&req.ip)?;

        let _guard = self.write_lock().await;
        let mut list = self.repo.devices().await?;
        let device = Device {
            id: list.unique_id(req.name.trim()),
            name: req.name.trim().to_string(),
            ip: req.ip.trim().to_string(),
            mac: req.mac.trim().to_uppercase(),
            mode: req.mode,
            services: clean_list(req.services),
            custom_domains: clean_list(req.custom_domains),
            custom_ips: clean_list(req.custom_ips),
            enabled: true,
        };
        list.devices.push(device.clone());
        self.repo.save_devices(&list).await?;
        tracing::info!(id = %device.id, ip = %device.ip, mode = device.mode.as_str(), "device created");
        Ok(device)
    }

    pub async fn update_device(&self, id: &str, req: DeviceUpdateRequest) -> Result<Device> {
        req.validate()?;
        if let Some(ip) = &req.ip {
            check_ip(ip)?;
        }

        let _guard = self.write_lock().await;
        let mut list = self.repo.devices().await?;
        let device = list
            .get_mut(id)
            .ok_or_else(|| Error::not_found("device", id))?;

        if let Some(name) = req.name {
            device.name = name.trim().to_string();
        }
        if let Some(ip) = req.ip {
            device.ip = ip.trim().to_string();
        }
        if let Some(mac) = req.mac {
            device.mac = mac.trim().to_uppercase();
        }
        if let Some(mode) = req.mode {
            device.mode = mode;
        }
        if let Some(services) = req.services {
            device.services = clean_list(services);
        }
        if let Some(domains) = req.custom_domains {
            device.custom_domains = clean_list(domains);
        }
        if let Some(ips) = req.custom_ips {
            device.custom_ips = clean_list(ips);
        }
        if let Some(enabled) = req.enabled {
            device.enabled = enabled;
        }

        let updated = device.clone();
        self.repo.save_devices(&list).await?;
        Ok(updated)
    }

    pub async fn delete_device(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock().await;
        let mut list = self.repo.devices().await?;
        let before = list.devices.len();
        list.devices.retain(|d| d.id != id);
        if list.devices.len() == before {
            return Err(Error::not_found("device", id));
        }
        self.repo.save_devices(&list).await?;
        tracing::info!(id, "device deleted");
        Ok(())
    }

    /// Scope `service_id` to the device. Adding a service twice is a no-op.
    pub async fn add_device_service(&self, id: &str, service_id: &str) -> Result<Device> {
        if self.repo.services().await?.get(service_id).is_none() {
            return Err(Error::not_found("service", service_id));
        }
        let _guard = self.write_lock().await;
        let mut list = self.repo.devices().await?;
        let device = list
            .get_mut(id)
            .ok_or_else(|| Error::not_found("device", id))?;
        if !device.services.iter().any(|s| s == service_id) {
            device.services.push(service_id.to_string());
        }
        let updated = device.clone();
        self.repo.save_devices(&list).await?;
        Ok(updated)
    }

    pub async fn remove_device_service(&self, id: &str, service_id: &str) -> Result<Device> {
        let _guard = self.write_lock().await;
        let mut list = self.repo.devices().await?;
        let device = list
            .get_mut(id)
            .ok_or_else(|| Error::not_found("device", id))?;
        device.services.retain(|s| s != service_id);
        let updated = device.clone();
        self.repo.save_devices(&list).await?;
        Ok(updated)
    }

    // ========================================================================
    // Services
    // ========================================================================

    pub async fn list_services(&self) -> Result<ServiceList> {
        Ok(self.repo.services().await?)
    }

    pub async fn set_service_enabled(&self, id: &str, enabled: bool) -> Result<Service> {
        let _guard = self.write_lock().await;
        let mut list = self.repo.services().await?;
        let service = list
            .services
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::not_found("service", id))?;
        service.enabled = enabled;
        let updated = service.clone();
        self.repo.save_services(&list).await?;
        Ok(updated)
    }
}
