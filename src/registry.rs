//! Object registry: keeps the exported object graph in line with the latest
//! status snapshot.
//!
//! The registry owns the manager's and every service's property state. A
//! reconciliation only notifies properties whose value actually changed, so
//! applying the same snapshot twice is silent and causes no object churn.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::dbus::{
    service_object_path, ManagerProperties, ManagerProperty, ObjectHost, ServiceProperties,
    ServiceProperty,
};
use crate::status::{ServiceInfo, Status};

struct ServiceEntry {
    path: String,
    properties: Arc<RwLock<ServiceProperties>>,
}

/// A service object the host refused to export.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to export service {service} at {path}: {reason}")]
pub struct ExportFailure {
    pub service: String,
    pub path: String,
    pub reason: String,
}

/// What one reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub manager_changed: bool,
    /// New services left unexported; retried on the next reconciliation.
    pub failed: Vec<ExportFailure>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && !self.manager_changed
    }
}

pub struct ObjectRegistry {
    host: Arc<dyn ObjectHost>,
    manager: Arc<RwLock<ManagerProperties>>,
    services: HashMap<String, ServiceEntry>,
    remove_stale: bool,
}

impl ObjectRegistry {
    /// Create an empty registry.
    ///
    /// With `remove_stale` unset, services that vanish from the status keep
    /// their last known properties and stay exported.
    pub fn new(host: Arc<dyn ObjectHost>, remove_stale: bool) -> Self {
        Self {
            host,
            manager: Arc::new(RwLock::new(ManagerProperties::default())),
            services: HashMap::new(),
            remove_stale,
        }
    }

    /// Shared manager state, read by the exported manager interface.
    pub fn manager_properties(&self) -> Arc<RwLock<ManagerProperties>> {
        self.manager.clone()
    }

    /// Names of all services currently exported.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Current properties of the named service.
    pub async fn service(&self, name: &str) -> Option<ServiceProperties> {
        match self.services.get(name) {
            Some(entry) => Some(entry.properties.read().await.clone()),
            None => None,
        }
    }

    /// Bring the object graph in line with `status`.
    pub async fn reconcile(&mut self, status: &Status) -> ReconcileSummary {
        let mut summary = ReconcileSummary {
            manager_changed: self.update_manager(status).await,
            ..Default::default()
        };

        // Update services that persist, drop the ones that disappeared.
        let existing: Vec<String> = self.services.keys().cloned().collect();
        for name in existing {
            match status.service(&name) {
                Some(info) => {
                    if self.update_service(info).await {
                        summary.updated.push(name);
                    }
                }
                None if self.remove_stale => {
                    if self.remove_service(&name).await {
                        summary.removed.push(name);
                    }
                }
                None => debug!(service = %name, "Keeping service missing from status"),
            }
        }

        // Export services seen for the first time, in status order.
        for info in &status.services {
            if self.services.contains_key(&info.name) {
                continue;
            }
            match self.add_service(info).await {
                Ok(()) => summary.added.push(info.name.clone()),
                Err(failure) => summary.failed.push(failure),
            }
        }

        if !summary.is_empty() {
            info!(
                attached = status.attached,
                added = summary.added.len(),
                updated = summary.updated.len(),
                removed = summary.removed.len(),
                "Reconciled UA objects"
            );
        }
        summary
    }

    async fn update_manager(&self, status: &Status) -> bool {
        let mut changed = Vec::new();
        {
            let mut manager = self.manager.write().await;
            if manager.attached != status.attached {
                manager.attached = status.attached;
                changed.push(ManagerProperty::Attached);
            }
            if manager.last_refresh != status.last_refresh {
                manager.last_refresh = status.last_refresh;
                changed.push(ManagerProperty::LastRefresh);
            }
        }

        if changed.is_empty() {
            return false;
        }
        if let Err(e) = self.host.manager_changed(&changed).await {
            warn!(error = %e, "Failed to emit manager property changes");
        }
        true
    }

    async fn update_service(&self, info: &ServiceInfo) -> bool {
        let Some(entry) = self.services.get(&info.name) else {
            return false;
        };

        let mut changed = Vec::new();
        {
            let mut props = entry.properties.write().await;
            if props.description != info.description {
                props.description = info.description.clone();
                changed.push(ServiceProperty::Description);
            }
            if props.entitled != info.entitled {
                props.entitled = info.entitled.clone();
                changed.push(ServiceProperty::Entitled);
            }
            if props.status != info.status {
                props.status = info.status.clone();
                changed.push(ServiceProperty::Status);
            }
        }

        if changed.is_empty() {
            return false;
        }
        debug!(service = %info.name, ?changed, "Service properties changed");
        if let Err(e) = self.host.service_changed(&entry.path, &changed).await {
            warn!(service = %info.name, error = %e, "Failed to emit service property changes");
        }
        true
    }

    async fn add_service(&mut self, info: &ServiceInfo) -> Result<(), ExportFailure> {
        let path = service_object_path(&info.name);
        let properties = Arc::new(RwLock::new(ServiceProperties {
            name: info.name.clone(),
            description: info.description.clone(),
            entitled: info.entitled.clone(),
            status: info.status.clone(),
        }));

        // Not retained on failure, so the next reconciliation retries.
        if let Err(e) = self.host.export_service(&path, properties.clone()).await {
            error!(service = %info.name, %path, error = %e, "Failed to export service");
            return Err(ExportFailure {
                service: info.name.clone(),
                path,
                reason: e.to_string(),
            });
        }
        debug!(service = %info.name, %path, "Added service");
        self.services
            .insert(info.name.clone(), ServiceEntry { path, properties });
        Ok(())
    }

    async fn remove_service(&mut self, name: &str) -> bool {
        let Some(entry) = self.services.remove(name) else {
            return false;
        };
        if let Err(e) = self.host.unexport_service(&entry.path).await {
            warn!(service = %name, path = %entry.path, error = %e, "Failed to unexport service");
        }
        debug!(service = %name, path = %entry.path, "Removed service");
        true
    }
}
