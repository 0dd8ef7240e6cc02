//! Exporting objects and emitting property changes on the bus.
//!
//! The registry drives an [`ObjectHost`]; [`BusHost`] is the zbus
//! implementation, serving the interfaces from one connection's object server
//! and keeping the object manager's view of them current.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zbus::Connection;

use super::interface::{
    ManagerInterface, ManagerProperties, ServiceInterface, ServiceProperties, MANAGER_INTERFACE,
    SERVICE_INTERFACE,
};
use super::object_manager::{ExportedObjects, ObjectManagerInterface};
use super::path::{MANAGER_PATH, ROOT_PATH};
use crate::dispatcher::RequestDispatcher;

/// Manager properties that can change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerProperty {
    Attached,
    LastRefresh,
}

/// Service properties that can change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProperty {
    Description,
    Entitled,
    Status,
}

/// Bus operations the object registry needs.
#[async_trait]
pub trait ObjectHost: Send + Sync {
    /// Export a service object at `path` backed by `properties`.
    async fn export_service(
        &self,
        path: &str,
        properties: Arc<RwLock<ServiceProperties>>,
    ) -> zbus::Result<()>;

    /// Remove the service object at `path`.
    async fn unexport_service(&self, path: &str) -> zbus::Result<()>;

    /// Announce changed manager properties.
    async fn manager_changed(&self, changed: &[ManagerProperty]) -> zbus::Result<()>;

    /// Announce changed properties of the service at `path`.
    async fn service_changed(&self, path: &str, changed: &[ServiceProperty]) -> zbus::Result<()>;
}

/// [`ObjectHost`] backed by a zbus connection.
pub struct BusHost {
    connection: Connection,
    dispatcher: Arc<RequestDispatcher>,
    objects: Arc<RwLock<ExportedObjects>>,
}

impl BusHost {
    pub fn new(connection: Connection, dispatcher: Arc<RequestDispatcher>) -> Self {
        Self {
            connection,
            dispatcher,
            objects: Arc::new(RwLock::new(ExportedObjects::default())),
        }
    }

    /// Serve the object manager at `/` and the manager object.
    pub async fn export_manager(&self, state: Arc<RwLock<ManagerProperties>>) -> zbus::Result<()> {
        let server = self.connection.object_server();
        server
            .at(ROOT_PATH, ObjectManagerInterface::new(self.objects.clone()))
            .await?;

        let iface = ManagerInterface::new(state.clone(), self.dispatcher.clone());
        if !server.at(MANAGER_PATH, iface).await? {
            return Err(zbus::Error::Failure(format!(
                "{MANAGER_INTERFACE} already exported at {MANAGER_PATH}"
            )));
        }
        self.objects.write().await.set_manager(state);
        info!("Exported {} at {}", MANAGER_INTERFACE, MANAGER_PATH);
        Ok(())
    }
}

#[async_trait]
impl ObjectHost for BusHost {
    async fn export_service(
        &self,
        path: &str,
        properties: Arc<RwLock<ServiceProperties>>,
    ) -> zbus::Result<()> {
        let name = properties.read().await.name.clone();
        let iface = ServiceInterface::new(name, properties.clone(), self.dispatcher.clone());
        // Announced with InterfacesAdded by the object server.
        if !self.connection.object_server().at(path, iface).await? {
            warn!("{} already exported at {}", SERVICE_INTERFACE, path);
        }
        self.objects.write().await.insert_service(path, properties);
        debug!("Exported {} at {}", SERVICE_INTERFACE, path);
        Ok(())
    }

    async fn unexport_service(&self, path: &str) -> zbus::Result<()> {
        self.objects.write().await.remove_service(path);
        let removed = self
            .connection
            .object_server()
            .remove::<ServiceInterface, _>(path)
            .await?;
        if !removed {
            warn!("No {} exported at {}", SERVICE_INTERFACE, path);
        }
        debug!("Unexported {} at {}", SERVICE_INTERFACE, path);
        Ok(())
    }

    async fn manager_changed(&self, changed: &[ManagerProperty]) -> zbus::Result<()> {
        let iface_ref = self
            .connection
            .object_server()
            .interface::<_, ManagerInterface>(MANAGER_PATH)
            .await?;
        let iface = iface_ref.get().await;
        let emitter = iface_ref.signal_emitter();
        for property in changed {
            match property {
                ManagerProperty::Attached => iface.attached_changed(emitter).await?,
                ManagerProperty::LastRefresh => iface.last_refresh_changed(emitter).await?,
            }
        }
        Ok(())
    }

    async fn service_changed(&self, path: &str, changed: &[ServiceProperty]) -> zbus::Result<()> {
        let iface_ref = self
            .connection
            .object_server()
            .interface::<_, ServiceInterface>(path)
            .await?;
        let iface = iface_ref.get().await;
        let emitter = iface_ref.signal_emitter();
        for property in changed {
            match property {
                ServiceProperty::Description => iface.description_changed(emitter).await?,
                ServiceProperty::Entitled => iface.entitled_changed(emitter).await?,
                ServiceProperty::Status => iface.status_changed(emitter).await?,
            }
        }
        Ok(())
    }
}
