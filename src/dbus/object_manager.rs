//! `org.freedesktop.DBus.ObjectManager` at `/`, listing only the objects the
//! daemon exports.
//!
//! The object server announces objects added below `/` with `InterfacesAdded`
//! and `InterfacesRemoved` as soon as any interface with this name is served
//! there, so this type only answers `GetManagedObjects`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use zbus::fdo::ManagedObjects;
use zbus::interface;
use zbus::names::OwnedInterfaceName;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

use super::interface::{ManagerProperties, ServiceProperties, MANAGER_INTERFACE, SERVICE_INTERFACE};
use super::path::MANAGER_PATH;

/// Objects currently served, keyed by path.
#[derive(Default)]
pub struct ExportedObjects {
    manager: Option<Arc<RwLock<ManagerProperties>>>,
    services: BTreeMap<String, Arc<RwLock<ServiceProperties>>>,
}

impl ExportedObjects {
    pub fn set_manager(&mut self, state: Arc<RwLock<ManagerProperties>>) {
        self.manager = Some(state);
    }

    pub fn insert_service(&mut self, path: &str, state: Arc<RwLock<ServiceProperties>>) {
        self.services.insert(path.to_string(), state);
    }

    pub fn remove_service(&mut self, path: &str) {
        self.services.remove(path);
    }

    /// The `GetManagedObjects` reply for the current objects.
    pub async fn managed_objects(&self) -> zbus::Result<ManagedObjects> {
        let mut objects = ManagedObjects::new();

        if let Some(manager) = &self.manager {
            let properties = manager.read().await.to_dict();
            objects.insert(
                object_path(MANAGER_PATH)?,
                interfaces(MANAGER_INTERFACE, properties)?,
            );
        }
        for (path, service) in &self.services {
            let properties = service.read().await.to_dict();
            objects.insert(object_path(path)?, interfaces(SERVICE_INTERFACE, properties)?);
        }

        Ok(objects)
    }
}

fn object_path(path: &str) -> zbus::Result<OwnedObjectPath> {
    Ok(OwnedObjectPath::try_from(path)?)
}

fn interfaces(
    name: &str,
    properties: HashMap<String, OwnedValue>,
) -> zbus::Result<HashMap<OwnedInterfaceName, HashMap<String, OwnedValue>>> {
    let name = OwnedInterfaceName::try_from(name)?;
    Ok(HashMap::from([(name, properties)]))
}

pub struct ObjectManagerInterface {
    objects: Arc<RwLock<ExportedObjects>>,
}

impl ObjectManagerInterface {
    pub fn new(objects: Arc<RwLock<ExportedObjects>>) -> Self {
        Self { objects }
    }
}

#[interface(name = "org.freedesktop.DBus.ObjectManager")]
impl ObjectManagerInterface {
    /// The manager and every service object, with all their properties.
    async fn get_managed_objects(&self) -> zbus::fdo::Result<ManagedObjects> {
        Ok(self.objects.read().await.managed_objects().await?)
    }

    #[zbus(signal)]
    pub async fn interfaces_added(
        emitter: &SignalEmitter<'_>,
        object_path: ObjectPath<'_>,
        interfaces_and_properties: HashMap<&str, HashMap<&str, Value<'_>>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn interfaces_removed(
        emitter: &SignalEmitter<'_>,
        object_path: ObjectPath<'_>,
        interfaces: Vec<&str>,
    ) -> zbus::Result<()>;
}
