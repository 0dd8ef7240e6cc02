//! D-Bus surface of the daemon.
//!
//! Exposes the `com.canonical.UbuntuAdvantage.Manager` and
//! `com.canonical.UbuntuAdvantage.Service` interfaces on the system bus, with an
//! `org.freedesktop.DBus.ObjectManager` at `/` for bulk discovery. The object
//! manager lists the manager and service objects only, never the empty
//! intermediate nodes of the tree.
//!
//! # Object tree
//!
//! ```text
//! /                                                    ObjectManager
//! /com/canonical/UbuntuAdvantage/Manager               Manager
//! /com/canonical/UbuntuAdvantage/Services/esm_2dapps   Service
//! /com/canonical/UbuntuAdvantage/Services/livepatch    Service
//! ```
//!
//! Service objects come and go as the object registry reconciles new status
//! snapshots; the object manager announces them with `InterfacesAdded` and
//! `InterfacesRemoved`.

mod host;
mod interface;
mod object_manager;
mod path;

pub use host::{BusHost, ManagerProperty, ObjectHost, ServiceProperty};
pub use interface::{
    ManagerInterface, ManagerProperties, ServiceInterface, ServiceProperties, UaError,
    MANAGER_INTERFACE, SERVICE_INTERFACE,
};
pub use object_manager::{ExportedObjects, ObjectManagerInterface};
pub use path::{
    escape_object_path, service_object_path, unescape_object_path, MANAGER_PATH, ROOT_PATH,
    SERVICES_PATH,
};

/// Well-known bus name of the daemon.
pub const BUS_NAME: &str = "com.canonical.UbuntuAdvantage";
