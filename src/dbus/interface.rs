//! D-Bus interface definitions for the manager and service objects.
//!
//! Property values live in shared state owned by the object registry; the
//! interfaces only read them. Method calls are forwarded to the
//! [`RequestDispatcher`] with the caller's unique name as requester identity.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use zbus::interface;
use zbus::message::Header;
use zbus::zvariant::{OwnedValue, Str};

use crate::authorization::Requester;
use crate::dispatcher::{Request, RequestDispatcher, RequestError};

/// Interface name of the manager object.
pub const MANAGER_INTERFACE: &str = "com.canonical.UbuntuAdvantage.Manager";

/// Interface name of service objects.
pub const SERVICE_INTERFACE: &str = "com.canonical.UbuntuAdvantage.Service";

/// Errors returned to bus callers.
///
/// Wire names are `com.canonical.UbuntuAdvantage.Failed` and
/// `com.canonical.UbuntuAdvantage.AuthFailed`.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "com.canonical.UbuntuAdvantage")]
pub enum UaError {
    #[zbus(error)]
    ZBus(zbus::Error),
    /// The operation was attempted and failed.
    Failed(String),
    /// The caller is not allowed to perform the operation.
    AuthFailed(String),
}

impl UaError {
    /// Convert a request failure, prefixing operational errors with `context`.
    pub fn from_request(context: &str, err: RequestError) -> Self {
        match err {
            RequestError::Auth(e) => UaError::AuthFailed(e.to_string()),
            other => UaError::Failed(format!("{context}: {other}")),
        }
    }
}

/// Manager object state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerProperties {
    pub attached: bool,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl ManagerProperties {
    /// `LastRefresh` as exposed on the bus: RFC 3339, or empty before the first snapshot.
    pub fn last_refresh_string(&self) -> String {
        self.last_refresh
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }

    /// All `Manager` properties, as returned by `GetAll`.
    pub fn to_dict(&self) -> HashMap<String, OwnedValue> {
        HashMap::from([
            ("Attached".to_string(), OwnedValue::from(self.attached)),
            (
                "LastRefresh".to_string(),
                OwnedValue::from(Str::from(self.last_refresh_string())),
            ),
            (
                "DaemonVersion".to_string(),
                OwnedValue::from(Str::from(env!("CARGO_PKG_VERSION"))),
            ),
        ])
    }
}

/// Service object state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceProperties {
    pub name: String,
    pub description: String,
    pub entitled: String,
    pub status: String,
}

impl ServiceProperties {
    /// All `Service` properties, as returned by `GetAll`.
    pub fn to_dict(&self) -> HashMap<String, OwnedValue> {
        [
            ("Name", &self.name),
            ("Description", &self.description),
            ("Entitled", &self.entitled),
            ("Status", &self.status),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), OwnedValue::from(Str::from(value.clone()))))
        .collect()
    }
}

fn requester(header: &Header<'_>) -> Requester {
    Requester::new(
        header
            .sender()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
    )
}

/// The single manager object at `/com/canonical/UbuntuAdvantage/Manager`.
pub struct ManagerInterface {
    state: Arc<RwLock<ManagerProperties>>,
    dispatcher: Arc<RequestDispatcher>,
}

impl ManagerInterface {
    pub fn new(state: Arc<RwLock<ManagerProperties>>, dispatcher: Arc<RequestDispatcher>) -> Self {
        Self { state, dispatcher }
    }
}

#[interface(name = "com.canonical.UbuntuAdvantage.Manager")]
impl ManagerInterface {
    /// Attach this machine to a subscription.
    async fn attach(&self, #[zbus(header)] header: Header<'_>, token: String) -> Result<(), UaError> {
        self.dispatcher
            .dispatch(Request::Attach { token }, &requester(&header))
            .await
            .map_err(|e| UaError::from_request("Failed to attach", e))
    }

    /// Detach this machine from its subscription.
    async fn detach(&self, #[zbus(header)] header: Header<'_>) -> Result<(), UaError> {
        self.dispatcher
            .dispatch(Request::Detach, &requester(&header))
            .await
            .map_err(|e| UaError::from_request("Failed to detach", e))
    }

    /// Re-read the client tool's status.
    async fn refresh_status(&self, #[zbus(header)] header: Header<'_>) -> Result<(), UaError> {
        self.dispatcher
            .dispatch(Request::RefreshStatus, &requester(&header))
            .await
            .map_err(|e| UaError::from_request("Failed to refresh status", e))
    }

    /// Whether this machine is attached to a subscription.
    #[zbus(property)]
    async fn attached(&self) -> bool {
        self.state.read().await.attached
    }

    /// When the status was last obtained.
    #[zbus(property)]
    async fn last_refresh(&self) -> String {
        self.state.read().await.last_refresh_string()
    }

    /// Daemon version.
    #[zbus(property)]
    fn daemon_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }
}

/// One service object under `/com/canonical/UbuntuAdvantage/Services`.
pub struct ServiceInterface {
    name: String,
    state: Arc<RwLock<ServiceProperties>>,
    dispatcher: Arc<RequestDispatcher>,
}

impl ServiceInterface {
    pub fn new(
        name: String,
        state: Arc<RwLock<ServiceProperties>>,
        dispatcher: Arc<RequestDispatcher>,
    ) -> Self {
        Self {
            name,
            state,
            dispatcher,
        }
    }
}

#[interface(name = "com.canonical.UbuntuAdvantage.Service")]
impl ServiceInterface {
    /// Enable this service.
    async fn enable(&self, #[zbus(header)] header: Header<'_>) -> Result<(), UaError> {
        let request = Request::Enable {
            service: self.name.clone(),
        };
        self.dispatcher
            .dispatch(request, &requester(&header))
            .await
            .map_err(|e| UaError::from_request("Failed to enable service", e))
    }

    /// Disable this service.
    async fn disable(&self, #[zbus(header)] header: Header<'_>) -> Result<(), UaError> {
        let request = Request::Disable {
            service: self.name.clone(),
        };
        self.dispatcher
            .dispatch(request, &requester(&header))
            .await
            .map_err(|e| UaError::from_request("Failed to disable service", e))
    }

    #[zbus(property)]
    fn name(&self) -> &str {
        &self.name
    }

    #[zbus(property)]
    async fn description(&self) -> String {
        self.state.read().await.description.clone()
    }

    #[zbus(property)]
    async fn entitled(&self) -> String {
        self.state.read().await.entitled.clone()
    }

    #[zbus(property)]
    async fn status(&self) -> String {
        self.state.read().await.status.clone()
    }
}
