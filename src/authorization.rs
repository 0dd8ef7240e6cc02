//! Authorization checks for mutating requests.
//!
//! The production [`Authority`] is polkit, asked over the system bus whether
//! the calling bus peer may perform an action. Peers on the system bus are
//! passed as `system-bus-name` subjects; peers on any other bus are resolved
//! to their process first, since polkit cannot see that bus.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;
use zbus::fdo::DBusProxy;
use zbus::names::BusName;
use zbus::zvariant::Value;
use zbus::Connection;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not allowed to perform {0}")]
    Denied(String),

    #[error("Authorization check failed: {0}")]
    Failed(String),
}

/// Actions guarded by authorization, one per mutating bus method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Attach,
    Detach,
    EnableService,
    DisableService,
}

impl Action {
    /// The polkit action id.
    pub fn id(&self) -> &'static str {
        match self {
            Action::Attach => "com.canonical.UbuntuAdvantage.attach",
            Action::Detach => "com.canonical.UbuntuAdvantage.detach",
            Action::EnableService => "com.canonical.UbuntuAdvantage.enable-service",
            Action::DisableService => "com.canonical.UbuntuAdvantage.disable-service",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Identity of the peer that made a request: its unique bus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requester(String);

impl Requester {
    pub fn new(bus_name: impl Into<String>) -> Self {
        Self(bus_name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Authority: Send + Sync {
    /// Succeeds only if `requester` may perform `action`.
    async fn check(&self, action: Action, requester: &Requester) -> Result<(), AuthError>;
}

/// polkit subject: kind plus details, signature `(sa{sv})`.
type Subject<'a> = (&'a str, HashMap<&'a str, Value<'a>>);

/// The party polkit is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PolkitSubject {
    /// A peer on the system bus.
    BusName(String),
    /// A local process. polkit looks up the start time itself when it is 0.
    Process { pid: u32, uid: u32 },
}

impl PolkitSubject {
    fn to_wire(&self) -> Subject<'_> {
        match self {
            PolkitSubject::BusName(name) => (
                "system-bus-name",
                HashMap::from([("name", Value::from(name.as_str()))]),
            ),
            PolkitSubject::Process { pid, uid } => (
                "unix-process",
                HashMap::from([
                    ("pid", Value::from(*pid)),
                    ("start-time", Value::from(0u64)),
                    // -1 asks polkit to look the owner up.
                    ("uid", Value::from(i32::try_from(*uid).unwrap_or(-1))),
                ]),
            ),
        }
    }
}

#[zbus::proxy(
    interface = "org.freedesktop.PolicyKit1.Authority",
    default_service = "org.freedesktop.PolicyKit1",
    default_path = "/org/freedesktop/PolicyKit1/Authority"
)]
trait PolicyKitAuthority {
    /// Returns `(is_authorized, is_challenge, details)`.
    fn check_authorization(
        &self,
        subject: &Subject<'_>,
        action_id: &str,
        details: HashMap<&str, &str>,
        flags: u32,
        cancellation_id: &str,
    ) -> zbus::Result<(bool, bool, HashMap<String, String>)>;
}

const ALLOW_USER_INTERACTION: u32 = 0x1;

/// Checks actions against polkit.
pub struct PolkitAuthority {
    proxy: PolicyKitAuthorityProxy<'static>,
    allow_user_interaction: bool,
    /// Set when callers live on a bus other than the system bus.
    caller_bus: Option<DBusProxy<'static>>,
}

impl PolkitAuthority {
    /// Ask polkit on the system bus `connection` about system bus callers.
    pub async fn new(connection: &Connection, allow_user_interaction: bool) -> zbus::Result<Self> {
        let proxy = PolicyKitAuthorityProxy::new(connection).await?;
        Ok(Self {
            proxy,
            allow_user_interaction,
            caller_bus: None,
        })
    }

    /// Resolve callers to processes on `bus` before asking polkit.
    pub async fn with_caller_bus(mut self, bus: &Connection) -> zbus::Result<Self> {
        self.caller_bus = Some(DBusProxy::new(bus).await?);
        Ok(self)
    }

    async fn subject(&self, requester: &Requester) -> Result<PolkitSubject, AuthError> {
        let Some(dbus) = &self.caller_bus else {
            return Ok(PolkitSubject::BusName(requester.as_str().to_string()));
        };

        let name = BusName::try_from(requester.as_str())
            .map_err(|e| AuthError::Failed(format!("invalid caller {requester}: {e}")))?;
        let pid = dbus
            .get_connection_unix_process_id(name.clone())
            .await
            .map_err(|e| AuthError::Failed(format!("cannot resolve caller {requester}: {e}")))?;
        let uid = dbus
            .get_connection_unix_user(name)
            .await
            .map_err(|e| AuthError::Failed(format!("cannot resolve caller {requester}: {e}")))?;
        Ok(PolkitSubject::Process { pid, uid })
    }
}

#[async_trait]
impl Authority for PolkitAuthority {
    async fn check(&self, action: Action, requester: &Requester) -> Result<(), AuthError> {
        let subject = self.subject(requester).await?;
        let flags = if self.allow_user_interaction {
            ALLOW_USER_INTERACTION
        } else {
            0
        };

        let (authorized, challenge, _details) = self
            .proxy
            .check_authorization(&subject.to_wire(), action.id(), HashMap::new(), flags, "")
            .await
            .map_err(|e| AuthError::Failed(e.to_string()))?;

        debug!(%action, %requester, ?subject, authorized, challenge, "polkit authorization result");
        if authorized {
            Ok(())
        } else {
            Err(AuthError::Denied(action.id().to_string()))
        }
    }
}
