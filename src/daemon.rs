//! System bus daemon exposing Ubuntu Advantage status.
//!
//! The daemon:
//! 1. Reads the initial status and exports the object tree
//! 2. Claims the well-known bus name
//! 3. Re-reads status when the status file changes or a caller asks for it
//! 4. Reconciles exported objects after every successful read
//! 5. Exits when the name is lost or on SIGINT/SIGTERM

use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zbus::fdo::{DBusProxy, RequestNameFlags, RequestNameReply};
use zbus::Connection;

use crate::authorization::PolkitAuthority;
use crate::client::UaClient;
use crate::config::{BusKind, Config, StatusSourceKind};
use crate::dbus::{BusHost, ObjectHost};
use crate::dispatcher::{RefreshRequest, RequestDispatcher};
use crate::registry::{ExportFailure, ObjectRegistry};
use crate::status::{FileBackend, StatusBackend, StatusFileWatcher, StatusLoaded, StatusSource};

/// Pending refreshes accepted before callers start waiting on the channel.
const REFRESH_QUEUE: usize = 32;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("Status error: {0}")]
    Status(#[from] crate::status::StatusError),

    #[error("Bus name {0} is already owned; use --replace to take it over")]
    NameTaken(String),

    #[error(transparent)]
    Export(#[from] ExportFailure),
}

/// Status source and object registry, driven by one event loop.
pub struct Daemon {
    source: StatusSource,
    loaded_rx: mpsc::UnboundedReceiver<StatusLoaded>,
    registry: ObjectRegistry,
}

impl Daemon {
    pub fn new(backend: Arc<dyn StatusBackend>, host: Arc<dyn ObjectHost>, remove_stale: bool) -> Self {
        let (source, loaded_rx) = StatusSource::new(backend);
        Self {
            source,
            loaded_rx,
            registry: ObjectRegistry::new(host, remove_stale),
        }
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Read the first snapshot and export the objects for it.
    ///
    /// Fails if any service object cannot be exported.
    pub async fn start(&mut self) -> Result<(), DaemonError> {
        let status = self.source.load_initial().await;
        let summary = self.registry.reconcile(&status).await;
        match summary.failed.into_iter().next() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    /// Serve refresh requests and file changes until `shutdown` resolves.
    pub async fn run_loop(
        mut self,
        mut refresh_rx: mpsc::Receiver<RefreshRequest>,
        mut changed_rx: mpsc::UnboundedReceiver<()>,
        shutdown: impl Future<Output = ()>,
    ) -> Self {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(request) = refresh_rx.recv() => {
                    debug!("Status refresh requested");
                    self.source.request(Some(request.respond_to));
                }

                Some(()) = changed_rx.recv() => {
                    // Collapse a burst of events into one read.
                    while changed_rx.try_recv().is_ok() {}
                    debug!("Status file changed");
                    self.source.request(None);
                }

                Some(loaded) = self.loaded_rx.recv() => {
                    if let Some(refreshed) = self.source.complete(loaded) {
                        self.registry.reconcile(&refreshed.status).await;
                        refreshed.acknowledge();
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }
        self
    }
}

/// Run the daemon until shutdown.
pub async fn run(config: Config, replace: bool) -> Result<(), DaemonError> {
    config.validate()?;

    let connection = match config.bus.kind {
        BusKind::System => Connection::system().await?,
        BusKind::Session => Connection::session().await?,
    };
    let authority = match config.bus.kind {
        BusKind::System => {
            PolkitAuthority::new(&connection, config.authorization.allow_user_interaction).await?
        }
        // polkit only lives on the system bus; callers are resolved on ours.
        BusKind::Session => {
            let system = Connection::system().await?;
            PolkitAuthority::new(&system, config.authorization.allow_user_interaction)
                .await?
                .with_caller_bus(&connection)
                .await?
        }
    };
    let authority = Arc::new(authority);
    let client = Arc::new(UaClient::new(&config.client.program));
    let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE);
    let dispatcher = Arc::new(RequestDispatcher::new(authority, client.clone(), refresh_tx));
    let host = Arc::new(BusHost::new(connection.clone(), dispatcher));

    let backend: Arc<dyn StatusBackend> = match config.status.source {
        StatusSourceKind::File => Arc::new(FileBackend::new(&config.status.path)),
        StatusSourceKind::Tool => client,
    };
    let mut daemon = Daemon::new(backend, host.clone(), config.services.remove_stale);
    host.export_manager(daemon.registry().manager_properties()).await?;

    let (changed_tx, changed_rx) = mpsc::unbounded_channel();
    let _watcher = match config.status.source {
        StatusSourceKind::File => Some(StatusFileWatcher::start(&config.status.path, changed_tx.clone())?),
        StatusSourceKind::Tool => None,
    };

    daemon.start().await?;

    let dbus = DBusProxy::new(&connection).await?;
    let mut name_lost = dbus.receive_name_lost().await?;
    claim_name(&connection, &config.bus.name, replace).await?;
    info!(name = %config.bus.name, "Daemon running");

    let bus_name = config.bus.name.clone();
    let shutdown = async move {
        tokio::select! {
            _ = async {
                while let Some(signal) = name_lost.next().await {
                    match signal.args() {
                        Ok(args) if args.name().as_str() == bus_name => break,
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Malformed NameLost signal"),
                    }
                }
            } => warn!(name = %bus_name, "Lost bus name"),
            _ = shutdown_signal() => {}
        }
    };

    daemon.run_loop(refresh_rx, changed_rx, shutdown).await;
    drop(changed_tx);
    info!("Daemon stopped");
    Ok(())
}

/// Request `name`, allowing later instances to replace us.
async fn claim_name(connection: &Connection, name: &str, replace: bool) -> Result<(), DaemonError> {
    let mut flags = RequestNameFlags::AllowReplacement | RequestNameFlags::DoNotQueue;
    if replace {
        flags |= RequestNameFlags::ReplaceExisting;
    }

    match connection.request_name_with_flags(name, flags).await {
        Ok(RequestNameReply::PrimaryOwner) | Ok(RequestNameReply::AlreadyOwner) => {
            info!(%name, "Acquired bus name");
            Ok(())
        }
        Ok(RequestNameReply::InQueue) | Ok(RequestNameReply::Exists) | Err(zbus::Error::NameTaken) => {
            error!(%name, "Bus name already owned");
            Err(DaemonError::NameTaken(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbus::{ManagerProperty, ServiceProperties, ServiceProperty};
    use crate::status::{ServiceInfo, Status, StatusError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{oneshot, RwLock};

    #[derive(Default)]
    struct NullHost {
        manager_changes: Mutex<usize>,
        refuse_exports: bool,
    }

    #[async_trait]
    impl ObjectHost for NullHost {
        async fn export_service(&self, _: &str, _: Arc<RwLock<ServiceProperties>>) -> zbus::Result<()> {
            if self.refuse_exports {
                return Err(zbus::Error::Failure("object server full".into()));
            }
            Ok(())
        }
        async fn unexport_service(&self, _: &str) -> zbus::Result<()> {
            Ok(())
        }
        async fn manager_changed(&self, _: &[ManagerProperty]) -> zbus::Result<()> {
            *self.manager_changes.lock().unwrap() += 1;
            Ok(())
        }
        async fn service_changed(&self, _: &str, _: &[ServiceProperty]) -> zbus::Result<()> {
            Ok(())
        }
    }

    struct SharedBackend(Mutex<Result<Status, String>>);

    #[async_trait]
    impl StatusBackend for SharedBackend {
        fn describe(&self) -> String {
            "test".into()
        }
        async fn load(&self) -> Result<Status, StatusError> {
            match &*self.0.lock().unwrap() {
                Ok(status) => Ok(status.clone()),
                Err(_) => Err(StatusError::NotAnObject),
            }
        }
    }

    fn attached_with(name: &str) -> Status {
        Status {
            attached: true,
            services: vec![ServiceInfo {
                name: name.into(),
                description: String::new(),
                entitled: "yes".into(),
                status: "enabled".into(),
            }],
            last_refresh: None,
        }
    }

    #[test]
    fn test_name_taken_message() {
        let err = DaemonError::NameTaken("com.canonical.UbuntuAdvantage".into());
        assert!(err.to_string().contains("--replace"));
    }

    #[tokio::test]
    async fn test_start_exports_initial_status() {
        let backend = Arc::new(SharedBackend(Mutex::new(Ok(attached_with("esm-infra")))));
        let mut daemon = Daemon::new(backend, Arc::new(NullHost::default()), true);
        daemon.start().await.unwrap();

        assert_eq!(daemon.registry().service_names(), ["esm-infra"]);
        assert!(daemon.registry().manager_properties().read().await.attached);
    }

    #[tokio::test]
    async fn test_start_fails_when_export_fails() {
        let backend = Arc::new(SharedBackend(Mutex::new(Ok(attached_with("esm-infra")))));
        let host = Arc::new(NullHost {
            refuse_exports: true,
            ..Default::default()
        });
        let mut daemon = Daemon::new(backend, host, true);

        let err = daemon.start().await.unwrap_err();
        match err {
            DaemonError::Export(failure) => {
                assert_eq!(failure.service, "esm-infra");
                assert_eq!(failure.reason, "object server full");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(daemon.registry().service_names().is_empty());
    }

    #[tokio::test]
    async fn test_start_with_failing_backend_exports_nothing() {
        let backend = Arc::new(SharedBackend(Mutex::new(Err("broken".into()))));
        let mut daemon = Daemon::new(backend, Arc::new(NullHost::default()), true);
        daemon.start().await.unwrap();

        assert!(daemon.registry().service_names().is_empty());
        assert!(!daemon.registry().manager_properties().read().await.attached);
    }

    #[tokio::test]
    async fn test_loop_answers_refresh_and_reconciles() {
        let backend = Arc::new(SharedBackend(Mutex::new(Ok(Status::default()))));
        let mut daemon = Daemon::new(backend.clone(), Arc::new(NullHost::default()), true);
        daemon.start().await.unwrap();

        let (refresh_tx, refresh_rx) = mpsc::channel(4);
        let (_changed_tx, changed_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(daemon.run_loop(refresh_rx, changed_rx, async move {
            let _ = stop_rx.await;
        }));

        *backend.0.lock().unwrap() = Ok(attached_with("fips"));
        let (respond_to, response) = oneshot::channel();
        refresh_tx.send(RefreshRequest { respond_to }).await.unwrap();
        assert_eq!(response.await.unwrap(), Ok(()));

        stop_tx.send(()).unwrap();
        let daemon = handle.await.unwrap();
        assert_eq!(daemon.registry().service_names(), ["fips"]);
    }

    #[tokio::test]
    async fn test_loop_file_change_triggers_read() {
        let backend = Arc::new(SharedBackend(Mutex::new(Ok(Status::default()))));
        let host = Arc::new(NullHost::default());
        let mut daemon = Daemon::new(backend.clone(), host.clone(), true);
        daemon.start().await.unwrap();

        let (_refresh_tx, refresh_rx) = mpsc::channel(4);
        let (changed_tx, changed_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(daemon.run_loop(refresh_rx, changed_rx, async move {
            let _ = stop_rx.await;
        }));

        *backend.0.lock().unwrap() = Ok(attached_with("cis"));
        changed_tx.send(()).unwrap();
        changed_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while *host.manager_changes.lock().unwrap() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        let daemon = handle.await.unwrap();
        assert_eq!(daemon.registry().service_names(), ["cis"]);
    }

    #[tokio::test]
    async fn test_loop_refresh_failure_reported() {
        let backend = Arc::new(SharedBackend(Mutex::new(Ok(Status::default()))));
        let mut daemon = Daemon::new(backend.clone(), Arc::new(NullHost::default()), true);
        daemon.start().await.unwrap();

        let (refresh_tx, refresh_rx) = mpsc::channel(4);
        let (_changed_tx, changed_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(daemon.run_loop(refresh_rx, changed_rx, async move {
            let _ = stop_rx.await;
        }));

        *backend.0.lock().unwrap() = Err("broken".into());
        let (respond_to, response) = oneshot::channel();
        refresh_tx.send(RefreshRequest { respond_to }).await.unwrap();
        assert!(response.await.unwrap().is_err());

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
