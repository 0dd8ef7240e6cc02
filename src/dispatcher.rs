//! Routing of inbound method calls.
//!
//! Every request ends in exactly one `Result`, which the bus layer turns into
//! exactly one reply:
//!
//! ```text
//! Attach/Detach/Enable/Disable:
//!   Received -> AuthChecking -> Invoking -> Refreshing -> Completed(Ok)
//!                    |              |
//!                    +-> Err(Auth)  +-> Err(Client)
//!
//! RefreshStatus:
//!   Received -> Refreshing -> Completed(Ok) | Err(Refresh)
//! ```
//!
//! Refreshes are handed to the daemon loop, which owns the status source and
//! the object registry. Concurrent mutating requests are not serialized against
//! each other; two overlapping calls may both reach the client tool.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn, Instrument};

use crate::authorization::{Action, AuthError, Authority, Requester};
use crate::client::{ClientError, ClientInvoker};

#[derive(Error, Debug)]
pub enum RequestError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    Refresh(String),

    #[error("Daemon is shutting down")]
    Stopped,
}

/// An inbound method call.
#[derive(Clone, PartialEq, Eq)]
pub enum Request {
    Attach { token: String },
    Detach,
    Enable { service: String },
    Disable { service: String },
    RefreshStatus,
}

// Keep the token out of logs.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attach { .. } => f.debug_struct("Attach").field("token", &"<redacted>").finish(),
            Self::Detach => write!(f, "Detach"),
            Self::Enable { service } => f.debug_struct("Enable").field("service", service).finish(),
            Self::Disable { service } => f.debug_struct("Disable").field("service", service).finish(),
            Self::RefreshStatus => write!(f, "RefreshStatus"),
        }
    }
}

impl Request {
    /// The authorization action this request needs, if any.
    pub fn action(&self) -> Option<Action> {
        match self {
            Request::Attach { .. } => Some(Action::Attach),
            Request::Detach => Some(Action::Detach),
            Request::Enable { .. } => Some(Action::EnableService),
            Request::Disable { .. } => Some(Action::DisableService),
            Request::RefreshStatus => None,
        }
    }
}

/// A refresh handed to the daemon loop; answered once the read completes.
#[derive(Debug)]
pub struct RefreshRequest {
    pub respond_to: oneshot::Sender<Result<(), String>>,
}

pub struct RequestDispatcher {
    authority: Arc<dyn Authority>,
    client: Arc<dyn ClientInvoker>,
    refresh_tx: mpsc::Sender<RefreshRequest>,
}

impl RequestDispatcher {
    pub fn new(
        authority: Arc<dyn Authority>,
        client: Arc<dyn ClientInvoker>,
        refresh_tx: mpsc::Sender<RefreshRequest>,
    ) -> Self {
        Self {
            authority,
            client,
            refresh_tx,
        }
    }

    /// Run `request` to completion on behalf of `requester`.
    pub async fn dispatch(&self, request: Request, requester: &Requester) -> Result<(), RequestError> {
        let span = tracing::info_span!(
            "request",
            kind = ?request,
            requester = %requester,
        );
        self.run(request, requester).instrument(span).await
    }

    async fn run(&self, request: Request, requester: &Requester) -> Result<(), RequestError> {
        let Some(action) = request.action() else {
            debug!("Refreshing status");
            return self.refresh().await;
        };

        debug!(%action, "Checking authorization");
        if let Err(e) = self.authority.check(action, requester).await {
            warn!(error = %e, "Request not authorized");
            return Err(e.into());
        }

        debug!("Invoking UA client");
        let result = match &request {
            Request::Attach { token } => self.client.attach(token).await,
            Request::Detach => self.client.detach().await,
            Request::Enable { service } => self.client.enable(service).await,
            Request::Disable { service } => self.client.disable(service).await,
            Request::RefreshStatus => return self.refresh().await,
        };
        if let Err(e) = result {
            warn!(error = %e, "UA client failed");
            return Err(e.into());
        }

        // The tool already succeeded; a failed re-read only delays the update.
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Status refresh after successful request failed");
        }
        info!("Request completed");
        Ok(())
    }

    /// Ask the daemon loop to re-read status and wait for the result.
    pub async fn refresh(&self) -> Result<(), RequestError> {
        let (respond_to, response) = oneshot::channel();
        self.refresh_tx
            .send(RefreshRequest { respond_to })
            .await
            .map_err(|_| RequestError::Stopped)?;
        response
            .await
            .map_err(|_| RequestError::Stopped)?
            .map_err(RequestError::Refresh)
    }
}
