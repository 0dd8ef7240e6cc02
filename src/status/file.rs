//! Status file backend and watcher.
//!
//! The client tool rewrites its status file whenever the machine's state
//! changes. The watcher follows the file's parent directory so that creation
//! of a file that does not exist yet is seen too.

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Status, StatusBackend, StatusError};

/// Reads the status JSON file written by the client tool.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StatusBackend for FileBackend {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Status, StatusError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Status::parse(&data),
            // No file yet means the tool has never run: not attached.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "UA status file not found");
                Ok(Status::default())
            }
            Err(source) => Err(StatusError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Keeps a filesystem watch on the status file alive.
///
/// Each relevant change sends `()` on the channel given to [`start`](Self::start).
pub struct StatusFileWatcher {
    _watcher: RecommendedWatcher,
}

impl StatusFileWatcher {
    /// Watch `path`; its parent directory must exist and be readable.
    pub fn start(path: &Path, changed_tx: mpsc::UnboundedSender<()>) -> Result<Self, StatusError> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) => {
                if is_status_change(&event, file_name.as_ref()) {
                    let _ = changed_tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "Status file watcher error"),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), "Watching UA status file");
        Ok(Self { _watcher: watcher })
    }
}

/// Whether `event` creates, modifies or removes the watched file.
fn is_status_change(event: &Event, file_name: Option<&OsString>) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n.to_os_string()).as_ref() == file_name)
}
