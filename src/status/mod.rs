//! Ubuntu Advantage status snapshots.
//!
//! A [`Status`] is the normalized view of the client tool's `status --format json`
//! output (or the status file it maintains on disk). Snapshots are produced by a
//! [`StatusSource`] and handed by value to the object registry.
//!
//! # Schema
//!
//! ```text
//! {
//!   "attached": bool,
//!   "services": [
//!     { "name": "esm-apps", "description": "...", "available": "yes",
//!       "entitled": "yes", "status": "enabled" }
//!   ]
//! }
//! ```
//!
//! Every field except a service's `name` is optional. Services whose
//! `available` field is present and not `"yes"` are dropped.

mod file;
mod monitor;

pub use file::{FileBackend, StatusFileWatcher};
pub use monitor::{Refreshed, StatusBackend, StatusLoaded, StatusSource};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::client::ClientError;

/// Errors produced while obtaining a status snapshot.
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Failed to parse UA status: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid UA status JSON: root is not an object")]
    NotAnObject,

    #[error("Failed to read UA status file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watch UA status file: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// One named service as reported by the client tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub description: String,
    /// Entitlement token, passed through verbatim ("yes", "no", ...).
    pub entitled: String,
    /// Service state, passed through verbatim ("enabled", "disabled", "n/a", ...).
    pub status: String,
}

/// Attachment state plus the list of available services.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub attached: bool,
    /// Available services in source order, unique by name.
    pub services: Vec<ServiceInfo>,
    /// When this snapshot was obtained.
    pub last_refresh: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawStatus {
    #[serde(default)]
    attached: bool,
    #[serde(default)]
    services: Vec<RawService>,
}

#[derive(Deserialize)]
struct RawService {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    available: Option<String>,
    #[serde(default)]
    entitled: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl Status {
    /// Parse a status document.
    ///
    /// Missing fields fall back to `false` / empty strings. Entries without a
    /// name are skipped, and only the first entry for a repeated name is kept.
    pub fn parse(data: &[u8]) -> Result<Self, StatusError> {
        let root: serde_json::Value = serde_json::from_slice(data)?;
        if !root.is_object() {
            return Err(StatusError::NotAnObject);
        }
        let raw: RawStatus = serde_json::from_value(root)?;

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(raw.services.len());
        for service in raw.services {
            let Some(name) = service.name.filter(|n| !n.is_empty()) else {
                debug!("Skipping UA service without a name");
                continue;
            };
            if service.available.as_deref().is_some_and(|a| a != "yes") {
                debug!(service = %name, "Skipping unavailable UA service");
                continue;
            }
            if !seen.insert(name.clone()) {
                debug!(service = %name, "Skipping duplicate UA service");
                continue;
            }
            services.push(ServiceInfo {
                name,
                description: service.description.unwrap_or_default(),
                entitled: service.entitled.unwrap_or_default(),
                status: service.status.unwrap_or_default(),
            });
        }

        Ok(Self {
            attached: raw.attached,
            services,
            last_refresh: None,
        })
    }

    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceInfo> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Stamp the snapshot with the time it was obtained.
    pub fn refreshed_at(mut self, time: DateTime<Utc>) -> Self {
        self.last_refresh = Some(time);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "attached": false,
        "services": [
            {"name": "esm-apps", "description": "UA Apps: Extended Security Maintenance (ESM)",
             "available": "yes", "entitled": "yes", "status": "disabled"},
            {"name": "livepatch", "description": "Canonical Livepatch service",
             "available": "yes", "entitled": "no", "status": "n/a"},
            {"name": "disabled", "description": "A disabled service", "available": "no"}
        ]
    }"#;

    #[test]
    fn test_parse_fixture() {
        let status = Status::parse(FIXTURE.as_bytes()).unwrap();
        assert!(!status.attached);
        assert_eq!(status.services.len(), 2);
        assert_eq!(status.last_refresh, None);

        let esm = status.service("esm-apps").unwrap();
        assert_eq!(esm.description, "UA Apps: Extended Security Maintenance (ESM)");
        assert_eq!(esm.entitled, "yes");
        assert_eq!(esm.status, "disabled");

        let livepatch = status.service("livepatch").unwrap();
        assert_eq!(livepatch.entitled, "no");
        assert_eq!(livepatch.status, "n/a");
    }

    #[test]
    fn test_unavailable_services_dropped() {
        let status = Status::parse(FIXTURE.as_bytes()).unwrap();
        assert!(status.service("disabled").is_none());
    }

    #[test]
    fn test_available_other_than_yes_dropped() {
        let json = r#"{"services": [{"name": "fips", "available": "maybe"}]}"#;
        let status = Status::parse(json.as_bytes()).unwrap();
        assert!(status.services.is_empty());
    }

    #[test]
    fn test_missing_fields_default() {
        let json = r#"{"services": [{"name": "cc-eal"}]}"#;
        let status = Status::parse(json.as_bytes()).unwrap();
        assert!(!status.attached);
        assert_eq!(
            status.services,
            vec![ServiceInfo {
                name: "cc-eal".to_string(),
                ..Default::default()
            }]
        );
    }

    #[test]
    fn test_empty_object() {
        let status = Status::parse(b"{}").unwrap();
        assert_eq!(status, Status::default());
    }

    #[test]
    fn test_order_preserved() {
        let json = r#"{"services": [{"name": "b"}, {"name": "a"}, {"name": "c"}]}"#;
        let status = Status::parse(json.as_bytes()).unwrap();
        let names: Vec<_> = status.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let json = r#"{"services": [
            {"name": "esm-infra", "status": "enabled"},
            {"name": "esm-infra", "status": "disabled"}
        ]}"#;
        let status = Status::parse(json.as_bytes()).unwrap();
        assert_eq!(status.services.len(), 1);
        assert_eq!(status.services[0].status, "enabled");
    }

    #[test]
    fn test_nameless_entry_skipped() {
        let json = r#"{"services": [{"status": "enabled"}, {"name": ""}, {"name": "ros"}]}"#;
        let status = Status::parse(json.as_bytes()).unwrap();
        assert_eq!(status.services.len(), 1);
        assert_eq!(status.services[0].name, "ros");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"attached": true, "_schema_version": "0.1", "machine_id": "abc",
                       "services": [{"name": "usg", "blocked_by": []}]}"#;
        let status = Status::parse(json.as_bytes()).unwrap();
        assert!(status.attached);
        assert_eq!(status.services[0].name, "usg");
    }

    #[test]
    fn test_malformed_json() {
        let err = Status::parse(b"{\"attached\": ").unwrap_err();
        assert!(matches!(err, StatusError::Parse(_)));
    }

    #[test]
    fn test_root_not_object() {
        let err = Status::parse(b"[true, []]").unwrap_err();
        assert!(matches!(err, StatusError::NotAnObject));
    }

    #[test]
    fn test_refreshed_at() {
        let now = Utc::now();
        let status = Status::default().refreshed_at(now);
        assert_eq!(status.last_refresh, Some(now));
    }
}
