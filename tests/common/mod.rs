//! Doubles shared by the integration tests.
//!
//! [`FakeTool`] keeps a status document in memory, changes it the way the
//! client tool would and serves it as the status backend.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use ua_daemon::authorization::{Action, AuthError, Authority, Requester};
use ua_daemon::client::{ClientError, ClientInvoker};
use ua_daemon::status::{StatusBackend, StatusError};
use ua_daemon::Status;

pub const VALID_TOKEN: &str = "C1VALIDTEST";

pub const ESM_APPS_PATH: &str = "/com/canonical/UbuntuAdvantage/Services/esm_2dapps";
pub const LIVEPATCH_PATH: &str = "/com/canonical/UbuntuAdvantage/Services/livepatch";

pub fn fixture() -> Value {
    json!({
        "attached": false,
        "services": [
            {
                "name": "esm-apps",
                "description": "UA Apps: Extended Security Maintenance (ESM)",
                "available": "yes",
                "entitled": "yes",
                "status": "disabled"
            },
            {
                "name": "livepatch",
                "description": "Canonical Livepatch service",
                "available": "yes",
                "entitled": "no",
                "status": "n/a"
            },
            {
                "name": "fips",
                "description": "NIST-certified core packages",
                "available": "no",
                "entitled": "yes",
                "status": "n/a"
            }
        ]
    })
}

/// In-memory client tool: mutates its status document like `ua` would.
pub struct FakeTool {
    pub document: Mutex<Value>,
    calls: Mutex<Vec<String>>,
}

impl FakeTool {
    pub fn new(document: Value) -> Arc<Self> {
        Arc::new(Self {
            document: Mutex::new(document),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn set_service_status(&self, name: &str, status: &str) -> Result<(), ClientError> {
        let mut doc = self.document.lock().unwrap();
        let services = doc["services"].as_array_mut().ok_or(ClientError::Exit(1))?;
        let service = services
            .iter_mut()
            .find(|s| s["name"] == name && s["entitled"] == "yes")
            .ok_or(ClientError::Exit(1))?;
        service["status"] = json!(status);
        Ok(())
    }
}

#[async_trait]
impl ClientInvoker for FakeTool {
    async fn attach(&self, token: &str) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push("attach".into());
        if token != VALID_TOKEN {
            return Err(ClientError::Exit(1));
        }
        self.document.lock().unwrap()["attached"] = json!(true);
        Ok(())
    }

    async fn detach(&self) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push("detach".into());
        let mut doc = self.document.lock().unwrap();
        if doc["attached"] != true {
            return Err(ClientError::Exit(1));
        }
        doc["attached"] = json!(false);
        Ok(())
    }

    async fn enable(&self, service: &str) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(format!("enable {service}"));
        self.set_service_status(service, "enabled")
    }

    async fn disable(&self, service: &str) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(format!("disable {service}"));
        self.set_service_status(service, "disabled")
    }
}

#[async_trait]
impl StatusBackend for FakeTool {
    fn describe(&self) -> String {
        "fake ua".into()
    }

    async fn load(&self) -> Result<Status, StatusError> {
        let bytes = serde_json::to_vec(&*self.document.lock().unwrap())?;
        Status::parse(&bytes)
    }
}

pub struct FixedAuthority(pub Result<(), AuthError>);

#[async_trait]
impl Authority for FixedAuthority {
    async fn check(&self, _action: Action, _requester: &Requester) -> Result<(), AuthError> {
        self.0.clone()
    }
}
