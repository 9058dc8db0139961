//! In-memory fakes for driving the poller and scheduler in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use confwatch_core::{Device, DeviceName};

use crate::notify::{Notifier, NotifyError};
use crate::querier::{DeviceQuerier, QueryError};

/// Querier whose answers are scripted per device and counter key.
///
/// Tests mutate the script between rounds to simulate counter movement
/// and failures.
#[derive(Default)]
pub(crate) struct ScriptedQuerier {
    values: Mutex<HashMap<(String, String), u64>>,
    failures: Mutex<HashMap<String, QueryError>>,
}

impl ScriptedQuerier {
    /// Script the value returned for one device/key pair. Clears any
    /// device-wide failure previously set for the device.
    pub(crate) fn set(&self, device: &str, key: &str, value: Result<u64, QueryError>) {
        match value {
            Ok(v) => {
                self.failures.lock().unwrap().remove(device);
                self.values
                    .lock()
                    .unwrap()
                    .insert((device.to_string(), key.to_string()), v);
            }
            Err(e) => {
                self.failures.lock().unwrap().insert(device.to_string(), e);
            }
        }
    }

    /// Make every query against `device` fail with `error`.
    pub(crate) fn fail_all(&self, device: &str, error: QueryError) {
        self.failures.lock().unwrap().insert(device.to_string(), error);
    }
}

#[async_trait]
impl DeviceQuerier for ScriptedQuerier {
    async fn query(&self, device: &Device, key: &str) -> Result<u64, QueryError> {
        if let Some(err) = self.failures.lock().unwrap().get(device.name.as_str()) {
            return Err(err.clone());
        }
        self.values
            .lock()
            .unwrap()
            .get(&(device.name.as_str().to_string(), key.to_string()))
            .copied()
            .ok_or_else(|| QueryError::Malformed(format!("unscripted key {key}")))
    }
}

/// Notifier that records every delivery.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(DeviceName, String, String)>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<(DeviceName, String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every subsequent delivery fail.
    pub(crate) fn fail_deliveries(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        device: &DeviceName,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if *self.fail.lock().unwrap() {
            return Err(NotifyError::Spawn("scripted failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((device.clone(), subject.to_string(), body.to_string()));
        Ok(())
    }
}
