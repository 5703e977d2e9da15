//! Seams between step runners and the cluster.
//!
//! The controller proper wires these traits to real Kubernetes clients;
//! everything in this crate only ever talks through them. [`InMemoryCluster`]
//! is the in-process implementation used by tests and embedders who want to
//! exercise steps without a cluster.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Context as _, Result, anyhow};
use chrono::{DateTime, Utc};
use conveyor_argocd::Application;
use conveyor_types::{ObjectKey, Stage};
use serde_json::Value;

use crate::merge::recursive_merge;

/// Read access to stages.
pub trait StageLookup: Send + Sync {
    /// Fetch a stage by key; `Ok(None)` when it does not exist.
    fn get_stage(&self, key: &ObjectKey) -> Result<Option<Stage>>;
}

/// Reference to the object an event is about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectReference {
    /// API version of the referenced object.
    pub api_version: String,
    /// Kind of the referenced object.
    pub kind: String,
    /// Namespace of the referenced object.
    pub namespace: String,
    /// Name of the referenced object.
    pub name: String,
    /// UID of the referenced object.
    pub uid: String,
    /// Resource version of the referenced object.
    pub resource_version: String,
}

/// An event recorded against an `Application`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationEvent {
    /// The object the event is about.
    pub involved: ObjectReference,
    /// Event type, `Normal` or `Warning`.
    pub event_type: String,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// When the event first occurred.
    pub first_timestamp: DateTime<Utc>,
    /// When the event last occurred.
    pub last_timestamp: DateTime<Utc>,
    /// Occurrence count.
    pub count: i32,
}

/// Access to Argo CD `Application` objects.
///
/// Mutation happens exclusively through
/// [`patch_application`](ArgoCdClient::patch_application), a JSON merge
/// patch, so fields the controller does not own are preserved.
pub trait ArgoCdClient: Send + Sync {
    /// Fetch an application by key; `Ok(None)` when it does not exist.
    fn get_application(&self, key: &ObjectKey) -> Result<Option<Application>>;

    /// Apply a JSON merge patch to the application at `key`.
    fn patch_application(&self, key: &ObjectKey, patch: &Value) -> Result<()>;

    /// Record an event against an application.
    fn create_event(&self, event: &ApplicationEvent) -> Result<()>;
}

/// In-process cluster holding stages, applications, and recorded events.
///
/// Applications are stored as raw JSON and patched with the same recursive
/// merge the real controller requests server-side, so patch round-trips
/// behave like the API server's merge patch.
#[derive(Default)]
pub struct InMemoryCluster {
    stages: Mutex<BTreeMap<ObjectKey, Stage>>,
    applications: Mutex<BTreeMap<ObjectKey, Value>>,
    events: Mutex<Vec<ApplicationEvent>>,
}

impl InMemoryCluster {
    /// An empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage, replacing any existing one with the same key.
    pub fn put_stage(&self, stage: Stage) {
        let key = ObjectKey::new(stage.namespace.clone(), stage.name.clone());
        self.stages.lock().expect("stages lock").insert(key, stage);
    }

    /// Add an application, replacing any existing one with the same key.
    pub fn put_application(&self, app: &Application) {
        let key = ObjectKey::new(app.metadata.namespace.clone(), app.metadata.name.clone());
        let value = serde_json::to_value(app).expect("application serializes to JSON");
        self.applications
            .lock()
            .expect("applications lock")
            .insert(key, value);
    }

    /// Fetch the stored application at `key`, if any.
    pub fn application(&self, key: &ObjectKey) -> Option<Application> {
        let stored = self.applications.lock().expect("applications lock");
        stored
            .get(key)
            .cloned()
            .map(|value| serde_json::from_value(value).expect("stored application is valid"))
    }

    /// Raw JSON of the stored application at `key`, patches applied.
    pub fn application_json(&self, key: &ObjectKey) -> Option<Value> {
        self.applications.lock().expect("applications lock").get(key).cloned()
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<ApplicationEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl StageLookup for InMemoryCluster {
    fn get_stage(&self, key: &ObjectKey) -> Result<Option<Stage>> {
        Ok(self.stages.lock().expect("stages lock").get(key).cloned())
    }
}

impl ArgoCdClient for InMemoryCluster {
    fn get_application(&self, key: &ObjectKey) -> Result<Option<Application>> {
        let stored = self.applications.lock().expect("applications lock");
        stored
            .get(key)
            .cloned()
            .map(|value| {
                serde_json::from_value(value)
                    .with_context(|| format!("stored Application {key} is malformed"))
            })
            .transpose()
    }

    fn patch_application(&self, key: &ObjectKey, patch: &Value) -> Result<()> {
        let mut stored = self.applications.lock().expect("applications lock");
        let existing = stored
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("Application {key} not found"))?;
        stored.insert(key.clone(), recursive_merge(patch.clone(), existing));
        Ok(())
    }

    fn create_event(&self, event: &ApplicationEvent) -> Result<()> {
        self.events.lock().expect("events lock").push(event.clone());
        Ok(())
    }
}

/// A stage lookup that fails every call; for exercising error paths.
pub struct FailingStageLookup;

impl StageLookup for FailingStageLookup {
    fn get_stage(&self, _key: &ObjectKey) -> Result<Option<Stage>> {
        Err(anyhow!("something went wrong"))
    }
}
