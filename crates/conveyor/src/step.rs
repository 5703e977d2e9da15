//! The step ABI: what a promotion step receives and what it returns.

use std::sync::Arc;

use conveyor_types::{FreightCollection, StepError, StepResult};
use serde_json::Value;

use crate::cluster::{ArgoCdClient, InMemoryCluster, StageLookup};

/// Everything a step invocation may consult.
///
/// The freight collection is read-only to steps; the cluster is reached
/// only through the seams carried here. `argocd` is `None` on controllers
/// with Argo CD integration disabled.
#[derive(Clone)]
pub struct StepContext {
    /// Project (namespace) the promotion runs in.
    pub project: String,
    /// Stage being promoted to.
    pub stage: String,
    /// The freight collection being promoted.
    pub freight: FreightCollection,
    /// This step's configuration tree.
    pub config: Value,
    /// Outputs of previously completed steps, keyed by step alias.
    pub state: Value,
    /// Stage reader.
    pub stages: Arc<dyn StageLookup>,
    /// Argo CD client, absent when the integration is disabled.
    pub argocd: Option<Arc<dyn ArgoCdClient>>,
}

impl StepContext {
    /// A context with empty freight, no configuration, an empty in-memory
    /// cluster, and Argo CD integration disabled. Building block for tests
    /// and embedders.
    pub fn new(project: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stage: stage.into(),
            freight: FreightCollection::default(),
            config: Value::Null,
            state: Value::Object(serde_json::Map::new()),
            stages: Arc::new(InMemoryCluster::new()),
            argocd: None,
        }
    }

    /// Replace the freight collection.
    pub fn with_freight(mut self, freight: FreightCollection) -> Self {
        self.freight = freight;
        self
    }

    /// Replace the step configuration.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Replace the shared promotion state.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    /// Replace the stage reader.
    pub fn with_stages(mut self, stages: Arc<dyn StageLookup>) -> Self {
        self.stages = stages;
        self
    }

    /// Enable Argo CD integration through `client`.
    pub fn with_argocd(mut self, client: Arc<dyn ArgoCdClient>) -> Self {
        self.argocd = Some(client);
        self
    }
}

/// A unit of the promotion pipeline.
///
/// Runners are stateless across invocations and reentrant: one runner
/// instance serves concurrent promotions.
pub trait StepRunner: Send + Sync {
    /// Stable identifier the pipeline configuration refers to, e.g.
    /// `"http"` or `"argocd-update"`.
    fn name(&self) -> &'static str;

    /// Execute the step once against `ctx`.
    ///
    /// `Ok` carries a concluded or still-running result; `Err` carries a
    /// classified failure the pipeline routes retries on.
    fn run(&self, ctx: &StepContext) -> Result<StepResult, StepError>;
}
