//! Shared domain types for the conveyor promotion core.
//!
//! This crate defines the two vocabularies every other conveyor crate
//! speaks:
//!
//! - The **freight model**: immutable bundles of artifact references
//!   ([`FreightReference`]) grouped into an origin-keyed, deterministically
//!   identified [`FreightCollection`], the payload of a promotion.
//! - The **step ABI**: the [`StepStatus`] / [`StepResult`] values a
//!   promotion step reports, and the [`StepError`] taxonomy the outer
//!   pipeline routes retries on.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use conveyor_schema::ConfigError;

/// The kind half of a freight origin.
///
/// Open variant: unrecognized kinds round-trip through [`OriginKind::Other`]
/// so newer control planes can introduce kinds without breaking older
/// controllers.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OriginKind {
    /// Freight produced by a warehouse.
    Warehouse,
    /// A kind this controller does not know about.
    Other(String),
}

impl From<String> for OriginKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Warehouse" => Self::Warehouse,
            _ => Self::Other(value),
        }
    }
}

impl From<OriginKind> for String {
    fn from(value: OriginKind) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warehouse => f.write_str("Warehouse"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// Identity of the subscription that produced a piece of freight.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FreightOrigin {
    /// Origin kind, e.g. `Warehouse`.
    pub kind: OriginKind,
    /// Name of the origin object.
    pub name: String,
}

impl FreightOrigin {
    /// Origin for a warehouse with the given name.
    pub fn warehouse(name: impl Into<String>) -> Self {
        Self {
            kind: OriginKind::Warehouse,
            name: name.into(),
        }
    }
}

impl fmt::Display for FreightOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A git commit carried by freight.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
    /// Repository the commit belongs to.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Commit SHA.
    #[serde(default)]
    pub id: String,
    /// Tag pointing at the commit, if the freight was tag-selected.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    /// Commit downstream health checks should observe instead of `id`,
    /// e.g. the rendered-branch commit derived from it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub health_check_commit: String,
}

/// A Helm chart carried by freight.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    /// Chart repository URL. OCI charts embed the chart name in the URL and
    /// leave `name` empty.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Chart name within a classic (HTTP) chart repository.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Chart version.
    pub version: String,
}

/// A container image carried by freight.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Image repository URL.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Image tag.
    #[serde(default)]
    pub tag: String,
    /// Image digest.
    #[serde(default)]
    pub digest: String,
}

/// All artifacts one origin contributed to a promotion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightReference {
    /// Origin that produced these artifacts.
    pub origin: FreightOrigin,
    /// Git commits, one per subscribed repository.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<GitCommit>,
    /// Helm charts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Chart>,
    /// Container images.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
}

impl Default for FreightOrigin {
    fn default() -> Self {
        Self {
            kind: OriginKind::Warehouse,
            name: String::new(),
        }
    }
}

/// An ordered, origin-keyed set of freight references.
///
/// At most one reference exists per origin;
/// [`update_or_push`](FreightCollection::update_or_push) replaces by
/// origin or appends.
/// The collection [`id`](FreightCollection::id) is a content digest over
/// the references, so identical contents always carry the identical ID
/// regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightCollection {
    /// Deterministic content digest of the references.
    #[serde(default)]
    pub id: String,
    /// References, at most one per origin, in insertion order.
    #[serde(default)]
    pub references: Vec<FreightReference>,
}

impl FreightCollection {
    /// Replace the reference with the same origin as `reference`, or append
    /// it, then refresh the collection ID.
    pub fn update_or_push(&mut self, reference: FreightReference) {
        match self
            .references
            .iter_mut()
            .find(|existing| existing.origin == reference.origin)
        {
            Some(existing) => *existing = reference,
            None => self.references.push(reference),
        }
        self.id = compute_collection_id(&self.references);
    }

    /// Find a commit for `repo_url`, optionally restricted to `origin`.
    pub fn find_commit<'a>(&'a self, origin: Option<&'a FreightOrigin>, repo_url: &str) -> Option<&'a GitCommit> {
        self.references_for(origin)
            .flat_map(|r| r.commits.iter())
            .find(|c| c.repo_url == repo_url)
    }

    /// Find a chart by repository URL and (possibly empty) chart name,
    /// optionally restricted to `origin`.
    pub fn find_chart<'a>(
        &'a self,
        origin: Option<&'a FreightOrigin>,
        repo_url: &str,
        name: &str,
    ) -> Option<&'a Chart> {
        self.references_for(origin)
            .flat_map(|r| r.charts.iter())
            .find(|c| c.repo_url == repo_url && c.name == name)
    }

    /// Find an image for `repo_url`, optionally restricted to `origin`.
    pub fn find_image<'a>(&'a self, origin: Option<&'a FreightOrigin>, repo_url: &str) -> Option<&'a Image> {
        self.references_for(origin)
            .flat_map(|r| r.images.iter())
            .find(|i| i.repo_url == repo_url)
    }

    fn references_for<'a>(
        &'a self,
        origin: Option<&'a FreightOrigin>,
    ) -> impl Iterator<Item = &'a FreightReference> {
        self.references
            .iter()
            .filter(move |r| origin.is_none_or(|o| &r.origin == o))
    }
}

/// SHA-256 over the canonical JSON of the references, sorted by origin so
/// insertion order does not leak into the ID.
fn compute_collection_id(references: &[FreightReference]) -> String {
    let mut sorted: Vec<&FreightReference> = references.iter().collect();
    sorted.sort_by(|a, b| a.origin.cmp(&b.origin));
    let canonical =
        serde_json::to_vec(&sorted).expect("freight references always serialize to JSON");
    hex::encode(Sha256::digest(&canonical))
}

/// Namespaced name of a cluster object.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Build a key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The stage (deployment environment) a promotion targets.
///
/// Only the identity is consumed here; the full stage schema belongs to the
/// control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Project namespace the stage lives in.
    pub namespace: String,
    /// Stage name.
    pub name: String,
}

/// Status a promotion step reports for one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// The step concluded successfully; outputs are final.
    Succeeded,
    /// The step concluded in failure.
    Failed,
    /// The step hit an error before it could conclude.
    Errored,
    /// The step has not yet concluded; the pipeline re-drives it.
    Running,
}

impl StepStatus {
    /// Whether this status is final for the invocation's step.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Errored => "Errored",
            Self::Running => "Running",
        };
        f.write_str(s)
    }
}

/// Result of a step invocation: a status plus optional named outputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Outcome of the invocation.
    pub status: StepStatus,
    /// Named outputs, only meaningful when `status` is `Succeeded`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: BTreeMap<String, serde_json::Value>,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Errored
    }
}

impl StepResult {
    /// A successful result without outputs.
    pub fn succeeded() -> Self {
        Self {
            status: StepStatus::Succeeded,
            output: BTreeMap::new(),
        }
    }

    /// A successful result carrying `output`.
    pub fn succeeded_with_output(output: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            output,
        }
    }

    /// A concluded-in-failure result with no wrapped error.
    pub fn failed() -> Self {
        Self {
            status: StepStatus::Failed,
            output: BTreeMap::new(),
        }
    }

    /// A not-yet-concluded result; the pipeline re-drives the step.
    pub fn running() -> Self {
        Self {
            status: StepStatus::Running,
            output: BTreeMap::new(),
        }
    }
}

/// Classified failure from a promotion step.
///
/// The retry contract is the variant, not the message: the outer pipeline
/// may retry [`Transient`](StepError::Transient) failures and must not
/// retry anything else.
#[derive(Debug, Error)]
pub enum StepError {
    /// Configuration failed schema validation. Never retried.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Transient I/O or evaluation failure; the pipeline may retry.
    #[error(transparent)]
    Transient(anyhow::Error),
    /// The step concluded in failure and retrying cannot change the
    /// outcome (e.g. a response met failure criteria).
    #[error(transparent)]
    Terminal(anyhow::Error),
    /// The step cannot run against the current cluster or controller
    /// state (authorization, preflight, indeterminate aggregation).
    #[error(transparent)]
    Fatal(anyhow::Error),
}

impl StepError {
    /// Wrap a transient failure.
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    /// Wrap a terminal policy failure.
    pub fn terminal(err: impl Into<anyhow::Error>) -> Self {
        Self::Terminal(err.into())
    }

    /// Wrap a fatal failure.
    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(err.into())
    }

    /// The step status this failure reports.
    pub fn status(&self) -> StepStatus {
        match self {
            Self::Config(_) | Self::Transient(_) => StepStatus::Errored,
            Self::Terminal(_) | Self::Fatal(_) => StepStatus::Failed,
        }
    }

    /// Whether the outer pipeline is allowed to retry the step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
