//! The slice of the Argo CD `Application` schema conveyor consumes, plus
//! the stage-authorization check gating every mutation.
//!
//! Only the fields the update step reads or patches are modeled:
//! identifying metadata, `spec.source` xor `spec.sources`, and the
//! operation state Argo CD records for the in-flight or last sync. The
//! rest of the (large) Application schema is deliberately absent.

use std::collections::BTreeMap;
use std::fmt;

use globset::Glob;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Annotation an operator places on an `Application` to authorize
/// mutation by a stage. The value is `"<nsGlob>:<nameGlob>"`.
pub const AUTHORIZED_STAGE_ANNOTATION_KEY: &str = "kargo.akuity.io/authorized-stage";

/// Annotation requesting an Argo CD refresh; written with every sync
/// patch so stale comparison state never masks the new revision.
pub const REFRESH_ANNOTATION_KEY: &str = "argocd.argoproj.io/refresh";

/// Refresh annotation value forcing a hard refresh.
pub const REFRESH_HARD: &str = "hard";

/// Identifying metadata of an `Application`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    #[serde(default)]
    pub name: String,
    /// Object namespace.
    #[serde(default)]
    pub namespace: String,
    /// Object annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Server-assigned unique ID.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Server-assigned resource version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

/// One source of an `Application`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    /// Git repository or chart repository URL.
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    /// Chart name for chart sources; empty for git sources.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart: String,
    /// Revision the source tracks (branch, tag, commit, or chart version).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
    /// Kustomize-specific source options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kustomize: Option<ApplicationSourceKustomize>,
    /// Helm-specific source options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<ApplicationSourceHelm>,
}

/// Kustomize options of an [`ApplicationSource`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceKustomize {
    /// Image overrides in kustomize `images` form
    /// (`name:tag`, `name@digest`, `name=newName:tag`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Helm options of an [`ApplicationSource`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceHelm {
    /// Helm parameter overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<HelmParameter>,
}

/// A single `--set`-style Helm parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmParameter {
    /// Parameter key.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

/// `Application` spec; `source` and `sources` are mutually exclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Single-source form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,
    /// Multi-source form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ApplicationSource>,
}

/// Phase of an Argo CD operation.
///
/// Open variant: Argo CD may grow phases this controller does not know,
/// so unrecognized strings round-trip through [`OperationPhase::Other`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationPhase {
    /// The operation is in progress.
    Running,
    /// The operation completed successfully.
    Succeeded,
    /// The operation completed in failure.
    Failed,
    /// The operation errored before completing.
    Error,
    /// The operation is being terminated.
    Terminating,
    /// A phase this controller does not recognize.
    Other(String),
}

impl OperationPhase {
    /// Whether the operation has reached a terminal phase.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }
}

impl From<String> for OperationPhase {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Error" => Self::Error,
            "Terminating" => Self::Terminating,
            _ => Self::Other(value),
        }
    }
}

impl From<OperationPhase> for String {
    fn from(value: OperationPhase) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("Running"),
            Self::Succeeded => f.write_str("Succeeded"),
            Self::Failed => f.write_str("Failed"),
            Self::Error => f.write_str("Error"),
            Self::Terminating => f.write_str("Terminating"),
            Self::Other(phase) => f.write_str(phase),
        }
    }
}

/// Identity recorded on an operation by its initiator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInitiator {
    /// Username of the initiating identity.
    #[serde(default)]
    pub username: String,
    /// Whether the operation was initiated automatically.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub automated: bool,
}

/// Free-form name/value pair attached to an operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInfo {
    /// Entry name.
    pub name: String,
    /// Entry value.
    pub value: String,
}

/// Parameters of a sync operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Revision to sync a single-source application to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    /// Revisions to sync a multi-source application to, one per source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<String>,
    /// Source overrides applied with the sync.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ApplicationSource>,
}

/// An operation requested on an `Application`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Who initiated the operation.
    #[serde(default)]
    pub initiated_by: OperationInitiator,
    /// Free-form metadata attached by the initiator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<OperationInfo>,
    /// Sync parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOperation>,
}

/// Outcome of a completed sync.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationResult {
    /// Revision the sync applied (single-source form).
    #[serde(default)]
    pub revision: String,
    /// Revisions the sync applied, one per source (multi-source form).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<String>,
    /// Sources the sync applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ApplicationSource>,
}

/// Argo CD's record of the in-flight or last operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    /// Current phase of the operation.
    #[serde(default)]
    pub phase: OperationPhase,
    /// The operation as requested.
    #[serde(default)]
    pub operation: Operation,
    /// Sync outcome, present once the sync produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_result: Option<SyncOperationResult>,
}

impl Default for OperationPhase {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

/// `Application` status; only the operation state is consumed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Record of the in-flight or last operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_state: Option<OperationState>,
}

/// An Argo CD `Application`, restricted to the consumed fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Identifying metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: ApplicationSpec,
    /// Observed state.
    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Application {
    /// The application's sources as a list: `spec.source` as a
    /// single-element list when present, else `spec.sources`.
    pub fn sources(&self) -> Vec<ApplicationSource> {
        match &self.spec.source {
            Some(source) => vec![source.clone()],
            None => self.spec.sources.clone(),
        }
    }
}

/// Why a stage is not allowed to mutate an `Application`.
#[derive(Debug, Error)]
pub enum AuthorizeError {
    /// The annotation is missing or its globs do not match the stage.
    #[error(
        "Argo CD Application {app_namespace}/{app_name} does not permit mutation by Kargo Stage {project}/{stage}"
    )]
    NotPermitted {
        /// Application namespace.
        app_namespace: String,
        /// Application name.
        app_name: String,
        /// Project (namespace) of the stage seeking authorization.
        project: String,
        /// Name of the stage seeking authorization.
        stage: String,
    },
    /// The annotation value is not of the form `<nsGlob>:<nameGlob>`.
    #[error(
        "unable to parse value {value:?} of annotation {AUTHORIZED_STAGE_ANNOTATION_KEY} on Argo CD Application {app_namespace}/{app_name}"
    )]
    Unparseable {
        /// Application namespace.
        app_namespace: String,
        /// Application name.
        app_name: String,
        /// The malformed annotation value.
        value: String,
    },
    /// One of the halves is not a valid glob.
    #[error("invalid glob expression: {pattern:?}")]
    InvalidGlob {
        /// The rejected pattern.
        pattern: String,
        /// Compilation failure.
        #[source]
        source: globset::Error,
    },
}

/// Check whether the stage `project`/`stage` may mutate the application
/// described by `meta`.
///
/// Authorization requires the [`AUTHORIZED_STAGE_ANNOTATION_KEY`]
/// annotation to be present, parse as `"<nsGlob>:<nameGlob>"`, and have
/// both globs match. This is the sole precondition for mutation.
pub fn authorize_stage_mutation(
    meta: &ObjectMeta,
    project: &str,
    stage: &str,
) -> Result<(), AuthorizeError> {
    let not_permitted = || AuthorizeError::NotPermitted {
        app_namespace: meta.namespace.clone(),
        app_name: meta.name.clone(),
        project: project.to_string(),
        stage: stage.to_string(),
    };

    let Some(value) = meta.annotations.get(AUTHORIZED_STAGE_ANNOTATION_KEY) else {
        return Err(not_permitted());
    };
    let Some((ns_glob, name_glob)) = value.split_once(':') else {
        return Err(AuthorizeError::Unparseable {
            app_namespace: meta.namespace.clone(),
            app_name: meta.name.clone(),
            value: value.clone(),
        });
    };

    if glob_matches(ns_glob, project)? && glob_matches(name_glob, stage)? {
        return Ok(());
    }
    Err(not_permitted())
}

fn glob_matches(pattern: &str, candidate: &str) -> Result<bool, AuthorizeError> {
    let glob = Glob::new(pattern).map_err(|source| AuthorizeError::InvalidGlob {
        pattern: pattern.to_string(),
        source,
    })?;
    Ok(glob.compile_matcher().is_match(candidate))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn meta_with_annotation(value: &str) -> ObjectMeta {
        ObjectMeta {
            name: "fake-app".to_string(),
            namespace: "fake-namespace".to_string(),
            annotations: [(AUTHORIZED_STAGE_ANNOTATION_KEY.to_string(), value.to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_annotations_block_mutation() {
        let err = authorize_stage_mutation(&ObjectMeta::default(), "ns-yep", "name-yep")
            .expect_err("no annotations");
        assert!(err.to_string().contains("does not permit mutation"));
    }

    #[test]
    fn unparseable_annotation_is_reported() {
        let err = authorize_stage_mutation(&meta_with_annotation("bogus"), "ns-yep", "name-yep")
            .expect_err("unparseable");
        assert!(err.to_string().contains("unable to parse"));
    }

    #[test]
    fn mismatched_globs_block_mutation() {
        let err = authorize_stage_mutation(
            &meta_with_annotation("ns-nope:name-nope"),
            "ns-yep",
            "name-yep",
        )
        .expect_err("mismatch");
        assert!(err.to_string().contains("does not permit mutation"));
    }

    #[test]
    fn exact_match_authorizes() {
        authorize_stage_mutation(&meta_with_annotation("ns-yep:name-yep"), "ns-yep", "name-yep")
            .expect("authorized");
    }

    #[test]
    fn wildcard_halves_authorize() {
        for value in ["*:name-yep", "ns-yep:*", "*-ye*:*-y*", "ns-?ep:name-?ep"] {
            authorize_stage_mutation(&meta_with_annotation(value), "ns-yep", "name-yep")
                .unwrap_or_else(|e| panic!("{value} should authorize: {e}"));
        }
    }

    #[test]
    fn non_matching_wildcards_block_mutation() {
        let err = authorize_stage_mutation(
            &meta_with_annotation("*-nope:*-nope"),
            "ns-yep",
            "name-yep",
        )
        .expect_err("mismatch");
        assert!(err.to_string().contains("does not permit mutation"));
    }

    #[test]
    fn invalid_globs_are_rejected() {
        for value in ["*[:*", "*:*["] {
            let err = authorize_stage_mutation(&meta_with_annotation(value), "ns-yep", "name-yep")
                .expect_err("invalid glob");
            assert!(
                err.to_string().contains("invalid glob expression"),
                "unexpected error for {value}: {err}"
            );
        }
    }

    #[test]
    fn operation_phase_round_trips() {
        for (text, phase) in [
            ("Running", OperationPhase::Running),
            ("Succeeded", OperationPhase::Succeeded),
            ("Failed", OperationPhase::Failed),
            ("Error", OperationPhase::Error),
            ("Terminating", OperationPhase::Terminating),
            ("Unknown", OperationPhase::Other("Unknown".to_string())),
        ] {
            let parsed: OperationPhase = serde_json::from_value(json!(text)).expect("phase");
            assert_eq!(parsed, phase);
            assert_eq!(serde_json::to_value(&parsed).expect("json"), json!(text));
        }
    }

    #[test]
    fn completed_phases() {
        assert!(OperationPhase::Succeeded.is_completed());
        assert!(OperationPhase::Failed.is_completed());
        assert!(OperationPhase::Error.is_completed());
        assert!(!OperationPhase::Running.is_completed());
        assert!(!OperationPhase::Terminating.is_completed());
        assert!(!OperationPhase::Other("Unknown".to_string()).is_completed());
    }

    #[test]
    fn application_deserializes_from_argocd_shape() {
        let app: Application = serde_json::from_value(json!({
            "metadata": {
                "name": "demo",
                "namespace": "argocd",
                "annotations": {AUTHORIZED_STAGE_ANNOTATION_KEY: "proj:stage"},
                "uid": "uid-1",
                "resourceVersion": "42",
            },
            "spec": {
                "source": {
                    "repoURL": "https://github.com/universe/42",
                    "targetRevision": "main",
                },
            },
            "status": {
                "operationState": {
                    "phase": "Succeeded",
                    "operation": {
                        "initiatedBy": {"username": "kargo-controller", "automated": true},
                        "info": [{"name": "FreightCollection", "value": "abc"}],
                    },
                    "syncResult": {"revision": "deadbeef"},
                },
            },
        }))
        .expect("application");

        assert_eq!(app.metadata.resource_version, "42");
        let source = app.spec.source.as_ref().expect("source");
        assert_eq!(source.repo_url, "https://github.com/universe/42");
        let state = app.status.operation_state.as_ref().expect("state");
        assert_eq!(state.phase, OperationPhase::Succeeded);
        assert_eq!(state.operation.initiated_by.username, "kargo-controller");
        assert_eq!(state.sync_result.as_ref().expect("sync result").revision, "deadbeef");
    }

    #[test]
    fn sources_prefers_the_single_source_form() {
        let mut app = Application::default();
        app.spec.sources = vec![ApplicationSource {
            repo_url: "multi".to_string(),
            ..Default::default()
        }];
        assert_eq!(app.sources()[0].repo_url, "multi");

        app.spec.source = Some(ApplicationSource {
            repo_url: "single".to_string(),
            ..Default::default()
        });
        assert_eq!(app.sources().len(), 1);
        assert_eq!(app.sources()[0].repo_url, "single");
    }

    proptest::proptest! {
        #[test]
        fn authorization_is_equivalent_to_both_globs_matching(
            ns in "[a-z*?]{1,6}",
            name in "[a-z*?]{1,6}",
        ) {
            let meta = meta_with_annotation(&format!("{ns}:{name}"));
            let authorized = authorize_stage_mutation(&meta, "ns-yep", "name-yep").is_ok();
            let expected = Glob::new(&ns).expect("glob").compile_matcher().is_match("ns-yep")
                && Glob::new(&name).expect("glob").compile_matcher().is_match("name-yep");
            proptest::prop_assert_eq!(authorized, expected);
        }
    }
}
