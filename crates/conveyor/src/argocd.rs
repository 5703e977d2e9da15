//! The `argocd-update` step runner: drive Argo CD `Application` objects to
//! the revisions a freight collection promotes.
//!
//! Per application the runner fetches the object (gated by the stage
//! authorization annotation), derives desired sources from freight,
//! decides whether a new sync must be requested, and patches the object
//! when it must. Ownership of in-flight
//! syncs is tracked through the operation's initiator identity and a
//! freight-collection info entry; that identity gate is what serializes
//! concurrent reconciliations against a single application.

use std::collections::BTreeMap;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::Utc;
use conveyor_argocd::{
    Application, ApplicationSource, Operation, OperationInfo, OperationInitiator, OperationPhase,
    REFRESH_ANNOTATION_KEY, REFRESH_HARD, SyncOperation, authorize_stage_mutation,
};
use conveyor_schema::{ConfigValidator, SchemaError};
use conveyor_types::{FreightCollection, FreightOrigin, ObjectKey, StepError, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cluster::{ApplicationEvent, ArgoCdClient, ObjectReference};
use crate::merge::recursive_merge;
use crate::step::{StepContext, StepRunner};

/// Name of this step runner.
pub const ARGOCD_UPDATE_STEP_NAME: &str = "argocd-update";

/// Identity this controller records on operations it initiates.
pub const APPLICATION_OPERATION_INITIATOR: &str = "kargo-controller";

/// Name of the operation info entry carrying the freight collection ID.
pub const FREIGHT_COLLECTION_INFO_KEY: &str = "FreightCollection";

/// Namespace applications are looked up in when the update names none.
pub const DEFAULT_APPLICATION_NAMESPACE: &str = "argocd";

const EVENT_REASON_OPERATION_INITIATED: &str = "OperationInitiated";

const CONFIG_SCHEMA: &str = include_str!("../schemas/argocd-update-config.json");

/// Origin restriction for freight lookups, scoping an update to artifacts
/// produced by one origin.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FromOrigin {
    /// Origin kind.
    pub kind: conveyor_types::OriginKind,
    /// Origin name.
    pub name: String,
}

impl FromOrigin {
    fn origin(&self) -> FreightOrigin {
        FreightOrigin {
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }
}

/// Configuration of the `argocd-update` step.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdUpdateConfig {
    /// Applications to update, processed in declared order.
    pub apps: Vec<AppUpdate>,
}

/// One application to reconcile.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUpdate {
    /// Application name.
    pub name: String,
    /// Application namespace; [`DEFAULT_APPLICATION_NAMESPACE`] when unset.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Default origin restriction for this application's freight lookups.
    #[serde(default)]
    pub from_origin: Option<FromOrigin>,
    /// Source updates, applied in declared order.
    #[serde(default)]
    pub sources: Vec<AppSourceUpdate>,
}

/// An update to apply to matching sources of an application.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSourceUpdate {
    /// Repository URL a source must track for this update to apply.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Chart name a chart source must carry for this update to apply.
    #[serde(default)]
    pub chart: Option<String>,
    /// Update the source's `targetRevision` to the freight revision.
    #[serde(default)]
    pub update_target_revision: bool,
    /// Origin restriction overriding the application-level one.
    #[serde(default)]
    pub from_origin: Option<FromOrigin>,
    /// Kustomize image overrides to write.
    #[serde(default)]
    pub kustomize: Option<KustomizeImageUpdates>,
    /// Helm parameter changes to write.
    #[serde(default)]
    pub helm: Option<HelmParameterUpdates>,
}

/// Kustomize image overrides derived from freight.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeImageUpdates {
    /// Origin restriction overriding source- and app-level ones.
    #[serde(default)]
    pub from_origin: Option<FromOrigin>,
    /// Images to write.
    pub images: Vec<KustomizeImageUpdate>,
}

/// A single kustomize image override.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeImageUpdate {
    /// Image repository URL to match in freight.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Replacement image name.
    #[serde(default)]
    pub new_name: Option<String>,
    /// Pin by digest instead of tag.
    #[serde(default)]
    pub use_digest: bool,
}

/// Helm parameter changes derived from freight.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmParameterUpdates {
    /// Origin restriction overriding source- and app-level ones.
    #[serde(default)]
    pub from_origin: Option<FromOrigin>,
    /// Parameter changes to write.
    pub images: Vec<HelmImageUpdate>,
}

/// A single Helm parameter change.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmImageUpdate {
    /// Helm parameter key to set.
    pub key: String,
    /// Image repository URL to match in freight.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// What to write as the parameter value.
    pub value: HelmImageValue,
}

/// What a Helm parameter change writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum HelmImageValue {
    /// The image tag.
    Tag,
    /// `<repoURL>:<tag>`.
    ImageAndTag,
    /// The image digest.
    Digest,
    /// `<repoURL>@<digest>`.
    ImageAndDigest,
}

/// Outcome of deciding whether an application needs a new sync.
struct SyncDecision {
    /// Phase of the operation the decision observed, `None` when there is
    /// no operation to report.
    phase: Option<OperationPhase>,
    /// Whether a new sync must be requested.
    must_update: bool,
    /// Why the decision could not settle, when it could not. With a known
    /// in-flight phase this is informational; with `must_update` it is
    /// resolved by applying the update; with neither it is fatal.
    detail: Option<anyhow::Error>,
}

/// The `argocd-update` step runner.
pub struct ArgoCdUpdater {
    validator: ConfigValidator,
}

impl StepRunner for ArgoCdUpdater {
    fn name(&self) -> &'static str {
        ARGOCD_UPDATE_STEP_NAME
    }

    fn run(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        self.validator.validate(&ctx.config)?;
        let cfg: ArgoCdUpdateConfig = serde_json::from_value(ctx.config.clone()).map_err(|e| {
            StepError::transient(
                anyhow!(e).context("could not convert config into argocd-update config"),
            )
        })?;
        self.execute(ctx, &cfg)
    }
}

impl ArgoCdUpdater {
    /// Build the runner, compiling its embedded configuration schema.
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            validator: ConfigValidator::from_source(ARGOCD_UPDATE_STEP_NAME, CONFIG_SCHEMA)?,
        })
    }

    fn execute(
        &self,
        ctx: &StepContext,
        cfg: &ArgoCdUpdateConfig,
    ) -> Result<StepResult, StepError> {
        let Some(argocd) = ctx.argocd.as_deref() else {
            return Err(StepError::fatal(anyhow!(
                "Argo CD integration is disabled on this controller"
            )));
        };

        let stage_key = ObjectKey::new(ctx.project.clone(), ctx.stage.clone());
        let stage = ctx
            .stages
            .get_stage(&stage_key)
            .map_err(|e| StepError::fatal(e.context("error getting Stage")))?;
        if stage.is_none() {
            return Err(StepError::fatal(anyhow!(
                "Stage {:?} not found in namespace {:?}",
                ctx.stage,
                ctx.project
            )));
        }

        let mut phases = Vec::with_capacity(cfg.apps.len());
        for update in &cfg.apps {
            let key = ObjectKey::new(
                update
                    .namespace
                    .clone()
                    .unwrap_or_else(|| DEFAULT_APPLICATION_NAMESPACE.to_string()),
                update.name.clone(),
            );

            let app = self
                .get_authorized_application(ctx, argocd, &key)
                .map_err(|e| StepError::fatal(e.context("error getting Argo CD Application")))?;

            let desired_sources = self.build_desired_sources(ctx, update, &app).map_err(|e| {
                StepError::fatal(e.context(format!(
                    "error building desired sources for Argo CD Application {key}"
                )))
            })?;

            let decision = self.must_perform_update(ctx, update, &app, &desired_sources);
            if !decision.must_update {
                if let Some(detail) = decision.detail {
                    match &decision.phase {
                        // An in-flight operation owned by another initiator
                        // or another freight collection; keep waiting.
                        Some(phase) => {
                            tracing::debug!(app = %key, %phase, reason = %detail, "waiting for operation to complete");
                        }
                        None => return Err(StepError::fatal(detail)),
                    }
                }
                if let Some(phase) = decision.phase {
                    phases.push(phase);
                }
                continue;
            }

            // The application is out of date, or in a state only a fresh
            // sync resolves. Any decision detail is subsumed by the update.
            self.sync_application(ctx, argocd, &app, update, desired_sources)
                .map_err(|e| {
                    StepError::fatal(
                        e.context(format!("error syncing Argo CD Application {key}")),
                    )
                })?;
            phases.push(OperationPhase::Running);
        }

        aggregate_phases(&phases)
    }

    fn get_authorized_application(
        &self,
        ctx: &StepContext,
        argocd: &dyn ArgoCdClient,
        key: &ObjectKey,
    ) -> Result<Application> {
        let app = argocd
            .get_application(key)
            .context("error finding Argo CD Application")?;
        let Some(app) = app else {
            bail!("unable to find Argo CD Application {key}");
        };
        authorize_stage_mutation(&app.metadata, &ctx.project, &ctx.stage)?;
        Ok(app)
    }

    /// Apply every configured source update to every matching existing
    /// source, yielding the full desired source list.
    fn build_desired_sources(
        &self,
        ctx: &StepContext,
        update: &AppUpdate,
        app: &Application,
    ) -> Result<Vec<ApplicationSource>> {
        let mut sources = app.sources();
        for source in &mut sources {
            for source_update in &update.sources {
                *source =
                    self.apply_source_update(ctx, update, source_update, source.clone())?;
            }
        }
        Ok(sources)
    }

    fn apply_source_update(
        &self,
        ctx: &StepContext,
        app_update: &AppUpdate,
        update: &AppSourceUpdate,
        mut source: ApplicationSource,
    ) -> Result<ApplicationSource> {
        let update_chart = update.chart.as_deref().unwrap_or("");
        if source.repo_url != update.repo_url || source.chart != update_chart {
            return Ok(source);
        }

        if update.update_target_revision {
            let origin =
                resolve_origin(&[update.from_origin.as_ref(), app_update.from_origin.as_ref()]);
            if update_chart.is_empty() {
                if let Some(commit) = ctx.freight.find_commit(origin.as_ref(), &source.repo_url) {
                    source.target_revision = if commit.tag.is_empty() {
                        commit.id.clone()
                    } else {
                        commit.tag.clone()
                    };
                }
            } else {
                let (repo_url, chart_name) =
                    normalize_chart_coordinates(&source.repo_url, update_chart);
                if let Some(chart) = ctx.freight.find_chart(origin.as_ref(), &repo_url, &chart_name)
                {
                    source.target_revision = chart.version.clone();
                }
            }
        }

        if let Some(kustomize_update) = &update.kustomize {
            let origin = resolve_origin(&[
                kustomize_update.from_origin.as_ref(),
                update.from_origin.as_ref(),
                app_update.from_origin.as_ref(),
            ]);
            let images =
                build_kustomize_images(&ctx.freight, origin.as_ref(), &kustomize_update.images);
            source.kustomize.get_or_insert_with(Default::default).images = images;
        }

        if let Some(helm_update) = &update.helm {
            let origin = resolve_origin(&[
                helm_update.from_origin.as_ref(),
                update.from_origin.as_ref(),
                app_update.from_origin.as_ref(),
            ]);
            let changes =
                build_helm_param_changes(&ctx.freight, origin.as_ref(), &helm_update.images);
            if !changes.is_empty() {
                let helm = source.helm.get_or_insert_with(Default::default);
                helm.parameters = merge_helm_parameters(&changes, &helm.parameters);
            }
        }

        Ok(source)
    }

    /// Decide whether a new sync must be requested for `app`.
    ///
    /// The decision is a three-way comparison between desired revisions,
    /// the observed operation state, and the initiator identity:
    ///
    /// - no operation state: update.
    /// - in-flight operation not ours, or ours for other freight: wait,
    ///   reporting the reason.
    /// - completed operation not ours, or ours for other freight: our turn,
    ///   update.
    /// - in-flight operation ours for this freight: wait.
    /// - completed operation ours for this freight: compare the sync result
    ///   against desired revisions and sources; a mismatch (or a missing
    ///   sync result) forces a re-sync.
    fn must_perform_update(
        &self,
        ctx: &StepContext,
        update: &AppUpdate,
        app: &Application,
        desired_sources: &[ApplicationSource],
    ) -> SyncDecision {
        let Some(state) = &app.status.operation_state else {
            return SyncDecision {
                phase: None,
                must_update: true,
                detail: None,
            };
        };

        if state.operation.initiated_by.username != APPLICATION_OPERATION_INITIATOR {
            if state.phase.is_completed() {
                // The other initiator is done; our turn now.
                return SyncDecision {
                    phase: None,
                    must_update: true,
                    detail: None,
                };
            }
            return SyncDecision {
                phase: Some(state.phase.clone()),
                must_update: false,
                detail: Some(anyhow!(
                    "current operation was not initiated by {APPLICATION_OPERATION_INITIATOR}: \
                     waiting for operation to complete"
                )),
            };
        }

        let for_this_freight = state.operation.info.iter().any(|info| {
            info.name == FREIGHT_COLLECTION_INFO_KEY && info.value == ctx.freight.id
        });
        if !for_this_freight {
            if state.phase.is_completed() {
                return SyncDecision {
                    phase: None,
                    must_update: true,
                    detail: None,
                };
            }
            return SyncDecision {
                phase: Some(state.phase.clone()),
                must_update: false,
                detail: Some(anyhow!(
                    "current operation was not initiated for freight collection {}: \
                     waiting for operation to complete",
                    ctx.freight.id
                )),
            };
        }

        if !state.phase.is_completed() {
            return SyncDecision {
                phase: Some(state.phase.clone()),
                must_update: false,
                detail: None,
            };
        }

        // Completed, ours, for this freight: verify the sync result.
        let desired_revisions = self.get_desired_revisions(ctx, update, app);
        if desired_revisions.is_empty() {
            return SyncDecision {
                phase: Some(state.phase.clone()),
                must_update: false,
                detail: None,
            };
        }

        let Some(sync_result) = &state.sync_result else {
            return SyncDecision {
                phase: None,
                must_update: true,
                detail: Some(anyhow!("operation completed without a sync result")),
            };
        };

        let observed = if sync_result.revisions.is_empty() {
            vec![sync_result.revision.clone()]
        } else {
            sync_result.revisions.clone()
        };
        for (i, desired) in desired_revisions.iter().enumerate() {
            if desired.is_empty() {
                continue;
            }
            if observed.get(i).map(String::as_str) != Some(desired.as_str()) {
                return SyncDecision {
                    phase: None,
                    must_update: true,
                    detail: Some(anyhow!(
                        "sync result revisions {observed:?} do not match desired revisions {desired_revisions:?}"
                    )),
                };
            }
        }

        if !app.spec.sources.is_empty() {
            for (i, desired) in desired_sources.iter().enumerate() {
                if sync_result.sources.get(i) != Some(desired) {
                    return SyncDecision {
                        phase: None,
                        must_update: true,
                        detail: Some(anyhow!(
                            "sync result source {i} does not match desired source {i}"
                        )),
                    };
                }
            }
        }

        SyncDecision {
            phase: Some(state.phase.clone()),
            must_update: false,
            detail: None,
        }
    }

    /// The revision each existing source should be synced to, one entry per
    /// source, empty where freight carries nothing for it.
    fn get_desired_revisions(
        &self,
        ctx: &StepContext,
        update: &AppUpdate,
        app: &Application,
    ) -> Vec<String> {
        let sources = app.sources();
        let mut revisions = vec![String::new(); sources.len()];
        for (i, source) in sources.iter().enumerate() {
            let source_update = update.sources.iter().find(|u| {
                u.repo_url == source.repo_url && u.chart.as_deref().unwrap_or("") == source.chart
            });
            let origin = resolve_origin(&[
                source_update.and_then(|u| u.from_origin.as_ref()),
                update.from_origin.as_ref(),
            ]);
            if source.chart.is_empty() {
                if let Some(commit) = ctx.freight.find_commit(origin.as_ref(), &source.repo_url) {
                    revisions[i] = if !commit.health_check_commit.is_empty() {
                        commit.health_check_commit.clone()
                    } else if !commit.tag.is_empty() {
                        commit.tag.clone()
                    } else {
                        commit.id.clone()
                    };
                }
            } else {
                let (repo_url, chart_name) =
                    normalize_chart_coordinates(&source.repo_url, &source.chart);
                if let Some(chart) = ctx.freight.find_chart(origin.as_ref(), &repo_url, &chart_name)
                {
                    revisions[i] = chart.version.clone();
                }
            }
        }
        revisions
    }

    /// Patch the application with the desired sources and a new operation
    /// initiated by this controller, then record an event.
    fn sync_application(
        &self,
        ctx: &StepContext,
        argocd: &dyn ArgoCdClient,
        app: &Application,
        update: &AppUpdate,
        desired_sources: Vec<ApplicationSource>,
    ) -> Result<()> {
        let key = ObjectKey::new(app.metadata.namespace.clone(), app.metadata.name.clone());
        let desired_revisions = self.get_desired_revisions(ctx, update, app);

        let mut sync = SyncOperation::default();
        if app.spec.source.is_some() {
            sync.revision = desired_revisions.first().cloned().unwrap_or_default();
        } else {
            sync.revisions = desired_revisions;
            sync.sources = desired_sources.clone();
        }
        let operation = Operation {
            initiated_by: OperationInitiator {
                username: APPLICATION_OPERATION_INITIATOR.to_string(),
                automated: true,
            },
            info: vec![
                OperationInfo {
                    name: "Reason".to_string(),
                    value: "Promotion triggered a sync of this Application resource.".to_string(),
                },
                OperationInfo {
                    name: FREIGHT_COLLECTION_INFO_KEY.to_string(),
                    value: ctx.freight.id.clone(),
                },
            ],
            sync: Some(sync),
        };

        let mut patch = json!({
            "metadata": {"annotations": {REFRESH_ANNOTATION_KEY: REFRESH_HARD}},
            "operation": serde_json::to_value(&operation).context("error encoding operation")?,
        });
        if let Some(first) = desired_sources.first() {
            patch["spec"] = if app.spec.source.is_some() {
                json!({"source": serde_json::to_value(first).context("error encoding source")?})
            } else {
                json!({
                    "sources": serde_json::to_value(&desired_sources)
                        .context("error encoding sources")?,
                })
            };
        }

        argocd
            .patch_application(&key, &patch)
            .context("error patching Argo CD Application")?;

        self.log_app_event(
            argocd,
            app,
            APPLICATION_OPERATION_INITIATOR,
            EVENT_REASON_OPERATION_INITIATED,
            "initiated sync of Application to desired revisions",
        );
        Ok(())
    }

    /// Record a `Normal` event against `app`. Best-effort: a failure to
    /// record never fails the step.
    fn log_app_event(
        &self,
        argocd: &dyn ArgoCdClient,
        app: &Application,
        user: &str,
        reason: &str,
        message: &str,
    ) {
        let user = if user.is_empty() { "Unknown user" } else { user };
        let now = Utc::now();
        let event = ApplicationEvent {
            involved: ObjectReference {
                api_version: "argoproj.io/v1alpha1".to_string(),
                kind: "Application".to_string(),
                namespace: app.metadata.namespace.clone(),
                name: app.metadata.name.clone(),
                uid: app.metadata.uid.clone(),
                resource_version: app.metadata.resource_version.clone(),
            },
            event_type: "Normal".to_string(),
            reason: reason.to_string(),
            message: format!("{user} {message}"),
            first_timestamp: now,
            last_timestamp: now,
            count: 1,
        };
        if let Err(err) = argocd.create_event(&event) {
            tracing::warn!(app = %app.metadata.name, error = %err, "error recording Application event");
        }
    }
}

/// First origin restriction in the chain, most specific first.
fn resolve_origin(candidates: &[Option<&FromOrigin>]) -> Option<FreightOrigin> {
    candidates
        .iter()
        .copied()
        .flatten()
        .next()
        .map(FromOrigin::origin)
}

/// Resolve the freight chart coordinates for a chart source. A schemeless
/// repository URL paired with a chart name denotes an OCI chart, whose
/// freight entry carries the chart name inside the URL.
fn normalize_chart_coordinates(repo_url: &str, chart: &str) -> (String, String) {
    if repo_url.contains("://") {
        (repo_url.to_string(), chart.to_string())
    } else {
        (
            format!("oci://{}/{}", repo_url.trim_end_matches('/'), chart),
            String::new(),
        )
    }
}

/// Render kustomize image overrides for the images freight carries.
/// Update entries absent from freight are skipped.
fn build_kustomize_images(
    freight: &FreightCollection,
    origin: Option<&FreightOrigin>,
    updates: &[KustomizeImageUpdate],
) -> Vec<String> {
    let mut images = Vec::new();
    for update in updates {
        let Some(image) = freight.find_image(origin, &update.repo_url) else {
            continue;
        };
        let suffix = if update.use_digest {
            format!("@{}", image.digest)
        } else {
            format!(":{}", image.tag)
        };
        images.push(match &update.new_name {
            Some(new_name) => format!("{}={new_name}{suffix}", update.repo_url),
            None => format!("{}{suffix}", update.repo_url),
        });
    }
    images
}

/// Compute Helm parameter changes for the images freight carries.
/// Update entries absent from freight are skipped.
fn build_helm_param_changes(
    freight: &FreightCollection,
    origin: Option<&FreightOrigin>,
    updates: &[HelmImageUpdate],
) -> BTreeMap<String, String> {
    let mut changes = BTreeMap::new();
    for update in updates {
        let Some(image) = freight.find_image(origin, &update.repo_url) else {
            continue;
        };
        let value = match update.value {
            HelmImageValue::Tag => image.tag.clone(),
            HelmImageValue::ImageAndTag => format!("{}:{}", image.repo_url, image.tag),
            HelmImageValue::Digest => image.digest.clone(),
            HelmImageValue::ImageAndDigest => format!("{}@{}", image.repo_url, image.digest),
        };
        changes.insert(update.key.clone(), value);
    }
    changes
}

/// Merge parameter changes onto existing parameters. Changes win on
/// conflicting names; the result is name-sorted.
fn merge_helm_parameters(
    changes: &BTreeMap<String, String>,
    existing: &[conveyor_argocd::HelmParameter],
) -> Vec<conveyor_argocd::HelmParameter> {
    let changes_map: serde_json::Map<String, Value> = changes
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    let existing_map: serde_json::Map<String, Value> = existing
        .iter()
        .map(|p| (p.name.clone(), Value::String(p.value.clone())))
        .collect();
    let mut merged: Vec<conveyor_argocd::HelmParameter> =
        match recursive_merge(Value::Object(changes_map), Value::Object(existing_map)) {
            Value::Object(merged) => merged
                .into_iter()
                .map(|(name, value)| conveyor_argocd::HelmParameter {
                    name,
                    value: value.as_str().unwrap_or_default().to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };
    merged.sort_by(|a, b| a.name.cmp(&b.name));
    merged
}

/// Roll per-application operation phases up into one step result.
fn aggregate_phases(phases: &[OperationPhase]) -> Result<StepResult, StepError> {
    if phases
        .iter()
        .any(|p| matches!(p, OperationPhase::Failed | OperationPhase::Error))
    {
        return Ok(StepResult::failed());
    }
    if phases
        .iter()
        .any(|p| matches!(p, OperationPhase::Running | OperationPhase::Terminating))
    {
        return Ok(StepResult::running());
    }
    if !phases.is_empty()
        && phases
            .iter()
            .all(|p| matches!(p, OperationPhase::Succeeded))
    {
        return Ok(StepResult::succeeded());
    }
    Err(StepError::fatal(anyhow!(
        "could not determine directive status"
    )))
}
