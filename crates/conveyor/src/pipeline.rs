//! The thin promotion pipeline: run configured steps in declared order.
//!
//! The pipeline owns no retry policy. It invokes one step at a time,
//! records the outputs of succeeded steps under their alias so later
//! steps can read them, and stops at the first step that does not
//! succeed. Whether a stopped promotion is re-driven, and how often, is
//! the caller's concern; the [`StepError`] variant carries everything the
//! caller needs to decide.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use conveyor_schema::SchemaError;
use conveyor_types::{FreightCollection, StepError, StepStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::argocd::ArgoCdUpdater;
use crate::cluster::{ArgoCdClient, StageLookup};
use crate::http::HttpRequester;
use crate::step::{StepContext, StepRunner};

/// One configured step of a promotion.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionStep {
    /// Name of the step runner to invoke.
    pub uses: String,
    /// Alias the step's outputs are recorded under; `uses` when unset.
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    /// Configuration handed to the runner.
    #[serde(default)]
    pub config: Value,
}

impl PromotionStep {
    /// The alias outputs are recorded under.
    pub fn output_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.uses)
    }
}

/// Promotion-wide inputs shared by every step.
#[derive(Clone)]
pub struct PromotionContext {
    /// Project (namespace) the promotion runs in.
    pub project: String,
    /// Stage being promoted to.
    pub stage: String,
    /// The freight collection being promoted.
    pub freight: FreightCollection,
    /// Stage reader.
    pub stages: Arc<dyn StageLookup>,
    /// Argo CD client, absent when the integration is disabled.
    pub argocd: Option<Arc<dyn ArgoCdClient>>,
}

/// Where one drive of the pipeline ended up.
#[derive(Debug)]
pub struct PromotionResult {
    /// Status of the step the pipeline stopped at, `Succeeded` when every
    /// step concluded successfully.
    pub status: StepStatus,
    /// Index of the step the pipeline stopped at; `steps.len()` when all
    /// steps completed.
    pub current_step: usize,
    /// Outputs of succeeded steps, keyed by step alias.
    pub outputs: BTreeMap<String, BTreeMap<String, Value>>,
    /// The classified failure, when the pipeline stopped on one.
    pub error: Option<StepError>,
}

/// Executes promotion steps against registered step runners.
pub struct PromotionEngine {
    runners: BTreeMap<&'static str, Box<dyn StepRunner>>,
}

impl PromotionEngine {
    /// An engine with no registered runners.
    pub fn new() -> Self {
        Self {
            runners: BTreeMap::new(),
        }
    }

    /// An engine with the built-in runners (`http`, `argocd-update`)
    /// registered.
    pub fn with_builtin_runners() -> Result<Self, SchemaError> {
        let mut engine = Self::new();
        engine.register(Box::new(HttpRequester::new()?));
        engine.register(Box::new(ArgoCdUpdater::new()?));
        Ok(engine)
    }

    /// Register `runner`, replacing any runner with the same name.
    pub fn register(&mut self, runner: Box<dyn StepRunner>) {
        self.runners.insert(runner.name(), runner);
    }

    /// Look up a registered runner by name.
    pub fn runner(&self, name: &str) -> Option<&dyn StepRunner> {
        self.runners.get(name).map(Box::as_ref)
    }

    /// Drive `steps` once, in declared order.
    ///
    /// Steps run until one fails to conclude: a `Running` step stops the
    /// drive so the caller can re-drive later, a failure stops it for
    /// good unless the wrapped error is retryable.
    pub fn run(&self, ctx: &PromotionContext, steps: &[PromotionStep]) -> PromotionResult {
        let mut outputs: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for (index, step) in steps.iter().enumerate() {
            let Some(runner) = self.runners.get(step.uses.as_str()) else {
                return PromotionResult {
                    status: StepStatus::Failed,
                    current_step: index,
                    outputs,
                    error: Some(StepError::fatal(anyhow!(
                        "no promotion step runner registered for {:?}",
                        step.uses
                    ))),
                };
            };

            let state = serde_json::to_value(&outputs)
                .expect("promotion state always serializes to JSON");
            let step_ctx = StepContext {
                project: ctx.project.clone(),
                stage: ctx.stage.clone(),
                freight: ctx.freight.clone(),
                config: step.config.clone(),
                state,
                stages: ctx.stages.clone(),
                argocd: ctx.argocd.clone(),
            };

            match runner.run(&step_ctx) {
                Ok(result) => match result.status {
                    StepStatus::Succeeded => {
                        outputs.insert(step.output_alias().to_string(), result.output);
                    }
                    status => {
                        return PromotionResult {
                            status,
                            current_step: index,
                            outputs,
                            error: None,
                        };
                    }
                },
                Err(error) => {
                    return PromotionResult {
                        status: error.status(),
                        current_step: index,
                        outputs,
                        error: Some(error),
                    };
                }
            }
        }
        PromotionResult {
            status: StepStatus::Succeeded,
            current_step: steps.len(),
            outputs,
            error: None,
        }
    }
}

impl Default for PromotionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use conveyor_types::StepResult;
    use serde_json::json;

    use super::*;
    use crate::cluster::InMemoryCluster;

    fn promotion_ctx() -> PromotionContext {
        PromotionContext {
            project: "proj".to_string(),
            stage: "stage".to_string(),
            freight: FreightCollection::default(),
            stages: Arc::new(InMemoryCluster::new()),
            argocd: None,
        }
    }

    fn step(uses: &str) -> PromotionStep {
        PromotionStep {
            uses: uses.to_string(),
            alias: None,
            config: Value::Null,
        }
    }

    struct EmitOutput;

    impl StepRunner for EmitOutput {
        fn name(&self) -> &'static str {
            "emit"
        }

        fn run(&self, _ctx: &StepContext) -> Result<StepResult, StepError> {
            let output = [("token".to_string(), json!("tok-1"))].into_iter().collect();
            Ok(StepResult::succeeded_with_output(output))
        }
    }

    struct EchoState;

    impl StepRunner for EchoState {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn run(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
            let output = [("seen".to_string(), ctx.state.clone())].into_iter().collect();
            Ok(StepResult::succeeded_with_output(output))
        }
    }

    struct AlwaysTerminal;

    impl StepRunner for AlwaysTerminal {
        fn name(&self) -> &'static str {
            "terminal"
        }

        fn run(&self, _ctx: &StepContext) -> Result<StepResult, StepError> {
            Err(StepError::terminal(anyhow!("met failure criteria")))
        }
    }

    struct CountInvocations(Arc<AtomicUsize>);

    impl StepRunner for CountInvocations {
        fn name(&self) -> &'static str {
            "count"
        }

        fn run(&self, _ctx: &StepContext) -> Result<StepResult, StepError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(StepResult::succeeded())
        }
    }

    struct AlwaysRunning;

    impl StepRunner for AlwaysRunning {
        fn name(&self) -> &'static str {
            "poll"
        }

        fn run(&self, _ctx: &StepContext) -> Result<StepResult, StepError> {
            Ok(StepResult::running())
        }
    }

    #[test]
    fn builtin_runners_are_registered() {
        let engine = PromotionEngine::with_builtin_runners().expect("engine");
        assert!(engine.runner("http").is_some());
        assert!(engine.runner("argocd-update").is_some());
        assert!(engine.runner("bogus").is_none());
    }

    #[test]
    fn unknown_runner_fails_the_promotion() {
        let engine = PromotionEngine::new();
        let result = engine.run(&promotion_ctx(), &[step("bogus")]);
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.current_step, 0);
        let err = result.error.expect("error");
        assert!(err.to_string().contains("no promotion step runner registered"));
    }

    #[test]
    fn outputs_flow_to_later_steps() {
        let mut engine = PromotionEngine::new();
        engine.register(Box::new(EmitOutput));
        engine.register(Box::new(EchoState));

        let result = engine.run(&promotion_ctx(), &[step("emit"), step("echo")]);
        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(result.current_step, 2);
        assert_eq!(
            result.outputs["echo"]["seen"],
            json!({"emit": {"token": "tok-1"}})
        );
    }

    #[test]
    fn aliases_rename_recorded_outputs() {
        let mut engine = PromotionEngine::new();
        engine.register(Box::new(EmitOutput));

        let mut aliased = step("emit");
        aliased.alias = Some("login".to_string());
        let result = engine.run(&promotion_ctx(), &[aliased]);
        assert!(result.outputs.contains_key("login"));
        assert!(!result.outputs.contains_key("emit"));
    }

    #[test]
    fn terminal_failure_halts_the_pipeline() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut engine = PromotionEngine::new();
        engine.register(Box::new(AlwaysTerminal));
        engine.register(Box::new(CountInvocations(invocations.clone())));

        let result = engine.run(&promotion_ctx(), &[step("terminal"), step("count")]);
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.current_step, 0);
        assert!(!result.error.expect("error").is_retryable());
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn running_step_suspends_the_pipeline() {
        let mut engine = PromotionEngine::new();
        engine.register(Box::new(EmitOutput));
        engine.register(Box::new(AlwaysRunning));

        let result = engine.run(&promotion_ctx(), &[step("emit"), step("poll")]);
        assert_eq!(result.status, StepStatus::Running);
        assert_eq!(result.current_step, 1);
        assert!(result.error.is_none());
        // Outputs of already-completed steps are preserved for the re-drive.
        assert!(result.outputs.contains_key("emit"));
    }
}
