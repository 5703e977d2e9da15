//! # Conveyor
//!
//! The directive execution core of a GitOps promotion controller.
//!
//! A *promotion* carries an immutable bundle of artifact references, a
//! [freight collection](conveyor_types::FreightCollection), toward a
//! *stage* (a deployment environment) by executing an ordered pipeline of
//! *steps*. Conveyor implements the steps themselves and the thin pipeline
//! that drives them; scheduling promotions across stages and persisting
//! their history belong to the surrounding control plane.
//!
//! ## Step runners
//!
//! - [`http::HttpRequester`] (`http`) — send an HTTP request, classify the
//!   response with CEL predicates, and extract structured outputs.
//! - [`argocd::ArgoCdUpdater`] (`argocd-update`) — reconcile Argo CD
//!   `Application` objects to the revisions freight promotes, with
//!   identity-gated syncs that serialize concurrent controllers.
//!
//! Every runner validates its configuration against a JSON schema before
//! executing and reports one of four statuses: `Succeeded`, `Failed`,
//! `Errored`, or `Running`. Failures are classified by
//! [`StepError`](conveyor_types::StepError) so the caller can tell a
//! retryable hiccup from a terminal verdict without string inspection.
//!
//! ## Cluster seams
//!
//! Steps never hold a Kubernetes client directly; they reach the cluster
//! through the [`cluster::StageLookup`] and [`cluster::ArgoCdClient`]
//! traits. Production wires those to real clients;
//! [`cluster::InMemoryCluster`] serves tests and local experiments.
//!
//! ## Example
//!
//! ```
//! use conveyor::pipeline::{PromotionContext, PromotionEngine, PromotionStep};
//! use conveyor::cluster::InMemoryCluster;
//! use conveyor_types::FreightCollection;
//! use std::sync::Arc;
//!
//! let engine = PromotionEngine::with_builtin_runners().expect("engine");
//! let ctx = PromotionContext {
//!     project: "my-project".to_string(),
//!     stage: "staging".to_string(),
//!     freight: FreightCollection::default(),
//!     stages: Arc::new(InMemoryCluster::new()),
//!     argocd: None,
//! };
//! let result = engine.run(&ctx, &[] as &[PromotionStep]);
//! assert!(result.error.is_none());
//! ```

/// The `argocd-update` step runner.
pub mod argocd;

/// Cluster client seams and the in-memory implementation.
pub mod cluster;

/// The `http` step runner.
pub mod http;

/// Recursive merge over JSON trees.
pub mod merge;

/// The promotion pipeline and step registry.
pub mod pipeline;

/// The step ABI: context and runner trait.
pub mod step;

/// Shared domain types, re-exported from the conveyor-types microcrate.
pub use conveyor_types as types;

pub use crate::pipeline::{PromotionContext, PromotionEngine, PromotionResult, PromotionStep};
pub use crate::step::{StepContext, StepRunner};
