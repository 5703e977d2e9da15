//! JSON-schema validation for promotion step configuration.
//!
//! Every promotion step runner owns a JSON schema describing its
//! configuration tree. Configuration is validated in full before a step
//! runs: all violations are collected in a single pass and reported
//! together, each prefixed with the dotted path of the offending value.
//!
//! # Example
//!
//! ```
//! use conveyor_schema::ConfigValidator;
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "required": ["url"],
//!     "properties": {"url": {"type": "string", "minLength": 1}},
//! });
//! let validator = ConfigValidator::new("http", &schema).expect("schema");
//!
//! assert!(validator.validate(&json!({"url": "https://example.com"})).is_ok());
//! let err = validator.validate(&json!({})).expect_err("missing url");
//! assert!(err.to_string().contains("url"));
//! ```

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// The schema itself failed to compile.
#[derive(Debug, Error)]
#[error("invalid configuration schema for step {step:?}: {message}")]
pub struct SchemaError {
    /// Name of the step runner owning the schema.
    pub step: String,
    /// Compilation failure detail.
    pub message: String,
}

/// Aggregated configuration violations for a single step.
///
/// Rendered one problem per line, each prefixed with the dotted instance
/// path (`apps.0.sources.0.repoURL: …`). Root-level problems use `(root)`.
#[derive(Debug)]
pub struct ConfigError {
    /// Name of the step runner whose configuration was rejected.
    pub step: String,
    /// Every violation found, in schema evaluation order.
    pub problems: Vec<Problem>,
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Dotted path of the offending value, `(root)` for the document root.
    pub path: String,
    /// Violation message as produced by the schema evaluator.
    pub message: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "invalid {} step configuration:", self.step)?;
        for problem in &self.problems {
            writeln!(f, "{problem}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

/// A compiled schema for one step runner's configuration.
pub struct ConfigValidator {
    step: String,
    validator: jsonschema::Validator,
}

impl fmt::Debug for ConfigValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigValidator")
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl ConfigValidator {
    /// Compile `schema` for the step runner named `step`.
    pub fn new(step: &str, schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(schema).map_err(|e| SchemaError {
            step: step.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            step: step.to_string(),
            validator,
        })
    }

    /// Parse and compile a schema from its JSON source text.
    ///
    /// Convenient for schemas embedded with `include_str!`.
    pub fn from_source(step: &str, schema_json: &str) -> Result<Self, SchemaError> {
        let schema: Value = serde_json::from_str(schema_json).map_err(|e| SchemaError {
            step: step.to_string(),
            message: e.to_string(),
        })?;
        Self::new(step, &schema)
    }

    /// Name of the step runner this validator belongs to.
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Validate `config` in full, collecting every violation.
    ///
    /// Pure and side-effect free; the same configuration always yields the
    /// same set of problems.
    pub fn validate(&self, config: &Value) -> Result<(), ConfigError> {
        let problems: Vec<Problem> = self
            .validator
            .iter_errors(config)
            .map(|error| Problem {
                path: dotted_path(&error.instance_path().to_string()),
                message: error.to_string(),
            })
            .collect();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ConfigError {
            step: self.step.clone(),
            problems,
        })
    }
}

/// Convert a JSON pointer (`/apps/0/name`) into the dotted form used in
/// problem reports (`apps.0.name`). The empty pointer becomes `(root)`.
fn dotted_path(pointer: &str) -> String {
    if pointer.is_empty() {
        return "(root)".to_string();
    }
    pointer
        .split('/')
        .skip(1)
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_schema() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "required": ["apps"],
            "properties": {
                "apps": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["name"],
                        "properties": {
                            "name": {"type": "string", "minLength": 1},
                            "mode": {"type": "string", "enum": ["Tag", "Digest"]},
                        },
                    },
                },
            },
        })
    }

    #[test]
    fn valid_config_passes() {
        let validator = ConfigValidator::new("argocd-update", &sample_schema()).expect("schema");
        validator
            .validate(&json!({"apps": [{"name": "app", "mode": "Tag"}]}))
            .expect("valid");
    }

    #[test]
    fn missing_required_key_is_reported_at_root() {
        let validator = ConfigValidator::new("argocd-update", &sample_schema()).expect("schema");
        let err = validator.validate(&json!({})).expect_err("missing apps");
        assert_eq!(err.step, "argocd-update");
        assert_eq!(err.problems.len(), 1);
        assert_eq!(err.problems[0].path, "(root)");
        assert!(err.problems[0].message.contains("apps"));
    }

    #[test]
    fn empty_array_violates_min_items() {
        let validator = ConfigValidator::new("argocd-update", &sample_schema()).expect("schema");
        let err = validator.validate(&json!({"apps": []})).expect_err("empty");
        assert_eq!(err.problems[0].path, "apps");
    }

    #[test]
    fn nested_violations_carry_dotted_paths() {
        let validator = ConfigValidator::new("argocd-update", &sample_schema()).expect("schema");
        let err = validator
            .validate(&json!({"apps": [{"name": ""}, {"name": "ok", "mode": "bogus"}]}))
            .expect_err("violations");
        let paths: Vec<&str> = err.problems.iter().map(|p| p.path.as_str()).collect();
        assert!(paths.contains(&"apps.0.name"), "paths: {paths:?}");
        assert!(paths.contains(&"apps.1.mode"), "paths: {paths:?}");
    }

    #[test]
    fn all_violations_are_collected_in_one_pass() {
        let validator = ConfigValidator::new("argocd-update", &sample_schema()).expect("schema");
        let err = validator
            .validate(&json!({"apps": [{"name": "", "mode": "bogus"}], "extra": true}))
            .expect_err("violations");
        // name too short, mode out of enum, and the unknown root key all
        // show up together.
        assert!(err.problems.len() >= 3, "problems: {:?}", err.problems);
    }

    #[test]
    fn display_lists_one_problem_per_line() {
        let validator = ConfigValidator::new("argocd-update", &sample_schema()).expect("schema");
        let err = validator
            .validate(&json!({"apps": [{"name": ""}, {"mode": "bogus"}]}))
            .expect_err("violations");
        let rendered = err.to_string();
        assert!(rendered.starts_with("invalid argocd-update step configuration:"));
        for problem in &err.problems {
            assert!(rendered.contains(&problem.to_string()));
        }
    }

    #[test]
    fn validation_is_idempotent_across_key_order() {
        let validator = ConfigValidator::new("argocd-update", &sample_schema()).expect("schema");
        let a = json!({"apps": [{"mode": "bogus", "name": ""}]});
        let b = json!({"apps": [{"name": "", "mode": "bogus"}]});

        let mut problems_a = match validator.validate(&a) {
            Err(e) => e.problems.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            Ok(()) => panic!("expected violations"),
        };
        let mut problems_b = match validator.validate(&b) {
            Err(e) => e.problems.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            Ok(()) => panic!("expected violations"),
        };
        problems_a.sort();
        problems_b.sort();
        assert_eq!(problems_a, problems_b);
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let err = ConfigValidator::new("http", &json!({"type": "nonsense"}))
            .expect_err("bad schema");
        assert_eq!(err.step, "http");
    }

    #[test]
    fn dotted_path_forms() {
        assert_eq!(dotted_path(""), "(root)");
        assert_eq!(dotted_path("/apps"), "apps");
        assert_eq!(dotted_path("/apps/0/sources/0/repoURL"), "apps.0.sources.0.repoURL");
    }
}
