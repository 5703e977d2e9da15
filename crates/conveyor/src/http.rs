//! The `http` step runner: send one HTTP request, classify the response,
//! extract outputs.
//!
//! Classification is driven by optional CEL predicates over the response;
//! with neither predicate configured, 2xx means success. When success and
//! failure criteria both hold, failure wins. A response that is neither a
//! success nor a failure leaves the step `Running` so the pipeline can
//! re-drive it (long polls, eventually-consistent endpoints).

use std::collections::BTreeMap;
use std::io::Read as _;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use conveyor_schema::{ConfigValidator, SchemaError};
use conveyor_types::{StepError, StepResult};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::step::{StepContext, StepRunner};

/// Name of this step runner.
pub const HTTP_STEP_NAME: &str = "http";

/// Request timeout applied when the configuration sets none.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on response body bytes read for classification.
const MAX_RESPONSE_BODY_BYTES: u64 = 2 << 20;

const CONFIG_SCHEMA: &str = include_str!("../schemas/http-config.json");

/// A `(name, value)` header pair. Pairs are added, not set, so repeated
/// names accumulate on the request.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HttpHeader {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// A `(name, value)` query parameter pair appended to the URL.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HttpQueryParam {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

/// One named output extracted from the response on success.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOutput {
    /// Output name.
    pub name: String,
    /// Expression producing the output value from the response.
    pub from_expression: String,
}

/// Configuration of the `http` step.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// HTTP method; `GET` when unset.
    #[serde(default)]
    pub method: Option<String>,
    /// Absolute request URL.
    pub url: String,
    /// Raw request body.
    #[serde(default)]
    pub body: String,
    /// Headers to add to the request.
    #[serde(default)]
    pub headers: Vec<HttpHeader>,
    /// Query parameters appended to the URL.
    #[serde(default)]
    pub query_params: Vec<HttpQueryParam>,
    /// Request timeout as a duration string; 10s when unset.
    #[serde(default)]
    pub timeout: Option<String>,
    /// Disable TLS certificate verification.
    #[serde(default, rename = "insecureSkipTLSVerify")]
    pub insecure_skip_tls_verify: bool,
    /// Predicate deciding success.
    #[serde(default)]
    pub success_expression: Option<String>,
    /// Predicate deciding failure.
    #[serde(default)]
    pub failure_expression: Option<String>,
    /// Outputs to extract on success.
    #[serde(default)]
    pub outputs: Vec<HttpOutput>,
}

/// The `http` step runner.
pub struct HttpRequester {
    validator: ConfigValidator,
}

impl HttpRequester {
    /// Build the runner, compiling its embedded configuration schema.
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            validator: ConfigValidator::from_source(HTTP_STEP_NAME, CONFIG_SCHEMA)?,
        })
    }

    fn execute(&self, cfg: &HttpConfig) -> Result<StepResult, StepError> {
        let client = build_client(cfg)
            .map_err(|e| StepError::transient(e.context("error creating HTTP client")))?;
        let request = build_request(&client, cfg)
            .map_err(|e| StepError::transient(e.context("error building HTTP request")))?;
        let response = client
            .execute(request)
            .map_err(|e| StepError::transient(anyhow!(e).context("error sending HTTP request")))?;

        let status = i64::from(response.status().as_u16());
        let headers = response.headers().clone();
        let env = build_expr_env(status, &headers, response).map_err(|e| {
            StepError::transient(e.context("error building expression context from HTTP response"))
        })?;

        let success = was_request_successful(cfg, status, &env)
            .map_err(|e| StepError::transient(e.context("error evaluating success criteria")))?;
        let failure = did_request_fail(cfg, status, &env)
            .map_err(|e| StepError::transient(e.context("error evaluating failure criteria")))?;

        if success && !failure {
            let output = build_outputs(&cfg.outputs, &env).map_err(|e| {
                StepError::transient(e.context("error extracting outputs from HTTP response"))
            })?;
            return Ok(StepResult::succeeded_with_output(output));
        }
        if failure {
            return Err(StepError::terminal(anyhow!(
                "HTTP ({status}) response met failure criteria"
            )));
        }
        Ok(StepResult::running())
    }
}

impl StepRunner for HttpRequester {
    fn name(&self) -> &'static str {
        HTTP_STEP_NAME
    }

    fn run(&self, ctx: &StepContext) -> Result<StepResult, StepError> {
        self.validator.validate(&ctx.config)?;
        let cfg: HttpConfig = serde_json::from_value(ctx.config.clone()).map_err(|e| {
            StepError::transient(anyhow!(e).context("could not convert config into http config"))
        })?;
        self.execute(&cfg)
    }
}

fn build_client(cfg: &HttpConfig) -> Result<Client> {
    let timeout = match &cfg.timeout {
        Some(timeout) => humantime::parse_duration(timeout).context("error parsing timeout")?,
        None => DEFAULT_TIMEOUT,
    };
    let mut builder = Client::builder().timeout(timeout);
    if cfg.insecure_skip_tls_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

fn build_request(client: &Client, cfg: &HttpConfig) -> Result<reqwest::blocking::Request> {
    let method = match &cfg.method {
        Some(method) => reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid method {method:?}"))?,
        None => reqwest::Method::GET,
    };
    let mut builder = client.request(method, &cfg.url).body(cfg.body.clone());
    for header in &cfg.headers {
        builder = builder.header(header.name.as_str(), header.value.as_str());
    }
    if !cfg.query_params.is_empty() {
        let pairs: Vec<(&str, &str)> = cfg
            .query_params
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();
        builder = builder.query(&pairs);
    }
    Ok(builder.build()?)
}

/// Read the response body, bounded at [`MAX_RESPONSE_BODY_BYTES`].
///
/// A declared `Content-Length` over the limit fails fast without reading.
/// After reading exactly the limit, one extra byte is probed: if anything
/// comes back, the body is over the limit.
fn read_bounded_body(mut response: Response) -> Result<Vec<u8>> {
    if let Some(length) = response.content_length()
        && length > MAX_RESPONSE_BODY_BYTES
    {
        bail!("response body size {length} exceeds limit of {MAX_RESPONSE_BODY_BYTES} bytes");
    }

    let mut body = Vec::new();
    (&mut response)
        .take(MAX_RESPONSE_BODY_BYTES)
        .read_to_end(&mut body)
        .context("reading response body")?;

    if body.len() as u64 == MAX_RESPONSE_BODY_BYTES {
        let mut probe = [0u8; 1];
        let extra = response
            .read(&mut probe)
            .context("checking for additional content")?;
        if extra > 0 {
            bail!("response body exceeds maximum size of {MAX_RESPONSE_BODY_BYTES} bytes");
        }
    }
    Ok(body)
}

/// Build the `response` environment the classification and output
/// expressions evaluate against.
fn build_expr_env(status: i64, headers: &HeaderMap, response: Response) -> Result<Value> {
    let body = read_bounded_body(response)?;

    tracing::trace!(
        status,
        body = %String::from_utf8_lossy(&body),
        "HTTP request response"
    );

    let mut first_values = serde_json::Map::new();
    let mut all_values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        first_values
            .entry(name.as_str().to_string())
            .or_insert_with(|| Value::String(value.to_string()));
        all_values
            .entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }

    let mut body_value = json!({});
    let media_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .unwrap_or("")
        .trim();
    if !body.is_empty() && media_type == "application/json" {
        let parsed: Value =
            serde_json::from_slice(&body).context("failed to parse response body")?;
        match parsed {
            Value::Object(_) | Value::Array(_) => body_value = parsed,
            other => bail!(
                "unexpected {} when parsing response body",
                json_kind(&other)
            ),
        }
    }

    Ok(json!({
        "response": {
            "status": status,
            "header": Value::Object(first_values),
            "headers": all_values,
            "body": body_value,
        },
    }))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn was_request_successful(cfg: &HttpConfig, status: i64, env: &Value) -> Result<bool> {
    if let Some(expression) = &cfg.success_expression {
        return conveyor_expr::eval_predicate(expression, &[("response", env)])
            .context("error evaluating success expression");
    }
    if cfg.failure_expression.is_some() {
        return Ok(!did_request_fail(cfg, status, env)?);
    }
    // Redirects are followed automatically, so only 2xx is success.
    Ok((200..300).contains(&status))
}

fn did_request_fail(cfg: &HttpConfig, status: i64, env: &Value) -> Result<bool> {
    if let Some(expression) = &cfg.failure_expression {
        return conveyor_expr::eval_predicate(expression, &[("response", env)])
            .context("error evaluating failure expression");
    }
    if cfg.success_expression.is_some() {
        return Ok(!was_request_successful(cfg, status, env)?);
    }
    Ok(!(200..300).contains(&status))
}

fn build_outputs(outputs: &[HttpOutput], env: &Value) -> Result<BTreeMap<String, Value>> {
    let mut values = BTreeMap::new();
    for output in outputs {
        let value = conveyor_expr::eval_value(&output.from_expression, &[("response", env)])
            .with_context(|| format!("error evaluating expression for output {:?}", output.name))?;
        values.insert(output.name.clone(), value);
    }
    Ok(values)
}
