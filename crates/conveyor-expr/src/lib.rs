//! CEL expression evaluation over JSON environments.
//!
//! Promotion steps let operators classify responses and extract outputs
//! with small CEL expressions (`response.status == 200`,
//! `response.body.token`). This crate wraps the CEL interpreter with the
//! two entry points steps need: a boolean predicate and a JSON-valued
//! extraction. Both bind a JSON tree as the expression environment.

use anyhow::{Context as _, Result, anyhow, bail};
use cel_interpreter::objects::Key;
use cel_interpreter::{Context, Program, Value as CelValue};
use serde_json::Value;

/// Evaluate `source` against `vars` and require a boolean verdict.
///
/// `vars` binds each name to a JSON tree. A non-boolean result is an
/// error, not a truthiness coercion.
pub fn eval_predicate(source: &str, vars: &[(&str, &Value)]) -> Result<bool> {
    match eval(source, vars)? {
        CelValue::Bool(verdict) => Ok(verdict),
        _ => bail!("expression did not evaluate to a boolean"),
    }
}

/// Evaluate `source` against `vars` and convert the result to JSON.
pub fn eval_value(source: &str, vars: &[(&str, &Value)]) -> Result<Value> {
    let value = eval(source, vars)?;
    cel_to_json(value).context("error converting expression result")
}

fn eval(source: &str, vars: &[(&str, &Value)]) -> Result<CelValue> {
    let program =
        Program::compile(source).map_err(|e| anyhow!("error compiling expression: {e}"))?;
    let mut context = Context::default();
    for (name, value) in vars {
        context
            .add_variable(*name, (*value).clone())
            .map_err(|e| anyhow!("error binding expression variable {name}: {e}"))?;
    }
    program
        .execute(&context)
        .map_err(|e| anyhow!("error evaluating expression: {e}"))
}

fn cel_to_json(value: CelValue) -> Result<Value> {
    Ok(match value {
        CelValue::Null => Value::Null,
        CelValue::Bool(b) => Value::Bool(b),
        CelValue::Int(i) => Value::from(i),
        CelValue::UInt(u) => Value::from(u),
        CelValue::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| anyhow!("number {f} has no JSON representation"))?,
        CelValue::String(s) => Value::String(s.as_ref().clone()),
        CelValue::List(items) => Value::Array(
            items
                .iter()
                .cloned()
                .map(cel_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        CelValue::Map(map) => {
            let mut object = serde_json::Map::with_capacity(map.map.len());
            for (key, item) in map.map.iter() {
                let key = match key {
                    Key::String(s) => s.as_ref().clone(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                object.insert(key, cel_to_json(item.clone())?);
            }
            Value::Object(object)
        }
        other => bail!("expression produced a value with no JSON representation: {other:?}"),
    })
}
