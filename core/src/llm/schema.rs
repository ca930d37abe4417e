//! Argument validation and coercion.
//!
//! Providers occasionally emit tool arguments with the right shape but the
//! wrong scalar types (`"42"` for a number, `"true"` for a bool). Rather than
//! failing such calls outright, [`coerce_arguments`] walks the declared
//! schema, coerces scalars where the target type is unambiguous, and collects
//! every mismatch it cannot repair. The caller's value is never mutated; a
//! new value is produced.
//!
//! Only the schema subset that `schemars` derives for argument structs is
//! interpreted: `type`, `properties`, `required`, `items`, `enum`, `$ref`
//! into `$defs`, and nullable type arrays. Anything else passes through
//! untouched, on the theory that the tool's own deserialization is the final
//! arbiter.

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::fmt;

use schemars::Schema;
use serde_json::{Map, Value};

/// A single rejected argument path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// JSON path of the offending value, e.g. `args.count`.
    pub path: String,
    /// What was wrong.
    pub message: String,
}

/// Tool arguments failed schema validation.
///
/// The display form enumerates every offending path so the model can repair
/// its call in one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    issues: Vec<ValidationIssue>,
}

impl ValidationError {
    /// Returns the individual issues.
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tool arguments: ")?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", issue.path, issue.message)?;
        }
        Ok(())
    }
}

impl core::error::Error for ValidationError {}

/// Validates `raw` against `schema`, coercing scalars where possible.
///
/// Returns the coerced argument object. The input is cloned, never mutated.
///
/// # Errors
///
/// Returns a [`ValidationError`] listing every offending path when the value
/// cannot be made to conform.
pub fn coerce_arguments(schema: &Schema, raw: &Value) -> Result<Value, ValidationError> {
    let schema_value = schema.as_value();
    let mut issues = Vec::new();
    let coerced = coerce_value(schema_value, schema_value, raw, "args", &mut issues);
    if issues.is_empty() {
        Ok(coerced)
    } else {
        Err(ValidationError { issues })
    }
}

fn resolve<'a>(root: &'a Value, schema: &'a Value) -> &'a Value {
    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        // Only local $defs references are generated by schemars.
        if let Some(name) = reference.strip_prefix("#/$defs/") {
            if let Some(resolved) = root.get("$defs").and_then(|defs| defs.get(name)) {
                return resolved;
            }
        }
        if let Some(name) = reference.strip_prefix("#/definitions/") {
            if let Some(resolved) = root.get("definitions").and_then(|defs| defs.get(name)) {
                return resolved;
            }
        }
    }
    schema
}

fn schema_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(ty)) => alloc::vec![ty.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn coerce_value(
    root: &Value,
    schema: &Value,
    value: &Value,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    let schema = resolve(root, schema);

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            issues.push(ValidationIssue {
                path: path.to_string(),
                message: format!("expected one of {allowed:?}"),
            });
        }
        return value.clone();
    }

    let types = schema_types(schema);
    if types.is_empty() {
        return value.clone();
    }
    // Nullable type arrays: null satisfies the schema outright.
    if value.is_null() && types.contains(&"null") {
        return Value::Null;
    }

    for ty in &types {
        if let Some(coerced) = coerce_to_type(root, schema, value, ty, path, issues) {
            return coerced;
        }
    }

    issues.push(ValidationIssue {
        path: path.to_string(),
        message: format!("expected {}, got {}", types.join(" or "), type_name(value)),
    });
    value.clone()
}

/// Attempts to conform `value` to a single primitive `ty`. Returns `None`
/// when the value neither matches nor coerces; container types always return
/// `Some` and report nested issues through `issues`.
fn coerce_to_type(
    root: &Value,
    schema: &Value,
    value: &Value,
    ty: &str,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Value> {
    match ty {
        "object" => {
            let Value::Object(map) = value else {
                return None;
            };
            Some(coerce_object(root, schema, map, path, issues))
        }
        "array" => {
            let Value::Array(items) = value else {
                return None;
            };
            let item_schema = schema.get("items");
            let coerced = items
                .iter()
                .enumerate()
                .map(|(i, item)| match item_schema {
                    Some(item_schema) => {
                        coerce_value(root, item_schema, item, &format!("{path}[{i}]"), issues)
                    }
                    None => item.clone(),
                })
                .collect();
            Some(Value::Array(coerced))
        }
        "string" => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        "number" => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        "integer" => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| Value::from(f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        "boolean" => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        "null" => value.is_null().then(|| Value::Null),
        _ => Some(value.clone()),
    }
}

fn coerce_object(
    root: &Value,
    schema: &Value,
    map: &Map<String, Value>,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Value {
    let properties = schema.get("properties").and_then(Value::as_object);
    let mut out = Map::with_capacity(map.len());

    for (key, value) in map {
        let child_path = format!("{path}.{key}");
        match properties.and_then(|props| props.get(key)) {
            Some(prop_schema) => {
                out.insert(
                    key.clone(),
                    coerce_value(root, prop_schema, value, &child_path, issues),
                );
            }
            // Unknown keys pass through; the tool's deserializer decides.
            None => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(name) {
                issues.push(ValidationIssue {
                    path: format!("{path}.{name}"),
                    message: "missing required property".to_string(),
                });
            }
        }
    }

    Value::Object(out)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
