//! Argument checking against a tool's parameter schema.
//!
//! Values are coerced to the declared type where the conversion is lossless
//! (`"5"` → `5` for integers, `"true"` → `true` for booleans), defaults are
//! filled in for absent optional parameters, and string patterns are checked
//! after coercion. Unknown extra arguments pass through untouched.

use serde_json::{Number, Value};
use switchboard_core::schema::ParamType;
use switchboard_core::tools::{ToolArgs, ToolError};

use crate::registry::RegisteredTool;

pub fn validate_args(tool: &RegisteredTool, args: Value) -> Result<ToolArgs, ToolError> {
    let descriptor = tool.descriptor();
    let invalid = |field: &str, message: String| ToolError::Validation {
        tool: descriptor.name.clone(),
        field: field.to_string(),
        message,
    };

    let mut map = match args {
        Value::Object(map) => map,
        Value::Null => ToolArgs::new(),
        other => {
            return Err(invalid(
                "arguments",
                format!("expected an object, got {}", json_type_name(&other)),
            ))
        }
    };

    for spec in &descriptor.parameter_schema {
        let supplied = map.remove(&spec.name).filter(|v| !v.is_null());
        let value = match (supplied, &spec.default) {
            (Some(v), _) => coerce(spec.kind, v)
                .map_err(|got| invalid(&spec.name, format!("expected {}, got {got}", spec.kind.as_str())))?,
            (None, Some(default)) => default.clone(),
            (None, None) if spec.required => {
                return Err(invalid(&spec.name, "is required".to_string()));
            }
            (None, None) => continue,
        };

        if let (Some(regex), Value::String(s)) = (tool.pattern(&spec.name), &value) {
            if !regex.is_match(s) {
                return Err(invalid(
                    &spec.name,
                    format!("value does not match pattern {}", regex.as_str()),
                ));
            }
        }
        map.insert(spec.name.clone(), value);
    }

    Ok(map)
}

/// Coerce `value` to `kind`, or return a description of what was supplied.
pub fn coerce(kind: ParamType, value: Value) -> Result<Value, String> {
    match (kind, value) {
        (ParamType::String, Value::String(s)) => Ok(Value::String(s)),
        (ParamType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (ParamType::Integer, Value::Number(n)) => integer_from_number(&n)
            .map(Value::from)
            .ok_or_else(|| format!("non-integral number {n}")),
        (ParamType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("string {s:?}")),

        (ParamType::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("string {s:?}")),

        (ParamType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (ParamType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("string {s:?}")),
        },

        (ParamType::Object, Value::Object(m)) => Ok(Value::Object(m)),
        (ParamType::Array, Value::Array(a)) => Ok(Value::Array(a)),

        (_, other) => Err(json_type_name(&other).to_string()),
    }
}

/// 2^63. `i64::MAX as f64` rounds up to this, so the upper bound is exclusive.
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn integer_from_number(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < I64_UPPER_BOUND).then_some(f as i64)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
