//! 工具 Schema 声明与参数校验
//!
//! 输入/输出 Schema 为不透明 JSON（JSON Schema 子集）。内置工具用 schemars 从参数类型生成 Schema。
//! 校验支持：type（含数组形式）、properties、required、additionalProperties、items、enum、
//! anyOf / oneOf、minimum / maximum、minItems，以及指向 `#/definitions/` 或 `#/$defs/` 的本地 `$ref`。

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

/// 注册时声明的工具 Schema（注册后不可变）
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub description: String,
    pub input: Value,
    pub output: Value,
}

impl ToolSchema {
    pub fn new(description: impl Into<String>, input: Value, output: Value) -> Self {
        Self {
            description: description.into(),
            input,
            output,
        }
    }

    /// 从参数类型生成输入 Schema
    pub fn for_input<T: JsonSchema>(description: impl Into<String>) -> Self {
        Self::new(description, schema_value::<T>(), any_object())
    }

    pub fn with_output<T: JsonSchema>(mut self) -> Self {
        self.output = schema_value::<T>();
        self
    }

    pub fn validate_input(&self, args: &Value) -> Result<(), String> {
        validate(&self.input, args)
    }

    pub fn validate_output(&self, result: &Value) -> Result<(), String> {
        validate(&self.output, result)
    }
}

/// 任意对象
pub fn any_object() -> Value {
    json!({"type": "object"})
}

pub fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| any_object())
}

/// 按 Schema 校验 value，错误信息带 JSON 路径
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    check(schema, schema, value, "$")
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => true,
    }
}

fn resolve<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

fn check(root: &Value, schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let schema = match schema {
        Value::Bool(true) => return Ok(()),
        Value::Bool(false) => return Err(format!("{path}: no value allowed")),
        Value::Object(map) => map,
        _ => return Ok(()),
    };

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        let target = resolve(root, reference)
            .ok_or_else(|| format!("{path}: unresolvable schema reference {reference}"))?;
        check(root, target, value, path)?;
    }

    if let Some(expected) = schema.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(format!("{path}: expected type {expected}, got {}", kind_of(value)));
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(format!("{path}: value {value} not in enum"));
        }
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(variants) = schema.get(key).and_then(Value::as_array) {
            if !variants.iter().any(|s| check(root, s, value, path).is_ok()) {
                return Err(format!("{path}: value matches none of the allowed shapes"));
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{path}: {n} is below minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{path}: {n} is above maximum {max}"));
            }
        }
    }

    if let Value::Object(obj) = value {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(field) {
                    return Err(format!("{path}: missing required field '{field}'"));
                }
            }
        }
        let properties = schema.get("properties").and_then(Value::as_object);
        for (key, child) in obj {
            let child_path = format!("{path}.{key}");
            match properties.and_then(|p| p.get(key)) {
                Some(prop_schema) => check(root, prop_schema, child, &child_path)?,
                None => match schema.get("additionalProperties") {
                    Some(Value::Bool(false)) => {
                        return Err(format!("{path}: unexpected field '{key}'"));
                    }
                    Some(extra @ Value::Object(_)) => check(root, extra, child, &child_path)?,
                    _ => {}
                },
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return Err(format!("{path}: expected at least {min} items"));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                check(root, item_schema, item, &format!("{path}[{i}]"))?;
            }
        }
    }

    Ok(())
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
