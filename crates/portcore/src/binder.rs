//! Turns mapping expressions into typed argument values.
//!
//! A mapping without `{{` is a path into the node's input document and keeps
//! structured values intact. A mapping with `{{` is rendered by the
//! [`ExpressionEvaluator`] and the rendered text is read back as a JSON
//! literal. Either way the value is then coerced to the parameter's declared
//! [`ParamType`].

use crate::document::Document;
use crate::function::{ParamType, Parameter};
use crate::template::{has_template_markers, ExpressionEvaluator};
use crate::value::{string_form, type_name};
use crate::workflow::DictionaryMapping;
use crate::BindingError;
use serde_json::{Map, Number, Value};

pub struct ParameterBinder<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> ParameterBinder<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { evaluator }
    }

    /// Bind one parameter. `expression` is the mapping's source, if any.
    pub fn bind(
        &self,
        parameter: &Parameter,
        expression: Option<&str>,
        scope: &Document,
    ) -> Result<Value, BindingError> {
        let Some(expression) = expression.filter(|e| !e.trim().is_empty()) else {
            return Ok(parameter.ty.zero_value());
        };
        let raw = self.resolve(&parameter.name, expression, scope)?;
        tracing::trace!(parameter = %parameter.name, expression, value = %raw, "resolved mapping");
        coerce(&parameter.name, raw, parameter.ty)
    }

    /// Build the object for a map-typed parameter from its dictionary entries.
    pub fn bind_dictionary(
        &self,
        parameter: &str,
        entries: &[DictionaryMapping],
        scope: &Document,
    ) -> Result<Value, BindingError> {
        let mut map = Map::new();
        for entry in entries.iter().filter(|e| e.parameter == parameter) {
            let value = self.resolve(parameter, &entry.from, scope)?;
            map.insert(entry.key.clone(), value);
        }
        Ok(Value::Object(map))
    }

    /// Resolve an expression to an untyped value.
    pub fn resolve(&self, parameter: &str, expression: &str, scope: &Document) -> Result<Value, BindingError> {
        if !has_template_markers(expression) {
            if let Some(value) = scope.get(expression) {
                return Ok(value.clone());
            }
            return Ok(parse_literal(expression));
        }

        let model = scope.to_flat_model();
        let rendered = self
            .evaluator
            .render(expression, &model)
            .map_err(|source| BindingError::Template {
                parameter: parameter.to_string(),
                source,
            })?;
        let repaired = repair_json_literal(&rendered);
        Ok(serde_json::from_str(repaired.trim()).unwrap_or(Value::String(rendered)))
    }
}

/// Plain text that is not a path: a JSON literal when it parses, otherwise
/// the text itself as a string.
fn parse_literal(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Best-effort fix-up of bracketed template output such as `[a, b, 3]`,
/// whose string items come out unquoted. Bare items are quoted; nested
/// arrays are repaired recursively. Nested unquoted objects are not
/// understood and end up quoted as strings.
pub fn repair_json_literal(text: &str) -> String {
    let trimmed = text.trim();
    if !(trimmed.starts_with('[') && trimmed.ends_with(']')) {
        return text.to_string();
    }
    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return trimmed.to_string();
    }
    repair_array(trimmed)
}

fn repair_array(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let items: Vec<String> = split_items(inner)
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(repair_item)
        .collect();
    format!("[{}]", items.join(","))
}

fn repair_item(item: &str) -> String {
    if serde_json::from_str::<Value>(item).is_ok() {
        return item.to_string();
    }
    if item.starts_with('[') && item.ends_with(']') {
        return repair_array(item);
    }
    Value::String(item.to_string()).to_string()
}

/// Split on commas outside quotes and nested brackets.
fn split_items(inner: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&inner[start..]);
    items
}

fn coercion_error(parameter: &str, ty: ParamType, value: &Value) -> BindingError {
    BindingError::Coercion {
        parameter: parameter.to_string(),
        expected: ty.name().to_string(),
        actual: format!("{} {}", type_name(value), value),
    }
}

/// Convert `value` to the declared type. Value types fail loudly; string
/// targets fall back to the value's string form; array and object targets
/// bind null when nothing sensible can be made of the value.
pub fn coerce(parameter: &str, value: Value, ty: ParamType) -> Result<Value, BindingError> {
    if matches!(ty, ParamType::Any | ParamType::Context | ParamType::Flow) {
        return Ok(value);
    }
    if value.is_null() {
        return Ok(ty.zero_value());
    }

    match ty {
        ParamType::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(coercion_error(parameter, ty, &value)),
            },
            Value::Number(n) => match n.as_f64() {
                Some(f) => Ok(Value::Bool(f != 0.0)),
                None => Err(coercion_error(parameter, ty, &value)),
            },
            _ => Err(coercion_error(parameter, ty, &value)),
        },
        ParamType::Integer => {
            let integer = match &value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64).map(|f| f as i64)),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>().ok().or_else(|| {
                        s.parse::<f64>()
                            .ok()
                            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                            .map(|f| f as i64)
                    })
                }
                _ => None,
            };
            integer
                .map(Value::from)
                .ok_or_else(|| coercion_error(parameter, ty, &value))
        }
        ParamType::Float => {
            let float = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            float
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| coercion_error(parameter, ty, &value))
        }
        ParamType::String => Ok(match value {
            Value::String(_) => value,
            other => Value::String(string_form(&other)),
        }),
        ParamType::Array => Ok(match value {
            Value::Array(_) => value,
            Value::String(ref s) => match serde_json::from_str::<Value>(&repair_json_literal(s)) {
                Ok(parsed @ Value::Array(_)) => parsed,
                _ => lenient_null(parameter, ty, &value),
            },
            other => lenient_null(parameter, ty, &other),
        }),
        ParamType::Object | ParamType::Map => Ok(match value {
            Value::Object(_) => value,
            Value::String(ref s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Object(_)) => parsed,
                _ => lenient_null(parameter, ty, &value),
            },
            other => lenient_null(parameter, ty, &other),
        }),
        ParamType::Any | ParamType::Context | ParamType::Flow => Ok(value),
    }
}

fn lenient_null(parameter: &str, ty: ParamType, value: &Value) -> Value {
    tracing::warn!(
        parameter,
        expected = ty.name(),
        actual = type_name(value),
        "cannot convert argument, binding null"
    );
    Value::Null
}
