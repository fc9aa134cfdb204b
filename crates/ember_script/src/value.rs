//! Host ↔ script value bridge
//!
//! Hooks are notifications: arguments flow into the script, return values are dropped.

use rquickjs::{Array, Ctx, IntoJs, Object, Value};

/// A value the host hands to a hook.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// UTF-8 text, arrives in the script as a string.
    Text(String),
    /// Structured data forwarded as-is (numbers, booleans, arrays, objects, null).
    Opaque(serde_json::Value),
}

impl HostValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HostValue::Text(text) => Some(text),
            HostValue::Opaque(_) => None,
        }
    }
}

impl From<&str> for HostValue {
    fn from(text: &str) -> Self {
        HostValue::Text(text.to_string())
    }
}

impl From<String> for HostValue {
    fn from(text: String) -> Self {
        HostValue::Text(text)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        HostValue::Opaque(value)
    }
}

/// Convert host arguments into script values, preserving order.
///
/// Only fails if the runtime cannot allocate.
pub fn marshal<'js>(ctx: &Ctx<'js>, args: &[HostValue]) -> rquickjs::Result<Vec<Value<'js>>> {
    args.iter().map(|arg| to_script(ctx, arg)).collect()
}

/// Release a hook's return value.
pub fn discard(value: Value<'_>) {
    drop(value);
}

fn to_script<'js>(ctx: &Ctx<'js>, value: &HostValue) -> rquickjs::Result<Value<'js>> {
    match value {
        HostValue::Text(text) => text.as_str().into_js(ctx),
        HostValue::Opaque(json) => json_to_script(ctx, json),
    }
}

fn json_to_script<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    use serde_json::Value as Json;

    match json {
        Json::Null => Ok(Value::new_null(ctx.clone())),
        Json::Bool(flag) => Ok(Value::new_bool(ctx.clone(), *flag)),
        Json::Number(number) => match number.as_i64().and_then(|n| i32::try_from(n).ok()) {
            Some(int) => Ok(Value::new_int(ctx.clone(), int)),
            None => Ok(Value::new_float(ctx.clone(), number.as_f64().unwrap_or(f64::NAN))),
        },
        Json::String(text) => text.as_str().into_js(ctx),
        Json::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, json_to_script(ctx, item)?)?;
            }
            array.into_js(ctx)
        }
        Json::Object(fields) => {
            let object = Object::new(ctx.clone())?;
            for (key, field) in fields {
                object.set(key.as_str(), json_to_script(ctx, field)?)?;
            }
            object.into_js(ctx)
        }
    }
}
