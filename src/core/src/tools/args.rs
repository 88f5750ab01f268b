use serde_json::{json, Map, Number, Value};

use crate::rpc::ToolError;

/// Lenient view over `tools/call` arguments.
///
/// Accepts an object, or a string holding a JSON object. Scalars sent as
/// strings (`"true"`, `"12"`) are coerced.
pub(super) struct ToolArgs {
    map: Map<String, Value>,
}

impl ToolArgs {
    pub(super) fn new(args: Value) -> Result<Self, ToolError> {
        match args {
            Value::Object(map) => Ok(Self { map }),
            Value::Null => Ok(Self { map: Map::new() }),
            Value::String(raw) if raw.trim().is_empty() => Ok(Self { map: Map::new() }),
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Ok(Self { map }),
                _ => Err(ToolError::invalid_params("arguments must be a JSON object")),
            },
            _ => Err(ToolError::invalid_params("arguments must be a JSON object")),
        }
    }

    pub(super) fn get_string(&self, key: &str) -> Result<Option<String>, ToolError> {
        let Some(value) = self.map.get(key) else {
            return Ok(None);
        };

        match value {
            Value::Null => Ok(None),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => Ok(Some(text.trim().to_string())),
            Value::Number(number) => Ok(Some(number.to_string())),
            _ => Err(invalid(key, format!("{key} must be a string"))),
        }
    }

    /// First present key wins. Used for camelCase / snake_case aliases.
    pub(super) fn get_string_any(&self, keys: &[&str]) -> Result<Option<String>, ToolError> {
        for key in keys {
            if let Some(value) = self.get_string(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    pub(super) fn require_string_any(&self, keys: &[&str]) -> Result<String, ToolError> {
        let primary = keys.first().copied().unwrap_or("value");
        self.get_string_any(keys)?
            .ok_or_else(|| invalid(primary, format!("{primary} is required")))
    }

    pub(super) fn get_bool(&self, key: &str) -> Result<Option<bool>, ToolError> {
        let Some(value) = self.map.get(key) else {
            return Ok(None);
        };

        parse_bool(value)
            .map(Some)
            .ok_or_else(|| invalid(key, format!("{key} must be a boolean")))
    }

    pub(super) fn get_usize(&self, key: &str) -> Result<Option<usize>, ToolError> {
        let Some(value) = self.map.get(key) else {
            return Ok(None);
        };

        parse_u64(value)
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(key, format!("{key} must be a non-negative integer")))
    }
}

fn invalid(field: &str, message: String) -> ToolError {
    ToolError::InvalidParams {
        message,
        details: Some(json!({ "field": field })),
    }
}

fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number_as_u64(number),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn number_as_u64(number: &Number) -> Option<u64> {
    number
        .as_u64()
        .or_else(|| number.as_f64().filter(|v| *v >= 0.0 && v.fract() == 0.0).map(|v| v as u64))
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_object_in_string_payload() {
        let args = ToolArgs::new(json!("{\"limit\":\"42\"}")).unwrap();
        assert_eq!(args.get_usize("limit").unwrap(), Some(42));
    }

    #[test]
    fn reads_aliases_and_coerces_scalars() {
        let args = ToolArgs::new(json!({
            "conversation_id": "c1",
            "includeText": "true",
        }))
        .unwrap();
        assert_eq!(
            args.require_string_any(&["conversationId", "conversation_id"]).unwrap(),
            "c1"
        );
        assert_eq!(args.get_bool("includeText").unwrap(), Some(true));
    }

    #[test]
    fn missing_required_field_names_it() {
        let args = ToolArgs::new(json!({ "conversationId": "  " })).unwrap();
        let err = args.require_string_any(&["conversationId"]).unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidParams {
                message: "conversationId is required".into(),
                details: Some(json!({ "field": "conversationId" })),
            }
        );
    }

    #[test]
    fn rejects_non_object_arguments() {
        assert!(ToolArgs::new(json!([1, 2])).is_err());
        assert!(ToolArgs::new(json!("plain words")).is_err());
    }
}
