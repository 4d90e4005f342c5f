// Minimal JSON Schema (draft-2020-12 subset) validator.
//
// Covers the constructs the tool catalog's own input schemas and the
// `validate_implementation_spec` / `/validate-output` surfaces need: type,
// required, properties, enum, items, minimum/maximum. Not a general-purpose
// validator — no `$ref`, no `allOf`/`oneOf`, no format keywords.

use serde_json::Value;

/// Validate `instance` against `schema`, returning one message per
/// violation (empty means valid).
pub fn validate(schema: &Value, instance: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at("$", schema, instance, &mut errors);
    errors
}

fn validate_at(path: &str, schema: &Value, instance: &Value, errors: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(expected, instance) {
            errors.push(format!("{path}: expected type {expected}, got {}", type_name(instance)));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(instance) {
            errors.push(format!("{path}: value not in enum"));
        }
    }

    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if let Some(n) = instance.as_f64() {
            if n < min {
                errors.push(format!("{path}: {n} is below minimum {min}"));
            }
        }
    }

    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if let Some(n) = instance.as_f64() {
            if n > max {
                errors.push(format!("{path}: {n} is above maximum {max}"));
            }
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(obj) = instance.as_object() {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    errors.push(format!("{path}: missing required property '{key}'"));
                }
            }
        }
    }

    if let (Some(properties), Some(obj)) = (schema.get("properties").and_then(Value::as_object), instance.as_object()) {
        for (key, sub_schema) in properties {
            if let Some(value) = obj.get(key) {
                validate_at(&format!("{path}.{key}"), sub_schema, value, errors);
            }
        }
    }

    if let (Some(items_schema), Some(arr)) = (schema.get("items"), instance.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            validate_at(&format!("{path}[{i}]"), items_schema, item, errors);
        }
    }
}

fn matches_type(expected: &str, instance: &Value) -> bool {
    match expected {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "integer" => instance.is_i64() || instance.is_u64(),
        "number" => instance.is_number(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        _ => true,
    }
}

fn type_name(instance: &Value) -> &'static str {
    match instance {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_matching_instance() {
        let schema = json!({
            "type": "object",
            "required": ["term"],
            "properties": { "term": { "type": "string" }, "limit": { "type": "integer", "maximum": 100 } }
        });
        let instance = json!({ "term": "foo", "limit": 10 });
        assert!(validate(&schema, &instance).is_empty());
    }

    #[test]
    fn reports_missing_required_and_wrong_type() {
        let schema = json!({
            "type": "object",
            "required": ["term"],
            "properties": { "term": { "type": "string" } }
        });
        let instance = json!({ "term": 5 });
        let errors = validate(&schema, &instance);
        assert!(errors.iter().any(|e| e.contains("expected type string")));
    }

    #[test]
    fn reports_out_of_range_maximum() {
        let schema = json!({ "type": "integer", "maximum": 100 });
        let errors = validate(&schema, &json!(150));
        assert_eq!(errors.len(), 1);
    }
}
