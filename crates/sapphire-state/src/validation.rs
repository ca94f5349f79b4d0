//! Constraint validation, type inference, and blocker checking.

use serde_json::Value;

/// Keys starting with `_` are system-managed; the AI may not write them.
pub fn is_system_key(key: &str) -> bool {
    key.starts_with('_')
}

/// Infer the schema type tag from a JSON value.
pub fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        _ => "string",
    }
}

/// Validate a value against the key's constraint object.
///
/// Checked in order: min/max bounds, adjacency, options, blockers.
/// `state_getter` resolves other keys' current values for blocker rules.
pub fn validate_value(
    key: &str,
    value: &Value,
    constraints: Option<&Value>,
    state_getter: &dyn Fn(&str) -> Option<Value>,
) -> std::result::Result<(), String> {
    let Some(constraints) = constraints else {
        return Ok(());
    };

    if let (Some(min), Some(v)) = (num(constraints.get("min")), value.as_f64()) {
        if v < min {
            return Err(format!("{key} must be >= {min}"));
        }
    }
    if let (Some(max), Some(v)) = (num(constraints.get("max")), value.as_f64()) {
        if v > max {
            return Err(format!("{key} must be <= {max}"));
        }
    }

    // Adjacency: new value must be within ±N of the current value.
    if let (Some(step), Some(v)) = (num(constraints.get("adjacent")), value.as_f64()) {
        if let Some(current) = state_getter(key).and_then(|c| c.as_f64()) {
            if (v - current).abs() > step {
                return Err(format!(
                    "Can only move ±{step} at a time (current: {current}, attempted: {v})"
                ));
            }
        }
    }

    if let Some(options) = constraints.get("options").and_then(|o| o.as_array()) {
        if !options.contains(value) {
            let rendered: Vec<String> = options.iter().map(render).collect();
            return Err(format!("{key} must be one of: {}", rendered.join(", ")));
        }
    }

    if let Some(blockers) = constraints.get("blockers").and_then(|b| b.as_array()) {
        check_blockers(key, value, blockers, state_getter)?;
    }

    Ok(())
}

/// Blocker rules gate specific transitions: `target` narrows which attempted
/// values the rule guards, `from` narrows which origins it applies to, and
/// `requires` lists key→value conditions that must all hold for the write to
/// pass.
fn check_blockers(
    key: &str,
    value: &Value,
    blockers: &[Value],
    state_getter: &dyn Fn(&str) -> Option<Value>,
) -> std::result::Result<(), String> {
    for blocker in blockers {
        if let Some(target) = blocker.get("target") {
            if !value_matches(value, target) {
                continue;
            }
        }
        if let Some(from) = blocker.get("from") {
            let current = state_getter(key).unwrap_or(Value::Null);
            if !value_matches(&current, from) {
                continue;
            }
        }

        if let Some(requires) = blocker.get("requires").and_then(|r| r.as_object()) {
            for (req_key, req_value) in requires {
                let actual = state_getter(req_key).unwrap_or(Value::Null);
                if &actual != req_value {
                    let message = blocker
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(String::from)
                        .unwrap_or_else(|| {
                            format!(
                                "Cannot set {key} to {}: requires {req_key}={}",
                                render(value),
                                render(req_value)
                            )
                        });
                    return Err(message);
                }
            }
        }
    }
    Ok(())
}

/// Clamp a numeric value into the min/max bounds, reporting whether it moved.
pub fn clamp_to_bounds(value: f64, constraints: Option<&Value>) -> (f64, bool) {
    let Some(constraints) = constraints else {
        return (value, false);
    };
    let mut clamped = value;
    if let Some(min) = num(constraints.get("min")) {
        if clamped < min {
            clamped = min;
        }
    }
    if let Some(max) = num(constraints.get("max")) {
        if clamped > max {
            clamped = max;
        }
    }
    (clamped, clamped != value)
}

/// `target`/`from` accept a single value or a list of values.
fn value_matches(value: &Value, spec: &Value) -> bool {
    match spec {
        Value::Array(items) => items.contains(value),
        single => value == single,
    }
}

fn num(v: Option<&Value>) -> Option<f64> {
    v.and_then(|v| v.as_f64())
}

pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_state(_: &str) -> Option<Value> {
        None
    }

    #[test]
    fn bounds_are_inclusive() {
        let constraints = json!({"min": 0, "max": 10});
        assert!(validate_value("hp", &json!(0), Some(&constraints), &no_state).is_ok());
        assert!(validate_value("hp", &json!(10), Some(&constraints), &no_state).is_ok());
        assert!(validate_value("hp", &json!(11), Some(&constraints), &no_state).is_err());
        assert!(validate_value("hp", &json!(-1), Some(&constraints), &no_state).is_err());
    }

    #[test]
    fn adjacency_limits_step_size() {
        let constraints = json!({"adjacent": 1});
        let getter = |k: &str| (k == "scene").then(|| json!(2));
        assert!(validate_value("scene", &json!(3), Some(&constraints), &getter).is_ok());
        assert!(validate_value("scene", &json!(5), Some(&constraints), &getter).is_err());
    }

    #[test]
    fn options_reject_unlisted_values() {
        let constraints = json!({"options": ["a", "b"]});
        assert!(validate_value("choice", &json!("a"), Some(&constraints), &no_state).is_ok());
        let err = validate_value("choice", &json!("c"), Some(&constraints), &no_state)
            .unwrap_err();
        assert!(err.contains("one of"));
    }

    #[test]
    fn blocker_message_surfaces() {
        let constraints = json!({"blockers": [{
            "target": [3, 4],
            "requires": {"door_open": true},
            "message": "The vault is sealed."
        }]});
        let getter = |k: &str| (k == "door_open").then(|| json!(false));
        // Guarded transition fails with the blocker's message.
        let err =
            validate_value("scene", &json!(3), Some(&constraints), &getter).unwrap_err();
        assert_eq!(err, "The vault is sealed.");
        // Unguarded value passes.
        assert!(validate_value("scene", &json!(2), Some(&constraints), &getter).is_ok());
    }

    #[test]
    fn clamp_reports_movement() {
        let constraints = json!({"min": 0, "max": 5});
        assert_eq!(clamp_to_bounds(7.0, Some(&constraints)), (5.0, true));
        assert_eq!(clamp_to_bounds(3.0, Some(&constraints)), (3.0, false));
    }

    #[test]
    fn type_inference() {
        assert_eq!(infer_type(&json!(true)), "boolean");
        assert_eq!(infer_type(&json!(3)), "integer");
        assert_eq!(infer_type(&json!(3.5)), "number");
        assert_eq!(infer_type(&json!([1])), "array");
        assert_eq!(infer_type(&json!({"a": 1})), "object");
        assert_eq!(infer_type(&json!("x")), "string");
    }
}
