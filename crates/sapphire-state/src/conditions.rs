//! Condition parsing for segment and clue keys.
//!
//! Syntax: `base_key?cond1,cond2,...` where each condition is `key op value`
//! with `op` in `>=`, `<=`, `!=`, `>`, `<`, `=` — or a bare key meaning
//! `key = true`. All conditions AND together. The pseudo-variable
//! `scene_turns` resolves through a dedicated getter.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub key: String,
    pub op: Op,
    pub expected: Value,
}

/// Split a segment key into its base key and conditions.
pub fn parse_segment_key(key: &str) -> (String, Vec<Condition>) {
    let Some((base, cond_str)) = key.split_once('?') else {
        return (key.to_string(), Vec::new());
    };

    let mut conditions = Vec::new();
    for raw in cond_str.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        // Multi-char operators first so ">=" is not parsed as ">".
        let parsed = [
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("!=", Op::Ne),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Eq),
        ]
        .iter()
        .find_map(|(symbol, op)| {
            raw.split_once(symbol).map(|(k, v)| Condition {
                key: k.trim().to_string(),
                op: op.clone(),
                expected: parse_value(v.trim()),
            })
        });

        conditions.push(parsed.unwrap_or(Condition {
            // Boolean shorthand: "alive" means alive = true.
            key: raw.to_string(),
            op: Op::Eq,
            expected: Value::Bool(true),
        }));
    }

    (base.to_string(), conditions)
}

fn parse_value(v: &str) -> Value {
    match v.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = v.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = v.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(v.to_string())
}

/// True when every condition holds against the current state.
pub fn match_conditions(
    conditions: &[Condition],
    state_getter: &dyn Fn(&str) -> Option<Value>,
    scene_turns: u64,
) -> bool {
    conditions.iter().all(|cond| {
        let actual = if cond.key == "scene_turns" {
            Value::from(scene_turns)
        } else {
            state_getter(&cond.key).unwrap_or(Value::Null)
        };
        compare(&actual, &cond.op, &cond.expected)
    })
}

fn compare(actual: &Value, op: &Op, expected: &Value) -> bool {
    match op {
        Op::Eq => actual == expected,
        Op::Ne => actual != expected,
        // Ordering comparisons only apply to numbers.
        _ => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(e)) => match op {
                Op::Gt => a > e,
                Op::Lt => a < e,
                Op::Ge => a >= e,
                Op::Le => a <= e,
                _ => unreachable!(),
            },
            _ => false,
        },
    }
}

/// Highest `scene_turns >=`/`>` threshold in the conditions, used to stack
/// matching variants in ascending reveal order.
pub fn scene_turns_priority(conditions: &[Condition]) -> i64 {
    conditions
        .iter()
        .filter(|c| c.key == "scene_turns" && matches!(c.op, Op::Ge | Op::Gt))
        .filter_map(|c| c.expected.as_i64())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_key_has_no_conditions() {
        let (base, conds) = parse_segment_key("3");
        assert_eq!(base, "3");
        assert!(conds.is_empty());
    }

    #[test]
    fn parses_operators_and_types() {
        let (base, conds) = parse_segment_key("3?mood=happy,trust>=30,alive");
        assert_eq!(base, "3");
        assert_eq!(conds.len(), 3);
        assert_eq!(conds[0].expected, json!("happy"));
        assert_eq!(conds[1].op, Op::Ge);
        assert_eq!(conds[1].expected, json!(30));
        assert_eq!(conds[2].expected, json!(true));
    }

    #[test]
    fn conditions_and_together() {
        let (_, conds) = parse_segment_key("1?health>50,alive");
        let getter = |k: &str| match k {
            "health" => Some(json!(80)),
            "alive" => Some(json!(true)),
            _ => None,
        };
        assert!(match_conditions(&conds, &getter, 0));

        let getter_dead = |k: &str| match k {
            "health" => Some(json!(80)),
            "alive" => Some(json!(false)),
            _ => None,
        };
        assert!(!match_conditions(&conds, &getter_dead, 0));
    }

    #[test]
    fn scene_turns_pseudo_variable() {
        let (_, conds) = parse_segment_key("2?scene_turns>=3");
        let getter = |_: &str| None;
        assert!(!match_conditions(&conds, &getter, 2));
        assert!(match_conditions(&conds, &getter, 3));
    }

    #[test]
    fn missing_key_fails_ordering_comparison() {
        let (_, conds) = parse_segment_key("1?power>5");
        assert!(!match_conditions(&conds, &|_| None, 0));
    }
}
