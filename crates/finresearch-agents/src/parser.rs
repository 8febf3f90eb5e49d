use finresearch_models::Contract;
use serde_json::Value;

use crate::error::{AgentError, FieldIssue};
use crate::schema::contract_schema;

/// Which decoding strategy recovered the structured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole trimmed reply parsed.
    WholeText,
    /// The first fenced code block parsed.
    FencedBlock,
    /// A brace-delimited span inside the reply parsed.
    BraceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub strategy: Strategy,
}

/// Recover a JSON value from a model reply that may contain surrounding text.
///
/// Handles common reply formats:
/// - Clean JSON: `{"key": "value"}` or a top-level array
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the analysis:\n{"key": "value"}`
///
/// On failure the original text is returned verbatim in `DecodeExhausted`.
pub fn decode(text: &str) -> Result<Decoded, AgentError> {
    let trimmed = text.trim();

    if let Some(value) = parse_structured(trimmed) {
        return Ok(Decoded {
            value,
            strategy: Strategy::WholeText,
        });
    }

    if let Some(block) = extract_fenced_block(trimmed) {
        if let Some(value) = parse_structured(block) {
            return Ok(Decoded {
                value,
                strategy: Strategy::FencedBlock,
            });
        }
    }

    let span = extract_greedy_span(trimmed)
        .and_then(parse_structured)
        .or_else(|| extract_first_object(trimmed).and_then(parse_structured));
    if let Some(value) = span {
        return Ok(Decoded {
            value,
            strategy: Strategy::BraceSpan,
        });
    }

    Err(AgentError::DecodeExhausted {
        raw: text.to_string(),
    })
}

fn parse_structured(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// Body of the first ``` block, with any language tag skipped.
fn extract_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// First `{` through last `}`.
fn extract_greedy_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Find the first balanced { ... } in the text.
fn extract_first_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' if start.is_some() => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Validation outcome when a value does not satisfy its contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub issues: Vec<FieldIssue>,
    /// The input with absent array fields filled, for salvage.
    pub normalized: Value,
}

/// Validate a decoded value against contract `C` and deserialize it.
pub fn validate<C: Contract>(value: &Value) -> Result<C, ValidationFailure> {
    let schema = contract_schema::<C>();
    let mut issues = Vec::new();
    let normalized = check(&schema, &schema, value, "", &mut issues);
    if !issues.is_empty() {
        return Err(ValidationFailure { issues, normalized });
    }

    serde_json::from_value::<C>(normalized.clone()).map_err(|e| ValidationFailure {
        issues: vec![FieldIssue::new("", e.to_string())],
        normalized,
    })
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn resolve<'a>(node: &'a Value, root: &'a Value) -> &'a Value {
    let Some(reference) = node.get("$ref").and_then(|r| r.as_str()) else {
        return node;
    };
    let target = reference
        .strip_prefix("#/$defs/")
        .map(|name| root.get("$defs").and_then(|d| d.get(name)))
        .or_else(|| {
            reference
                .strip_prefix("#/definitions/")
                .map(|name| root.get("definitions").and_then(|d| d.get(name)))
        })
        .flatten();
    match target {
        Some(resolved) => resolve(resolved, root),
        None => node,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "number" => value.is_number(),
        other => other == kind(value),
    }
}

fn declared_types(node: &Value) -> Vec<&str> {
    match node.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(|t| t.as_str()).collect(),
        _ => vec![],
    }
}

fn is_array_schema(node: &Value, root: &Value) -> bool {
    declared_types(resolve(node, root)).contains(&"array")
}

/// Walk `value` against `node`, pushing issues and returning the normalized value.
fn check(
    node: &Value,
    root: &Value,
    value: &Value,
    path: &str,
    issues: &mut Vec<FieldIssue>,
) -> Value {
    let node = resolve(node, root);

    for keyword in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = node.get(keyword) {
            let mut first_failure = None;
            for branch in branches {
                let mut branch_issues = Vec::new();
                let normalized = check(branch, root, value, path, &mut branch_issues);
                if branch_issues.is_empty() {
                    return normalized;
                }
                first_failure.get_or_insert(branch_issues);
            }
            issues.extend(first_failure.unwrap_or_else(|| {
                vec![FieldIssue::new(path, "matches no allowed schema")]
            }));
            return value.clone();
        }
    }

    if let Some(Value::Array(allowed)) = node.get("enum") {
        if !allowed.contains(value) {
            issues.push(FieldIssue::new(path, format!("value {value} is not allowed")));
            return value.clone();
        }
    }

    let types = declared_types(node);
    if !types.is_empty() && !types.iter().any(|t| type_matches(t, value)) {
        issues.push(FieldIssue::new(
            path,
            format!("expected {}, found {}", types.join(" or "), kind(value)),
        ));
        return value.clone();
    }

    match value {
        Value::Object(map) => {
            let Some(Value::Object(properties)) = node.get("properties") else {
                return value.clone();
            };
            let required: Vec<&str> = node
                .get("required")
                .and_then(|r| r.as_array())
                .map(|r| r.iter().filter_map(|k| k.as_str()).collect())
                .unwrap_or_default();

            let mut out = map.clone();
            for (key, child) in properties {
                let field_path = child_path(path, key);
                match map.get(key) {
                    Some(field) => {
                        let normalized = check(child, root, field, &field_path, issues);
                        out.insert(key.clone(), normalized);
                    }
                    None if is_array_schema(child, root) => {
                        out.insert(key.clone(), Value::Array(vec![]));
                    }
                    None if required.contains(&key.as_str()) => {
                        issues.push(FieldIssue::new(field_path, "missing required field"));
                    }
                    None => {}
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let Some(item_schema) = node.get("items").filter(|s| s.is_object()) else {
                return value.clone();
            };
            Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        check(item_schema, root, item, &format!("{path}[{i}]"), issues)
                    })
                    .collect(),
            )
        }
        _ => value.clone(),
    }
}
