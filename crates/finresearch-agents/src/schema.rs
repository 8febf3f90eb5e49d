//! Converts a contract's JSON schema into a function-calling tool definition.

use finresearch_models::Contract;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Keywords completion endpoints reject inside function parameters.
const STRIPPED_KEYWORDS: [&str; 2] = ["default", "examples"];

/// Keywords whose value is a single sub-schema.
const SCHEMA_KEYWORDS: [&str; 4] = ["items", "additionalProperties", "not", "contains"];

/// Keywords whose value is a map of name -> sub-schema.
const SCHEMA_MAP_KEYWORDS: [&str; 4] = ["properties", "$defs", "definitions", "patternProperties"];

/// Keywords whose value is an array of sub-schemas.
const SCHEMA_LIST_KEYWORDS: [&str; 4] = ["anyOf", "oneOf", "allOf", "prefixItems"];

/// Function definition offered to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// OpenAI `tools[]` entry.
    pub fn to_tool(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// OpenAI `tool_choice` forcing this function.
    pub fn forced_choice(&self) -> Value {
        json!({"type": "function", "function": {"name": self.name}})
    }
}

/// Build the tool definition for a contract.
pub fn tool_schema<C: Contract>() -> ToolSchema {
    let schema = schemars::schema_for!(C);
    ToolSchema {
        name: C::NAME.to_string(),
        description: C::DESCRIPTION.to_string(),
        parameters: clean_schema(schema.as_value()),
    }
}

/// The contract's raw JSON schema, used by the validator.
pub fn contract_schema<C: Contract>() -> Value {
    schemars::schema_for!(C).as_value().clone()
}

/// Deep-copy `schema` with `default`, `examples` and the root `$schema` removed
/// from every schema position. Property names, types, descriptions and
/// `required` are kept.
pub fn clean_schema(schema: &Value) -> Value {
    let mut cleaned = clean_node(schema);
    if let Value::Object(map) = &mut cleaned {
        map.remove("$schema");
    }
    cleaned
}

fn clean_node(node: &Value) -> Value {
    let Value::Object(map) = node else {
        return node.clone();
    };

    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        let key_str = key.as_str();
        if STRIPPED_KEYWORDS.contains(&key_str) {
            continue;
        }
        let cleaned = if SCHEMA_KEYWORDS.contains(&key_str) {
            match value {
                // Tuple-style `items` is a list of schemas.
                Value::Array(items) => Value::Array(items.iter().map(clean_node).collect()),
                other => clean_node(other),
            }
        } else if SCHEMA_MAP_KEYWORDS.contains(&key_str) {
            match value {
                Value::Object(children) => Value::Object(
                    children
                        .iter()
                        .map(|(name, child)| (name.clone(), clean_node(child)))
                        .collect(),
                ),
                other => other.clone(),
            }
        } else if SCHEMA_LIST_KEYWORDS.contains(&key_str) {
            match value {
                Value::Array(items) => Value::Array(items.iter().map(clean_node).collect()),
                other => other.clone(),
            }
        } else {
            value.clone()
        };
        out.insert(key.clone(), cleaned);
    }
    Value::Object(out)
}
