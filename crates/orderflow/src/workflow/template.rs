use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::GenerationError;

/// A generation backend node graph: `{ "<node id>": { "inputs": {..}, .. } }`.
///
/// Mutations operate on the parsed graph, never on the raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTemplate {
    name: String,
    graph: Value,
}

impl WorkflowTemplate {
    pub fn load(path: &Path) -> Result<Self, GenerationError> {
        if !path.is_file() {
            return Err(GenerationError::WorkflowMissing {
                path: path.to_path_buf(),
            });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let content =
            std::fs::read_to_string(path).map_err(|e| GenerationError::InvalidWorkflow {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        Self::from_json_str(&name, &content)
    }

    pub fn from_json_str(name: &str, content: &str) -> Result<Self, GenerationError> {
        let graph: Value =
            serde_json::from_str(content).map_err(|e| GenerationError::InvalidWorkflow {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if !graph.is_object() {
            return Err(GenerationError::InvalidWorkflow {
                name: name.to_string(),
                reason: "top level must be an object of nodes".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            graph,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Value {
        &self.graph
    }

    /// Replaces the value of every `key`, at any depth, with a fresh value
    /// from `generate`. Returns the values in visiting order.
    pub fn set_all<F>(&mut self, key: &str, mut generate: F) -> Vec<Value>
    where
        F: FnMut() -> Value,
    {
        let mut assigned = Vec::new();
        replace_key(&mut self.graph, key, &mut generate, &mut assigned);
        debug!(workflow = %self.name, "Set {} '{}' values", assigned.len(), key);
        assigned
    }

    /// Sets `graph[node_id].inputs[key]`.
    pub fn set_node_input(
        &mut self,
        node_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), GenerationError> {
        let inputs = self
            .graph
            .get_mut(node_id)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| GenerationError::InvalidWorkflow {
                name: self.name.clone(),
                reason: format!("node '{}' has no inputs object", node_id),
            })?;

        inputs.insert(key.to_string(), value);
        Ok(())
    }

    /// Every value of `key`, at any depth, that is an array made only of strings.
    pub fn collect_string_lists(&self, key: &str) -> Vec<Vec<String>> {
        collect_string_lists(&self.graph, key)
    }

    pub fn to_json(&self) -> Value {
        self.graph.clone()
    }
}

fn replace_key<F>(value: &mut Value, key: &str, generate: &mut F, assigned: &mut Vec<Value>)
where
    F: FnMut() -> Value,
{
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                if k == key {
                    let fresh = generate();
                    assigned.push(fresh.clone());
                    *v = fresh;
                } else {
                    replace_key(v, key, generate, assigned);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_key(item, key, generate, assigned);
            }
        }
        _ => {}
    }
}

/// Same walk as `WorkflowTemplate::collect_string_lists`, for any JSON value
/// such as the task info a backend returns.
pub fn collect_string_lists(value: &Value, key: &str) -> Vec<Vec<String>> {
    let mut found = Vec::new();
    collect_into(value, key, &mut found);
    found
}

fn collect_into(value: &Value, key: &str, found: &mut Vec<Vec<String>>) {
    match value {
        Value::Object(map) => collect_from_map(map, key, found),
        Value::Array(items) => {
            for item in items {
                collect_into(item, key, found);
            }
        }
        _ => {}
    }
}

fn collect_from_map(map: &Map<String, Value>, key: &str, found: &mut Vec<Vec<String>>) {
    for (k, v) in map {
        if k == key {
            if let Some(strings) = as_string_list(v) {
                found.push(strings);
            }
        }
        collect_into(v, key, found);
    }
}

fn as_string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}
