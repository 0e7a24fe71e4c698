//! Control-structure graph assembled from run artifacts.
//!
//! The graph can arrive as a single `control_structure` artifact holding
//! every component list, or as separate per-component artifacts. Both forms
//! are merged. Entries that do not deserialize are skipped and reported as
//! assembly problems instead of failing the whole graph.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Artifact key holding a complete control structure.
pub const CONTROL_STRUCTURE_KEY: &str = "control_structure";

/// Per-component artifact keys, merged into the graph when present.
pub const COMPONENT_KEYS: &[&str] = &[
    "controllers",
    "controlled_processes",
    "control_actions",
    "feedback_mechanisms",
    "trust_boundaries",
    "process_models",
    "contexts",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlledProcess {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Directed edge from a controller to what it controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "controller_id", alias = "from")]
    pub source: String,
    #[serde(alias = "process_id", alias = "to")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ControlAction {
    /// Explicit id, or `source->target` when none was assigned.
    pub fn identifier(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.source, self.target))
    }

    /// Emergency actions are exempt from the closed-loop feedback check.
    pub fn is_emergency(&self) -> bool {
        let emergency = |s: &str| s.eq_ignore_ascii_case("emergency");
        self.kind.as_deref().is_some_and(emergency) || self.tags.iter().any(|t| emergency(t))
    }
}

/// Directed edge carrying feedback back toward a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMechanism {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl FeedbackMechanism {
    pub fn identifier(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.source, self.target))
    }
}

/// Undirected grouping of components sharing a trust level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustBoundary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "components")]
    pub members: Vec<String>,
}

/// A controller's belief about a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "controller")]
    pub controller_id: String,
    #[serde(alias = "process")]
    pub process_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

/// Conditions under which a controller issues an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "controller")]
    pub controller_id: String,
    #[serde(alias = "action", alias = "control_action_id")]
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

/// A snapshot of the control structure for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlStructureGraph {
    #[serde(default)]
    pub controllers: Vec<Controller>,
    #[serde(default, alias = "processes")]
    pub controlled_processes: Vec<ControlledProcess>,
    #[serde(default)]
    pub control_actions: Vec<ControlAction>,
    #[serde(default, alias = "feedback")]
    pub feedback_mechanisms: Vec<FeedbackMechanism>,
    #[serde(default)]
    pub trust_boundaries: Vec<TrustBoundary>,
    #[serde(default)]
    pub process_models: Vec<ProcessModel>,
    #[serde(default)]
    pub contexts: Vec<ActionContext>,
}

/// Result of assembling a graph from loosely-typed artifacts.
#[derive(Debug, Clone, Default)]
pub struct GraphAssembly {
    pub graph: ControlStructureGraph,
    /// Entries that were skipped, with the reason.
    pub problems: Vec<String>,
}

impl ControlStructureGraph {
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
            && self.controlled_processes.is_empty()
            && self.control_actions.is_empty()
            && self.feedback_mechanisms.is_empty()
            && self.trust_boundaries.is_empty()
            && self.process_models.is_empty()
            && self.contexts.is_empty()
    }

    /// Declared node identifiers (controllers and controlled processes).
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.controllers
            .iter()
            .map(|c| c.id.as_str())
            .chain(self.controlled_processes.iter().map(|p| p.id.as_str()))
    }

    /// Assemble a graph from a run's artifacts.
    pub fn from_artifacts(artifacts: &HashMap<String, Value>) -> GraphAssembly {
        let mut assembly = GraphAssembly::default();

        if let Some(whole) = artifacts.get(CONTROL_STRUCTURE_KEY) {
            match whole {
                Value::Object(map) => {
                    for key in COMPONENT_KEYS {
                        let alias = match *key {
                            "controlled_processes" => Some("processes"),
                            "feedback_mechanisms" => Some("feedback"),
                            _ => None,
                        };
                        let value = map.get(*key).or_else(|| alias.and_then(|a| map.get(a)));
                        if let Some(value) = value {
                            assembly.merge_component(key, value);
                        }
                    }
                }
                _ => assembly
                    .problems
                    .push(format!("'{}' artifact is not an object", CONTROL_STRUCTURE_KEY)),
            }
        }

        for key in COMPONENT_KEYS {
            if let Some(value) = artifacts.get(*key) {
                assembly.merge_component(key, value);
            }
        }

        assembly
    }

    /// Whether the artifacts contain any control-structure data.
    pub fn present_in(artifacts: &HashMap<String, Value>) -> bool {
        artifacts.contains_key(CONTROL_STRUCTURE_KEY)
            || COMPONENT_KEYS.iter().any(|k| artifacts.contains_key(*k))
    }
}

impl GraphAssembly {
    fn merge_component(&mut self, key: &str, value: &Value) {
        let graph = &mut self.graph;
        let problems = &mut self.problems;
        match key {
            "controllers" => extend(&mut graph.controllers, key, value, problems),
            "controlled_processes" => {
                extend(&mut graph.controlled_processes, key, value, problems)
            }
            "control_actions" => extend(&mut graph.control_actions, key, value, problems),
            "feedback_mechanisms" => {
                extend(&mut graph.feedback_mechanisms, key, value, problems)
            }
            "trust_boundaries" => extend(&mut graph.trust_boundaries, key, value, problems),
            "process_models" => extend(&mut graph.process_models, key, value, problems),
            "contexts" => extend(&mut graph.contexts, key, value, problems),
            _ => {}
        }
    }
}

fn extend<T: DeserializeOwned>(
    target: &mut Vec<T>,
    key: &str,
    value: &Value,
    problems: &mut Vec<String>,
) {
    let Value::Array(items) = value else {
        problems.push(format!("'{}' is not a list", key));
        return;
    };

    for (index, item) in items.iter().enumerate() {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(parsed) => target.push(parsed),
            Err(e) => problems.push(format!("{}[{}] skipped: {}", key, index, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assemble_from_single_artifact() {
        let mut artifacts = HashMap::new();
        artifacts.insert(
            CONTROL_STRUCTURE_KEY.to_string(),
            json!({
                "controllers": [{"id": "CTRL-1"}],
                "processes": [{"id": "PROC-1"}],
                "control_actions": [{"from": "CTRL-1", "to": "PROC-1", "kind": "Emergency"}],
                "feedback": [{"source": "PROC-1", "target": "CTRL-1"}]
            }),
        );

        let assembly = ControlStructureGraph::from_artifacts(&artifacts);
        assert!(assembly.problems.is_empty());
        let graph = assembly.graph;
        assert_eq!(graph.controllers.len(), 1);
        assert_eq!(graph.controlled_processes.len(), 1);
        assert_eq!(graph.feedback_mechanisms.len(), 1);
        assert!(graph.control_actions[0].is_emergency());
        assert_eq!(graph.control_actions[0].identifier(), "CTRL-1->PROC-1");
        assert_eq!(graph.node_ids().count(), 2);
    }

    #[test]
    fn test_assemble_merges_component_keys_and_skips_bad_entries() {
        let mut artifacts = HashMap::new();
        artifacts.insert(
            CONTROL_STRUCTURE_KEY.to_string(),
            json!({"controllers": [{"id": "A"}]}),
        );
        artifacts.insert("controllers".to_string(), json!([{"id": "B"}, {"name": "no id"}]));
        artifacts.insert("trust_boundaries".to_string(), json!("not a list"));

        let assembly = ControlStructureGraph::from_artifacts(&artifacts);
        let ids: Vec<&str> = assembly.graph.controllers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(assembly.problems.len(), 2);
    }

    #[test]
    fn test_presence_detection() {
        let mut artifacts = HashMap::new();
        assert!(!ControlStructureGraph::present_in(&artifacts));
        artifacts.insert("control_actions".to_string(), json!([]));
        assert!(ControlStructureGraph::present_in(&artifacts));
        assert!(ControlStructureGraph::from_artifacts(&artifacts).graph.is_empty());
    }
}
