//! The two validation passes.
//!
//! Each pass only appends issues and reads the graph; neither depends on
//! the other's output.

use super::graph::ControlStructureGraph;
use super::report::{category, ValidationIssue};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Every edge, boundary member, process model, and context must reference
/// declared components.
pub fn referential_integrity(graph: &ControlStructureGraph, issues: &mut Vec<ValidationIssue>) {
    let nodes: HashSet<&str> = graph.node_ids().collect();
    let controllers: HashSet<&str> = graph.controllers.iter().map(|c| c.id.as_str()).collect();
    let processes: HashSet<&str> = graph
        .controlled_processes
        .iter()
        .map(|p| p.id.as_str())
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    for id in graph.node_ids() {
        if !seen.insert(id) {
            issues.push(
                ValidationIssue::warning(
                    category::CONTROL_STRUCTURE,
                    format!("Component id '{}' is declared more than once", id),
                )
                .component(id),
            );
        }
    }

    for action in &graph.control_actions {
        let action_id = action.identifier();
        for (end, id) in [("source", &action.source), ("target", &action.target)] {
            if !nodes.contains(id.as_str()) {
                issues.push(
                    ValidationIssue::error(
                        category::CONTROL_STRUCTURE,
                        format!(
                            "Control action '{}' references unknown {} '{}'",
                            action_id, end, id
                        ),
                    )
                    .component(action_id.clone())
                    .details(json!({ "reference": end, "missing_id": id })),
                );
            }
        }
    }

    for feedback in &graph.feedback_mechanisms {
        let feedback_id = feedback.identifier();
        for (end, id) in [("source", &feedback.source), ("target", &feedback.target)] {
            if !nodes.contains(id.as_str()) {
                issues.push(
                    ValidationIssue::error(
                        category::FEEDBACK,
                        format!(
                            "Feedback mechanism '{}' references unknown {} '{}'",
                            feedback_id, end, id
                        ),
                    )
                    .component(feedback_id.clone())
                    .details(json!({ "reference": end, "missing_id": id })),
                );
            }
        }
    }

    // Undersized boundaries are reported once by the structural pass.
    for boundary in graph.trust_boundaries.iter().filter(|b| member_count(b) >= 2) {
        for member in &boundary.members {
            if !nodes.contains(member.as_str()) {
                issues.push(
                    ValidationIssue::error(
                        category::TRUST_BOUNDARIES,
                        format!(
                            "Trust boundary '{}' includes unknown component '{}'",
                            boundary.id, member
                        ),
                    )
                    .component(boundary.id.clone())
                    .details(json!({ "missing_id": member })),
                );
            }
        }
    }

    for model in &graph.process_models {
        let model_id = model
            .id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", model.controller_id, model.process_id));
        if !controllers.contains(model.controller_id.as_str()) {
            issues.push(
                ValidationIssue::error(
                    category::CONTROL_STRUCTURE,
                    format!(
                        "Process model '{}' references unknown controller '{}'",
                        model_id, model.controller_id
                    ),
                )
                .component(model_id.clone()),
            );
        }
        if !processes.contains(model.process_id.as_str()) {
            issues.push(
                ValidationIssue::error(
                    category::CONTROL_STRUCTURE,
                    format!(
                        "Process model '{}' references unknown process '{}'",
                        model_id, model.process_id
                    ),
                )
                .component(model_id.clone()),
            );
        }
    }

    let action_ids: HashSet<String> = graph
        .control_actions
        .iter()
        .map(|a| a.identifier())
        .collect();
    for context in &graph.contexts {
        let context_id = context
            .id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", context.controller_id, context.action_id));
        if !controllers.contains(context.controller_id.as_str()) {
            issues.push(
                ValidationIssue::error(
                    category::CONTROL_STRUCTURE,
                    format!(
                        "Context '{}' references unknown controller '{}'",
                        context_id, context.controller_id
                    ),
                )
                .component(context_id.clone()),
            );
        }
        if !action_ids.contains(&context.action_id) {
            issues.push(
                ValidationIssue::error(
                    category::CONTROL_STRUCTURE,
                    format!(
                        "Context '{}' references unknown control action '{}'",
                        context_id, context.action_id
                    ),
                )
                .component(context_id.clone()),
            );
        }
    }
}

/// Orphans, missing feedback loops, and malformed trust boundaries.
pub fn structural_completeness(graph: &ControlStructureGraph, issues: &mut Vec<ValidationIssue>) {
    let mut outgoing: HashMap<&str, usize> = HashMap::new();
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    let mut action_pairs: HashSet<(&str, &str)> = HashSet::new();
    for action in &graph.control_actions {
        *outgoing.entry(action.source.as_str()).or_default() += 1;
        *incoming.entry(action.target.as_str()).or_default() += 1;
        action_pairs.insert((action.source.as_str(), action.target.as_str()));
    }
    let feedback_pairs: HashSet<(&str, &str)> = graph
        .feedback_mechanisms
        .iter()
        .map(|f| (f.source.as_str(), f.target.as_str()))
        .collect();

    for controller in &graph.controllers {
        if !outgoing.contains_key(controller.id.as_str()) {
            issues.push(
                ValidationIssue::warning(
                    category::CONNECTIVITY,
                    format!(
                        "Orphan controller '{}' issues no control actions",
                        controller.id
                    ),
                )
                .component(controller.id.clone()),
            );
        }
    }

    for process in &graph.controlled_processes {
        if !incoming.contains_key(process.id.as_str()) {
            issues.push(
                ValidationIssue::warning(
                    category::CONNECTIVITY,
                    format!(
                        "Controlled process '{}' receives no control actions",
                        process.id
                    ),
                )
                .component(process.id.clone()),
            );
        }
    }

    for action in &graph.control_actions {
        if action.is_emergency() {
            continue;
        }
        if !feedback_pairs.contains(&(action.target.as_str(), action.source.as_str())) {
            let action_id = action.identifier();
            issues.push(
                ValidationIssue::warning(
                    category::FEEDBACK,
                    format!(
                        "Missing feedback for closed-loop control: '{}' has no feedback from '{}' to '{}'",
                        action_id, action.target, action.source
                    ),
                )
                .component(action_id),
            );
        }
    }

    for feedback in &graph.feedback_mechanisms {
        if !action_pairs.contains(&(feedback.target.as_str(), feedback.source.as_str())) {
            let feedback_id = feedback.identifier();
            issues.push(
                ValidationIssue::info(
                    category::FEEDBACK,
                    format!(
                        "Feedback '{}' has no matching control action from '{}' to '{}'",
                        feedback_id, feedback.target, feedback.source
                    ),
                )
                .component(feedback_id),
            );
        }
    }

    // BTreeMap keeps the output order stable.
    let mut memberships: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for boundary in &graph.trust_boundaries {
        let count = member_count(boundary);
        if count < 2 {
            issues.push(
                ValidationIssue::error(
                    category::TRUST_BOUNDARIES,
                    format!(
                        "Trust boundary '{}' has {} member(s); at least 2 are required",
                        boundary.id, count
                    ),
                )
                .component(boundary.id.clone())
                .details(json!({ "members": boundary.members })),
            );
        }

        let unique: HashSet<&str> = boundary.members.iter().map(String::as_str).collect();
        for member in unique {
            memberships
                .entry(member)
                .or_default()
                .push(boundary.id.as_str());
        }
    }

    for (member, boundaries) in memberships {
        if boundaries.len() > 1 {
            issues.push(
                ValidationIssue::info(
                    category::TRUST_BOUNDARIES,
                    format!(
                        "Component '{}' appears in {} trust boundaries",
                        member,
                        boundaries.len()
                    ),
                )
                .component(member)
                .details(json!({ "boundaries": boundaries })),
            );
        }
    }
}

fn member_count(boundary: &super::graph::TrustBoundary) -> usize {
    boundary
        .members
        .iter()
        .map(String::as_str)
        .collect::<HashSet<_>>()
        .len()
}
