use crate::registry::CapabilityRegistry;
use crate::task_graph::TaskGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use taskmesh_core::{TaskDefinition, ValidationError};

/// Static checks run on a plan before any task is dispatched.
pub struct PlanValidator;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl PlanValidator {
    /// Structural validation: ids, dependency existence, acyclicity.
    ///
    /// Checks run in that order, so a plan with both a dangling dependency and
    /// a cycle reports the dangling dependency.
    pub fn validate(defs: &[TaskDefinition]) -> Result<(), ValidationError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(defs.len());

        for (i, def) in defs.iter().enumerate() {
            if def.id.trim().is_empty() {
                return Err(ValidationError::InvalidTask {
                    id: def.id.clone(),
                    reason: format!("task at position {i} has an empty id"),
                });
            }
            if def.task_type.trim().is_empty() {
                return Err(ValidationError::InvalidTask {
                    id: def.id.clone(),
                    reason: "task type must not be empty".to_string(),
                });
            }
            if index.insert(def.id.as_str(), i).is_some() {
                return Err(ValidationError::DuplicateTaskId { id: def.id.clone() });
            }
        }

        for def in defs {
            for dep in &def.dependencies {
                if !index.contains_key(dep.as_str()) {
                    return Err(ValidationError::DanglingDependency {
                        task: def.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        if let Some(member) = Self::find_cycle(defs, &index) {
            return Err(ValidationError::CyclicDependency {
                task: defs[member].id.clone(),
            });
        }

        Ok(())
    }

    /// Depth-first search over dependency edges with an in-progress marker.
    ///
    /// Returns the index of a task that lies on a cycle. Iterative, so deep
    /// dependency chains cannot overflow the stack.
    fn find_cycle(defs: &[TaskDefinition], index: &HashMap<&str, usize>) -> Option<usize> {
        let edges: Vec<Vec<usize>> = defs
            .iter()
            .map(|d| {
                d.dependencies
                    .iter()
                    .filter_map(|dep| index.get(dep.as_str()).copied())
                    .collect()
            })
            .collect();

        let mut marks = vec![Mark::Unvisited; defs.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..defs.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::InProgress;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                if next < edges[node].len() {
                    top.1 += 1;
                    let dep = edges[node][next];
                    match marks[dep] {
                        // back edge
                        Mark::InProgress => return Some(dep),
                        Mark::Unvisited => {
                            marks[dep] = Mark::InProgress;
                            stack.push((dep, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }

        None
    }

    /// Advisory capability report against a registry.
    ///
    /// Never blocks execution: a task with no capable agent still fails at
    /// dispatch time with `NoCapableAgent`, which is where it is recorded.
    pub fn check_capabilities(graph: &TaskGraph, registry: &CapabilityRegistry) -> Vec<PlanWarning> {
        let mut warnings = Vec::new();
        let mut unmatched_types: HashSet<&str> = HashSet::new();

        for task in graph.tasks() {
            let capable = registry.capable_agents(&task.task_type);
            if capable.is_empty() {
                if unmatched_types.insert(task.task_type.as_str()) {
                    warnings.push(PlanWarning::NoCapableAgent {
                        task: task.id.clone(),
                        task_type: task.task_type.clone(),
                    });
                }
            } else if registry
                .match_task(&task.task_type, &task.payload, None)
                .candidates
                .is_empty()
            {
                warnings.push(PlanWarning::PayloadRejected {
                    task: task.id.clone(),
                    task_type: task.task_type.clone(),
                });
            }

            if let Some(preferred) = &task.preferred_agent {
                match registry.descriptor(preferred) {
                    None => warnings.push(PlanWarning::UnknownPreferredAgent {
                        task: task.id.clone(),
                        agent: preferred.clone(),
                    }),
                    Some(desc) if !desc.can_handle(&task.task_type) => {
                        warnings.push(PlanWarning::PreferredAgentNotCapable {
                            task: task.id.clone(),
                            agent: preferred.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        warnings
    }
}

/// A non-fatal finding from [`PlanValidator::check_capabilities`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    /// No registered agent declares this task type (reported once per type).
    NoCapableAgent {
        /// First task with this type.
        task: String,
        /// The unmatched type.
        task_type: String,
    },
    /// Capable agents exist but every one of them rejects the payload.
    PayloadRejected {
        /// The task whose payload is rejected.
        task: String,
        /// Its type.
        task_type: String,
    },
    /// The preferred agent is not registered.
    UnknownPreferredAgent {
        /// The hinted task.
        task: String,
        /// The unknown agent id.
        agent: String,
    },
    /// The preferred agent does not declare the task type.
    PreferredAgentNotCapable {
        /// The hinted task.
        task: String,
        /// The incapable agent id.
        agent: String,
    },
}

impl std::fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanWarning::NoCapableAgent { task, task_type } => {
                write!(f, "task '{task}': no agent declares capability '{task_type}'")
            }
            PlanWarning::PayloadRejected { task, task_type } => write!(
                f,
                "task '{task}': every '{task_type}' agent rejects its payload"
            ),
            PlanWarning::UnknownPreferredAgent { task, agent } => {
                write!(f, "task '{task}': preferred agent '{agent}' is not registered")
            }
            PlanWarning::PreferredAgentNotCapable { task, agent } => write!(
                f,
                "task '{task}': preferred agent '{agent}' cannot handle its task type"
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use taskmesh_core::{Agent, AgentDescriptor, TaskRequest, TaskmeshResult};
    use tokio_util::sync::CancellationToken;

    fn def(id: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition::new(id, "echo").with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_accepts_acyclic_graphs() {
        assert!(PlanValidator::validate(&[]).is_ok());
        assert!(PlanValidator::validate(&[def("a", &[])]).is_ok());

        // diamond
        let plan = vec![
            def("a", &[]),
            def("b", &["a"]),
            def("c", &["a"]),
            def("d", &["b", "c"]),
        ];
        assert!(PlanValidator::validate(&plan).is_ok());

        // dependencies may be declared before the task that defines them
        let plan = vec![def("late", &["early"]), def("early", &[])];
        assert!(PlanValidator::validate(&plan).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = PlanValidator::validate(&[def("a", &[]), def("a", &[])]).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateTaskId { id: "a".into() });
    }

    #[test]
    fn test_rejects_dangling_dependency() {
        let err = PlanValidator::validate(&[def("a", &["ghost"])]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DanglingDependency {
                task: "a".into(),
                missing: "ghost".into()
            }
        );
    }

    #[test]
    fn test_rejects_self_dependency_as_cycle() {
        let err = PlanValidator::validate(&[def("a", &["a"])]).unwrap_err();
        assert_eq!(err, ValidationError::CyclicDependency { task: "a".into() });
    }

    #[test]
    fn test_cycle_names_a_member() {
        // x -> a -> b -> c -> a, with an acyclic tail hanging off
        let plan = vec![
            def("x", &["a"]),
            def("a", &["b"]),
            def("b", &["c"]),
            def("c", &["a"]),
            def("free", &[]),
        ];
        match PlanValidator::validate(&plan).unwrap_err() {
            ValidationError::CyclicDependency { task } => {
                assert!(["a", "b", "c"].contains(&task.as_str()), "got {task}");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let mut plan = vec![def("t0", &[])];
        for i in 1..20_000 {
            let prev = format!("t{}", i - 1);
            plan.push(def(&format!("t{i}"), &[prev.as_str()]));
        }
        assert!(PlanValidator::validate(&plan).is_ok());
    }

    #[test]
    fn test_rejects_empty_fields() {
        let err = PlanValidator::validate(&[TaskDefinition::new("", "echo")]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTask { .. }));
        let err = PlanValidator::validate(&[TaskDefinition::new("a", " ")]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTask { .. }));
    }

    struct Noop;

    #[async_trait]
    impl Agent for Noop {
        async fn execute(&self, _r: TaskRequest, _c: CancellationToken) -> TaskmeshResult<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_capability_report() {
        let registry = CapabilityRegistry::new();
        registry
            .register(
                AgentDescriptor::new("echo", ["echo"]).with_input_schema(json!({
                    "type": "object",
                    "required": ["text"]
                })),
                Arc::new(Noop),
            )
            .unwrap();

        let graph = TaskGraph::build(vec![
            TaskDefinition::new("ok", "echo").with_payload(json!({"text": "hi"})),
            TaskDefinition::new("bad_payload", "echo"),
            TaskDefinition::new("orphan1", "translate"),
            TaskDefinition::new("orphan2", "translate"),
            TaskDefinition::new("pref", "echo")
                .with_payload(json!({"text": "hi"}))
                .with_preferred_agent("nobody"),
        ])
        .unwrap();

        let warnings = PlanValidator::check_capabilities(&graph, &registry);
        assert_eq!(
            warnings,
            vec![
                PlanWarning::PayloadRejected {
                    task: "bad_payload".into(),
                    task_type: "echo".into()
                },
                PlanWarning::NoCapableAgent {
                    task: "orphan1".into(),
                    task_type: "translate".into()
                },
                PlanWarning::UnknownPreferredAgent {
                    task: "pref".into(),
                    agent: "nobody".into()
                },
            ]
        );
        assert!(warnings[1].to_string().contains("translate"));
    }
}
