use crate::types::Task;
use crate::validator::PlanValidator;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use taskmesh_core::{TaskDefinition, TaskError, TaskState, ValidationError};
use tokio::time::Instant;

/// A validated plan: tasks plus dependency edges, with readiness tracking.
///
/// The structure is fixed once built; only task states change, and only
/// through the methods below.
pub struct TaskGraph {
    /// Insertion (plan) order.
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    /// Inverse edges: `dependents[i]` lists the tasks that depend on task `i`.
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Validate `defs` and build the graph. Tasks without dependencies start Ready.
    pub fn build(defs: Vec<TaskDefinition>) -> Result<Self, ValidationError> {
        PlanValidator::validate(&defs)?;

        let tasks: Vec<Task> = defs
            .into_iter()
            .enumerate()
            .map(|(seq, def)| Task::from_definition(def, seq))
            .collect();

        let index: HashMap<String, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();

        let mut dependents = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                // validated above
                if let Some(&d) = index.get(dep) {
                    if !dependents[d].contains(&i) {
                        dependents[d].push(i);
                    }
                }
            }
        }

        let mut graph = Self {
            tasks,
            index,
            dependents,
        };
        for i in 0..graph.tasks.len() {
            graph.refresh_readiness(i);
        }
        Ok(graph)
    }

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    /// All tasks in plan order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Ids of the tasks that list `id` as a dependency.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.dependents[i]
                    .iter()
                    .map(|&d| self.tasks[d].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ready tasks, highest priority first, ties by plan order.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Ready)
            .collect();
        ready.sort_by_key(|t| (std::cmp::Reverse(t.priority), t.seq));
        ready
    }

    /// Ready tasks whose retry backoff (if any) has elapsed, in dispatch order.
    pub fn dispatchable(&self, now: Instant) -> Vec<&Task> {
        self.ready_tasks()
            .into_iter()
            .filter(|t| t.is_dispatchable(now))
            .collect()
    }

    /// Earliest pending retry instant among Ready tasks.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Ready)
            .filter_map(|t| t.retry_at)
            .min()
    }

    /// Ready → Dispatched. Returns false if the task is unknown or not Ready.
    pub fn mark_dispatched(&mut self, id: &str, agent_id: &str) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        let task = &mut self.tasks[i];
        if task.state != TaskState::Ready {
            return false;
        }
        task.state = TaskState::Dispatched;
        task.attempts += 1;
        task.agent = Some(agent_id.to_string());
        task.retry_at = None;
        true
    }

    /// Mark a task Succeeded and return the ids of dependents that became Ready.
    pub fn mark_succeeded(&mut self, id: &str, result: Value) -> Vec<String> {
        let Some(&i) = self.index.get(id) else {
            return Vec::new();
        };
        if self.tasks[i].state.is_terminal() {
            return Vec::new();
        }
        let task = &mut self.tasks[i];
        task.state = TaskState::Succeeded;
        task.result = Some(result);
        task.error = None;
        task.retry_at = None;

        let mut unblocked = Vec::new();
        for d in self.dependents[i].clone() {
            if self.refresh_readiness(d) {
                unblocked.push(self.tasks[d].id.clone());
            }
        }
        unblocked
    }

    /// Put a Dispatched task back to Ready after a failed attempt.
    ///
    /// The retry is not dispatched before `retry_at`.
    pub fn schedule_retry(&mut self, id: &str, retry_at: Instant) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        let task = &mut self.tasks[i];
        if task.state != TaskState::Dispatched {
            return false;
        }
        task.state = TaskState::Ready;
        task.retry_count += 1;
        task.retry_at = Some(retry_at);
        true
    }

    /// Mark a task Failed and cancel every transitive dependent.
    ///
    /// Breadth-first over the inverse edges; returns the ids that were
    /// cancelled, in visit order.
    pub fn mark_failed(&mut self, id: &str, error: TaskError) -> Vec<String> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        if self.tasks[start].state.is_terminal() {
            return Vec::new();
        }
        let task = &mut self.tasks[start];
        task.state = TaskState::Failed;
        task.error = Some(error);
        task.retry_at = None;

        let mut cancelled = Vec::new();
        let mut queue: VecDeque<usize> = self.dependents[start].iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            let dependent = &mut self.tasks[i];
            if dependent.state.is_terminal() {
                continue;
            }
            dependent.state = TaskState::Cancelled;
            dependent.error = Some(TaskError::DependencyFailed {
                dependency: id.to_string(),
            });
            dependent.retry_at = None;
            cancelled.push(dependent.id.clone());
            queue.extend(self.dependents[i].iter().copied());
        }
        cancelled
    }

    /// Cancel every non-terminal task. Returns the ids that changed.
    pub fn cancel_remaining(&mut self, reason: &str) -> Vec<String> {
        let mut cancelled = Vec::new();
        for task in &mut self.tasks {
            if task.state.is_terminal() {
                continue;
            }
            task.state = TaskState::Cancelled;
            task.error = Some(TaskError::Cancelled {
                reason: reason.to_string(),
            });
            task.retry_at = None;
            cancelled.push(task.id.clone());
        }
        cancelled
    }

    /// Count of tasks in `state`.
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    /// Total number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// No task is Pending, Ready or Dispatched.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_terminal())
    }

    /// Pending → Ready when every dependency has Succeeded.
    fn refresh_readiness(&mut self, i: usize) -> bool {
        if self.tasks[i].state != TaskState::Pending {
            return false;
        }
        let all_met = self.tasks[i].dependencies.iter().all(|dep| {
            self.index
                .get(dep)
                .is_some_and(|&d| self.tasks[d].state == TaskState::Succeeded)
        });
        if all_met {
            self.tasks[i].state = TaskState::Ready;
        }
        all_met
    }
}
