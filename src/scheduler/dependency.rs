//! Job dependency gate (§4.3).
//!
//! Grounded in `iteration348_job_scheduler.py::_check_dependencies`: a job
//! with declared dependencies is blocked, not skipped, until every dependency
//! has a run recorded matching its required state set (success only, any
//! terminal state for `DependencyType::Completion`, or failure only for
//! `DependencyType::Failure` — compensation/alerting chains that should only
//! fire once the thing they react to broke). Absence of any run at all
//! always blocks, regardless of dependency type.

use std::collections::HashMap;

use crate::topology::{DependencyType, JobDependency};

/// The terminal outcome of the most recent run of a job definition, as seen
/// by the dependency gate. `None` means no run has completed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

/// Evaluates whether a job's dependencies are satisfied given the latest
/// recorded run outcome of each job definition.
pub struct DependencyGate<'a> {
    latest_outcomes: &'a HashMap<String, RunOutcome>,
}

impl<'a> DependencyGate<'a> {
    pub fn new(latest_outcomes: &'a HashMap<String, RunOutcome>) -> Self {
        Self { latest_outcomes }
    }

    /// `true` if every dependency is satisfied; the job may fire.
    pub fn is_satisfied(&self, dependencies: &[JobDependency]) -> bool {
        dependencies.iter().all(|dep| self.dependency_met(dep))
    }

    /// Names of dependencies still blocking, for diagnostics / audit.
    pub fn blocking(&self, dependencies: &[JobDependency]) -> Vec<String> {
        dependencies
            .iter()
            .filter(|dep| !self.dependency_met(dep))
            .map(|dep| dep.depends_on_job_def.clone())
            .collect()
    }

    fn dependency_met(&self, dep: &JobDependency) -> bool {
        match self.latest_outcomes.get(&dep.depends_on_job_def) {
            None => false,
            Some(outcome) => match dep.dependency_type {
                DependencyType::Success => matches!(outcome, RunOutcome::Success),
                DependencyType::Completion => true,
                DependencyType::Failure => matches!(outcome, RunOutcome::Failure),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str, kind: DependencyType) -> JobDependency {
        JobDependency {
            depends_on_job_def: name.to_string(),
            dependency_type: kind,
        }
    }

    #[test]
    fn blocks_when_no_run_recorded() {
        let outcomes = HashMap::new();
        let gate = DependencyGate::new(&outcomes);
        assert!(!gate.is_satisfied(&[dep("ingest", DependencyType::Success)]));
    }

    #[test]
    fn success_dependency_requires_success_outcome() {
        let mut outcomes = HashMap::new();
        outcomes.insert("ingest".to_string(), RunOutcome::Failure);
        let gate = DependencyGate::new(&outcomes);
        assert!(!gate.is_satisfied(&[dep("ingest", DependencyType::Success)]));

        outcomes.insert("ingest".to_string(), RunOutcome::Success);
        let gate = DependencyGate::new(&outcomes);
        assert!(gate.is_satisfied(&[dep("ingest", DependencyType::Success)]));
    }

    #[test]
    fn completion_dependency_accepts_any_terminal_outcome() {
        let mut outcomes = HashMap::new();
        outcomes.insert("ingest".to_string(), RunOutcome::Failure);
        let gate = DependencyGate::new(&outcomes);
        assert!(gate.is_satisfied(&[dep("ingest", DependencyType::Completion)]));
    }

    #[test]
    fn failure_dependency_requires_failure_outcome() {
        let mut outcomes = HashMap::new();
        outcomes.insert("ingest".to_string(), RunOutcome::Success);
        let gate = DependencyGate::new(&outcomes);
        assert!(!gate.is_satisfied(&[dep("ingest", DependencyType::Failure)]));

        outcomes.insert("ingest".to_string(), RunOutcome::Failure);
        let gate = DependencyGate::new(&outcomes);
        assert!(gate.is_satisfied(&[dep("ingest", DependencyType::Failure)]));
    }

    #[test]
    fn reports_blocking_dependency_names() {
        let outcomes = HashMap::new();
        let gate = DependencyGate::new(&outcomes);
        let deps = vec![dep("a", DependencyType::Success), dep("b", DependencyType::Completion)];
        assert_eq!(gate.blocking(&deps), vec!["a".to_string(), "b".to_string()]);
    }
}
