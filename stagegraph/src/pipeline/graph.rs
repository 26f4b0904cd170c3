//! The validated, immutable graph the engine executes.

use super::spec::{StageSpec, Transition};
use crate::errors::{codes, BuildError};
use crate::stages::Stage;
use crate::state::Reducers;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A graph that passed build-time validation.
///
/// Produced by [`GraphBuilder::build`](super::GraphBuilder::build); shared by
/// every session an engine drives.
#[derive(Debug)]
pub struct CompiledGraph {
    pub(crate) name: String,
    pub(crate) stages: HashMap<String, StageSpec>,
    pub(crate) stage_order: Vec<String>,
    pub(crate) start: String,
    pub(crate) terminals: BTreeSet<String>,
    pub(crate) transitions: HashMap<String, Transition>,
    pub(crate) interrupts: BTreeSet<String>,
    pub(crate) reducers: Reducers,
    /// Fan-out child -> join stage.
    pub(crate) child_joins: HashMap<String, String>,
}

impl CompiledGraph {
    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the start stage.
    #[must_use]
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage names in registration order.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.stage_order
    }

    /// Returns true if `name` is a registered stage.
    #[must_use]
    pub fn has_stage(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Returns the specification of a stage.
    #[must_use]
    pub fn stage_spec(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Returns the implementation of a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name).map(|spec| &spec.runner)
    }

    /// Returns true if reaching `name` completes a session.
    #[must_use]
    pub fn is_terminal(&self, name: &str) -> bool {
        self.terminals.contains(name)
    }

    /// The terminal stages.
    #[must_use]
    pub fn terminals(&self) -> &BTreeSet<String> {
        &self.terminals
    }

    /// The outgoing transition of a stage.
    #[must_use]
    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.transitions.get(name)
    }

    /// Interrupt points declared on the graph.
    #[must_use]
    pub fn interrupts(&self) -> &BTreeSet<String> {
        &self.interrupts
    }

    /// Field reducers declared on the graph.
    #[must_use]
    pub fn reducers(&self) -> &Reducers {
        &self.reducers
    }

    /// Returns the join stage if `name` is a fan-out child.
    #[must_use]
    pub fn join_of(&self, name: &str) -> Option<&str> {
        self.child_joins.get(name).map(String::as_str)
    }

    /// Returns true if `name` is the join of some fan-out edge.
    #[must_use]
    pub fn is_join(&self, name: &str) -> bool {
        self.child_joins.values().any(|join| join == name)
    }

    /// Checks that `name` can be used as an interrupt point.
    ///
    /// Fan-out children and join stages run inside a round, which is never split
    /// by a pause.
    pub fn check_interrupt(&self, name: &str) -> Result<(), BuildError> {
        if !self.has_stage(name) {
            return Err(BuildError::new(
                codes::BAD_INTERRUPT,
                format!("Interrupt point '{name}' is not a registered stage"),
            )
            .with_stages([name]));
        }
        if self.join_of(name).is_some() || self.is_join(name) {
            return Err(BuildError::new(
                codes::BAD_INTERRUPT,
                format!("Interrupt point '{name}' is part of a fan-out round"),
            )
            .with_stages([name])
            .with_fix_hint("Pause before the fan-out source or after the join stage instead."));
        }
        Ok(())
    }
}
