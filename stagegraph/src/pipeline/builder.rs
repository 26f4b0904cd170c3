//! Graph builder with validation.

use super::graph::CompiledGraph;
use super::spec::{ConditionalEdge, FanOutEdge, StageSpec, Transition};
use crate::errors::{codes, BuildError};
use crate::stages::Stage;
use crate::state::{Reducer, Reducers};
use crate::utils::{find_cycle, is_valid_identifier};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Builder for stage graphs.
///
/// Declarations are collected without checks; [`GraphBuilder::build`] runs
/// every validation at once so edges may reference stages registered later.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    name: String,
    stages: Vec<StageSpec>,
    transitions: Vec<(String, Transition)>,
    starts: Vec<String>,
    terminals: BTreeSet<String>,
    interrupts: BTreeSet<String>,
    reducers: Vec<(String, Reducer)>,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            transitions: Vec::new(),
            starts: Vec::new(),
            terminals: BTreeSet::new(),
            interrupts: BTreeSet::new(),
            reducers: Vec::new(),
        }
    }

    /// Registers a stage.
    #[must_use]
    pub fn stage(self, name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        self.add_stage_spec(StageSpec::new(name, runner))
    }

    /// Registers a stage from a full specification.
    #[must_use]
    pub fn add_stage_spec(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Adds a fixed edge `from -> to`.
    #[must_use]
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions
            .push((from.into(), Transition::Fixed(to.into())));
        self
    }

    /// Adds a conditional edge leaving `from`.
    #[must_use]
    pub fn conditional(mut self, from: impl Into<String>, edge: ConditionalEdge) -> Self {
        self.transitions
            .push((from.into(), Transition::Conditional(edge)));
        self
    }

    /// Adds a dynamic fan-out edge leaving `from`.
    #[must_use]
    pub fn fan_out(mut self, from: impl Into<String>, edge: FanOutEdge) -> Self {
        self.transitions.push((from.into(), Transition::FanOut(edge)));
        self
    }

    /// Designates the start stage.
    #[must_use]
    pub fn start(mut self, name: impl Into<String>) -> Self {
        self.starts.push(name.into());
        self
    }

    /// Designates a terminal stage; reaching it completes the session.
    #[must_use]
    pub fn terminal(mut self, name: impl Into<String>) -> Self {
        self.terminals.insert(name.into());
        self
    }

    /// Pauses sessions immediately before `name` runs.
    #[must_use]
    pub fn interrupt_before(mut self, name: impl Into<String>) -> Self {
        self.interrupts.insert(name.into());
        self
    }

    /// Declares how updates to `field` are merged.
    #[must_use]
    pub fn reducer(mut self, field: impl Into<String>, reducer: Reducer) -> Self {
        self.reducers.push((field.into(), reducer));
        self
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the definition and produces an executable graph.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] describing the first problem found.
    pub fn build(self) -> Result<CompiledGraph, BuildError> {
        let stages = self.collect_stages()?;
        let start = self.validate_start(&stages)?;
        self.validate_terminals(&stages)?;
        let transitions = self.collect_transitions(&stages)?;
        let child_joins = validate_fan_outs(&transitions, &start, &self.terminals)?;
        validate_dead_ends(&stages, &transitions, &self.terminals, &child_joins)?;
        check_cycles(&stages, &transitions)?;

        let mut reducers = Reducers::default();
        for (field, reducer) in self.reducers {
            reducers.set(field, reducer);
        }

        let stage_order = self.stages.iter().map(|s| s.name.clone()).collect();
        let mut graph = CompiledGraph {
            name: self.name,
            stages,
            stage_order,
            start,
            terminals: self.terminals,
            transitions,
            interrupts: BTreeSet::new(),
            reducers,
            child_joins,
        };

        for name in &self.interrupts {
            graph.check_interrupt(name)?;
        }
        graph.interrupts = self.interrupts;

        tracing::debug!(
            graph = %graph.name,
            stages = graph.stage_count(),
            interrupts = ?graph.interrupts,
            "Graph compiled"
        );

        Ok(graph)
    }

    fn collect_stages(&self) -> Result<HashMap<String, StageSpec>, BuildError> {
        if self.stages.is_empty() {
            return Err(BuildError::new(codes::NO_START, "Graph has no stages")
                .with_fix_hint("Register at least one stage before building."));
        }

        let mut stages = HashMap::new();
        for spec in &self.stages {
            if !is_valid_identifier(&spec.name) {
                return Err(BuildError::new(
                    codes::INVALID_NAME,
                    format!("Invalid stage name '{}'", spec.name),
                )
                .with_stages([spec.name.as_str()]));
            }
            if stages.insert(spec.name.clone(), spec.clone()).is_some() {
                return Err(BuildError::new(
                    codes::DUPLICATE_STAGE,
                    format!("Stage '{}' is registered more than once", spec.name),
                )
                .with_stages([spec.name.as_str()]));
            }
        }
        Ok(stages)
    }

    fn validate_start(&self, stages: &HashMap<String, StageSpec>) -> Result<String, BuildError> {
        let distinct: BTreeSet<&String> = self.starts.iter().collect();
        match distinct.len() {
            0 => Err(BuildError::new(codes::NO_START, "No start stage declared")
                .with_fix_hint("Call `start(name)` on the builder.")),
            1 => {
                let start = self.starts[0].clone();
                if stages.contains_key(&start) {
                    Ok(start)
                } else {
                    Err(BuildError::new(
                        codes::UNKNOWN_STAGE,
                        format!("Start stage '{start}' is not registered"),
                    )
                    .with_stages([start]))
                }
            }
            _ => Err(BuildError::new(
                codes::NO_START,
                "Exactly one start stage must be declared",
            )
            .with_stages(distinct.into_iter().cloned())),
        }
    }

    fn validate_terminals(&self, stages: &HashMap<String, StageSpec>) -> Result<(), BuildError> {
        if self.terminals.is_empty() {
            return Err(BuildError::new(codes::NO_TERMINAL, "No terminal stage declared")
                .with_fix_hint("Call `terminal(name)` for every stage that ends a session."));
        }
        for name in &self.terminals {
            if !stages.contains_key(name) {
                return Err(BuildError::new(
                    codes::UNKNOWN_STAGE,
                    format!("Terminal stage '{name}' is not registered"),
                )
                .with_stages([name.as_str()]));
            }
        }
        Ok(())
    }

    fn collect_transitions(
        &self,
        stages: &HashMap<String, StageSpec>,
    ) -> Result<HashMap<String, Transition>, BuildError> {
        let mut transitions = HashMap::new();

        for (source, transition) in &self.transitions {
            if !stages.contains_key(source) {
                return Err(dangling(source, source));
            }
            if self.terminals.contains(source) {
                return Err(BuildError::new(
                    codes::MULTIPLE_TRANSITIONS,
                    format!("Terminal stage '{source}' cannot have an outgoing transition"),
                )
                .with_stages([source.as_str()]));
            }

            match transition {
                Transition::Fixed(target) => {
                    if !stages.contains_key(target) {
                        return Err(dangling(source, target));
                    }
                }
                Transition::Conditional(edge) => validate_conditional(source, edge, stages)?,
                Transition::FanOut(edge) => {
                    for target in edge.children.iter().chain(std::iter::once(&edge.join)) {
                        if !stages.contains_key(target) {
                            return Err(dangling(source, target));
                        }
                    }
                }
            }

            if transitions
                .insert(source.clone(), transition.clone())
                .is_some()
            {
                return Err(BuildError::new(
                    codes::MULTIPLE_TRANSITIONS,
                    format!("Stage '{source}' has more than one outgoing transition"),
                )
                .with_stages([source.as_str()]));
            }
        }

        Ok(transitions)
    }
}

fn dangling(source: &str, target: &str) -> BuildError {
    BuildError::new(
        codes::DANGLING_EDGE,
        format!("Edge from '{source}' references unknown stage '{target}'"),
    )
    .with_stages([source, target])
    .with_fix_hint("Register the stage or fix the typo in the edge.")
}

fn validate_conditional(
    source: &str,
    edge: &ConditionalEdge,
    stages: &HashMap<String, StageSpec>,
) -> Result<(), BuildError> {
    let labels: BTreeSet<String> = edge.labels().into_iter().collect();
    let route_error = |message: String| {
        BuildError::new(codes::NON_EXHAUSTIVE_ROUTE, message).with_stages([source])
    };

    if labels.is_empty() {
        return Err(route_error(format!(
            "Router on '{source}' declares no labels"
        )));
    }
    for label in &labels {
        if !is_valid_identifier(label) {
            return Err(BuildError::new(
                codes::INVALID_NAME,
                format!("Invalid route label '{label}' on '{source}'"),
            )
            .with_stages([source]));
        }
        if edge.target_for(label).is_none() {
            return Err(route_error(format!(
                "Label '{label}' on '{source}' has no target and the edge declares no default"
            ))
            .with_fix_hint("Map every router label or add `default_to(stage)`."));
        }
    }
    for label in edge.routes.keys() {
        if !labels.contains(label) {
            return Err(route_error(format!(
                "Edge on '{source}' maps label '{label}' which its router never returns"
            )));
        }
    }
    for target in edge.targets() {
        if !stages.contains_key(target) {
            return Err(dangling(source, target));
        }
    }

    if let Some(feedback) = edge.feedback_spec() {
        for label in [&feedback.label, &feedback.exit_label] {
            if !labels.contains(label) {
                return Err(route_error(format!(
                    "Feedback declaration on '{source}' uses undeclared label '{label}'"
                )));
            }
        }
        if edge.target_for(&feedback.label) == edge.target_for(&feedback.exit_label) {
            return Err(route_error(format!(
                "Feedback label '{}' and exit label '{}' on '{source}' lead to the same stage",
                feedback.label, feedback.exit_label
            )));
        }
    }

    Ok(())
}

fn validate_fan_outs(
    transitions: &HashMap<String, Transition>,
    start: &str,
    terminals: &BTreeSet<String>,
) -> Result<HashMap<String, String>, BuildError> {
    let mut child_joins: HashMap<String, String> = HashMap::new();

    let mut sources: Vec<&String> = transitions.keys().collect();
    sources.sort();

    for source in sources {
        let Some(Transition::FanOut(edge)) = transitions.get(source) else {
            continue;
        };
        let mut seen = HashSet::new();
        for child in &edge.children {
            if !seen.insert(child) {
                return Err(mismatch(
                    format!("Fan-out on '{source}' lists child '{child}' twice"),
                    &[source.as_str(), child.as_str()],
                ));
            }
            if child == &edge.join || child == source {
                return Err(mismatch(
                    format!("Fan-out child '{child}' cannot be its own source or join"),
                    &[source.as_str(), child.as_str()],
                ));
            }
            if child == start || terminals.contains(child) {
                return Err(mismatch(
                    format!("Fan-out child '{child}' cannot be a start or terminal stage"),
                    &[child.as_str()],
                ));
            }
            if transitions.contains_key(child) {
                return Err(mismatch(
                    format!("Fan-out child '{child}' has its own outgoing transition; children converge only at their join"),
                    &[child.as_str()],
                ));
            }
            if let Some(existing) = child_joins.get(child) {
                if existing != &edge.join {
                    return Err(mismatch(
                        format!(
                            "Fan-out child '{child}' converges at both '{existing}' and '{}'",
                            edge.join
                        ),
                        &[child.as_str(), existing.as_str(), edge.join.as_str()],
                    ));
                }
            }
            child_joins.insert(child.clone(), edge.join.clone());
        }
    }

    for (source, transition) in transitions {
        let targets: Vec<&String> = match transition {
            Transition::Fixed(target) => vec![target],
            Transition::Conditional(edge) => edge.targets().collect(),
            Transition::FanOut(edge) => vec![&edge.join],
        };
        if let Some(child) = targets.into_iter().find(|t| child_joins.contains_key(*t)) {
            return Err(mismatch(
                format!("Fan-out child '{child}' is also reachable from '{source}' outside its fan-out edge"),
                &[source.as_str(), child.as_str()],
            ));
        }
    }

    Ok(child_joins)
}

fn mismatch(message: String, stages: &[&str]) -> BuildError {
    BuildError::new(codes::JOIN_MISMATCH, message).with_stages(stages.iter().copied())
}

fn validate_dead_ends(
    stages: &HashMap<String, StageSpec>,
    transitions: &HashMap<String, Transition>,
    terminals: &BTreeSet<String>,
    child_joins: &HashMap<String, String>,
) -> Result<(), BuildError> {
    let mut names: Vec<&String> = stages.keys().collect();
    names.sort();
    for name in names {
        if terminals.contains(name) || child_joins.contains_key(name) {
            continue;
        }
        if !transitions.contains_key(name) {
            return Err(BuildError::new(
                codes::DEAD_END,
                format!("Stage '{name}' is neither terminal nor has an outgoing transition"),
            )
            .with_stages([name.as_str()])
            .with_fix_hint("Add an edge from the stage or mark it terminal."));
        }
    }
    Ok(())
}

fn check_cycles(
    stages: &HashMap<String, StageSpec>,
    transitions: &HashMap<String, Transition>,
) -> Result<(), BuildError> {
    let mut successors: BTreeMap<String, BTreeSet<String>> = stages
        .keys()
        .map(|name| (name.clone(), BTreeSet::new()))
        .collect();

    for (source, transition) in transitions {
        let entry = successors.entry(source.clone()).or_default();
        match transition {
            Transition::Fixed(target) => {
                entry.insert(target.clone());
            }
            Transition::Conditional(edge) => {
                let feedback_label = edge.feedback_spec().map(|f| f.label.as_str());
                for label in edge.labels() {
                    if Some(label.as_str()) == feedback_label {
                        continue;
                    }
                    if let Some(target) = edge.target_for(&label) {
                        entry.insert(target.to_string());
                    }
                }
            }
            Transition::FanOut(edge) => {
                entry.extend(edge.children.iter().cloned());
                for child in &edge.children {
                    successors
                        .entry(child.clone())
                        .or_default()
                        .insert(edge.join.clone());
                }
            }
        }
    }

    match find_cycle(&successors) {
        Some(cycle) => Err(BuildError::cycle(cycle)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FanOutTarget, ThresholdRouter};
    use crate::stages::NoOpStage;
    use crate::state::State;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    fn with_stages(names: &[&str]) -> GraphBuilder {
        names
            .iter()
            .fold(GraphBuilder::new("test"), |b, n| b.stage(*n, noop(n)))
    }

    fn no_children(_: &State) -> Vec<FanOutTarget> {
        Vec::new()
    }

    #[test]
    fn test_builder_linear_graph() {
        let graph = with_stages(&["a", "b", "c"])
            .start("a")
            .edge("a", "b")
            .edge("b", "c")
            .terminal("c")
            .build()
            .unwrap();

        assert_eq!(graph.name(), "test");
        assert_eq!(graph.start(), "a");
        assert_eq!(graph.stage_count(), 3);
        assert!(graph.is_terminal("c"));
        assert_eq!(graph.stage_names(), ["a", "b", "c"]);
    }

    #[test]
    fn test_builder_empty_build() {
        let err = GraphBuilder::new("test").build().unwrap_err();
        assert_eq!(err.code(), codes::NO_START);
    }

    #[test]
    fn test_missing_start() {
        let err = with_stages(&["a"]).terminal("a").build().unwrap_err();
        assert_eq!(err.code(), codes::NO_START);
    }

    #[test]
    fn test_multiple_starts() {
        let err = with_stages(&["a", "b"])
            .start("a")
            .start("b")
            .terminal("b")
            .edge("a", "b")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::NO_START);
        assert_eq!(err.stages, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_terminal() {
        let err = with_stages(&["a"]).start("a").build().unwrap_err();
        assert_eq!(err.code(), codes::NO_TERMINAL);
    }

    #[test]
    fn test_duplicate_stage() {
        let err = with_stages(&["a", "a"])
            .start("a")
            .terminal("a")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::DUPLICATE_STAGE);
    }

    #[test]
    fn test_invalid_stage_name() {
        let err = with_stages(&["bad name"])
            .start("bad name")
            .terminal("bad name")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_NAME);
    }

    #[test]
    fn test_dangling_edge() {
        let err = with_stages(&["a", "b"])
            .start("a")
            .edge("a", "missing")
            .terminal("b")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::DANGLING_EDGE);
        assert!(err.stages.contains(&"missing".to_string()));
    }

    #[test]
    fn test_two_transitions_from_one_stage() {
        let err = with_stages(&["a", "b", "c"])
            .start("a")
            .edge("a", "b")
            .edge("a", "c")
            .edge("b", "c")
            .terminal("c")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::MULTIPLE_TRANSITIONS);
    }

    #[test]
    fn test_dead_end() {
        let err = with_stages(&["a", "b", "c"])
            .start("a")
            .edge("a", "b")
            .terminal("c")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::DEAD_END);
        assert_eq!(err.stages, vec!["b"]);
    }

    #[test]
    fn test_non_exhaustive_router() {
        let err = with_stages(&["a", "b", "c"])
            .start("a")
            .conditional(
                "a",
                ConditionalEdge::new(ThresholdRouter::new("score", 0.75, "low", "high"))
                    .route("low", "b"),
            )
            .edge("b", "c")
            .terminal("c")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::NON_EXHAUSTIVE_ROUTE);
    }

    #[test]
    fn test_default_makes_router_exhaustive() {
        let graph = with_stages(&["a", "b", "c"])
            .start("a")
            .conditional(
                "a",
                ConditionalEdge::new(ThresholdRouter::new("score", 0.75, "low", "high"))
                    .route("low", "b")
                    .default_to("c"),
            )
            .edge("b", "c")
            .terminal("c")
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn test_illegal_cycle() {
        let err = with_stages(&["a", "b", "c", "d"])
            .start("a")
            .edge("a", "b")
            .conditional(
                "b",
                ConditionalEdge::new(ThresholdRouter::new("score", 0.5, "again", "done"))
                    .route("again", "a")
                    .route("done", "d"),
            )
            .edge("c", "d")
            .terminal("d")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::CYCLE);
        assert!(err
            .to_string()
            .starts_with("graph not acyclic outside declared feedback edges"));
    }

    #[test]
    fn test_feedback_edge_permits_cycle() {
        let graph = with_stages(&["draft", "check", "revise", "publish"])
            .start("draft")
            .edge("draft", "check")
            .conditional(
                "check",
                ConditionalEdge::new(ThresholdRouter::new("score", 0.75, "revise", "publish"))
                    .route("revise", "revise")
                    .route("publish", "publish")
                    .feedback("revise", "publish")
                    .max_iterations(2),
            )
            .edge("revise", "draft")
            .terminal("publish")
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn test_feedback_with_unknown_exit_label() {
        let err = with_stages(&["a", "b", "c"])
            .start("a")
            .conditional(
                "a",
                ConditionalEdge::new(ThresholdRouter::new("score", 0.5, "low", "high"))
                    .route("low", "b")
                    .route("high", "c")
                    .feedback("low", "sideways"),
            )
            .edge("b", "a")
            .terminal("c")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::NON_EXHAUSTIVE_ROUTE);
    }

    #[test]
    fn test_fan_out_join_mismatch() {
        let err = with_stages(&["a", "b", "x", "j1", "j2", "end"])
            .start("a")
            .fan_out("a", FanOutEdge::new(no_children, ["x"], "j1"))
            .edge("j1", "b")
            .fan_out("b", FanOutEdge::new(no_children, ["x"], "j2"))
            .edge("j2", "end")
            .terminal("end")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::JOIN_MISMATCH);
    }

    #[test]
    fn test_fan_out_child_with_own_edge() {
        let err = with_stages(&["a", "x", "j", "end"])
            .start("a")
            .fan_out("a", FanOutEdge::new(no_children, ["x"], "j"))
            .edge("x", "j")
            .edge("j", "end")
            .terminal("end")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::JOIN_MISMATCH);
    }

    #[test]
    fn test_fan_out_graph_compiles() {
        let graph = with_stages(&["a", "x", "y", "j", "end"])
            .start("a")
            .fan_out("a", FanOutEdge::new(no_children, ["x", "y"], "j"))
            .edge("j", "end")
            .terminal("end")
            .build()
            .unwrap();
        assert_eq!(graph.join_of("x"), Some("j"));
        assert!(graph.is_join("j"));
        assert!(graph.join_of("a").is_none());
    }

    #[test]
    fn test_interrupt_validation() {
        let err = with_stages(&["a", "b"])
            .start("a")
            .edge("a", "b")
            .terminal("b")
            .interrupt_before("nope")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::BAD_INTERRUPT);

        let err = with_stages(&["a", "x", "j", "end"])
            .start("a")
            .fan_out("a", FanOutEdge::new(no_children, ["x"], "j"))
            .edge("j", "end")
            .terminal("end")
            .interrupt_before("j")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), codes::BAD_INTERRUPT);
    }

    #[test]
    fn test_reducers_are_registered() {
        let graph = with_stages(&["a"])
            .start("a")
            .terminal("a")
            .reducer("messages", Reducer::Append)
            .build()
            .unwrap();
        assert_eq!(graph.reducers().for_field("messages"), Reducer::Append);
        assert_eq!(graph.reducers().for_field("other"), Reducer::Merge);
    }
}
