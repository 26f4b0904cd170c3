//! One fan-out round: dispatch, run children in parallel, join.
//!
//! Children see the state as it was when the round began and never see each
//! other's output. Only the join stage's update reaches the session state, so
//! a round either lands as a whole or not at all.

use super::runner::{invoke_stage, StepError};
use super::Engine;
use crate::cancellation::{panic_message, StructuredTaskGroup};
use crate::checkpoint::Checkpoint;
use crate::errors::{FailureKind, RouteError, StageFailure};
use crate::events::{event_types, EngineEvent};
use crate::pipeline::{FailureCollector, FailureRecord, FanOutEdge, FanOutTarget, Transition};
use crate::stages::StageInput;
use crate::state::StateUpdate;
use serde_json::json;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// The result of a completed round.
pub(super) struct RoundOutcome {
    /// The join stage that produced `update`.
    pub(super) join: String,
    /// The join stage's update.
    pub(super) update: StateUpdate,
}

impl Engine {
    pub(super) async fn run_fan_out(
        &self,
        source: &str,
        working: &Checkpoint,
    ) -> Result<RoundOutcome, StepError> {
        let Some(Transition::FanOut(edge)) = self.graph.transition(source) else {
            return Err(StepError::Route {
                stage: source.to_string(),
                error: RouteError::Unresolved {
                    stage: source.to_string(),
                    label: String::new(),
                },
            });
        };

        let targets = std::panic::catch_unwind(AssertUnwindSafe(|| edge.dispatch(&working.state)))
            .map_err(|payload| StepError::Route {
                stage: source.to_string(),
                error: RouteError::DispatcherPanicked {
                    stage: source.to_string(),
                    message: panic_message(payload.as_ref()),
                },
            })?;
        check_targets(source, edge, &targets).map_err(|error| StepError::Route {
            stage: source.to_string(),
            error,
        })?;

        let policy = edge.policy_override().unwrap_or(self.config.fan_out_policy);
        let children: Vec<&str> = targets.iter().map(|t| t.stage.as_str()).collect();
        debug!(source = %source, children = ?children, policy = %policy, "Fan-out round started");
        self.emit(
            EngineEvent::new(event_types::FANOUT_STARTED, &working.session_id)
                .with_stage(source)
                .with_data(json!({"children": children, "join": edge.join(), "policy": policy})),
        )
        .await;

        let mut group = match self.config.fan_out_concurrency {
            Some(max) => StructuredTaskGroup::with_concurrency_limit(max),
            None => StructuredTaskGroup::new(),
        };
        for target in targets {
            let Some(spec) = self.graph.stage_spec(&target.stage) else {
                continue;
            };
            self.emit(
                EngineEvent::new(event_types::STAGE_STARTED, &working.session_id)
                    .with_stage(target.stage.clone())
                    .with_data(json!({"fan_out": source})),
            )
            .await;

            let runner = spec.runner.clone();
            let timeout = self.config.stage_timeout(&target.stage, spec.timeout);
            let input = StageInput::new(
                working.session_id.clone(),
                target.stage.clone(),
                working.state.clone(),
            )
            .with_child_input(target.input);
            let name = target.stage.clone();
            group.spawn(target.stage, move |_token| invoke_stage(runner, name, input, timeout));
        }

        let mut collector = FailureCollector::new(policy);
        while let Some((child, result)) = group.next().await {
            let result = result.unwrap_or_else(|panic| {
                Err(StageFailure::new(child.clone(), FailureKind::Panic, panic))
            });
            self.report_stage(working, &child, &result).await;

            match result {
                Ok(update) => collector.record_success(child, update.to_value()),
                Err(failure) => {
                    warn!(source = %source, child = %child, error = %failure.message, "Fan-out child failed");
                    self.emit(
                        EngineEvent::new(event_types::FANOUT_CHILD_FAILED, &working.session_id)
                            .with_stage(child.clone())
                            .with_data(json!({
                                "source": source,
                                "kind": failure.kind,
                                "message": failure.message,
                            })),
                    )
                    .await;
                    collector.record_failure(FailureRecord::new(
                        child.clone(),
                        failure.kind,
                        failure.message.clone(),
                    ));

                    if collector.should_stop() {
                        group.cancel_all("fan-out round failed");
                        return Err(StepError::Failed(
                            StageFailure::new(
                                source,
                                FailureKind::FanOut,
                                format!("fan-out child '{child}' failed: {}", failure.message),
                            )
                            .with_details(json!({
                                "child": child,
                                "kind": failure.kind,
                                "join": edge.join(),
                            })),
                        ));
                    }
                }
            }
        }

        let succeeded = collector.completed();
        let failed = collector.failures().len();
        let join = edge.join().to_string();
        let Some(join_spec) = self.graph.stage_spec(&join) else {
            return Err(StepError::Failed(StageFailure::new(
                join,
                FailureKind::Route,
                "join stage is not registered in this graph",
            )));
        };

        self.emit(
            EngineEvent::new(event_types::STAGE_STARTED, &working.session_id).with_stage(join.clone()),
        )
        .await;
        let input = StageInput::new(working.session_id.clone(), join.clone(), working.state.clone())
            .with_fan_in(collector.into_fan_in());
        let timeout = self.config.stage_timeout(&join, join_spec.timeout);
        let result = invoke_stage(join_spec.runner.clone(), join.clone(), input, timeout).await;
        self.report_stage(working, &join, &result).await;
        let update = result.map_err(StepError::Failed)?;

        debug!(source = %source, join = %join, succeeded, failed, "Fan-out round joined");
        self.emit(
            EngineEvent::new(event_types::FANOUT_JOINED, &working.session_id)
                .with_stage(join.clone())
                .with_data(json!({"source": source, "succeeded": succeeded, "failed": failed})),
        )
        .await;

        Ok(RoundOutcome { join, update })
    }
}

/// Every target must be a declared child, named at most once.
fn check_targets(
    source: &str,
    edge: &FanOutEdge,
    targets: &[FanOutTarget],
) -> Result<(), RouteError> {
    let mut seen = BTreeSet::new();
    for target in targets {
        if !edge.children().contains(&target.stage) {
            return Err(RouteError::UnknownChild {
                stage: source.to_string(),
                child: target.stage.clone(),
            });
        }
        if !seen.insert(target.stage.as_str()) {
            return Err(RouteError::DuplicateChild {
                stage: source.to_string(),
                child: target.stage.clone(),
            });
        }
    }
    Ok(())
}
