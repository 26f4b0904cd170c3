//! The per-session step loop.

use super::Engine;
use crate::cancellation::{panic_message, CancellationToken};
use crate::checkpoint::{Checkpoint, Cursor};
use crate::core::SessionStatus;
use crate::errors::{FailureKind, GraphError, RouteError, StageFailure};
use crate::events::{event_types, EngineEvent};
use crate::pipeline::{edge_id, ConditionalEdge, Transition};
use crate::stages::{Stage, StageInput};
use crate::state::StateUpdate;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Why a step did not produce an update.
pub(super) enum StepError {
    /// A router or dispatcher broke its contract.
    Route { stage: String, error: RouteError },
    /// A stage or fan-out round failed.
    Failed(StageFailure),
}

impl Engine {
    /// Runs from a checkpoint that is both the persisted and the working copy.
    pub(super) async fn drive(
        &self,
        checkpoint: Checkpoint,
        token: &CancellationToken,
        resume_at: Option<String>,
    ) -> Result<SessionStatus, GraphError> {
        self.drive_from(checkpoint.clone(), checkpoint, token, resume_at)
            .await
    }

    /// The step loop.
    ///
    /// `persisted` is always the last record written to the store; failures
    /// are recorded on it so a half-finished step never becomes durable.
    /// `working` carries the in-memory progress of the current step.
    /// `resume_at` names the interrupt point being resumed, which runs once
    /// without pausing again.
    pub(super) async fn drive_from(
        &self,
        mut persisted: Checkpoint,
        mut working: Checkpoint,
        token: &CancellationToken,
        mut resume_at: Option<String>,
    ) -> Result<SessionStatus, GraphError> {
        let mut steps: u64 = 0;

        loop {
            if token.is_cancelled() {
                return Err(self.cancel_session(persisted, &cancel_reason(token)).await);
            }

            let (stage, next) = match working.cursor.clone() {
                Cursor::End => return Ok(SessionStatus::Completed),

                Cursor::Stage(stage) => {
                    let resuming = resume_at.as_deref() == Some(stage.as_str());
                    if self.interrupts.contains(&stage) && !resuming {
                        return self.pause(working, &stage, token).await;
                    }
                    resume_at = None;
                    if let Err(error) = self.count_step(&mut steps, &stage) {
                        return Err(self.fail_route(persisted, &stage, error).await);
                    }

                    let outcome = tokio::select! {
                        biased;
                        () = token.cancelled() => None,
                        outcome = self.run_single(&working, &stage) => Some(outcome),
                    };
                    let update = match outcome {
                        None => {
                            return Err(self.cancel_session(persisted, &cancel_reason(token)).await)
                        }
                        Some(Ok(update)) => update,
                        Some(Err(failure)) => {
                            let err = GraphError::StageFailed(failure.clone());
                            return Err(self.mark_failed(persisted, failure, err).await);
                        }
                    };

                    working.state.apply(&update, self.graph.reducers());
                    working.step += 1;
                    let next = self.resolve_next(&stage, &mut working).await;
                    (stage, next)
                }

                Cursor::FanOut(source) => {
                    if let Err(error) = self.count_step(&mut steps, &source) {
                        return Err(self.fail_route(persisted, &source, error).await);
                    }

                    let outcome = tokio::select! {
                        biased;
                        () = token.cancelled() => None,
                        outcome = self.run_fan_out(&source, &working) => Some(outcome),
                    };
                    let round = match outcome {
                        None => {
                            return Err(self.cancel_session(persisted, &cancel_reason(token)).await)
                        }
                        Some(Ok(round)) => round,
                        Some(Err(StepError::Route { stage, error })) => {
                            return Err(self.fail_route(persisted, &stage, error).await);
                        }
                        Some(Err(StepError::Failed(failure))) => {
                            let err = GraphError::StageFailed(failure.clone());
                            return Err(self.mark_failed(persisted, failure, err).await);
                        }
                    };

                    working.state.apply(&round.update, self.graph.reducers());
                    working.step += 1;
                    let next = self.resolve_next(&round.join, &mut working).await;
                    (round.join, next)
                }
            };

            match next {
                Ok(cursor) => working.cursor = cursor,
                Err(error) => return Err(self.fail_route(persisted, &stage, error).await),
            }
            if working.cursor.is_end() {
                working.status = SessionStatus::Completed;
            }

            self.persist(&mut working).await?;
            persisted = working.clone();

            if working.status == SessionStatus::Completed {
                if token.is_cancelled() {
                    return Err(self.cancel_session(persisted, &cancel_reason(token)).await);
                }
                info!(stage = %stage, steps = working.step, "Session completed");
                self.emit(
                    EngineEvent::new(event_types::SESSION_COMPLETED, &working.session_id)
                        .with_stage(stage)
                        .with_data(json!({"step": working.step})),
                )
                .await;
                return Ok(SessionStatus::Completed);
            }
        }
    }

    /// Writes a checkpoint, bumping its version first.
    pub(super) async fn persist(&self, checkpoint: &mut Checkpoint) -> Result<(), GraphError> {
        checkpoint.seal();
        self.store.save(checkpoint).await?;
        debug!(
            version = checkpoint.version,
            cursor = %checkpoint.cursor,
            status = %checkpoint.status,
            "Checkpoint saved"
        );
        self.emit(
            EngineEvent::new(event_types::CHECKPOINT_SAVED, &checkpoint.session_id).with_data(
                json!({
                    "version": checkpoint.version,
                    "cursor": checkpoint.cursor.to_string(),
                    "status": checkpoint.status,
                    "step": checkpoint.step,
                }),
            ),
        )
        .await;
        Ok(())
    }

    /// Records `failure` on the last persisted checkpoint and returns `err`.
    pub(super) async fn mark_failed(
        &self,
        mut checkpoint: Checkpoint,
        failure: StageFailure,
        err: GraphError,
    ) -> GraphError {
        error!(
            stage = %failure.stage,
            kind = ?failure.kind,
            error = %failure.message,
            "Session failed"
        );
        checkpoint.status = SessionStatus::Failed;
        checkpoint.interrupt_pending = false;
        checkpoint.failure = Some(failure.clone());
        if let Err(store_err) = self.persist(&mut checkpoint).await {
            error!(error = %store_err, "Could not persist session failure");
        }
        self.emit(
            EngineEvent::new(event_types::SESSION_FAILED, &checkpoint.session_id)
                .with_stage(failure.stage.clone())
                .with_data(json!({"kind": failure.kind, "message": failure.message})),
        )
        .await;
        err
    }

    async fn fail_route(&self, checkpoint: Checkpoint, stage: &str, error: RouteError) -> GraphError {
        let failure = StageFailure::from_route(stage, &error);
        self.mark_failed(checkpoint, failure, GraphError::Route(error))
            .await
    }

    async fn pause(
        &self,
        mut working: Checkpoint,
        stage: &str,
        token: &CancellationToken,
    ) -> Result<SessionStatus, GraphError> {
        working.status = SessionStatus::Paused;
        working.interrupt_pending = true;
        self.persist(&mut working).await?;
        if token.is_cancelled() {
            return Err(self.cancel_session(working, &cancel_reason(token)).await);
        }

        info!(stage = %stage, "Session paused before interrupt point");
        self.emit(
            EngineEvent::new(event_types::SESSION_PAUSED, &working.session_id).with_stage(stage),
        )
        .await;
        Ok(SessionStatus::Paused)
    }

    fn count_step(&self, steps: &mut u64, stage: &str) -> Result<(), RouteError> {
        if *steps >= self.config.max_steps {
            return Err(RouteError::StepLimitExceeded {
                stage: stage.to_string(),
                limit: self.config.max_steps,
            });
        }
        *steps += 1;
        Ok(())
    }

    async fn run_single(
        &self,
        working: &Checkpoint,
        stage: &str,
    ) -> Result<StateUpdate, StageFailure> {
        let Some(spec) = self.graph.stage_spec(stage) else {
            return Err(StageFailure::new(
                stage,
                FailureKind::Route,
                "stage is not registered in this graph",
            ));
        };

        debug!(stage = %stage, step = working.step, "Running stage");
        self.emit(EngineEvent::new(event_types::STAGE_STARTED, &working.session_id).with_stage(stage))
            .await;

        let input = StageInput::new(working.session_id.clone(), stage, working.state.clone());
        let timeout = self.config.stage_timeout(stage, spec.timeout);
        let result = invoke_stage(spec.runner.clone(), stage.to_string(), input, timeout).await;
        self.report_stage(working, stage, &result).await;
        result
    }

    /// Emits the completion or failure event of one stage invocation.
    pub(super) async fn report_stage(
        &self,
        working: &Checkpoint,
        stage: &str,
        result: &Result<StateUpdate, StageFailure>,
    ) {
        let event = match result {
            Ok(update) => {
                debug!(stage = %stage, fields = update.len(), "Stage completed");
                EngineEvent::new(event_types::STAGE_COMPLETED, &working.session_id)
                    .with_data(json!({"fields": update.len()}))
            }
            Err(failure) => {
                if failure.kind == FailureKind::Timeout {
                    warn!(stage = %stage, error = %failure.message, "Stage timed out");
                } else {
                    debug!(stage = %stage, error = %failure.message, "Stage failed");
                }
                EngineEvent::new(event_types::STAGE_FAILED, &working.session_id)
                    .with_data(json!({"kind": failure.kind, "message": failure.message}))
            }
        };
        self.emit(event.with_stage(stage)).await;
    }

    /// Resolves the cursor that follows `stage`, updating feedback counters.
    async fn resolve_next(
        &self,
        stage: &str,
        working: &mut Checkpoint,
    ) -> Result<Cursor, RouteError> {
        if self.graph.is_terminal(stage) {
            return Ok(Cursor::End);
        }
        match self.graph.transition(stage) {
            Some(Transition::Fixed(target)) => Ok(Cursor::Stage(target.clone())),
            Some(Transition::FanOut(_)) => Ok(Cursor::FanOut(stage.to_string())),
            Some(Transition::Conditional(edge)) => self.route(stage, edge, working).await,
            None => Err(RouteError::Unresolved {
                stage: stage.to_string(),
                label: String::new(),
            }),
        }
    }

    async fn route(
        &self,
        stage: &str,
        edge: &ConditionalEdge,
        working: &mut Checkpoint,
    ) -> Result<Cursor, RouteError> {
        let returned = std::panic::catch_unwind(AssertUnwindSafe(|| edge.evaluate(&working.state)))
            .map_err(|payload| RouteError::RouterPanicked {
                stage: stage.to_string(),
                message: panic_message(payload.as_ref()),
            })?;
        if !edge.labels().contains(&returned) {
            return Err(RouteError::UndeclaredLabel {
                stage: stage.to_string(),
                label: returned,
            });
        }
        let unresolved = |label: &str| RouteError::Unresolved {
            stage: stage.to_string(),
            label: label.to_string(),
        };

        let mut label = returned.clone();
        let mut forced = false;
        if let Some(feedback) = edge.feedback_spec().filter(|f| f.label == returned) {
            let target = edge.target_for(&label).ok_or_else(|| unresolved(&label))?;
            let id = edge_id(stage, target);
            let limit = self.config.feedback_limit(&id, feedback.max_iterations);
            let count = working.counter(&id);

            if count >= limit {
                warn!(
                    edge = %id,
                    limit,
                    exit_label = %feedback.exit_label,
                    "Feedback iterations exhausted, forcing exit route"
                );
                self.emit(
                    EngineEvent::new(event_types::FEEDBACK_EXHAUSTED, &working.session_id)
                        .with_stage(stage)
                        .with_data(json!({
                            "edge": id,
                            "limit": limit,
                            "router_label": returned,
                            "exit_label": feedback.exit_label,
                        })),
                )
                .await;
                label = feedback.exit_label.clone();
                forced = true;
            } else {
                working.iteration_counters.insert(id, count + 1);
            }
        }

        let target = edge
            .target_for(&label)
            .ok_or_else(|| unresolved(&label))?
            .to_string();
        debug!(stage = %stage, label = %label, target = %target, forced, "Route selected");
        self.emit(
            EngineEvent::new(event_types::ROUTE_SELECTED, &working.session_id)
                .with_stage(stage)
                .with_data(json!({"label": label, "target": target, "forced": forced})),
        )
        .await;
        Ok(Cursor::Stage(target))
    }
}

/// Runs one stage invocation with timeout and panic isolation.
///
/// The returned future owns its inputs so fan-out children can be spawned.
pub(super) async fn invoke_stage(
    runner: Arc<dyn Stage>,
    stage: String,
    input: StageInput,
    timeout: Option<Duration>,
) -> Result<StateUpdate, StageFailure> {
    let execution = AssertUnwindSafe(async move { runner.execute(&input).await }).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, execution).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(StageFailure::new(
                    stage,
                    FailureKind::Timeout,
                    format!("timed out after {}ms", limit.as_millis()),
                ))
            }
        },
        None => execution.await,
    };

    let output = match outcome {
        Ok(output) => output,
        Err(payload) => {
            return Err(StageFailure::new(
                stage,
                FailureKind::Panic,
                panic_message(payload.as_ref()),
            ))
        }
    };

    if output.is_failure() {
        let message = output
            .error
            .unwrap_or_else(|| "stage reported failure".to_string());
        let failure = StageFailure::new(stage, FailureKind::Stage, message);
        return Err(match output.details {
            Some(details) => failure.with_details(details),
            None => failure,
        });
    }
    Ok(output.update)
}

fn cancel_reason(token: &CancellationToken) -> String {
    token.reason().unwrap_or_else(|| "aborted".to_string())
}
