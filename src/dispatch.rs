//! The shared execution lifecycle: validate, run the agent's step under the
//! retry policy, hand off to a registered fallback on permanent failure, and
//! assemble the [`AgentResult`].
//!
//! A fallback success is reported as `success_via_fallback`; consumers that
//! only check `is_success()` cannot tell the difference, which is the point.

use crate::agent::{Agent, AgentContext};
use crate::fallback::FallbackRegistry;
use crate::provider::Provider;
use crate::retry::{RetryError, RetryRunner, RetryTimings};
use crate::task::{AgentResult, AgentTask, Outcome, TaskMetrics};
use crate::time::{Clock, Deadline, Sleeper};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Dispatcher {
    retry: RetryRunner,
    default_timings: RetryTimings,
    timing_overrides: HashMap<Provider, RetryTimings>,
    fallbacks: Arc<FallbackRegistry>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        fallbacks: Arc<FallbackRegistry>,
        default_timings: RetryTimings,
        timing_overrides: HashMap<Provider, RetryTimings>,
    ) -> Self {
        Self {
            retry: RetryRunner::new(clock.clone(), sleeper),
            default_timings,
            timing_overrides,
            fallbacks,
            clock,
        }
    }

    fn timings_for(&self, provider: Provider) -> &RetryTimings {
        self.timing_overrides.get(&provider).unwrap_or(&self.default_timings)
    }

    /// Run one task through one agent, including fallback handoff.
    pub async fn execute(
        &self,
        ctx: &AgentContext,
        agent: &dyn Agent,
        task: &AgentTask,
        deadline: Deadline,
    ) -> AgentResult {
        let started_at_millis = self.clock.now_millis();

        if let Err(err) = agent.validate(task) {
            tracing::debug!(task = %task.id, kind = %task.kind, %err, "task rejected at validation");
            return self.result(task, started_at_millis, Outcome::Failure, serde_json::Value::Null, Some(err.to_string()), Some(agent.provider()), 0, false, None);
        }

        let attempts = AtomicUsize::new(0);
        let timings = self.timings_for(agent.provider());
        let outcome = self
            .retry
            .run(timings, deadline, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                agent.step(ctx, task, deadline)
            })
            .await;
        let attempts = attempts.load(Ordering::SeqCst);

        match outcome {
            Ok(data) => self.result(
                task,
                started_at_millis,
                Outcome::Success,
                data,
                None,
                Some(agent.provider()),
                attempts,
                false,
                None,
            ),
            Err(err) if err.fallback_eligible() => {
                self.try_fallback(ctx, task, deadline, started_at_millis, attempts, err).await
            }
            Err(err) => {
                tracing::warn!(task = %task.id, kind = %task.kind, %err, "task failed");
                self.result(
                    task,
                    started_at_millis,
                    Outcome::Failure,
                    serde_json::Value::Null,
                    Some(err.to_string()),
                    Some(agent.provider()),
                    attempts,
                    false,
                    None,
                )
            }
        }
    }

    async fn try_fallback(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
        started_at_millis: u64,
        attempts: usize,
        primary_err: RetryError,
    ) -> AgentResult {
        let Some(fallback) = self.fallbacks.get(task.kind) else {
            tracing::warn!(task = %task.id, kind = %task.kind, err = %primary_err, "no fallback registered, task failed");
            return self.result(
                task,
                started_at_millis,
                Outcome::Failure,
                serde_json::Value::Null,
                Some(primary_err.to_string()),
                None,
                attempts,
                false,
                None,
            );
        };

        tracing::warn!(
            task = %task.id,
            kind = %task.kind,
            err = %primary_err,
            "primary agent failed, engaging local fallback"
        );
        match fallback.step(ctx, task, deadline).await {
            Ok(data) => self.result(
                task,
                started_at_millis,
                Outcome::SuccessViaFallback,
                data,
                None,
                Some(fallback.provider()),
                attempts,
                true,
                Some(primary_err.to_string()),
            ),
            Err(fb_err) => {
                tracing::error!(task = %task.id, kind = %task.kind, %fb_err, "fallback failed too");
                self.result(
                    task,
                    started_at_millis,
                    Outcome::Failure,
                    serde_json::Value::Null,
                    Some(format!("{primary_err}; fallback: {fb_err}")),
                    Some(fallback.provider()),
                    attempts,
                    true,
                    Some(primary_err.to_string()),
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        &self,
        task: &AgentTask,
        started_at_millis: u64,
        outcome: Outcome,
        data: serde_json::Value,
        error: Option<String>,
        provider: Option<Provider>,
        attempts: usize,
        fallback_used: bool,
        primary_failure: Option<String>,
    ) -> AgentResult {
        let duration =
            Duration::from_millis(self.clock.now_millis().saturating_sub(started_at_millis));
        AgentResult {
            task_id: task.id.clone(),
            outcome,
            data,
            error,
            metrics: TaskMetrics {
                started_at_millis,
                duration,
                provider,
                attempts,
                fallback_used,
                primary_failure,
            },
        }
    }
}
