//! Reflective Reasoning Chain
//!
//! Bounded loop that descends from surface to root understanding:
//! generate a thought → reflect on its layer → decide whether to continue.
//! A completed chain (root layer, confident, root truth named) distills
//! one pattern into the memory store.
//!
//! Iterations run strictly in sequence. Transport failures count as failed
//! iterations, never as chain failures, and cancellation is honored only
//! between iterations.

pub mod reflection;
pub mod types;

pub use reflection::{derive_domain, reflect, Evaluated, PatternHint};
pub use types::{ChainConfig, ChainDecision, ChainOutcome, ChainState, Layer, Reflection, ThoughtStep};

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dispatcher::InvocationDispatcher;
use crate::error::{KernelError, KernelResult};
use crate::memory::PatternStore;

/// Drives one chain per call; holds no per-run state
pub struct ReasoningChain {
    dispatcher: Arc<InvocationDispatcher>,
    store: Arc<PatternStore>,
    config: ChainConfig,
}

impl ReasoningChain {
    pub fn new(dispatcher: Arc<InvocationDispatcher>, store: Arc<PatternStore>, config: ChainConfig) -> Self {
        Self {
            dispatcher,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Run to completion or budget exhaustion
    pub async fn run(&self, task: &str) -> KernelResult<ChainOutcome> {
        self.run_with_cancel(task, &AtomicBool::new(false)).await
    }

    /// Run, checking `cancel` before each iteration
    ///
    /// Errors only when the task is empty or the reasoning capability is not
    /// registered.
    pub async fn run_with_cancel(&self, task: &str, cancel: &AtomicBool) -> KernelResult<ChainOutcome> {
        if task.trim().is_empty() {
            return Err(KernelError::EmptyTask);
        }
        self.dispatcher
            .registry()
            .lookup(&self.config.reasoning_capability)?;

        let threshold = self.config.confidence_threshold;
        let mut state = ChainState::new(task, self.config.max_iterations);
        let mut focus = task.to_string();
        let mut hint = PatternHint::default();
        let mut cancelled = false;

        while state.has_budget() {
            if cancel.load(Ordering::SeqCst) {
                info!(iteration = state.iteration, "Chain cancelled");
                cancelled = true;
                break;
            }

            let iteration = state.iteration + 1;
            let previous = state
                .best_effort()
                .map(|s| (s.layer, s.thought_text.as_str()));
            let prompt = reflection::thought_prompt(task, &focus, previous);

            let step = match self.generate(&prompt).await {
                Ok((capability_id, thought)) => {
                    let evaluated = reflection::reflect(&thought);
                    let decision = reflection::decide(&evaluated.reflection, &state, iteration, threshold);
                    hint = evaluated.hint;

                    ThoughtStep {
                        iteration,
                        thought_text: evaluated.body,
                        layer: evaluated.reflection.layer,
                        reflection: evaluated.reflection,
                        chain_decision: decision,
                        capability_id,
                        failed: false,
                        timestamp: Utc::now(),
                    }
                }
                Err((capability_id, error)) => {
                    warn!(iteration, capability = %capability_id, "Chain iteration failed: {}", error);
                    let decision = if iteration < state.max_iterations {
                        ChainDecision::proceed(format!("Iteration failed: {}", error), focus.clone())
                    } else {
                        ChainDecision::stop(format!("Iteration failed: {}", error))
                    };

                    ThoughtStep {
                        iteration,
                        thought_text: String::new(),
                        layer: state.current_layer,
                        reflection: Reflection {
                            layer: state.current_layer,
                            is_complete: false,
                            confidence: 0.0,
                            next_step: focus.clone(),
                            found_root: None,
                        },
                        chain_decision: decision,
                        capability_id,
                        failed: true,
                        timestamp: Utc::now(),
                    }
                }
            };

            debug!(
                iteration,
                layer = step.layer.as_str(),
                confidence = step.reflection.confidence,
                continue_chaining = step.chain_decision.continue_chaining,
                reason = %step.chain_decision.reason,
                "Chain iteration"
            );

            let decision = step.chain_decision.clone();
            state.record(step, threshold);

            if !decision.continue_chaining {
                break;
            }
            if let Some(next) = decision.next_prompt {
                focus = next;
            }
        }

        let pattern = reflection::extract_pattern(&state, &hint);
        if let Some(ref p) = pattern {
            self.store.append(p.clone());
        }

        info!(
            iterations = state.iteration,
            complete = state.complete,
            layer = state.current_layer.as_str(),
            confidence = state.confidence,
            cancelled,
            "Chain finished"
        );

        Ok(ChainOutcome {
            state,
            pattern,
            cancelled,
        })
    }

    /// One thought from the reasoning capability, or its fallback
    async fn generate(&self, prompt: &str) -> Result<(String, String), (String, String)> {
        let primary = &self.config.reasoning_capability;
        let error = match self.dispatcher.invoke(primary, prompt).await {
            Ok(r) if r.success => return Ok((r.capability_id, r.payload.as_text())),
            Ok(r) => r.payload.as_text(),
            Err(e) => e.to_string(),
        };

        match self.config.fallback_capability.as_deref() {
            Some(fallback) if fallback != primary.as_str() => {
                debug!(from = %primary, to = %fallback, "Falling back for this iteration: {}", error);
                match self.dispatcher.invoke(fallback, prompt).await {
                    Ok(r) if r.success => Ok((r.capability_id, r.payload.as_text())),
                    Ok(r) => Err((fallback.to_string(), r.payload.as_text())),
                    Err(e) => Err((fallback.to_string(), e.to_string())),
                }
            }
            _ => Err((primary.clone(), error)),
        }
    }
}
