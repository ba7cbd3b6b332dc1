// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! One-shot evaluation of a `(transform, input bundle)` pair.
//!
//! Responsibilities:
//! - Drives the registry-provided evaluator over the input bundle and reports
//!   the outcome through exactly one completion callback invocation.
//! - Releases its admission slot unconditionally so queued work can proceed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Result, anyhow};

use crate::exec::bundle::Bundle;
use crate::exec::context::EvaluationContext;
use crate::exec::evaluator::{EvaluatorRegistry, TransformResult};
use crate::exec::graph::TransformNode;
use crate::exec::pipeline::executor_service::TransformExecutorService;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Receives the outcome of one evaluation. Implementations are invoked from
/// worker threads and must be safe under concurrent calls for different
/// transforms.
pub trait CompletionCallback: Send + Sync {
    fn handle_result(
        &self,
        input: Option<&Arc<Bundle>>,
        transform: &Arc<TransformNode>,
        result: TransformResult,
    );

    fn handle_throwable(
        &self,
        input: Option<&Arc<Bundle>>,
        transform: &Arc<TransformNode>,
        error: anyhow::Error,
    );
}

/// A single schedulable evaluation.
///
/// Every failure mode of the evaluator, including a panic, is reported
/// through the callback; nothing escapes to the worker pool. The admitter is
/// notified of completion last, after the callback has committed or reported,
/// so per-key successors observe this evaluation's effects.
pub struct TransformExecutor {
    id: u64,
    registry: Arc<dyn EvaluatorRegistry>,
    context: Arc<dyn EvaluationContext>,
    input: Option<Arc<Bundle>>,
    transform: Arc<TransformNode>,
    callback: Arc<dyn CompletionCallback>,
    admitter: Weak<dyn TransformExecutorService>,
}

impl TransformExecutor {
    pub(crate) fn new(
        registry: Arc<dyn EvaluatorRegistry>,
        context: Arc<dyn EvaluationContext>,
        input: Option<Arc<Bundle>>,
        transform: Arc<TransformNode>,
        callback: Arc<dyn CompletionCallback>,
        admitter: Weak<dyn TransformExecutorService>,
    ) -> Self {
        Self {
            id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
            registry,
            context,
            input,
            transform,
            callback,
            admitter,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn run(self) {
        let TransformExecutor {
            id,
            registry,
            context,
            input,
            transform,
            callback,
            admitter,
        } = self;

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            evaluate(&registry, &context, input.as_ref(), &transform)
        }));
        match outcome {
            Ok(Ok(result)) => callback.handle_result(input.as_ref(), &transform, result),
            Ok(Err(error)) => callback.handle_throwable(input.as_ref(), &transform, error),
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                callback.handle_throwable(
                    input.as_ref(),
                    &transform,
                    anyhow!("panic while evaluating {}: {msg}", transform.full_name()),
                );
            }
        }

        if let Some(admitter) = admitter.upgrade() {
            admitter.complete(id);
        }
    }
}

fn evaluate(
    registry: &Arc<dyn EvaluatorRegistry>,
    context: &Arc<dyn EvaluationContext>,
    input: Option<&Arc<Bundle>>,
    transform: &Arc<TransformNode>,
) -> Result<TransformResult> {
    let mut evaluator = registry.for_application(transform, input, context)?;
    evaluator.start_bundle(input)?;
    if let Some(bundle) = input {
        for element in bundle.elements() {
            evaluator.process_element(element)?;
        }
    }
    evaluator.finish_bundle()
}
