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
//! Top-level pipeline executor entrypoint.
//!
//! Responsibilities:
//! - Routes each scheduled `(consumer, bundle)` pair to the right admission
//!   service: a serial per-`(transform, key)` slot for keyed bundles, the
//!   shared parallel service otherwise.
//! - Owns the update queues and completion callbacks closing the loop between
//!   worker threads and the monitor.
//! - Exposes the public surface: `start`, `await_completion`,
//!   `schedule_consumption`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::common::ids::TransformId;
use crate::common::logging::{debug, error, info};
use crate::exec::bundle::{Bundle, StructuralKey};
use crate::exec::context::EvaluationContext;
use crate::exec::evaluator::{EvaluatorRegistry, TransformResult};
use crate::exec::graph::{PipelineGraph, TransformNode};
use crate::exec::pipeline::executor_service::{
    ParallelExecutorService, ScheduledSet, SerialExecutorService, TransformExecutorService,
    parallel, serial,
};
use crate::exec::pipeline::monitor::MonitorTask;
use crate::exec::pipeline::transform_executor::{CompletionCallback, TransformExecutor};
use crate::exec::pipeline::update::{ExecutorUpdate, VisibleUpdate, VisibleUpdates};
use crate::exec::pipeline::worker_pool::ExecutorService;
use crate::exec::timers::TimerData;

const VISIBLE_UPDATE_CAPACITY: usize = 20;

/// Identity of a serial execution slot: one transform paired with one key.
/// Evaluations with equal slots run serially; different slots may run in
/// parallel subject to pool capacity.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct StepAndKey {
    transform: TransformId,
    key: Option<StructuralKey>,
}

impl StepAndKey {
    pub(crate) fn new(transform: TransformId, key: Option<StructuralKey>) -> Self {
        Self { transform, key }
    }
}

/// Drives a pipeline graph to completion on a shared worker pool.
pub struct ParallelExecutor {
    inner: Arc<ExecutorInner>,
}

impl ParallelExecutor {
    pub fn new(
        pool: Arc<dyn ExecutorService>,
        graph: Arc<PipelineGraph>,
        registry: Arc<dyn EvaluatorRegistry>,
        context: Arc<dyn EvaluationContext>,
    ) -> Self {
        let scheduled = ScheduledSet::new();
        let parallel_service = parallel(Arc::clone(&pool), Arc::clone(&scheduled));
        let (updates_tx, updates_rx) = unbounded();
        let default_callback: Arc<dyn CompletionCallback> = Arc::new(DefaultCompletionCallback {
            context: Arc::clone(&context),
            updates: updates_tx.clone(),
        });
        Self {
            inner: Arc::new(ExecutorInner {
                pool,
                graph,
                registry,
                context,
                current_evaluations: Mutex::new(HashMap::new()),
                scheduled,
                parallel_service,
                updates_tx,
                updates_rx,
                visible_updates: VisibleUpdates::new(VISIBLE_UPDATE_CAPACITY),
                roots: OnceLock::new(),
                default_callback,
            }),
        }
    }

    /// Record the root transforms and submit the monitor. Non-blocking; the
    /// root set is immutable afterwards.
    pub fn start(&self, roots: Vec<Arc<TransformNode>>) {
        let options = self.inner.context.options();
        info!(
            "starting pipeline executor: app={} roots={}",
            options.app_name,
            roots.len()
        );
        if self.inner.roots.set(roots).is_err() {
            error!("pipeline executor already started; ignoring duplicate start");
            return;
        }
        MonitorTask::new(Arc::clone(&self.inner)).submit();
    }

    /// Block until the pipeline reaches a terminal state. Returns normally on
    /// completion; rethrows the original failure otherwise. Shuts the pool
    /// down either way.
    pub fn await_completion(&self) -> Result<()> {
        match self.inner.visible_updates.take() {
            VisibleUpdate::Done => {
                debug!("pipeline completed; shutting down the worker pool");
                self.inner.pool.shutdown();
                Ok(())
            }
            VisibleUpdate::Failed { transform, error } => {
                match &transform {
                    Some(t) => {
                        error!(
                            "unhandled error while evaluating {}: {error:#}",
                            t.full_name()
                        )
                    }
                    None => error!("pipeline failed: {error:#}"),
                }
                self.inner.pool.shutdown();
                Err(error)
            }
        }
    }

    /// Feed one bundle to a consumer. Public so roots and tests can seed
    /// work; dispatches exactly like the monitor does.
    pub fn schedule_consumption(
        &self,
        consumer: &Arc<TransformNode>,
        bundle: Option<Arc<Bundle>>,
        on_complete: Arc<dyn CompletionCallback>,
    ) {
        self.inner.evaluate_bundle(consumer, bundle, on_complete);
    }

    pub fn default_callback(&self) -> Arc<dyn CompletionCallback> {
        self.inner.default_callback()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ExecutorInner> {
        &self.inner
    }
}

pub(crate) struct ExecutorInner {
    pub(crate) pool: Arc<dyn ExecutorService>,
    pub(crate) graph: Arc<PipelineGraph>,
    registry: Arc<dyn EvaluatorRegistry>,
    pub(crate) context: Arc<dyn EvaluationContext>,
    current_evaluations: Mutex<HashMap<StepAndKey, Arc<SerialExecutorService>>>,
    pub(crate) scheduled: Arc<ScheduledSet>,
    parallel_service: Arc<ParallelExecutorService>,
    updates_tx: Sender<ExecutorUpdate>,
    pub(crate) updates_rx: Receiver<ExecutorUpdate>,
    pub(crate) visible_updates: VisibleUpdates,
    pub(crate) roots: OnceLock<Vec<Arc<TransformNode>>>,
    default_callback: Arc<dyn CompletionCallback>,
}

impl ExecutorInner {
    /// Pick the admission service for one dispatch and hand it the
    /// evaluation. A keyed bundle goes through the serial slot for its
    /// `(transform, key)`; everything else, including a missing bundle for a
    /// root activation, runs unordered through the parallel service.
    pub(crate) fn evaluate_bundle(
        &self,
        transform: &Arc<TransformNode>,
        bundle: Option<Arc<Bundle>>,
        on_complete: Arc<dyn CompletionCallback>,
    ) {
        let service: Arc<dyn TransformExecutorService> = match bundle.as_ref() {
            Some(b) if self.graph.is_keyed(b.collection()) => {
                self.serial_service(StepAndKey::new(transform.id(), b.key().cloned()))
            }
            _ => Arc::clone(&self.parallel_service) as Arc<dyn TransformExecutorService>,
        };
        let executor = TransformExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.context),
            bundle,
            Arc::clone(transform),
            on_complete,
            Arc::downgrade(&service),
        );
        service.schedule(executor);
    }

    /// Fetch or create the serial slot for `slot`. Concurrent dispatches for
    /// the same slot converge on a single service; slots live until the
    /// executor is dropped.
    fn serial_service(&self, slot: StepAndKey) -> Arc<dyn TransformExecutorService> {
        let mut map = self
            .current_evaluations
            .lock()
            .expect("current evaluations lock");
        let service = map
            .entry(slot)
            .or_insert_with(|| serial(Arc::clone(&self.pool), Arc::clone(&self.scheduled)));
        Arc::clone(service) as Arc<dyn TransformExecutorService>
    }

    /// Dispatch a committed bundle to every consumer of its collection.
    pub(crate) fn schedule_consumers(&self, bundle: &Arc<Bundle>) {
        for consumer in self.graph.consumers(bundle.collection()) {
            self.evaluate_bundle(
                consumer,
                Some(Arc::clone(bundle)),
                Arc::clone(&self.default_callback),
            );
        }
    }

    pub(crate) fn default_callback(&self) -> Arc<dyn CompletionCallback> {
        Arc::clone(&self.default_callback)
    }

    pub(crate) fn timer_callback(&self, timers: Vec<TimerData>) -> Arc<dyn CompletionCallback> {
        Arc::new(TimerCompletionCallback {
            context: Arc::clone(&self.context),
            updates: self.updates_tx.clone(),
            timers,
        })
    }

    #[cfg(test)]
    pub(crate) fn serial_slot_count(&self) -> usize {
        self.current_evaluations
            .lock()
            .expect("current evaluations lock")
            .len()
    }
}

/// Commit one successful evaluation through the context and post every
/// committed output bundle (or the commit failure) back to the monitor.
fn post_commit(
    context: &Arc<dyn EvaluationContext>,
    updates: &Sender<ExecutorUpdate>,
    input: Option<&Arc<Bundle>>,
    transform: &Arc<TransformNode>,
    fired_timers: &[TimerData],
    result: TransformResult,
) {
    match context.handle_result(input, fired_timers, result) {
        Ok(outputs) => {
            for bundle in outputs {
                let _ = updates.send(ExecutorUpdate::Produced {
                    transform: Arc::clone(transform),
                    bundle,
                });
            }
        }
        Err(error) => {
            let _ = updates.send(ExecutorUpdate::Failed {
                transform: Some(Arc::clone(transform)),
                error,
            });
        }
    }
}

/// Completion callback for evaluations triggered by arriving elements or by
/// root activations.
struct DefaultCompletionCallback {
    context: Arc<dyn EvaluationContext>,
    updates: Sender<ExecutorUpdate>,
}

impl CompletionCallback for DefaultCompletionCallback {
    fn handle_result(
        &self,
        input: Option<&Arc<Bundle>>,
        transform: &Arc<TransformNode>,
        result: TransformResult,
    ) {
        post_commit(&self.context, &self.updates, input, transform, &[], result);
    }

    fn handle_throwable(
        &self,
        _input: Option<&Arc<Bundle>>,
        transform: &Arc<TransformNode>,
        error: anyhow::Error,
    ) {
        let _ = self.updates.send(ExecutorUpdate::Failed {
            transform: Some(Arc::clone(transform)),
            error,
        });
    }
}

/// Completion callback for evaluations whose input bundle delivered fired
/// timers. Identical to the default flavor except the delivered timers are
/// reported back to the context so it can mark them as done.
struct TimerCompletionCallback {
    context: Arc<dyn EvaluationContext>,
    updates: Sender<ExecutorUpdate>,
    timers: Vec<TimerData>,
}

impl CompletionCallback for TimerCompletionCallback {
    fn handle_result(
        &self,
        input: Option<&Arc<Bundle>>,
        transform: &Arc<TransformNode>,
        result: TransformResult,
    ) {
        post_commit(
            &self.context,
            &self.updates,
            input,
            transform,
            &self.timers,
            result,
        );
    }

    fn handle_throwable(
        &self,
        _input: Option<&Arc<Bundle>>,
        transform: &Arc<TransformNode>,
        error: anyhow::Error,
    ) {
        let _ = self.updates.send(ExecutorUpdate::Failed {
            transform: Some(Arc::clone(transform)),
            error,
        });
    }
}
