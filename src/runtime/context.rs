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
//! In-memory evaluation context.
//!
//! Responsibilities:
//! - Commits evaluation results atomically under one lock: output bundles,
//!   per-consumer pending-work counts, timer registration and delivery.
//! - Answers `is_done` from the pending-work view of the pipeline: all
//!   sources exhausted, no committed-but-unprocessed bundles, no timers
//!   outstanding.
//!
//! Timer semantics: processing-time timers fire once their instant passes;
//! event-time timers fire once the pipeline has otherwise run dry, which is
//! when the watermark of every transform has reached the end of time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use chrono::Utc;

use crate::common::ids::{CollectionId, TransformId};
use crate::exec::bundle::{Bundle, KeyedBundleBuilder, StructuralKey, UncommittedBundle};
use crate::exec::context::{EvaluationContext, PipelineOptions};
use crate::exec::evaluator::TransformResult;
use crate::exec::graph::PipelineGraph;
use crate::exec::timers::{FiredTimers, TimeDomain, TimerData};

type TimerSlot = (TransformId, StructuralKey, String, TimeDomain);

struct ContextState {
    /// Bundles committed into each transform's input collection and not yet
    /// evaluated. In-flight evaluations keep their count non-zero.
    pending: HashMap<TransformId, usize>,
    exhausted_roots: HashSet<TransformId>,
    /// Registered timers that have not fired. `(tag, domain)` overwrites.
    timers: HashMap<TimerSlot, TimerData>,
    /// Fired timers handed to the executor and not yet confirmed delivered.
    in_flight: HashMap<(TransformId, StructuralKey), Vec<TimerData>>,
}

impl ContextState {
    fn drained(&self) -> bool {
        self.pending.values().all(|&n| n == 0) && self.in_flight.is_empty()
    }
}

/// Evaluation context keeping all pipeline state in process memory.
pub struct InMemoryEvaluationContext {
    graph: Arc<PipelineGraph>,
    options: PipelineOptions,
    state: Mutex<ContextState>,
}

impl InMemoryEvaluationContext {
    pub fn new(graph: Arc<PipelineGraph>, options: PipelineOptions) -> Arc<Self> {
        Arc::new(Self {
            graph,
            options,
            state: Mutex::new(ContextState {
                pending: HashMap::new(),
                exhausted_roots: HashSet::new(),
                timers: HashMap::new(),
                in_flight: HashMap::new(),
            }),
        })
    }

    /// Commit a bundle produced outside any evaluation, registering it as
    /// pending work for every consumer of its collection. Used to seed input.
    pub fn commit_seed_bundle(&self, staged: UncommittedBundle) -> Result<Arc<Bundle>> {
        let mut state = self.state.lock().expect("evaluation context lock");
        self.commit_one(&mut state, None, staged)
    }

    fn commit_one(
        &self,
        state: &mut ContextState,
        producer: Option<TransformId>,
        staged: UncommittedBundle,
    ) -> Result<Arc<Bundle>> {
        if self.graph.is_keyed(staged.collection()) && staged.key().is_none() {
            bail!(
                "bundle for keyed collection {} is missing a key",
                staged.collection()
            );
        }
        let bundle = staged.commit(producer, Utc::now());
        for consumer in self.graph.consumers(bundle.collection()) {
            *state.pending.entry(consumer.id()).or_insert(0) += 1;
        }
        Ok(bundle)
    }

    fn all_roots_exhausted(&self, state: &ContextState) -> bool {
        self.graph
            .roots()
            .iter()
            .all(|root| state.exhausted_roots.contains(&root.id()))
    }
}

impl EvaluationContext for InMemoryEvaluationContext {
    fn handle_result(
        &self,
        input: Option<&Arc<Bundle>>,
        fired_timers: &[TimerData],
        result: TransformResult,
    ) -> Result<Vec<Arc<Bundle>>> {
        let mut state = self.state.lock().expect("evaluation context lock");
        let transform = result.transform;

        if !fired_timers.is_empty() {
            // A timer delivery: confirm the timers instead of consuming
            // pending input (the synthesized bundle was never registered).
            if let Some(key) = input.and_then(|b| b.key()).cloned() {
                let slot = (transform, key);
                if let Some(outstanding) = state.in_flight.get_mut(&slot) {
                    outstanding.retain(|t| !fired_timers.contains(t));
                    if outstanding.is_empty() {
                        state.in_flight.remove(&slot);
                    }
                }
            }
        } else if input.is_some() {
            // One pending input consumed. Bundles seeded behind the
            // context's back simply leave the count untouched.
            if let Some(n) = state.pending.get_mut(&transform) {
                *n = n.saturating_sub(1);
            }
        }

        let mut committed = Vec::with_capacity(result.outputs.len());
        for staged in result.outputs {
            committed.push(self.commit_one(&mut state, Some(transform), staged)?);
        }

        for (key, timer) in result.set_timers {
            state
                .timers
                .insert((transform, key, timer.tag.clone(), timer.domain), timer);
        }
        if result.source_exhausted {
            state.exhausted_roots.insert(transform);
        }

        Ok(committed)
    }

    fn extract_fired_timers(&self) -> Result<Vec<FiredTimers>> {
        let mut state = self.state.lock().expect("evaluation context lock");
        let now = Utc::now();
        let event_time_ready = self.all_roots_exhausted(&state) && state.drained();

        let due: Vec<TimerSlot> = state
            .timers
            .iter()
            .filter(|(_, timer)| match timer.domain {
                TimeDomain::EventTime => event_time_ready,
                TimeDomain::ProcessingTime | TimeDomain::SynchronizedProcessingTime => {
                    timer.timestamp <= now
                }
            })
            .map(|(slot, _)| slot.clone())
            .collect();

        let mut groups: HashMap<(TransformId, StructuralKey), FiredTimers> = HashMap::new();
        for slot in due {
            let Some(timer) = state.timers.remove(&slot) else {
                continue;
            };
            let (transform, key, _, _) = slot;
            state
                .in_flight
                .entry((transform, key.clone()))
                .or_insert_with(Vec::new)
                .push(timer.clone());
            groups
                .entry((transform, key.clone()))
                .or_insert_with(|| FiredTimers::new(transform, key))
                .push(timer);
        }
        Ok(groups.into_values().collect())
    }

    fn is_done(&self) -> bool {
        let state = self.state.lock().expect("evaluation context lock");
        self.all_roots_exhausted(&state) && state.drained() && state.timers.is_empty()
    }

    fn create_keyed_bundle(
        &self,
        producer: Option<TransformId>,
        key: StructuralKey,
        collection: CollectionId,
    ) -> KeyedBundleBuilder {
        KeyedBundleBuilder::new(producer, key, collection)
    }

    fn options(&self) -> &PipelineOptions {
        &self.options
    }
}
