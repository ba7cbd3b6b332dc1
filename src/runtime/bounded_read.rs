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
//! Bounded in-memory sources for root transforms.
//!
//! Reader state is cached per transform so repeated root activations resume
//! where the previous one stopped instead of re-reading data. Each activation
//! emits at most one batch; once the source is empty it keeps reporting
//! exhaustion, so spurious activations are harmless.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow, bail};

use crate::common::ids::{CollectionId, TransformId};
use crate::exec::bundle::{Bundle, StructuralKey, UncommittedBundle, WindowedValue, WorkItem};
use crate::exec::context::EvaluationContext;
use crate::exec::evaluator::{TransformEvaluator, TransformResult};
use crate::exec::graph::TransformNode;
use crate::runtime::registry::EvaluatorFactory;

struct SourceState {
    remaining: VecDeque<(Option<StructuralKey>, WindowedValue)>,
    batch_size: usize,
}

struct SourcePool {
    sources: Mutex<HashMap<TransformId, SourceState>>,
    activations: AtomicUsize,
}

/// Factory producing root evaluators over registered in-memory sources.
#[derive(Clone)]
pub struct BoundedReadFactory {
    pool: Arc<SourcePool>,
}

impl BoundedReadFactory {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(SourcePool {
                sources: Mutex::new(HashMap::new()),
                activations: AtomicUsize::new(0),
            }),
        }
    }

    /// Register the elements a root will emit, with an optional key per
    /// element. Each activation drains at most `batch_size` elements.
    pub fn register(
        &self,
        transform: TransformId,
        elements: Vec<(Option<StructuralKey>, WindowedValue)>,
        batch_size: usize,
    ) {
        let mut sources = self.pool.sources.lock().expect("bounded source lock");
        sources.insert(
            transform,
            SourceState {
                remaining: elements.into(),
                batch_size: batch_size.max(1),
            },
        );
    }

    /// Register unkeyed elements.
    pub fn register_values(
        &self,
        transform: TransformId,
        values: Vec<WindowedValue>,
        batch_size: usize,
    ) {
        self.register(
            transform,
            values.into_iter().map(|v| (None, v)).collect(),
            batch_size,
        );
    }

    /// Number of root activations served so far, across all sources.
    pub fn activations(&self) -> usize {
        self.pool.activations.load(Ordering::SeqCst)
    }
}

impl Default for BoundedReadFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorFactory for BoundedReadFactory {
    fn for_application(
        &self,
        transform: &Arc<TransformNode>,
        input: Option<&Arc<Bundle>>,
        _context: &Arc<dyn EvaluationContext>,
    ) -> Result<Box<dyn TransformEvaluator>> {
        if input.is_some() {
            bail!(
                "bounded read {} takes no input bundle",
                transform.full_name()
            );
        }
        let output = transform
            .outputs()
            .first()
            .copied()
            .ok_or_else(|| anyhow!("bounded read {} has no output", transform.full_name()))?;
        Ok(Box::new(BoundedReadEvaluator {
            pool: Arc::clone(&self.pool),
            transform: Arc::clone(transform),
            output,
        }))
    }
}

struct BoundedReadEvaluator {
    pool: Arc<SourcePool>,
    transform: Arc<TransformNode>,
    output: CollectionId,
}

impl TransformEvaluator for BoundedReadEvaluator {
    fn start_bundle(&mut self, _input: Option<&Arc<Bundle>>) -> Result<()> {
        Ok(())
    }

    fn process_element(&mut self, _element: &WorkItem) -> Result<()> {
        bail!(
            "bounded read {} received an input element",
            self.transform.full_name()
        )
    }

    fn finish_bundle(&mut self) -> Result<TransformResult> {
        self.pool.activations.fetch_add(1, Ordering::SeqCst);
        let mut result = TransformResult::new(self.transform.id());
        let mut sources = self.pool.sources.lock().expect("bounded source lock");
        let Some(source) = sources.get_mut(&self.transform.id()) else {
            bail!(
                "no bounded source registered for {}",
                self.transform.full_name()
            );
        };

        if source.remaining.is_empty() {
            result.mark_source_exhausted();
            return Ok(result);
        }

        // One batch per activation, split into one bundle per key so keyed
        // collections see correctly keyed bundles.
        let take = source.batch_size.min(source.remaining.len());
        let mut batches: Vec<(Option<StructuralKey>, UncommittedBundle)> = Vec::new();
        for _ in 0..take {
            let Some((key, value)) = source.remaining.pop_front() else {
                break;
            };
            match batches.iter_mut().find(|(k, _)| *k == key) {
                Some((_, staged)) => {
                    staged.add(value);
                }
                None => {
                    let mut staged = match &key {
                        Some(k) => UncommittedBundle::keyed(self.output, k.clone()),
                        None => UncommittedBundle::new(self.output),
                    };
                    staged.add(value);
                    batches.push((key, staged));
                }
            }
        }
        for (_, staged) in batches {
            result.add_output(staged);
        }
        if source.remaining.is_empty() {
            result.mark_source_exhausted();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::exec::context::PipelineOptions;
    use crate::exec::graph::PipelineGraph;
    use crate::runtime::context::InMemoryEvaluationContext;

    fn keyed_source_fixture() -> (
        Arc<TransformNode>,
        Arc<dyn EvaluationContext>,
        BoundedReadFactory,
    ) {
        let mut builder = PipelineGraph::builder();
        let out = builder.new_keyed_collection();
        let source = builder.add_root("read/keyed", vec![out]);
        let graph = builder.build();
        let context: Arc<dyn EvaluationContext> =
            InMemoryEvaluationContext::new(graph, PipelineOptions::default());
        (source, context, BoundedReadFactory::new())
    }

    fn activate(
        factory: &BoundedReadFactory,
        source: &Arc<TransformNode>,
        context: &Arc<dyn EvaluationContext>,
    ) -> TransformResult {
        let mut evaluator = factory
            .for_application(source, None, context)
            .expect("root evaluator");
        evaluator.start_bundle(None).expect("start");
        evaluator.finish_bundle().expect("finish")
    }

    #[test]
    fn emits_one_batch_per_activation_then_exhausts() {
        let (source, context, factory) = keyed_source_fixture();
        let key = StructuralKey::of(b"k".to_vec());
        factory.register(
            source.id(),
            (0..3)
                .map(|i| (Some(key.clone()), WindowedValue::new(i, Utc::now())))
                .collect(),
            2,
        );

        let first = activate(&factory, &source, &context);
        assert_eq!(first.outputs.len(), 1);
        assert!(!first.source_exhausted);

        let second = activate(&factory, &source, &context);
        assert_eq!(second.outputs.len(), 1);
        assert!(second.source_exhausted, "last element drains the source");

        let third = activate(&factory, &source, &context);
        assert!(third.outputs.is_empty());
        assert!(third.source_exhausted, "exhaustion reports are idempotent");
        assert_eq!(factory.activations(), 3);
    }

    #[test]
    fn splits_batches_by_key() {
        let (source, context, factory) = keyed_source_fixture();
        let k1 = StructuralKey::of(b"k1".to_vec());
        let k2 = StructuralKey::of(b"k2".to_vec());
        factory.register(
            source.id(),
            vec![
                (Some(k1.clone()), WindowedValue::new(1, Utc::now())),
                (Some(k2.clone()), WindowedValue::new(2, Utc::now())),
                (Some(k1.clone()), WindowedValue::new(3, Utc::now())),
            ],
            16,
        );

        let result = activate(&factory, &source, &context);
        assert!(result.source_exhausted);
        assert_eq!(result.outputs.len(), 2);
        let k1_bundle = result
            .outputs
            .iter()
            .find(|b| b.key() == Some(&k1))
            .expect("k1 bundle");
        assert!(!k1_bundle.is_empty());
    }

    #[test]
    fn unregistered_source_is_an_error() {
        let (source, context, factory) = keyed_source_fixture();
        let mut evaluator = factory
            .for_application(&source, None, &context)
            .expect("root evaluator");
        evaluator.start_bundle(None).expect("start");
        let err = evaluator.finish_bundle().expect_err("missing source");
        assert!(format!("{err:#}").contains("no bounded source"));
    }
}
