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
//! Closure-backed per-element evaluators.
//!
//! The lightweight way to express a transform body: the closure is called
//! once per element with the bundle key (if any) and the result under
//! construction. Timer deliveries arrive as elements like everything else.

use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::exec::bundle::{Bundle, StructuralKey, WorkItem};
use crate::exec::context::EvaluationContext;
use crate::exec::evaluator::{TransformEvaluator, TransformResult};
use crate::exec::graph::TransformNode;
use crate::runtime::registry::EvaluatorFactory;

/// Per-element transform body. Receives the transform node, the input
/// bundle's key when present, the element, and the result being built.
pub type ElementFn = dyn Fn(&Arc<TransformNode>, Option<&StructuralKey>, &WorkItem, &mut TransformResult) -> Result<()>
    + Send
    + Sync;

/// Factory wrapping one closure as the evaluator for a transform.
#[derive(Clone)]
pub struct FnEvaluatorFactory {
    f: Arc<ElementFn>,
}

impl FnEvaluatorFactory {
    pub fn new(
        f: impl Fn(&Arc<TransformNode>, Option<&StructuralKey>, &WorkItem, &mut TransformResult) -> Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl EvaluatorFactory for FnEvaluatorFactory {
    fn for_application(
        &self,
        transform: &Arc<TransformNode>,
        _input: Option<&Arc<Bundle>>,
        _context: &Arc<dyn EvaluationContext>,
    ) -> Result<Box<dyn TransformEvaluator>> {
        Ok(Box::new(FnEvaluator {
            f: Arc::clone(&self.f),
            transform: Arc::clone(transform),
            key: None,
            result: None,
        }))
    }
}

struct FnEvaluator {
    f: Arc<ElementFn>,
    transform: Arc<TransformNode>,
    key: Option<StructuralKey>,
    result: Option<TransformResult>,
}

impl TransformEvaluator for FnEvaluator {
    fn start_bundle(&mut self, input: Option<&Arc<Bundle>>) -> Result<()> {
        self.key = input.and_then(|b| b.key().cloned());
        self.result = Some(TransformResult::new(self.transform.id()));
        Ok(())
    }

    fn process_element(&mut self, element: &WorkItem) -> Result<()> {
        let result = self
            .result
            .as_mut()
            .ok_or_else(|| anyhow!("process_element before start_bundle"))?;
        (self.f)(&self.transform, self.key.as_ref(), element, result)
    }

    fn finish_bundle(&mut self) -> Result<TransformResult> {
        self.result
            .take()
            .ok_or_else(|| anyhow!("finish_bundle before start_bundle"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::exec::bundle::{UncommittedBundle, WindowedValue};
    use crate::exec::context::PipelineOptions;
    use crate::exec::graph::PipelineGraph;
    use crate::runtime::context::InMemoryEvaluationContext;

    #[test]
    fn closure_sees_key_and_elements_in_order() {
        let mut builder = PipelineGraph::builder();
        let keyed_in = builder.new_keyed_collection();
        let map = builder.add_transform("map/record", keyed_in, vec![]);
        let graph = builder.build();
        let context: Arc<dyn EvaluationContext> =
            InMemoryEvaluationContext::new(graph, PipelineOptions::default());

        let seen: Arc<Mutex<Vec<(String, i32)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_fn = Arc::clone(&seen);
        let factory = FnEvaluatorFactory::new(move |_t, key, element, _result| {
            let key = key.map(|k| k.to_string()).unwrap_or_default();
            let value = *element
                .as_value()
                .and_then(|v| v.downcast_ref::<i32>())
                .ok_or_else(|| anyhow!("unexpected element type"))?;
            seen_in_fn.lock().expect("seen lock").push((key, value));
            Ok(())
        });

        let key = StructuralKey::of(b"k9".to_vec());
        let mut staged = UncommittedBundle::keyed(keyed_in, key.clone());
        staged.add(WindowedValue::new(4_i32, Utc::now()));
        staged.add(WindowedValue::new(5_i32, Utc::now()));
        let bundle = staged.commit(None, Utc::now());

        let mut evaluator = factory
            .for_application(&map, Some(&bundle), &context)
            .expect("evaluator");
        evaluator.start_bundle(Some(&bundle)).expect("start");
        for element in bundle.elements() {
            evaluator.process_element(element).expect("process");
        }
        let result = evaluator.finish_bundle().expect("finish");
        assert_eq!(result.transform, map.id());
        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec![("k9".to_string(), 4), ("k9".to_string(), 5)]
        );
    }

    #[test]
    fn closure_can_stage_outputs() {
        let mut builder = PipelineGraph::builder();
        let input = builder.new_collection();
        let output = builder.new_collection();
        let map = builder.add_transform("map/double", input, vec![output]);
        let graph = builder.build();
        let context: Arc<dyn EvaluationContext> =
            InMemoryEvaluationContext::new(graph, PipelineOptions::default());

        let factory = FnEvaluatorFactory::new(move |_t, _key, element, result| {
            let value = *element
                .as_value()
                .and_then(|v| v.downcast_ref::<i32>())
                .ok_or_else(|| anyhow!("unexpected element type"))?;
            let mut staged = UncommittedBundle::new(output);
            staged.add(WindowedValue::new(value * 2, Utc::now()));
            result.add_output(staged);
            Ok(())
        });

        let mut staged = UncommittedBundle::new(input);
        staged.add(WindowedValue::new(21_i32, Utc::now()));
        let bundle = staged.commit(None, Utc::now());

        let mut evaluator = factory
            .for_application(&map, Some(&bundle), &context)
            .expect("evaluator");
        evaluator.start_bundle(Some(&bundle)).expect("start");
        evaluator
            .process_element(&bundle.elements()[0])
            .expect("process");
        let result = evaluator.finish_bundle().expect("finish");
        assert_eq!(result.outputs.len(), 1);
    }
}
