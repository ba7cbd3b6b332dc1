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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use rillflow::exec::bundle::WorkItem;
use rillflow::exec::context::EvaluationContext;
use rillflow::exec::graph::PipelineGraph;
use rillflow::rillflow_logging;
use rillflow::runtime::fn_evaluator::FnEvaluatorFactory;
use rillflow::runtime::registry::TransformRegistry;
use rillflow::{ParallelExecutor, WorkerPool};

pub fn init_logging() {
    rillflow_logging::init_with_level("warn");
}

/// Build the executor over a fresh pool, start it from the graph's roots, and
/// block until the pipeline terminates.
pub fn run_pipeline(
    graph: Arc<PipelineGraph>,
    registry: TransformRegistry,
    context: Arc<dyn EvaluationContext>,
    workers: usize,
) -> Result<()> {
    let executor = ParallelExecutor::new(
        WorkerPool::new(workers),
        Arc::clone(&graph),
        Arc::new(registry),
        context,
    );
    executor.start(graph.roots().to_vec());
    executor.await_completion()
}

/// Shared log of `(key, value)` observations, in arrival order.
pub type Observations = Arc<Mutex<Vec<(String, i32)>>>;

pub fn observations() -> Observations {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn observed_for_key(observations: &Observations, key: &str) -> Vec<i32> {
    observations
        .lock()
        .expect("observations lock")
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| *v)
        .collect()
}

pub fn int_element(element: &WorkItem) -> Result<i32> {
    element
        .as_value()
        .and_then(|v| v.downcast_ref::<i32>())
        .copied()
        .ok_or_else(|| anyhow!("element is not an i32 value"))
}

/// Evaluator factory recording every `(key, value)` element it sees.
pub fn recording_factory(observations: Observations) -> Arc<FnEvaluatorFactory> {
    Arc::new(FnEvaluatorFactory::new(
        move |_transform, key, element, _result| {
            let value = int_element(element)?;
            let key = key.map(|k| k.to_string()).unwrap_or_default();
            observations
                .lock()
                .expect("observations lock")
                .push((key, value));
            Ok(())
        },
    ))
}
