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
//! End-to-end pipeline execution tests.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;

use common::{init_logging, int_element, observations, observed_for_key, recording_factory, run_pipeline};
use rillflow::exec::bundle::{Bundle, KeyedBundleBuilder, WorkItem};
use rillflow::exec::context::EvaluationContext;
use rillflow::rillflow_config::RillflowConfig;
use rillflow::exec::evaluator::TransformResult;
use rillflow::exec::graph::PipelineGraph;
use rillflow::runtime::bounded_read::BoundedReadFactory;
use rillflow::runtime::context::InMemoryEvaluationContext;
use rillflow::runtime::fn_evaluator::FnEvaluatorFactory;
use rillflow::runtime::registry::TransformRegistry;
use rillflow::{
    CollectionId, FiredTimers, ParallelExecutor, PipelineOptions, StructuralKey, TimeDomain,
    TimerData, TransformId, UncommittedBundle, WindowedValue, WorkerPool,
};

fn key(name: &str) -> StructuralKey {
    StructuralKey::of(name.as_bytes().to_vec())
}

fn keyed_elements(pairs: &[(&str, i32)]) -> Vec<(Option<StructuralKey>, WindowedValue)> {
    pairs
        .iter()
        .map(|(k, v)| (Some(key(k)), WindowedValue::new(*v, Utc::now())))
        .collect()
}

#[test]
fn keyed_pipeline_preserves_per_key_order() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_keyed_collection();
    let source = builder.add_root("read/keyed-source", vec![source_out]);
    let map = builder.add_transform("map/per-key", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register(
        source.id(),
        keyed_elements(&[
            ("k1", 1),
            ("k1", 2),
            ("k2", 3),
            ("k2", 4),
            ("k3", 5),
            ("k3", 6),
        ]),
        6,
    );
    let seen = observations();
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(map.id(), recording_factory(Arc::clone(&seen)));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    run_pipeline(graph, registry, context, 4).expect("pipeline completes");

    assert_eq!(seen.lock().expect("observations lock").len(), 6);
    assert_eq!(observed_for_key(&seen, "k1"), vec![1, 2]);
    assert_eq!(observed_for_key(&seen, "k2"), vec![3, 4]);
    assert_eq!(observed_for_key(&seen, "k3"), vec![5, 6]);
}

#[test]
fn idle_executor_reinjects_roots_until_the_source_drains() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_collection();
    let source = builder.add_root("read/drip-source", vec![source_out]);
    let map = builder.add_transform("map/count", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register_values(
        source.id(),
        (1..=3).map(|v| WindowedValue::new(v, Utc::now())).collect(),
        1,
    );
    let seen = observations();
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources.clone()));
    registry.register(map.id(), recording_factory(Arc::clone(&seen)));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    run_pipeline(graph, registry, context, 2).expect("pipeline completes");

    // One element per activation: the monitor had to re-schedule the root at
    // least once per batch after the initial injection.
    assert!(sources.activations() >= 3, "root was rescheduled on idle");
    let mut values: Vec<i32> = seen
        .lock()
        .expect("observations lock")
        .iter()
        .map(|(_, v)| *v)
        .collect();
    values.sort();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn mid_pipeline_failure_is_rethrown_from_await_completion() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_collection();
    let source = builder.add_root("read/source", vec![source_out]);
    let map = builder.add_transform("map/fragile", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register_values(
        source.id(),
        vec![
            WindowedValue::new(1, Utc::now()),
            WindowedValue::new(2, Utc::now()),
        ],
        2,
    );
    let seen = observations();
    let seen_in_fn = Arc::clone(&seen);
    let fragile = FnEvaluatorFactory::new(move |_t, _key, element, _result| {
        let value = int_element(element)?;
        if value == 2 {
            return Err(anyhow!("boom: refusing element {value}"));
        }
        seen_in_fn
            .lock()
            .expect("observations lock")
            .push((String::new(), value));
        Ok(())
    });
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(map.id(), Arc::new(fragile));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    let err = run_pipeline(graph, registry, context, 2).expect_err("failure must surface");
    assert!(format!("{err:#}").contains("boom"), "original error is rethrown");
    // The element processed before the failure is not rolled back.
    assert_eq!(observed_for_key(&seen, ""), vec![1]);
}

#[test]
fn fired_timers_are_delivered_exactly_once_as_keyed_input() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_keyed_collection();
    let source = builder.add_root("read/keyed-source", vec![source_out]);
    let stateful = builder.add_transform("stateful/with-timers", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register(source.id(), keyed_elements(&[("k1", 10)]), 1);

    let deliveries: Arc<Mutex<Vec<(String, Vec<String>)>>> = Arc::new(Mutex::new(Vec::new()));
    let deliveries_in_fn = Arc::clone(&deliveries);
    let stateful_factory = FnEvaluatorFactory::new(move |_t, bundle_key, element, result| {
        match element {
            WorkItem::Value(_) => {
                let k = bundle_key.ok_or_else(|| anyhow!("value without key"))?;
                result.set_timer(
                    k.clone(),
                    TimerData::new("flush", Utc::now(), TimeDomain::EventTime),
                );
            }
            WorkItem::Timers(keyed) => {
                deliveries_in_fn.lock().expect("deliveries lock").push((
                    keyed.key.to_string(),
                    keyed.timers.iter().map(|t| t.tag.clone()).collect(),
                ));
            }
        }
        Ok(())
    });
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(stateful.id(), Arc::new(stateful_factory));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    run_pipeline(graph, registry, context, 2).expect("pipeline completes");

    let deliveries = deliveries.lock().expect("deliveries lock");
    assert_eq!(deliveries.len(), 1, "exactly one timer delivery");
    assert_eq!(deliveries[0].0, "k1");
    assert_eq!(deliveries[0].1, vec!["flush".to_string()]);
}

#[test]
fn each_committed_bundle_reaches_every_consumer_once() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_collection();
    let source = builder.add_root("read/source", vec![source_out]);
    let left = builder.add_transform("branch/left", source_out, vec![]);
    let right = builder.add_transform("branch/right", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register_values(
        source.id(),
        (1..=5).map(|v| WindowedValue::new(v, Utc::now())).collect(),
        5,
    );
    let left_seen = observations();
    let right_seen = observations();
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(left.id(), recording_factory(Arc::clone(&left_seen)));
    registry.register(right.id(), recording_factory(Arc::clone(&right_seen)));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    run_pipeline(graph, registry, context, 4).expect("pipeline completes");

    for seen in [&left_seen, &right_seen] {
        let mut values: Vec<i32> = seen
            .lock()
            .expect("observations lock")
            .iter()
            .map(|(_, v)| *v)
            .collect();
        values.sort();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }
}

#[test]
fn hot_key_evaluations_never_overlap() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_keyed_collection();
    let source = builder.add_root("read/hot-key", vec![source_out]);
    let map = builder.add_transform("map/guarded", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register(
        source.id(),
        (0..40).map(|v| (Some(key("hot")), WindowedValue::new(v, Utc::now()))).collect(),
        4,
    );

    let active: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let seen = observations();
    let active_in_fn = Arc::clone(&active);
    let seen_in_fn = Arc::clone(&seen);
    let guarded = FnEvaluatorFactory::new(move |_t, bundle_key, element, _result| {
        let k = bundle_key
            .map(|k| k.to_string())
            .ok_or_else(|| anyhow!("missing key"))?;
        {
            let mut active = active_in_fn.lock().expect("active lock");
            let slot = active.entry(k.clone()).or_insert(0);
            *slot += 1;
            if *slot != 1 {
                return Err(anyhow!("overlapping evaluations for key {k}"));
            }
        }
        std::thread::sleep(Duration::from_micros(200));
        let value = int_element(element)?;
        seen_in_fn
            .lock()
            .expect("observations lock")
            .push((k.clone(), value));
        let mut active = active_in_fn.lock().expect("active lock");
        *active.entry(k).or_insert(1) -= 1;
        Ok(())
    });
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(map.id(), Arc::new(guarded));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    run_pipeline(graph, registry, context, 4).expect("pipeline completes");

    // All elements processed, in production order for the single key.
    assert_eq!(observed_for_key(&seen, "hot"), (0..40).collect::<Vec<_>>());
}

/// Context whose timer extraction always fails; everything else is inert.
struct BrokenTimerContext {
    options: PipelineOptions,
}

impl EvaluationContext for BrokenTimerContext {
    fn handle_result(
        &self,
        _input: Option<&Arc<Bundle>>,
        _fired_timers: &[TimerData],
        _result: TransformResult,
    ) -> Result<Vec<Arc<Bundle>>> {
        Ok(Vec::new())
    }

    fn extract_fired_timers(&self) -> Result<Vec<FiredTimers>> {
        Err(anyhow!("timer subsystem unavailable"))
    }

    fn is_done(&self) -> bool {
        false
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

#[test]
fn timer_extraction_failure_terminates_the_pipeline() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_collection();
    let source = builder.add_root("read/source", vec![source_out]);
    builder.add_transform("map/unreached", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register_values(source.id(), vec![WindowedValue::new(1, Utc::now())], 1);
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));

    let context: Arc<dyn EvaluationContext> = Arc::new(BrokenTimerContext {
        options: PipelineOptions::default(),
    });
    let err = run_pipeline(graph, registry, context, 2).expect_err("monitor failure surfaces");
    assert!(format!("{err:#}").contains("timer subsystem unavailable"));
}

#[test]
fn empty_source_completes_immediately() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_collection();
    let source = builder.add_root("read/empty", vec![source_out]);
    let map = builder.add_transform("map/none", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register_values(source.id(), Vec::new(), 1);
    let seen = observations();
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(map.id(), recording_factory(Arc::clone(&seen)));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    run_pipeline(graph, registry, context, 2).expect("pipeline completes");
    assert!(seen.lock().expect("observations lock").is_empty());
}

#[test]
fn multi_stage_pipeline_flows_values_downstream() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_collection();
    let doubled = builder.new_collection();
    let source = builder.add_root("read/source", vec![source_out]);
    let double = builder.add_transform("map/double", source_out, vec![doubled]);
    let sink = builder.add_transform("write/sink", doubled, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register_values(
        source.id(),
        (1..=4).map(|v| WindowedValue::new(v, Utc::now())).collect(),
        2,
    );
    let double_factory = FnEvaluatorFactory::new(move |_t, _key, element, result| {
        let value = int_element(element)?;
        let mut staged = UncommittedBundle::new(doubled);
        staged.add(WindowedValue::new(value * 2, Utc::now()));
        result.add_output(staged);
        Ok(())
    });
    let seen = observations();
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(double.id(), Arc::new(double_factory));
    registry.register(sink.id(), recording_factory(Arc::clone(&seen)));

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    run_pipeline(graph, registry, context, 4).expect("pipeline completes");

    let mut values: Vec<i32> = seen
        .lock()
        .expect("observations lock")
        .iter()
        .map(|(_, v)| *v)
        .collect();
    values.sort();
    assert_eq!(values, vec![2, 4, 6, 8]);
}

#[test]
fn worker_pool_sized_from_loaded_config_runs_the_pipeline() {
    init_logging();
    let mut builder = PipelineGraph::builder();
    let source_out = builder.new_collection();
    let source = builder.add_root("read/source", vec![source_out]);
    let map = builder.add_transform("map/collect", source_out, vec![]);
    let graph = builder.build();

    let sources = BoundedReadFactory::new();
    sources.register_values(
        source.id(),
        (1..=4).map(|v| WindowedValue::new(v, Utc::now())).collect(),
        2,
    );
    let seen = observations();
    let mut registry = TransformRegistry::new();
    registry.register(source.id(), Arc::new(sources));
    registry.register(map.id(), recording_factory(Arc::clone(&seen)));

    let config_path =
        std::env::temp_dir().join(format!("rillflow-test-{}.toml", std::process::id()));
    std::fs::write(
        &config_path,
        "log_level = \"warn\"\n\n[runtime]\nexec_threads = 2\n",
    )
    .expect("write config file");
    let config = RillflowConfig::load_from_file(&config_path).expect("load config");
    let _ = std::fs::remove_file(&config_path);
    assert_eq!(config.runtime.actual_exec_threads(), 2);

    let context = InMemoryEvaluationContext::new(Arc::clone(&graph), PipelineOptions::default());
    let executor = ParallelExecutor::new(
        WorkerPool::from_config(&config),
        Arc::clone(&graph),
        Arc::new(registry),
        context,
    );
    executor.start(graph.roots().to_vec());
    executor.await_completion().expect("pipeline completes");

    let mut values: Vec<i32> = seen
        .lock()
        .expect("observations lock")
        .iter()
        .map(|(_, v)| *v)
        .collect();
    values.sort();
    assert_eq!(values, vec![1, 2, 3, 4]);
}
