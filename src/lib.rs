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
//! rillflow: an in-process bundle executor for data-parallel pipelines.
//!
//! The executor drives a DAG of transforms to completion on a shared worker
//! pool: keyed bundles are serialized per `(transform, key)`, fired timers
//! arrive as synthetic keyed input, and a cooperative monitor detects
//! quiescence and surfaces completion or the first failure.

pub mod common;
pub mod exec;
pub mod runtime;

pub use common::app_config as rillflow_config;
pub use common::logging as rillflow_logging;

pub use common::ids::{CollectionId, TransformId};
pub use exec::bundle::{Bundle, StructuralKey, UncommittedBundle, WindowedValue, WorkItem};
pub use exec::context::{EvaluationContext, PipelineOptions};
pub use exec::evaluator::{EvaluatorRegistry, TransformEvaluator, TransformResult};
pub use exec::graph::{PipelineGraph, PipelineGraphBuilder, TransformNode};
pub use exec::pipeline::executor::ParallelExecutor;
pub use exec::pipeline::worker_pool::{ExecutorService, WorkerPool};
pub use exec::timers::{FiredTimers, KeyedTimers, TimeDomain, TimerData};
