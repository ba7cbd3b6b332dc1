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
//! Evaluator seam between the executor and user transform logic.
//!
//! Responsibilities:
//! - Defines the per-bundle evaluator contract and the result it produces.
//! - Defines the registry the executor asks for an evaluator per
//!   `(transform, input bundle)` pair.

use std::sync::Arc;

use anyhow::Result;

use crate::common::ids::TransformId;
use crate::exec::bundle::{Bundle, StructuralKey, UncommittedBundle, WorkItem};
use crate::exec::context::EvaluationContext;
use crate::exec::graph::TransformNode;
use crate::exec::timers::TimerData;

/// Everything one evaluation hands back to the evaluation context for an
/// atomic commit: staged output bundles, newly requested timers, and whether
/// a root source has no further input to offer.
#[derive(Debug)]
pub struct TransformResult {
    pub transform: TransformId,
    pub outputs: Vec<UncommittedBundle>,
    pub set_timers: Vec<(StructuralKey, TimerData)>,
    pub source_exhausted: bool,
}

impl TransformResult {
    pub fn new(transform: TransformId) -> Self {
        Self {
            transform,
            outputs: Vec::new(),
            set_timers: Vec::new(),
            source_exhausted: false,
        }
    }

    pub fn add_output(&mut self, output: UncommittedBundle) -> &mut Self {
        self.outputs.push(output);
        self
    }

    pub fn set_timer(&mut self, key: StructuralKey, timer: TimerData) -> &mut Self {
        self.set_timers.push((key, timer));
        self
    }

    pub fn mark_source_exhausted(&mut self) -> &mut Self {
        self.source_exhausted = true;
        self
    }
}

/// Evaluates one transform over one input bundle.
///
/// An evaluator is driven by a single thread: `start_bundle`, then
/// `process_element` for every element of the input bundle (none for a root
/// activation), then `finish_bundle` exactly once. Evaluators are not reused
/// across bundles, though the factory behind them may pool state.
pub trait TransformEvaluator {
    fn start_bundle(&mut self, input: Option<&Arc<Bundle>>) -> Result<()>;

    fn process_element(&mut self, element: &WorkItem) -> Result<()>;

    fn finish_bundle(&mut self) -> Result<TransformResult>;
}

/// Produces an evaluator for one `(transform, input bundle)` pair.
pub trait EvaluatorRegistry: Send + Sync {
    fn for_application(
        &self,
        transform: &Arc<TransformNode>,
        input: Option<&Arc<Bundle>>,
        context: &Arc<dyn EvaluationContext>,
    ) -> Result<Box<dyn TransformEvaluator>>;
}
