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
//! Evaluation context seam.
//!
//! The context owns everything the executor does not: state commits,
//! watermark bookkeeping, and timer registration. The executor observes it
//! only through this narrow interface.

use std::sync::Arc;

use anyhow::Result;

use crate::common::ids::{CollectionId, TransformId};
use crate::exec::bundle::{Bundle, KeyedBundleBuilder, StructuralKey};
use crate::exec::evaluator::TransformResult;
use crate::exec::timers::{FiredTimers, TimerData};

/// Host-level options. Used by the executor for naming and diagnostics only.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub app_name: String,
    pub target_parallelism: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            app_name: "rillflow".to_string(),
            target_parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// The executor's view of pipeline state.
pub trait EvaluationContext: Send + Sync {
    /// Atomically commit the side effects of one evaluation: persist state,
    /// advance watermarks, mark `fired_timers` as delivered, and commit the
    /// result's staged outputs. Returns the committed output bundles.
    fn handle_result(
        &self,
        input: Option<&Arc<Bundle>>,
        fired_timers: &[TimerData],
        result: TransformResult,
    ) -> Result<Vec<Arc<Bundle>>>;

    /// Return and clear all timers whose firing condition has been reached.
    fn extract_fired_timers(&self) -> Result<Vec<FiredTimers>>;

    /// True when all watermarks have reached the end of time and no work
    /// remains anywhere in the pipeline.
    fn is_done(&self) -> bool;

    /// Factory for keyed bundles synthesized by the runner (timer delivery).
    fn create_keyed_bundle(
        &self,
        producer: Option<TransformId>,
        key: StructuralKey,
        collection: CollectionId,
    ) -> KeyedBundleBuilder;

    fn options(&self) -> &PipelineOptions;
}
