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
//! Evaluator registry keyed by transform.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::common::ids::TransformId;
use crate::exec::bundle::Bundle;
use crate::exec::context::EvaluationContext;
use crate::exec::evaluator::{EvaluatorRegistry, TransformEvaluator};
use crate::exec::graph::TransformNode;

/// Produces evaluators for one transform. A factory may pool state across
/// bundles; each returned evaluator is still driven by a single thread.
pub trait EvaluatorFactory: Send + Sync {
    fn for_application(
        &self,
        transform: &Arc<TransformNode>,
        input: Option<&Arc<Bundle>>,
        context: &Arc<dyn EvaluationContext>,
    ) -> Result<Box<dyn TransformEvaluator>>;
}

/// Registry mapping each transform to its evaluator factory.
pub struct TransformRegistry {
    factories: HashMap<TransformId, Arc<dyn EvaluatorFactory>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        transform: TransformId,
        factory: Arc<dyn EvaluatorFactory>,
    ) -> &mut Self {
        self.factories.insert(transform, factory);
        self
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorRegistry for TransformRegistry {
    fn for_application(
        &self,
        transform: &Arc<TransformNode>,
        input: Option<&Arc<Bundle>>,
        context: &Arc<dyn EvaluationContext>,
    ) -> Result<Box<dyn TransformEvaluator>> {
        let factory = self.factories.get(&transform.id()).ok_or_else(|| {
            anyhow!(
                "no evaluator factory registered for {}",
                transform.full_name()
            )
        })?;
        factory.for_application(transform, input, context)
    }
}
