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
//! Pipeline graph metadata.
//!
//! Responsibilities:
//! - Defines transform nodes and the immutable consumer/keyed/root views the
//!   executor reads while dispatching bundles.
//!
//! Key exported interfaces:
//! - Types: `TransformNode`, `PipelineGraph`, `PipelineGraphBuilder`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::common::ids::{CollectionId, TransformId};

/// A node in the pipeline graph: one application of a transform.
#[derive(Debug)]
pub struct TransformNode {
    id: TransformId,
    full_name: String,
    input: Option<CollectionId>,
    outputs: Vec<CollectionId>,
}

impl TransformNode {
    pub fn id(&self) -> TransformId {
        self.id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Input collection; `None` for roots, which produce bundles from an
    /// external source.
    pub fn input(&self) -> Option<CollectionId> {
        self.input
    }

    pub fn outputs(&self) -> &[CollectionId] {
        &self.outputs
    }

    pub fn is_root(&self) -> bool {
        self.input.is_none()
    }
}

/// Immutable graph metadata: collection-to-consumer edges, the keyed
/// collection set, and the root transforms. Fixed before execution starts.
pub struct PipelineGraph {
    transforms: HashMap<TransformId, Arc<TransformNode>>,
    value_to_consumers: HashMap<CollectionId, Vec<Arc<TransformNode>>>,
    keyed_collections: HashSet<CollectionId>,
    roots: Vec<Arc<TransformNode>>,
}

impl PipelineGraph {
    pub fn builder() -> PipelineGraphBuilder {
        PipelineGraphBuilder::new()
    }

    pub fn transform(&self, id: TransformId) -> Option<&Arc<TransformNode>> {
        self.transforms.get(&id)
    }

    pub fn consumers(&self, collection: CollectionId) -> &[Arc<TransformNode>] {
        self.value_to_consumers
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_keyed(&self, collection: CollectionId) -> bool {
        self.keyed_collections.contains(&collection)
    }

    pub fn roots(&self) -> &[Arc<TransformNode>] {
        &self.roots
    }
}

/// Builder assembling graph metadata before execution. Collection ids are
/// allocated by the builder; consumer lists derive from each transform's
/// declared input.
pub struct PipelineGraphBuilder {
    transforms: Vec<Arc<TransformNode>>,
    keyed_collections: HashSet<CollectionId>,
    next_transform: u32,
    next_collection: u32,
}

impl PipelineGraphBuilder {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
            keyed_collections: HashSet::new(),
            next_transform: 0,
            next_collection: 0,
        }
    }

    pub fn new_collection(&mut self) -> CollectionId {
        let id = CollectionId::new(self.next_collection);
        self.next_collection += 1;
        id
    }

    pub fn new_keyed_collection(&mut self) -> CollectionId {
        let id = self.new_collection();
        self.keyed_collections.insert(id);
        id
    }

    pub fn add_root(
        &mut self,
        full_name: impl Into<String>,
        outputs: Vec<CollectionId>,
    ) -> Arc<TransformNode> {
        self.add_node(full_name, None, outputs)
    }

    pub fn add_transform(
        &mut self,
        full_name: impl Into<String>,
        input: CollectionId,
        outputs: Vec<CollectionId>,
    ) -> Arc<TransformNode> {
        self.add_node(full_name, Some(input), outputs)
    }

    fn add_node(
        &mut self,
        full_name: impl Into<String>,
        input: Option<CollectionId>,
        outputs: Vec<CollectionId>,
    ) -> Arc<TransformNode> {
        let node = Arc::new(TransformNode {
            id: TransformId::new(self.next_transform),
            full_name: full_name.into(),
            input,
            outputs,
        });
        self.next_transform += 1;
        self.transforms.push(Arc::clone(&node));
        node
    }

    pub fn build(self) -> Arc<PipelineGraph> {
        let mut value_to_consumers: HashMap<CollectionId, Vec<Arc<TransformNode>>> = HashMap::new();
        let mut roots = Vec::new();
        for node in &self.transforms {
            match node.input() {
                Some(collection) => value_to_consumers
                    .entry(collection)
                    .or_default()
                    .push(Arc::clone(node)),
                None => roots.push(Arc::clone(node)),
            }
        }
        let transforms = self
            .transforms
            .into_iter()
            .map(|node| (node.id(), node))
            .collect();
        Arc::new(PipelineGraph {
            transforms,
            value_to_consumers,
            keyed_collections: self.keyed_collections,
            roots,
        })
    }
}

impl Default for PipelineGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
