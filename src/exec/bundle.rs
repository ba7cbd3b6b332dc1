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
//! Bundles: immutable batches of elements flowing between transforms.
//!
//! Responsibilities:
//! - Defines windowed values, structural keys, and the work-item element model.
//! - Provides committed bundles plus the uncommitted/keyed builders used to stage output.
//!
//! Key exported interfaces:
//! - Types: `Value`, `WindowedValue`, `WorkItem`, `StructuralKey`, `Bundle`,
//!   `UncommittedBundle`, `KeyedBundleBuilder`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::common::ids::{CollectionId, TransformId};
use crate::exec::timers::KeyedTimers;

/// Dynamically typed element payload. Evaluators downcast to the concrete
/// element type of the collection they consume.
pub type Value = Arc<dyn Any + Send + Sync>;

/// One element together with its event-time timestamp.
#[derive(Clone)]
pub struct WindowedValue {
    value: Value,
    timestamp: DateTime<Utc>,
}

impl WindowedValue {
    pub fn new(value: impl Any + Send + Sync, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Arc::new(value),
            timestamp,
        }
    }

    /// Wrap a value at the minimum representable timestamp. Used for elements
    /// whose event time carries no information, such as synthesized work items.
    pub fn at_minimum_timestamp(value: impl Any + Send + Sync) -> Self {
        Self::new(value, DateTime::<Utc>::MIN_UTC)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for WindowedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedValue")
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// A single element of a bundle: either an ordinary windowed value or a
/// delivery of fired timers for one key.
#[derive(Clone, Debug)]
pub enum WorkItem {
    Value(WindowedValue),
    Timers(KeyedTimers),
}

impl WorkItem {
    pub fn as_value(&self) -> Option<&WindowedValue> {
        match self {
            WorkItem::Value(v) => Some(v),
            WorkItem::Timers(_) => None,
        }
    }

    pub fn as_timers(&self) -> Option<&KeyedTimers> {
        match self {
            WorkItem::Value(_) => None,
            WorkItem::Timers(t) => Some(t),
        }
    }
}

/// Key of a keyed collection element, in its encoded structural form.
/// Two keys compare equal iff their encoded bytes compare equal.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct StructuralKey(Arc<[u8]>);

impl StructuralKey {
    pub fn of(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for StructuralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructuralKey({})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for StructuralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// A committed, immutable batch of elements belonging to one collection.
///
/// A bundle is produced by exactly one evaluation (or synthesized by the
/// runner for timer delivery), then scheduled into each consumer of its
/// collection exactly once. It is never mutated after commit.
pub struct Bundle {
    producer: Option<TransformId>,
    collection: CollectionId,
    key: Option<StructuralKey>,
    elements: Vec<WorkItem>,
    committed_at: DateTime<Utc>,
}

impl Bundle {
    /// Transform whose evaluation produced this bundle. `None` for bundles
    /// synthesized by the runner (timer delivery, seeded test input).
    pub fn producer(&self) -> Option<TransformId> {
        self.producer
    }

    pub fn collection(&self) -> CollectionId {
        self.collection
    }

    /// Present iff the bundle's collection is keyed.
    pub fn key(&self) -> Option<&StructuralKey> {
        self.key.as_ref()
    }

    pub fn elements(&self) -> &[WorkItem] {
        &self.elements
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("producer", &self.producer)
            .field("collection", &self.collection)
            .field("key", &self.key)
            .field("elements", &self.elements.len())
            .finish()
    }
}

/// Output staged by an evaluation, committed later by the evaluation context.
#[derive(Debug)]
pub struct UncommittedBundle {
    collection: CollectionId,
    key: Option<StructuralKey>,
    elements: Vec<WorkItem>,
}

impl UncommittedBundle {
    pub fn new(collection: CollectionId) -> Self {
        Self {
            collection,
            key: None,
            elements: Vec::new(),
        }
    }

    pub fn keyed(collection: CollectionId, key: StructuralKey) -> Self {
        Self {
            collection,
            key: Some(key),
            elements: Vec::new(),
        }
    }

    pub fn add(&mut self, value: WindowedValue) -> &mut Self {
        self.elements.push(WorkItem::Value(value));
        self
    }

    pub fn collection(&self) -> CollectionId {
        self.collection
    }

    pub fn key(&self) -> Option<&StructuralKey> {
        self.key.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn commit(self, producer: Option<TransformId>, at: DateTime<Utc>) -> Arc<Bundle> {
        Arc::new(Bundle {
            producer,
            collection: self.collection,
            key: self.key,
            elements: self.elements,
            committed_at: at,
        })
    }
}

/// Builder for keyed bundles synthesized by the runner, e.g. timer deliveries.
pub struct KeyedBundleBuilder {
    producer: Option<TransformId>,
    key: StructuralKey,
    collection: CollectionId,
    elements: Vec<WorkItem>,
}

impl KeyedBundleBuilder {
    pub fn new(
        producer: Option<TransformId>,
        key: StructuralKey,
        collection: CollectionId,
    ) -> Self {
        Self {
            producer,
            key,
            collection,
            elements: Vec::new(),
        }
    }

    pub fn add(mut self, item: WorkItem) -> Self {
        self.elements.push(item);
        self
    }

    pub fn commit(self, at: DateTime<Utc>) -> Arc<Bundle> {
        Arc::new(Bundle {
            producer: self.producer,
            collection: self.collection,
            key: Some(self.key),
            elements: self.elements,
            committed_at: at,
        })
    }
}
