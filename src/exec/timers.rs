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
//! Timer data model.
//!
//! Timers are not a separate execution path: once fired they are wrapped into
//! a keyed work item and delivered to the owning transform like any other
//! input bundle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::common::ids::TransformId;
use crate::exec::bundle::StructuralKey;

/// The clock domain a timer is registered against.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TimeDomain {
    EventTime,
    ProcessingTime,
    SynchronizedProcessingTime,
}

impl TimeDomain {
    pub const ALL: [TimeDomain; 3] = [
        TimeDomain::EventTime,
        TimeDomain::ProcessingTime,
        TimeDomain::SynchronizedProcessingTime,
    ];
}

/// One registered timer. Timers with equal `(tag, domain)` for the same
/// transform and key overwrite each other when set.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerData {
    pub tag: String,
    pub timestamp: DateTime<Utc>,
    pub domain: TimeDomain,
}

impl TimerData {
    pub fn new(tag: impl Into<String>, timestamp: DateTime<Utc>, domain: TimeDomain) -> Self {
        Self {
            tag: tag.into(),
            timestamp,
            domain,
        }
    }
}

/// Timer delivery payload: the key the timers belong to plus the fired timers,
/// in firing order. This is the element carried by synthesized timer bundles.
#[derive(Clone, Debug)]
pub struct KeyedTimers {
    pub key: StructuralKey,
    pub timers: Vec<TimerData>,
}

/// All timers that fired for one `(transform, key)` pair, grouped by domain.
#[derive(Clone, Debug)]
pub struct FiredTimers {
    transform: TransformId,
    key: StructuralKey,
    by_domain: BTreeMap<TimeDomain, Vec<TimerData>>,
}

impl FiredTimers {
    pub fn new(transform: TransformId, key: StructuralKey) -> Self {
        Self {
            transform,
            key,
            by_domain: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, timer: TimerData) {
        self.by_domain.entry(timer.domain).or_default().push(timer);
    }

    pub fn transform(&self) -> TransformId {
        self.transform
    }

    pub fn key(&self) -> &StructuralKey {
        &self.key
    }

    pub fn timers(&self, domain: TimeDomain) -> &[TimerData] {
        self.by_domain
            .get(&domain)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.values().all(Vec::is_empty)
    }
}
