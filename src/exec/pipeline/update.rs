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
//! Executor update messages and the bounded user-visible queue.
//!
//! Responsibilities:
//! - Defines the internal monitor messages produced by completion callbacks.
//! - Defines the terminal updates surfaced through `await_completion`, with a
//!   bounded queue that displaces stale entries rather than blocking the
//!   monitor.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use crate::exec::bundle::Bundle;
use crate::exec::graph::TransformNode;

/// Internal monitor message: one evaluation either produced a bundle or
/// failed.
pub enum ExecutorUpdate {
    Produced {
        transform: Arc<TransformNode>,
        bundle: Arc<Bundle>,
    },
    Failed {
        transform: Option<Arc<TransformNode>>,
        error: anyhow::Error,
    },
}

impl fmt::Debug for ExecutorUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorUpdate::Produced { transform, bundle } => f
                .debug_struct("Produced")
                .field("transform", &transform.full_name())
                .field("bundle", bundle)
                .finish(),
            ExecutorUpdate::Failed { transform, error } => f
                .debug_struct("Failed")
                .field(
                    "transform",
                    &transform.as_ref().map(|t| t.full_name().to_string()),
                )
                .field("error", &format!("{error:#}"))
                .finish(),
        }
    }
}

/// Update of interest to the caller of `await_completion`.
#[derive(Debug)]
pub enum VisibleUpdate {
    Done,
    Failed {
        transform: Option<Arc<TransformNode>>,
        error: anyhow::Error,
    },
}

impl VisibleUpdate {
    pub fn is_done(&self) -> bool {
        matches!(self, VisibleUpdate::Done)
    }
}

/// Bounded queue of visible updates.
///
/// Single producer (the monitor), single consumer (`await_completion`). A
/// publish into a full queue displaces the oldest non-terminal entry: a slow
/// consumer may lose older failures, but a queued `Done` is never dropped.
pub struct VisibleUpdates {
    state: Mutex<VecDeque<VisibleUpdate>>,
    cv: Condvar,
    capacity: usize,
}

impl VisibleUpdates {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(VecDeque::with_capacity(capacity)),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&self, update: VisibleUpdate) {
        let mut queue = self.state.lock().expect("visible updates lock");
        if queue.len() >= self.capacity {
            match queue.iter().position(|u| !u.is_done()) {
                Some(stale) => {
                    queue.remove(stale);
                }
                // Only terminal entries queued; nothing this update could add.
                None => return,
            }
        }
        queue.push_back(update);
        self.cv.notify_one();
    }

    /// Block until an update is available and take it.
    pub fn take(&self) -> VisibleUpdate {
        let mut queue = self.state.lock().expect("visible updates lock");
        loop {
            if let Some(update) = queue.pop_front() {
                return update;
            }
            queue = self
                .cv
                .wait(queue)
                .expect("visible updates condvar wait");
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("visible updates lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
