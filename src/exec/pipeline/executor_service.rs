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
//! Admission layer in front of the worker pool.
//!
//! Responsibilities:
//! - Parallel admission: submit immediately, no ordering.
//! - Serial admission: at most one evaluation in flight per slot, FIFO for
//!   queued work, so per-key processing order is preserved.
//! - Tracks every submitted evaluation in a shared scheduled-set the monitor
//!   inspects for quiescence.
//!
//! Key exported interfaces:
//! - Types: `ScheduledSet`, `TransformExecutorService`,
//!   `ParallelExecutorService`, `SerialExecutorService`.
//! - Functions: `parallel`, `serial`.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::common::logging::debug;
use crate::exec::pipeline::transform_executor::TransformExecutor;
use crate::exec::pipeline::worker_pool::ExecutorService;

/// Concurrent set of evaluations currently submitted to or running on the
/// pool. Readers tolerate weak consistency: a stale read delays quiescence by
/// at most one monitor tick.
pub struct ScheduledSet {
    inner: Mutex<HashSet<u64>>,
}

impl ScheduledSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashSet::new()),
        })
    }

    fn insert(&self, id: u64) {
        self.inner.lock().expect("scheduled set lock").insert(id);
    }

    fn remove(&self, id: u64) {
        self.inner.lock().expect("scheduled set lock").remove(&id);
    }

    /// True when no evaluation is submitted or running.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().expect("scheduled set lock").is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("scheduled set lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_idle()
    }
}

/// Gatekeeper deciding when a scheduled evaluation reaches the worker pool.
pub trait TransformExecutorService: Send + Sync {
    /// Accept one evaluation for execution.
    fn schedule(&self, task: TransformExecutor);

    /// Notification that the evaluation with the given id has finished,
    /// successfully or not. Releases bookkeeping and, for serial admission,
    /// promotes the next queued evaluation.
    fn complete(&self, task_id: u64);
}

/// Unordered admission: every evaluation goes straight to the pool.
pub struct ParallelExecutorService {
    pool: Arc<dyn ExecutorService>,
    scheduled: Arc<ScheduledSet>,
}

pub fn parallel(
    pool: Arc<dyn ExecutorService>,
    scheduled: Arc<ScheduledSet>,
) -> Arc<ParallelExecutorService> {
    Arc::new(ParallelExecutorService { pool, scheduled })
}

impl TransformExecutorService for ParallelExecutorService {
    fn schedule(&self, task: TransformExecutor) {
        submit_to_pool(&self.pool, &self.scheduled, task);
    }

    fn complete(&self, task_id: u64) {
        self.scheduled.remove(task_id);
    }
}

struct SerialState {
    running: bool,
    queue: VecDeque<TransformExecutor>,
}

/// One-slot admission for a single serial slot (one `(transform, key)` pair).
///
/// State machine: idle --schedule--> running; further schedules enqueue FIFO;
/// completion either promotes the queue head or returns the slot to idle.
/// A failed evaluation releases the slot exactly like a successful one and
/// does not drain the queue.
pub struct SerialExecutorService {
    pool: Arc<dyn ExecutorService>,
    scheduled: Arc<ScheduledSet>,
    state: Mutex<SerialState>,
}

pub fn serial(
    pool: Arc<dyn ExecutorService>,
    scheduled: Arc<ScheduledSet>,
) -> Arc<SerialExecutorService> {
    Arc::new(SerialExecutorService {
        pool,
        scheduled,
        state: Mutex::new(SerialState {
            running: false,
            queue: VecDeque::new(),
        }),
    })
}

impl TransformExecutorService for SerialExecutorService {
    fn schedule(&self, task: TransformExecutor) {
        {
            let mut state = self.state.lock().expect("serial slot lock");
            if state.running {
                state.queue.push_back(task);
                return;
            }
            state.running = true;
        }
        if !submit_to_pool(&self.pool, &self.scheduled, task) {
            self.state.lock().expect("serial slot lock").running = false;
        }
    }

    fn complete(&self, task_id: u64) {
        self.scheduled.remove(task_id);
        let next = {
            let mut state = self.state.lock().expect("serial slot lock");
            match state.queue.pop_front() {
                Some(next) => Some(next),
                None => {
                    state.running = false;
                    None
                }
            }
        };
        if let Some(next) = next {
            if !submit_to_pool(&self.pool, &self.scheduled, next) {
                self.state.lock().expect("serial slot lock").running = false;
            }
        }
    }
}

/// Register the task in the scheduled-set, then hand it to the pool. The set
/// insert must happen first: the task may finish (and remove itself) before
/// `submit` returns.
fn submit_to_pool(
    pool: &Arc<dyn ExecutorService>,
    scheduled: &Arc<ScheduledSet>,
    task: TransformExecutor,
) -> bool {
    let id = task.id();
    scheduled.insert(id);
    match pool.submit(Box::new(move || task.run())) {
        Ok(()) => true,
        Err(_rejected) => {
            scheduled.remove(id);
            debug!("evaluation rejected after pool shutdown: executor_id={id}");
            false
        }
    }
}
