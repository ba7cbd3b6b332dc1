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
//! Shared worker pool.
//!
//! Responsibilities:
//! - Runs submitted units of work across a fixed set of named worker threads.
//! - Contains panics raised by tasks so a failing unit cannot take a worker
//!   thread down with it.
//!
//! Key exported interfaces:
//! - Types: `Task`, `ExecutorService`, `WorkerPool`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::common::app_config::RillflowConfig;
use crate::common::logging::error;

/// One unit of work accepted by the pool.
pub type Task = Box<dyn FnOnce() + Send>;

/// A worker pool accepting units of work and running each on some thread.
///
/// `submit` hands the task back when the pool has already shut down, so the
/// caller decides whether rejection matters.
pub trait ExecutorService: Send + Sync {
    fn submit(&self, task: Task) -> Result<(), Task>;

    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

struct PoolShared {
    queue: Mutex<VecDeque<Task>>,
    cv: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-size thread pool backed by a locked queue and condition variable.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    _workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Arc<Self> {
        let num_threads = num_threads.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let shared_cloned = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("rillflow-worker-{i}"))
                .spawn(move || worker_loop(shared_cloned))
                .expect("worker pool thread");
            workers.push(handle);
        }

        Arc::new(Self {
            shared,
            _workers: workers,
        })
    }

    /// Pool sized from a loaded configuration's `[runtime] exec_threads`.
    pub fn from_config(config: &RillflowConfig) -> Arc<Self> {
        Self::new(config.runtime.actual_exec_threads())
    }
}

impl ExecutorService for WorkerPool {
    fn submit(&self, task: Task) -> Result<(), Task> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(task);
        }
        let mut queue = self.shared.queue.lock().expect("worker pool queue lock");
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(task);
        }
        queue.push_back(task);
        self.shared.cv.notify_one();
        Ok(())
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // Queued-but-unstarted work is dropped; running tasks finish on their own.
        let mut queue = self.shared.queue.lock().expect("worker pool queue lock");
        queue.clear();
        self.shared.cv.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("worker pool queue lock");
            while queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
                queue = shared
                    .cv
                    .wait(queue)
                    .expect("worker pool queue condvar wait");
            }
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            queue.pop_front()
        };

        let Some(task) = task else {
            continue;
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
        if let Err(payload) = result {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            error!("panic escaped a pool task: {msg}");
        }
    }
}
