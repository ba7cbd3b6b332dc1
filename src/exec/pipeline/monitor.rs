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
//! Monitor: the single-logical-threaded control loop of the executor.
//!
//! Responsibilities:
//! - Drains one internal update per tick: dispatches produced bundles to
//!   their consumers, surfaces failures to the visible queue.
//! - Delivers fired timers as synthesized keyed bundles.
//! - Detects quiescence: publishes completion when the context reports done,
//!   re-injects root work when nothing is scheduled.
//!
//! The monitor is a task that re-submits itself to the shared worker pool
//! after each tick; at most one instance is in flight at any time. If a tick
//! itself fails, the failure is made visible and the monitor exits without
//! rescheduling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use crossbeam_channel::TryRecvError;

use crate::common::logging::{debug, error};
use crate::exec::bundle::WorkItem;
use crate::exec::pipeline::executor::ExecutorInner;
use crate::exec::pipeline::update::{ExecutorUpdate, VisibleUpdate};
use crate::exec::timers::{KeyedTimers, TimeDomain};

/// Pause before the next tick when a tick found nothing to do. Keeps an idle
/// monitor from monopolizing a worker while evaluations are in flight.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

enum Tick {
    Continue { progressed: bool },
    Shutdown,
}

pub(crate) struct MonitorTask {
    inner: Arc<ExecutorInner>,
}

impl MonitorTask {
    pub(crate) fn new(inner: Arc<ExecutorInner>) -> Self {
        Self { inner }
    }

    /// Queue this monitor onto the worker pool. Rejection means the pool has
    /// shut down and the monitor's work is over.
    pub(crate) fn submit(self) {
        let pool = Arc::clone(&self.inner.pool);
        if pool.submit(Box::new(move || self.run())).is_err() {
            debug!("monitor not rescheduled: worker pool is shut down");
        }
    }

    fn run(self) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.tick()));
        match outcome {
            Ok(Ok(Tick::Continue { progressed })) => {
                if !progressed {
                    std::thread::sleep(IDLE_BACKOFF);
                }
                self.submit();
            }
            Ok(Ok(Tick::Shutdown)) => {}
            Ok(Err(error)) => {
                error!("monitor died: {error:#}");
                self.inner.visible_updates.publish(VisibleUpdate::Failed {
                    transform: None,
                    error,
                });
            }
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                error!("monitor died from panic: {msg}");
                self.inner.visible_updates.publish(VisibleUpdate::Failed {
                    transform: None,
                    error: anyhow!("panic in executor monitor: {msg}"),
                });
            }
        }
    }

    fn tick(&self) -> Result<Tick> {
        let mut progressed = false;

        // Drain at most one internal update per tick so dispatching stays
        // interleaved with timer delivery and the quiescence check.
        match self.inner.updates_rx.try_recv() {
            Ok(update) => {
                progressed = true;
                debug!("executor update: {update:?}");
                match update {
                    ExecutorUpdate::Produced { bundle, .. } => {
                        self.inner.schedule_consumers(&bundle);
                    }
                    ExecutorUpdate::Failed { transform, error } => {
                        self.inner
                            .visible_updates
                            .publish(VisibleUpdate::Failed { transform, error });
                    }
                }
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }

        progressed |= self.fire_timers()?;

        if self.inner.context.is_done() {
            debug!("pipeline is finished; shutting down");
            self.inner.visible_updates.publish(VisibleUpdate::Done);
            self.inner.pool.shutdown();
            return Ok(Tick::Shutdown);
        }

        // Nothing submitted or running anywhere: the only way forward is more
        // root input. Roots are inert otherwise.
        if self.inner.scheduled.is_idle() {
            if let Some(roots) = self.inner.roots.get() {
                for root in roots {
                    self.inner
                        .evaluate_bundle(root, None, self.inner.default_callback());
                }
            }
        }

        Ok(Tick::Continue { progressed })
    }

    /// Ask the context for fired timers and deliver each `(transform, key,
    /// domain)` group as one synthesized keyed bundle. Extraction failures
    /// abort the tick; the caller surfaces them.
    fn fire_timers(&self) -> Result<bool> {
        let fired = match self.inner.context.extract_fired_timers() {
            Ok(fired) => fired,
            Err(error) => {
                error!("internal error while delivering timers: {error:#}");
                return Err(error);
            }
        };

        let mut delivered = false;
        for group in fired {
            let transform = match self.inner.graph.transform(group.transform()) {
                Some(node) => Arc::clone(node),
                None => bail!("fired timers reference unknown transform {}", group.transform()),
            };
            let Some(input_collection) = transform.input() else {
                bail!(
                    "fired timers belong to root transform {}, which has no input to deliver them on",
                    transform.full_name()
                );
            };
            for domain in TimeDomain::ALL {
                let delivery = group.timers(domain);
                if delivery.is_empty() {
                    continue;
                }
                let work = KeyedTimers {
                    key: group.key().clone(),
                    timers: delivery.to_vec(),
                };
                let bundle = self
                    .inner
                    .context
                    .create_keyed_bundle(None, group.key().clone(), input_collection)
                    .add(WorkItem::Timers(work))
                    .commit(Utc::now());
                self.inner.evaluate_bundle(
                    &transform,
                    Some(bundle),
                    self.inner.timer_callback(delivery.to_vec()),
                );
                delivered = true;
            }
        }
        Ok(delivered)
    }
}
