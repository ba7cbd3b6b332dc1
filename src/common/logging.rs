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
//! Logging initialization.
//!
//! Events go to stderr through the compact formatter with thread names
//! enabled: executor work runs on named pool workers (`rillflow-worker-N`),
//! so the emitting thread is usually the interesting coordinate when reading
//! interleaved monitor and evaluation logs.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

static INIT: OnceLock<()> = OnceLock::new();

pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        // The caller (via config) supplies the level or a full filter
        // expression such as "rillflow=debug".
        let env_filter = EnvFilter::new(level);

        // ANSI colors only when stderr is a terminal; redirected output
        // should stay free of escape codes.
        let use_ansi = atty::is(atty::Stream::Stderr);
        let _ = tracing_fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(use_ansi)
            .with_thread_names(true)
            .with_target(false)
            .try_init();
    });
}

pub fn init() {
    init_with_level("info");
}

pub use tracing::{debug, error, info, trace, warn};
