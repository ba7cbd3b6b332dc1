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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<RillflowConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static RillflowConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = RillflowConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static RillflowConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = RillflowConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static RillflowConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("RILLFLOW_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("rillflow.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $RILLFLOW_CONFIG or create ./rillflow.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct RillflowConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "rillflow=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl RillflowConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: RillflowConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }
}

impl Default for RillflowConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads in the shared execution pool. 0 means "use the host's
    /// available parallelism".
    #[serde(default)]
    pub exec_threads: usize,
}

impl RuntimeConfig {
    pub fn actual_exec_threads(&self) -> usize {
        if self.exec_threads > 0 {
            return self.exec_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { exec_threads: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::RillflowConfig;

    #[test]
    fn parses_runtime_section() {
        let cfg: RillflowConfig = toml::from_str(
            r#"
            log_level = "debug"

            [runtime]
            exec_threads = 3
            "#,
        )
        .expect("parse config");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.runtime.exec_threads, 3);
        assert_eq!(cfg.runtime.actual_exec_threads(), 3);
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let cfg: RillflowConfig = toml::from_str("").expect("parse empty config");
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.log_filter.is_none());
        assert_eq!(cfg.runtime.exec_threads, 0);
        assert!(cfg.runtime.actual_exec_threads() >= 1);
    }

    #[test]
    fn log_filter_takes_precedence() {
        let cfg: RillflowConfig = toml::from_str(
            r#"
            log_level = "info"
            log_filter = "rillflow=trace"
            "#,
        )
        .expect("parse config");
        assert_eq!(cfg.effective_log_filter(), "rillflow=trace");
    }
}
