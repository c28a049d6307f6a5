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

static CONFIG: OnceLock<MemRocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "root".to_string()
}

fn default_scan_batch_size() -> usize {
    4096
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static MemRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = MemRocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static MemRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = MemRocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static MemRocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("MEMROCKS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("memrocks.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $MEMROCKS_CONFIG or create ./memrocks.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct MemRocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "memrocks=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub memsql: Option<MemSqlConfig>,
}

impl MemRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: MemRocksConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn memsql_config(&self) -> Option<&MemSqlConfig> {
        self.memsql.as_ref()
    }

    pub fn effective_log_filter(&self) -> String {
        match self.log_filter.as_deref() {
            Some(filter) if !filter.trim().is_empty() => filter.to_string(),
            _ => self.log_level.clone(),
        }
    }
}

impl Default for MemRocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            memsql: None,
        }
    }
}

/// Endpoint of the cluster's aggregator, the node that accepts client
/// connections and produces distributed query plans.
#[derive(Clone, Deserialize)]
pub struct MemSqlConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    pub database: String,

    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_memsql_section() {
        let cfg: MemRocksConfig = toml::from_str(
            r#"
            [memsql]
            database = "acme"
            "#,
        )
        .expect("parse config");
        let memsql = cfg.memsql_config().expect("memsql section");
        assert_eq!(memsql.host, "127.0.0.1");
        assert_eq!(memsql.port, 3306);
        assert_eq!(memsql.user, "root");
        assert_eq!(memsql.password, "");
        assert_eq!(memsql.database, "acme");
        assert_eq!(memsql.scan_batch_size, 4096);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn log_filter_takes_precedence_over_level() {
        let cfg: MemRocksConfig = toml::from_str(
            r#"
            log_level = "warn"
            log_filter = "memrocks=debug"
            "#,
        )
        .expect("parse config");
        assert_eq!(cfg.effective_log_filter(), "memrocks=debug");
    }

    #[test]
    fn missing_memsql_section_is_allowed() {
        let cfg: MemRocksConfig = toml::from_str("log_level = \"debug\"").expect("parse config");
        assert!(cfg.memsql_config().is_none());
        assert_eq!(cfg.effective_log_filter(), "debug");
    }
}
