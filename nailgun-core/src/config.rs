// Copyright 2024 Nailgun contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::HashMap, fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = config_file {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config toml")?;
        config = toml::from_str(&config_str).context("parsing config file")?;
    } else if let Some(home) = std::env::var_os("HOME") {
        let mut config_path = PathBuf::from(home);
        config_path.push(".config");
        config_path.push("nailgun");
        config_path.push("config.toml");
        if config_path.exists() {
            let config_str = fs::read_to_string(&config_path).context("reading config toml")?;
            config = toml::from_str(&config_str).context("parsing config file")?;
        }
    }

    Ok(config)
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Address to bind the listener to, e.g. "127.0.0.1:2113".
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Number of idle workers the pool keeps on hand.
    pub pool_capacity: Option<usize>,

    /// Once idle+in-flight workers exceed this count, idle workers
    /// returned to the pool are torn down instead of retained.
    pub pool_high_water_mark: Option<usize>,

    /// Overrides the default time a session will tolerate with no
    /// client activity before it is treated as disconnected.
    pub heartbeat_timeout_ms: Option<u64>,

    /// Overrides the default cap on a single header chunk.
    pub max_header_chunk_bytes: Option<usize>,

    /// Overrides the default cap on a single stdin chunk.
    pub max_stdin_chunk_bytes: Option<usize>,

    /// Short alias -> fully qualified nail identifier. Consumed by
    /// `StaticRegistry` when building the CLI's registry.
    pub alias: Option<HashMap<String, String>>,

    /// The alias (or identifier) to dispatch to for an empty command.
    pub default_nail: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:2113".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: default_bind_addr(),
            pool_capacity: None,
            pool_high_water_mark: None,
            heartbeat_timeout_ms: None,
            max_header_chunk_bytes: None,
            max_stdin_chunk_bytes: None,
            alias: None,
            default_nail: None,
        }
    }
}

impl Config {
    pub fn heartbeat_timeout(&self) -> Duration {
        match self.heartbeat_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => crate::consts::DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

/// Holds a parsed config behind a lock so it can be handed out to
/// every worker while still being swappable in principle. This crate
/// does not watch the config file for changes and reload it live;
/// embedders who want that can rebuild a `Manager` and restart the
/// server.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<std::sync::RwLock<Config>>,
}

impl Manager {
    pub fn new(config: Config) -> Self {
        Manager { inner: Arc::new(std::sync::RwLock::new(config)) }
    }

    pub fn get(&self) -> Config {
        self.inner.read().unwrap().clone()
    }

    pub fn replace(&self, config: Config) {
        *self.inner.write().unwrap() = config;
    }
}
