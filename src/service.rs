/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! The runtime service layer: the boot sequence an embedding process (an
//! HTTP API, a UI, a CLI) runs before constructing managers.
//!
//! Initialisation order is fixed: a key-value client is built by the
//! caller first (this crate never opens one itself), then the process-wide
//! [`TriggerSettingsRegistry`] is constructed and seeded with every
//! manager's settings specs, then manager constructors run against that
//! shared registry, then the caller wraps the result in its own service
//! object and optionally auto-starts the worker loops. [`boot`] performs
//! the second step; the rest stays with the caller, which is the only
//! party that knows whether it wants a DEX manager, a Polymarket manager,
//! or both.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{FlowHubError, InitError};
use crate::manager::{dex, polymarket};
use crate::trigger::settings::TriggerSettingsRegistry;

/// Resolves an operator config directory: `$XDG_CONFIG_HOME/<app_name>` (or
/// the platform equivalent via `dirs::config_dir`), falling back to
/// `./config/<app_name>` when no config directory can be determined (e.g.
/// a minimal container image with no `HOME` set).
pub fn default_config_dir(app_name: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("./config"))
        .join(app_name)
}

/// Reads and parses an operator-editable TOML override file. Returns
/// `Ok(None)` if the file does not exist — overrides are optional, the
/// compiled-in defaults and the key-value store cover the rest of the
/// precedence chain described in the manager config loader.
pub fn load_toml_overrides<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, InitError> {
    if !path.exists() {
        return Ok(None);
    }
    parse_toml_file(path).map(Some)
}

fn parse_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T, InitError> {
    let parsed: Result<T, anyhow::Error> = (|| {
        let content = fs::read_to_string(path)?;
        let value = toml::from_str(&content)?;
        Ok(value)
    })();
    parsed.map_err(|err| InitError::ConfigLoad {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// The process-wide state a boot sequence produces: a trigger settings
/// registry seeded with both managers' settings specs, and the resolved
/// config directory managers should mirror their config/feed-cache files
/// under.
pub struct ServiceBoot {
    pub settings: Arc<TriggerSettingsRegistry>,
    pub config_dir: PathBuf,
}

/// Builds the process-wide trigger settings registry and registers every
/// known manager's settings specs against it. Step 2 of the initialisation
/// order: the key-value client (step 1) is the caller's responsibility,
/// and manager construction (step 3) follows this call.
pub fn boot(app_name: &str, config_dir: Option<PathBuf>) -> Result<ServiceBoot, FlowHubError> {
    let config_dir = config_dir.unwrap_or_else(|| default_config_dir(app_name));
    fs::create_dir_all(&config_dir).map_err(|source| {
        FlowHubError::Init(InitError::ConfigLoad {
            path: config_dir.clone(),
            message: source.to_string(),
        })
    })?;

    let settings = Arc::new(TriggerSettingsRegistry::new());
    dex::register_dex_settings(&settings)?;
    polymarket::register_polymarket_settings(&settings)?;

    Ok(ServiceBoot { settings, config_dir })
}
