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

//! Typed configuration surface for trigger-tunable settings.
//!
//! Distinct from [`super::flow::TriggerFlowRegistry`]: this registry never
//! dispatches anything. It only knows how to project a `pipeline.trigger`
//! key's settings out of a manager's config document (`extract`) and how
//! to validate-then-write a payload back into it (`apply`). It is
//! constructed once, process-wide, at boot (see the design notes), and a
//! shared handle is passed into each manager — it is not a language-level
//! global.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{RegistrationError, SettingsError};

/// Extracts this trigger's settings subset out of a manager config
/// document.
pub type ExtractFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Validates `payload` against the settings schema and, only if valid,
/// writes the normalized fields into `config`. Must leave `config`
/// untouched on error.
pub type ApplyFn = Arc<dyn Fn(&mut Value, Value) -> Result<Value, SettingsError> + Send + Sync>;

/// A typed configuration surface registered under a `pipeline.trigger` key
/// (e.g. `"dex.cycle_interval"`, `"polymarket.market"`).
#[derive(Clone)]
pub struct TriggerSettingsSpec {
    pub key: String,
    /// JSON schema describing the settings model's fields, bounds, and
    /// defaults — served verbatim over the trigger settings HTTP surface.
    pub schema: Value,
    pub extract: ExtractFn,
    pub apply: ApplyFn,
}

impl std::fmt::Debug for TriggerSettingsSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerSettingsSpec")
            .field("key", &self.key)
            .finish()
    }
}

/// Process-wide registry of trigger settings specs, constructed once at
/// boot and shared (not a `static`) across manager instances.
pub struct TriggerSettingsRegistry {
    specs: RwLock<HashMap<String, TriggerSettingsSpec>>,
}

impl Default for TriggerSettingsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSettingsRegistry {
    pub fn new() -> Self {
        Self {
            specs: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, spec: TriggerSettingsSpec) -> Result<(), RegistrationError> {
        let mut guard = self.specs.write();
        if guard.contains_key(&spec.key) {
            return Err(RegistrationError::DuplicateTriggerSettings(spec.key));
        }
        guard.insert(spec.key.clone(), spec);
        Ok(())
    }

    /// Metadata (key + schema) for every registered settings surface,
    /// sorted by key — backs `list_trigger_specs`.
    pub fn list_specs(&self) -> Vec<(String, Value)> {
        let guard = self.specs.read();
        let mut rows: Vec<(String, Value)> = guard
            .values()
            .map(|s| (s.key.clone(), s.schema.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    pub fn get_settings(&self, key: &str, config: &Value) -> Result<Value, RegistrationError> {
        let guard = self.specs.read();
        let spec = guard
            .get(key)
            .ok_or_else(|| RegistrationError::UnknownTriggerSettings(key.to_string()))?;
        Ok((spec.extract)(config))
    }

    /// Validates `payload` and, on success, writes the normalized settings
    /// into `config`. On validation failure, `config` is left untouched.
    pub fn update_settings(
        &self,
        key: &str,
        config: &mut Value,
        payload: Value,
    ) -> Result<Value, UpdateSettingsError> {
        let guard = self.specs.read();
        let spec = guard
            .get(key)
            .ok_or_else(|| UpdateSettingsError::Unknown(key.to_string()))?;
        (spec.apply)(config, payload).map_err(UpdateSettingsError::Invalid)
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum UpdateSettingsError {
    #[error("unknown trigger settings key '{0}'")]
    Unknown(String),
    #[error(transparent)]
    Invalid(#[from] SettingsError),
}

/// Validates that a numeric field lies within `[min, max]`, the pattern
/// every bounded settings field in this registry reduces to.
pub fn validate_bounded_f64(
    field: &str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<f64, SettingsError> {
    if value < min || value > max {
        return Err(SettingsError::OutOfRange {
            field: field.to_string(),
            message: format!("must be between {min} and {max}, got {value}"),
        });
    }
    Ok(value)
}

pub fn validate_bounded_u64(field: &str, value: u64, min: u64, max: u64) -> Result<u64, SettingsError> {
    if value < min || value > max {
        return Err(SettingsError::OutOfRange {
            field: field.to_string(),
            message: format!("must be between {min} and {max}, got {value}"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cycle_interval_spec() -> TriggerSettingsSpec {
        TriggerSettingsSpec {
            key: "dex.cycle_interval".to_string(),
            schema: json!({
                "type": "object",
                "properties": { "cycle_hours": { "type": "number", "minimum": 1, "maximum": 168 } }
            }),
            extract: Arc::new(|config| {
                json!({ "cycle_hours": config["process"]["cycle_hours"] })
            }),
            apply: Arc::new(|config, payload| {
                let hours = payload
                    .get("cycle_hours")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| SettingsError::WrongType {
                        field: "cycle_hours".into(),
                        message: "expected number".into(),
                    })?;
                validate_bounded_f64("cycle_hours", hours, 1.0, 168.0)?;
                config["process"]["cycle_hours"] = json!(hours);
                Ok(json!({ "cycle_hours": hours }))
            }),
        }
    }

    #[test]
    fn apply_validates_before_mutating() {
        let registry = TriggerSettingsRegistry::new();
        registry.register(cycle_interval_spec()).unwrap();

        let mut config = json!({ "process": { "cycle_hours": 4.0 } });
        let err = registry
            .update_settings("dex.cycle_interval", &mut config, json!({"cycle_hours": 999.0}))
            .unwrap_err();
        assert!(matches!(err, UpdateSettingsError::Invalid(_)));
        assert_eq!(config["process"]["cycle_hours"], json!(4.0));
    }

    #[test]
    fn extract_apply_round_trip_is_idempotent() {
        let registry = TriggerSettingsRegistry::new();
        registry.register(cycle_interval_spec()).unwrap();

        let mut config = json!({ "process": { "cycle_hours": 6.0 } });
        let extracted = registry.get_settings("dex.cycle_interval", &config).unwrap();
        let normalized = registry
            .update_settings("dex.cycle_interval", &mut config, extracted.clone())
            .unwrap();
        assert_eq!(normalized, extracted);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = TriggerSettingsRegistry::new();
        registry.register(cycle_interval_spec()).unwrap();
        let err = registry.register(cycle_interval_spec()).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateTriggerSettings(_)));
    }
}
