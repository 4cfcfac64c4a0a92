//! Coordinator Configuration
//!
//! - **parts_per_chunk**: parts a complete chunk consists of (default: 16)
//! - **part_length**: samples per part (default: 256)
//! - **call_timeout_ms**: upper bound for each store or stream call (default: 5s)
//! - **publish_max_retries**: stream append retries before giving up (default: 3)
//! - **publish_initial_backoff_ms** / **publish_max_backoff_ms**: append backoff bounds
//! - **publish_jitter**: randomize append backoff (default: true)
//! - **device_classes**: device id pattern → class rules, first match wins
//! - **default_device_class**: class of devices no rule matches (default: multi_lead)
//!
//! ## Usage
//!
//! ```ignore
//! use chunkhouse_coordinator::{CoordinatorConfig, DeviceClass, DeviceClassRule};
//!
//! let config = CoordinatorConfig {
//!     device_classes: vec![DeviceClassRule::new("emulated_device_*", DeviceClass::SingleLead)],
//!     ..Default::default()
//! };
//!
//! // Or from JSON, with every field optional
//! let config: CoordinatorConfig = serde_json::from_str(r#"{"call_timeout_ms": 2000}"#)?;
//! ```

use crate::error::{CoordinatorError, Result};
use crate::retry::RetryPolicy;
use crate::transform::{DeviceClass, DeviceClassRule, TransformPolicy};
use chunkhouse_core::{ChunkLayout, PARTS_PER_CHUNK, PART_LENGTH};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Parts per chunk (default: 16)
    #[serde(default = "default_parts_per_chunk")]
    pub parts_per_chunk: u32,

    /// Samples per part (default: 256)
    #[serde(default = "default_part_length")]
    pub part_length: usize,

    /// Timeout for a single store or stream call in milliseconds (default: 5000)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Append retries after the first attempt (default: 3)
    #[serde(default = "default_publish_max_retries")]
    pub publish_max_retries: usize,

    /// First append backoff in milliseconds (default: 50)
    #[serde(default = "default_publish_initial_backoff_ms")]
    pub publish_initial_backoff_ms: u64,

    /// Append backoff cap in milliseconds (default: 2000)
    #[serde(default = "default_publish_max_backoff_ms")]
    pub publish_max_backoff_ms: u64,

    /// Randomize append backoff (default: true)
    #[serde(default = "default_publish_jitter")]
    pub publish_jitter: bool,

    #[serde(default)]
    pub device_classes: Vec<DeviceClassRule>,

    #[serde(default = "default_device_class")]
    pub default_device_class: DeviceClass,
}

fn default_parts_per_chunk() -> u32 {
    PARTS_PER_CHUNK
}

fn default_part_length() -> usize {
    PART_LENGTH
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_publish_max_retries() -> usize {
    3
}

fn default_publish_initial_backoff_ms() -> u64 {
    50
}

fn default_publish_max_backoff_ms() -> u64 {
    2_000
}

fn default_publish_jitter() -> bool {
    true
}

fn default_device_class() -> DeviceClass {
    DeviceClass::MultiLead
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            parts_per_chunk: default_parts_per_chunk(),
            part_length: default_part_length(),
            call_timeout_ms: default_call_timeout_ms(),
            publish_max_retries: default_publish_max_retries(),
            publish_initial_backoff_ms: default_publish_initial_backoff_ms(),
            publish_max_backoff_ms: default_publish_max_backoff_ms(),
            publish_jitter: default_publish_jitter(),
            device_classes: Vec::new(),
            default_device_class: default_device_class(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            CoordinatorError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parts_per_chunk == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "parts_per_chunk must be at least 1".to_string(),
            ));
        }
        if self.part_length == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "part_length must be at least 1".to_string(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "call_timeout_ms must be positive".to_string(),
            ));
        }
        if self.publish_initial_backoff_ms > self.publish_max_backoff_ms {
            return Err(CoordinatorError::InvalidConfig(format!(
                "publish_initial_backoff_ms ({}) exceeds publish_max_backoff_ms ({})",
                self.publish_initial_backoff_ms, self.publish_max_backoff_ms
            )));
        }
        if let Some(rule) = self.device_classes.iter().find(|r| r.pattern.is_empty()) {
            return Err(CoordinatorError::InvalidConfig(format!(
                "empty device class pattern for {}",
                rule.class
            )));
        }
        Ok(())
    }

    pub fn layout(&self) -> ChunkLayout {
        ChunkLayout {
            parts_per_chunk: self.parts_per_chunk,
            part_length: self.part_length,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn publish_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.publish_max_retries,
            initial_backoff: Duration::from_millis(self.publish_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.publish_max_backoff_ms),
            backoff_multiplier: 2.0,
            jitter: self.publish_jitter,
        }
    }

    pub fn transform_policy(&self) -> TransformPolicy {
        TransformPolicy::new(self.device_classes.clone(), self.default_device_class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.layout().expected_samples(), 4096);
        assert_eq!(config.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.publish_retry_policy().max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: CoordinatorConfig = serde_json::from_str(
            r#"{
                "call_timeout_ms": 750,
                "device_classes": [{"pattern": "emulated_device_*", "class": "single_lead"}]
            }"#,
        )
        .unwrap();

        assert_eq!(config.call_timeout_ms, 750);
        assert_eq!(config.parts_per_chunk, 16);
        assert_eq!(
            config.transform_policy().classify("emulated_device_4"),
            DeviceClass::SingleLead
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_parts = CoordinatorConfig {
            parts_per_chunk: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_parts.validate(),
            Err(CoordinatorError::InvalidConfig(_))
        ));

        let inverted_backoff = CoordinatorConfig {
            publish_initial_backoff_ms: 5_000,
            publish_max_backoff_ms: 10,
            ..Default::default()
        };
        assert!(inverted_backoff.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.json");
        std::fs::write(&path, r#"{"part_length": 8, "parts_per_chunk": 2}"#).unwrap();

        let config = CoordinatorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.layout().expected_samples(), 16);

        assert!(CoordinatorConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
