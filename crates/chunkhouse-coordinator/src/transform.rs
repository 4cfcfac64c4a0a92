//! Payload Transform Policy
//!
//! Devices do not all send samples in the aggregate's native shape. Which
//! transform a part needs is decided by who produced it, through an explicit
//! two-step table:
//!
//! ```text
//! device_id ──(rules)──► DeviceClass ──(table)──► PayloadTransform
//!
//! "ecg-12-*"        ──►  MultiLead   ──►  Identity
//! "emulated_*"      ──►  SingleLead  ──►  ExpandSingleChannel
//! (no rule matches) ──►  default class
//! ```
//!
//! A rule pattern matches a device id exactly, or by prefix when it ends with `*`.
//! Rules are checked in order; the first match wins.

use chunkhouse_core::{Payload, Sample, CHANNELS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Producer class of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Sends one `CHANNELS`-wide row per sample
    MultiLead,
    /// Sends one scalar per sample
    SingleLead,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::MultiLead => f.write_str("multi_lead"),
            DeviceClass::SingleLead => f.write_str("single_lead"),
        }
    }
}

/// How a part payload is turned into aggregate samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadTransform {
    Identity,
    ExpandSingleChannel,
}

/// Maps a device id pattern onto a device class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClassRule {
    pub pattern: String,
    pub class: DeviceClass,
}

impl DeviceClassRule {
    pub fn new(pattern: impl Into<String>, class: DeviceClass) -> Self {
        Self {
            pattern: pattern.into(),
            class,
        }
    }

    pub fn matches(&self, device_id: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => device_id.starts_with(prefix),
            None => device_id == self.pattern,
        }
    }
}

/// A payload whose shape does not fit the transform selected for it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// A scalar payload reached the identity transform, or rows reached expansion
    #[error("payload kind does not fit {transform:?}")]
    WrongPayloadKind { transform: PayloadTransform },
    /// A row is not exactly `CHANNELS` wide
    #[error("row {row} has width {width}, expected {}", CHANNELS)]
    RowWidth { row: usize, width: usize },
}

impl PayloadTransform {
    /// Turn one part payload into aggregate samples.
    pub fn apply(&self, payload: &Payload) -> Result<Vec<Sample>, TransformError> {
        match (self, payload) {
            (PayloadTransform::Identity, Payload::Channels(rows)) => rows
                .iter()
                .enumerate()
                .map(|(row, values)| {
                    Sample::try_from(values.as_slice()).map_err(|_| TransformError::RowWidth {
                        row,
                        width: values.len(),
                    })
                })
                .collect(),
            (PayloadTransform::ExpandSingleChannel, Payload::Scalars(values)) => Ok(values
                .iter()
                .map(|&value| {
                    let mut sample = [0.0; CHANNELS];
                    sample[0] = value;
                    sample
                })
                .collect()),
            // `[]` decodes as the first untagged variant
            (PayloadTransform::ExpandSingleChannel, Payload::Channels(rows)) if rows.is_empty() => {
                Ok(Vec::new())
            }
            (transform, _) => Err(TransformError::WrongPayloadKind {
                transform: *transform,
            }),
        }
    }
}

/// Device id → class → transform.
#[derive(Debug, Clone)]
pub struct TransformPolicy {
    rules: Vec<DeviceClassRule>,
    default_class: DeviceClass,
    transforms: HashMap<DeviceClass, PayloadTransform>,
}

impl Default for TransformPolicy {
    fn default() -> Self {
        Self::new(Vec::new(), DeviceClass::MultiLead)
    }
}

impl TransformPolicy {
    /// Policy with the standard class → transform table.
    pub fn new(rules: Vec<DeviceClassRule>, default_class: DeviceClass) -> Self {
        let transforms = HashMap::from([
            (DeviceClass::MultiLead, PayloadTransform::Identity),
            (DeviceClass::SingleLead, PayloadTransform::ExpandSingleChannel),
        ]);
        Self {
            rules,
            default_class,
            transforms,
        }
    }

    pub fn classify(&self, device_id: &str) -> DeviceClass {
        self.rules
            .iter()
            .find(|rule| rule.matches(device_id))
            .map(|rule| rule.class)
            .unwrap_or(self.default_class)
    }

    /// Transform for a device.
    pub fn resolve(&self, device_id: &str) -> PayloadTransform {
        let class = self.classify(device_id);
        self.transforms
            .get(&class)
            .copied()
            .unwrap_or(PayloadTransform::Identity)
    }
}
