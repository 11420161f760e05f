//! The declarative config schema reconciled against the registry. Parsed
//! from YAML by the server crate and handed to
//! [`crate::reconciler::reconcile`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level config document: the operator's desired pool shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RanchConfig {
    #[serde(default)]
    pub resources: Vec<StaticResourceSpec>,
    #[serde(default)]
    pub dynamic_resources: Vec<DrlcSpec>,
}

/// One statically declared resource: a fixed-name leasable unit that is
/// never materialized or retired by the dynamic class manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticResourceSpec {
    pub name: String,
    pub resource_type: String,
    #[serde(default = "default_initial_state")]
    pub initial_state: String,
}

/// One declared dynamic resource class (a DRLC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrlcSpec {
    pub resource_type: String,
    #[serde(default = "default_initial_state")]
    pub initial_state: String,
    pub min_count: u32,
    pub max_count: u32,
    #[serde(default, with = "humantime_duration_opt")]
    pub lifespan: Option<Duration>,
    #[serde(default)]
    pub needs: BTreeMap<String, u32>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub dirty_state: Option<String>,
}

fn default_initial_state() -> String {
    "free".to_string()
}

/// Serializes `Option<Duration>` as a human-readable string (`"5m"`) rather
/// than nanosecond counts, matching the config's hand-editable YAML intent.
mod humantime_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => humantime::format_duration(*d)
                .to_string()
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl DrlcSpec {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min_count <= self.max_count
    }
}
