//! Status conditions
//!
//! Condition types and reasons reported on `EtcdadmConfig.status.conditions`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Summary condition; `True` only when the bootstrap data is safe to consume
pub const READY_CONDITION: &str = "Ready";

/// The data secret exists and holds data rendered from the current spec
pub const DATA_SECRET_AVAILABLE_CONDITION: &str = "DataSecretAvailable";

/// Reason: no bootstrap data has been published yet
pub const WAITING_FOR_DATA_REASON: &str = "WaitingForData";

/// Reason: the data secret holds data for the current spec
pub const DATA_SECRET_PUBLISHED_REASON: &str = "DataSecretPublished";

/// Reason: the spec fails cross-field or value validation
pub const INVALID_CONFIGURATION_REASON: &str = "InvalidConfiguration";

/// Reason: a secret the spec points at does not exist
pub const MISSING_REFERENCE_REASON: &str = "MissingReference";

/// Reason: writing the data secret failed after retries
pub const PERSIST_FAILED_REASON: &str = "PersistFailed";

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { ConditionStatus::True } else { ConditionStatus::False }
    }
}

/// A typed, timestamped observation about the resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `Ready`
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Last time `status` changed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable, CamelCase reason for the last update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}
