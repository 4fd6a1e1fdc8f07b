// 🔒 Pump Entity + lock state machine
//
// States: LOCKED, UNLOCKED, BROKEN, MAINTENANCE. New pumps start LOCKED.
//
//   verdict success  : LOCKED | UNLOCKED -> UNLOCKED
//   verdict failed   : LOCKED | UNLOCKED -> LOCKED
//   admin update     : any -> LOCKED | BROKEN | MAINTENANCE
//
// BROKEN and MAINTENANCE are never left through a verification, and nothing
// but a successful verification unlocks a pump.

use crate::error::{Error, Result};
use crate::reconciliation::Verdict;
use crate::tags::{TagId, TagSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// PUMP STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PumpStatus {
    Locked,
    Unlocked,
    Broken,
    Maintenance,
}

impl PumpStatus {
    pub const ALL: [PumpStatus; 4] = [
        PumpStatus::Locked,
        PumpStatus::Unlocked,
        PumpStatus::Broken,
        PumpStatus::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PumpStatus::Locked => "LOCKED",
            PumpStatus::Unlocked => "UNLOCKED",
            PumpStatus::Broken => "BROKEN",
            PumpStatus::Maintenance => "MAINTENANCE",
        }
    }

    /// Whether a verification may run against a pump in this state
    pub fn is_verifiable(&self) -> bool {
        matches!(self, PumpStatus::Locked | PumpStatus::Unlocked)
    }

    /// Status after a reconciliation verdict. Fails closed on any mismatch.
    pub fn after_verdict(self, verdict: Verdict) -> Result<PumpStatus> {
        if !self.is_verifiable() {
            return Err(Error::InvalidState(format!(
                "pump is {} and cannot be verified until an administrator changes its status",
                self.as_str()
            )));
        }

        Ok(if verdict.is_success() {
            PumpStatus::Unlocked
        } else {
            PumpStatus::Locked
        })
    }

    /// Status after an explicit administrative update
    pub fn administrative_transition(self, target: PumpStatus) -> Result<PumpStatus> {
        if target == PumpStatus::Unlocked && self != PumpStatus::Unlocked {
            return Err(Error::InvalidState(
                "pumps are unlocked only by a successful verification".to_string(),
            ));
        }
        Ok(target)
    }
}

impl FromStr for PumpStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LOCKED" => Ok(PumpStatus::Locked),
            "UNLOCKED" => Ok(PumpStatus::Unlocked),
            "BROKEN" => Ok(PumpStatus::Broken),
            "MAINTENANCE" => Ok(PumpStatus::Maintenance),
            other => Err(Error::Validation(format!("unknown pump status '{}'", other))),
        }
    }
}

// ============================================================================
// EXPECTED CHILD TAGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedChildTag {
    pub id: i64,
    pub tag_id: String,
    pub description: String,
}

/// A child tag as submitted by an administrator, before it has a row id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildTagSpec {
    pub tag_id: String,
    #[serde(default)]
    pub description: String,
}

/// Validate a submitted child tag list: non-empty identifiers, no repeats
pub fn validate_child_tags(tags: &[ChildTagSpec]) -> Result<TagSet> {
    TagSet::from_expected(tags.iter().map(|t| t.tag_id.as_str()))
}

// ============================================================================
// PUMP ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pump {
    pub id: i64,
    pub gas_station_id: i64,
    pub pump_number: i64,
    pub main_rfid_tag: String,
    pub status: PumpStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped on every write
    pub version: i64,
    #[serde(default)]
    pub expected_child_tags: Vec<ExpectedChildTag>,
}

impl Pump {
    pub fn main_tag(&self) -> Result<TagId> {
        TagId::parse(&self.main_rfid_tag)
    }

    pub fn expected_tag_set(&self) -> Result<TagSet> {
        TagSet::from_expected(self.expected_child_tags.iter().map(|t| t.tag_id.as_str()))
    }

    /// Snapshot stored in audit entries
    pub fn snapshot(&self) -> serde_json::Value {
        let tags: Vec<&str> = self
            .expected_child_tags
            .iter()
            .map(|t| t.tag_id.as_str())
            .collect();

        serde_json::json!({
            "gasStationId": self.gas_station_id,
            "pumpNumber": self.pump_number,
            "mainRfidTag": self.main_rfid_tag,
            "status": self.status,
            "expectedChildTags": tags,
        })
    }
}

/// Body of `POST /stations/{id}/pumps`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPump {
    pub pump_number: i64,
    pub main_rfid_tag: String,
    #[serde(default)]
    pub expected_child_tags: Vec<ChildTagSpec>,
}

impl NewPump {
    pub fn validate(&self) -> Result<()> {
        validate_pump_number(self.pump_number)?;
        TagId::parse(&self.main_rfid_tag)?;
        validate_child_tags(&self.expected_child_tags)?;
        Ok(())
    }
}

/// Body of `PUT /pumps/{id}`; absent fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pump_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_rfid_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PumpStatus>,
    /// Replaces the whole expected set when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_child_tags: Option<Vec<ChildTagSpec>>,
}

impl PumpUpdate {
    pub fn validate(&self, current: &Pump) -> Result<()> {
        if let Some(number) = self.pump_number {
            validate_pump_number(number)?;
        }
        if let Some(tag) = &self.main_rfid_tag {
            TagId::parse(tag)?;
        }
        if let Some(status) = self.status {
            current.status.administrative_transition(status)?;
        }
        if let Some(tags) = &self.expected_child_tags {
            validate_child_tags(tags)?;
        }
        Ok(())
    }
}

fn validate_pump_number(number: i64) -> Result<()> {
    if number < 1 {
        return Err(Error::Validation(format!(
            "pump number must be positive, got {}",
            number
        )));
    }
    Ok(())
}
