// ⛽ Gas Station Entity
// A station owns its pumps. Deleting a station that still has pumps is refused,
// so a pump never outlives its station.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// STATION STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationStatus {
    Active,
    Inactive,
    Maintenance,
}

impl StationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationStatus::Active => "ACTIVE",
            StationStatus::Inactive => "INACTIVE",
            StationStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl FromStr for StationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(StationStatus::Active),
            "INACTIVE" => Ok(StationStatus::Inactive),
            "MAINTENANCE" => Ok(StationStatus::Maintenance),
            other => Err(Error::Validation(format!("unknown station status '{}'", other))),
        }
    }
}

// ============================================================================
// STATION ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasStation {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub status: StationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification_at: Option<DateTime<Utc>>,
}

impl GasStation {
    /// Snapshot stored in audit entries
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "location": self.location,
            "status": self.status,
        })
    }
}

/// Body of `POST /stations`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStation {
    pub name: String,
    pub location: String,
}

impl NewStation {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("station name is required".to_string()));
        }
        if self.location.trim().is_empty() {
            return Err(Error::Validation("station location is required".to_string()));
        }
        Ok(())
    }
}

/// Body of `PUT /stations/{id}`; absent fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StationStatus>,
}

impl StationUpdate {
    /// Apply onto a copy of the current station
    pub fn apply(&self, current: &GasStation) -> Result<GasStation> {
        let mut next = current.clone();

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::Validation("station name cannot be empty".to_string()));
            }
            next.name = name.clone();
        }
        if let Some(location) = &self.location {
            if location.trim().is_empty() {
                return Err(Error::Validation("station location cannot be empty".to_string()));
            }
            next.location = location.clone();
        }
        if let Some(status) = self.status {
            next.status = status;
        }

        Ok(next)
    }
}
