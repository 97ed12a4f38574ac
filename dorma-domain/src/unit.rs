use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Gender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenderPolicy {
    Male,
    Female,
    Mixed,
}

impl GenderPolicy {
    /// Whether a tenant with the given (optional) gender may book under
    /// this policy. Single-gender units reject tenants with no declared
    /// gender on file.
    pub fn admits(&self, gender: Option<Gender>) -> bool {
        match self {
            GenderPolicy::Mixed => true,
            GenderPolicy::Male => matches!(gender, Some(Gender::Male)),
            GenderPolicy::Female => matches!(gender, Some(Gender::Female)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenderPolicy::Male => "MALE",
            GenderPolicy::Female => "FEMALE",
            GenderPolicy::Mixed => "MIXED",
        }
    }
}

impl std::fmt::Display for GenderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MALE" => Ok(GenderPolicy::Male),
            "FEMALE" => Ok(GenderPolicy::Female),
            "MIXED" => Ok(GenderPolicy::Mixed),
            other => Err(format!("unknown gender policy: {other}")),
        }
    }
}

/// One bookable bed slot group within a physical room. Occupancy is not
/// stored here: the availability ledger owns the live counter and
/// re-derives it from active bookings on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    pub room_id: Uuid,
    pub capacity: i32,
    pub gender_policy: GenderPolicy,
    /// Price per bed in minor currency units.
    pub price_per_bed: i64,
}

/// Derived, broadcast-only view of a unit's counters. Never authoritative:
/// viewers reconcile against the ledger by re-fetching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    pub unit_id: Uuid,
    pub occupied: i32,
    pub capacity: i32,
    pub available: bool,
}
