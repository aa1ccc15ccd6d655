//! Person domain model.
//!
//! # Responsibility
//! - Define the identity record owned by the Identity Pool.
//! - Provide the stable `PersonId` key used by every placement.
//!
//! # Invariants
//! - `person_id` is unique within one identity pool and never reused.
//! - The engine never creates or destroys people; it only moves references.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Stable server-assigned person identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub i64);

impl Display for PersonId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Membership lifecycle state carried by the identity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    /// Regular attending member.
    Active,
    /// Recently joined, still tracked by newcomer follow-up.
    Newcomer,
    /// Kept on the roster but no longer attending.
    Inactive,
}

impl MembershipStatus {
    /// Returns the storage/wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Newcomer => "newcomer",
            Self::Inactive => "inactive",
        }
    }

    /// Parses a storage/wire label.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "newcomer" => Some(Self::Newcomer),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// Identity record for one person eligible for cell assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: PersonId,
    /// Name shown to operators and matched by bulk import.
    pub display_name: String,
    pub contact_phone: Option<String>,
    /// ISO-8601 calendar date (`YYYY-MM-DD`).
    pub birth_date: Option<String>,
    pub membership_status: MembershipStatus,
}

impl Person {
    /// Creates an active person with no optional contact details.
    pub fn new(person_id: PersonId, display_name: impl Into<String>) -> Self {
        Self {
            person_id,
            display_name: display_name.into(),
            contact_phone: None,
            birth_date: None,
            membership_status: MembershipStatus::Active,
        }
    }
}
