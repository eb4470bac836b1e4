use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{CompanyId, EntityStatus, GroupId, UnknownVariant, UserId};

/// A tenant of the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub status: EntityStatus,
    /// Override of the global signed-collection retention, in days.
    pub signed_retention_days: Option<u32>,
    /// Override of the global unsigned-collection retention, in days.
    pub unsigned_retention_days: Option<u32>,
    pub groups: Vec<GroupSummary>,
}

impl Company {
    /// Groups of this company that have not been soft-deleted.
    pub fn active_groups(&self) -> impl Iterator<Item = &GroupSummary> {
        self.groups.iter().filter(|g| !g.status.is_deleted())
    }
}

/// Group reference loaded together with its company.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub status: EntityStatus,
}

/// A workspace inside a company; owns contacts, templates and collections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub company_id: CompanyId,
    pub name: String,
    pub status: EntityStatus,
    /// Users whose primary group is this group.
    pub users: Vec<User>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramTier {
    FreeTrial,
    Paid,
}

impl ProgramTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramTier::FreeTrial => "free_trial",
            ProgramTier::Paid => "paid",
        }
    }
}

impl FromStr for ProgramTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_trial" => Ok(ProgramTier::FreeTrial),
            "paid" => Ok(ProgramTier::Paid),
            other => Err(UnknownVariant {
                kind: "program tier",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ProgramTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Primary group.
    pub group_id: GroupId,
    pub email: String,
    pub status: EntityStatus,
    pub program_tier: ProgramTier,
    /// Additional groups the user is a member of.
    pub additional_group_mappings: Vec<GroupId>,
}

impl User {
    /// Additional group mappings other than `excluded`, in stored order.
    pub fn alternate_groups(&self, excluded: GroupId) -> impl Iterator<Item = GroupId> + '_ {
        self.additional_group_mappings
            .iter()
            .copied()
            .filter(move |g| *g != excluded)
    }
}
