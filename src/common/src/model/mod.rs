//! Domain model for the entities the reclamation pipeline destroys.
//!
//! Every entity carries a soft-delete status that is set upstream; the
//! reclaimers only ever read it.

pub mod organization;
pub mod signing;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use organization::{Company, Group, GroupSummary, ProgramTier, User};
pub use signing::{
    CollectionStatus, Contact, Document, DocumentCollection, FieldType, RetentionClass,
    SignatureField, Template,
};

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<i64> for $name {
                fn from(value: i64) -> Self {
                    Self(value)
                }
            }
        )*
    };
}

entity_id!(
    CompanyId,
    GroupId,
    UserId,
    ContactId,
    TemplateId,
    CollectionId,
    DocumentId,
    /// Seal image owned by a contact.
    SealId,
);

/// Error returned when a stored enum value is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Soft-delete state shared by companies, groups, users, contacts and templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Deleted,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Deleted => "deleted",
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, EntityStatus::Deleted)
    }
}

impl FromStr for EntityStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EntityStatus::Active),
            "deleted" => Ok(EntityStatus::Deleted),
            other => Err(UnknownVariant {
                kind: "entity status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_status_round_trips_through_str() {
        for status in [EntityStatus::Active, EntityStatus::Deleted] {
            assert_eq!(status.as_str().parse::<EntityStatus>().unwrap(), status);
        }
        assert!("archived".parse::<EntityStatus>().is_err());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = CompanyId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(id.to_string(), "42");
    }
}
