use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{
    CollectionId, ContactId, DocumentId, EntityStatus, GroupId, SealId, TemplateId,
    UnknownVariant, UserId,
};

/// An address-book entry that can be invited to sign.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub group_id: GroupId,
    pub email: String,
    pub status: EntityStatus,
    pub seals: Vec<SealId>,
    /// Number of historical signer rows pointing at this contact.
    pub signer_references: u32,
}

impl Contact {
    pub fn is_referenced_by_signers(&self) -> bool {
        self.signer_references > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Signature,
    Initials,
    Date,
    Text,
    Checkbox,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Signature => "signature",
            FieldType::Initials => "initials",
            FieldType::Date => "date",
            FieldType::Text => "text",
            FieldType::Checkbox => "checkbox",
        }
    }
}

impl FromStr for FieldType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signature" => Ok(FieldType::Signature),
            "initials" => Ok(FieldType::Initials),
            "date" => Ok(FieldType::Date),
            "text" => Ok(FieldType::Text),
            "checkbox" => Ok(FieldType::Checkbox),
            other => Err(UnknownVariant {
                kind: "field type",
                value: other.to_string(),
            }),
        }
    }
}

/// A placed field on a template page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureField {
    pub name: String,
    pub field_type: FieldType,
    /// Prefilled content; personal data that must never leave this process.
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub group_id: GroupId,
    pub name: String,
    pub status: EntityStatus,
    /// Created for a single send; garbage once no document uses it.
    pub is_one_time: bool,
    pub signature_fields: Vec<SignatureField>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Draft,
    Sent,
    Signed,
    Declined,
    Canceled,
    Deleted,
}

/// Which retention interval governs a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    Signed,
    Unsigned,
}

impl fmt::Display for RetentionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionClass::Signed => f.write_str("signed"),
            RetentionClass::Unsigned => f.write_str("unsigned"),
        }
    }
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Draft => "draft",
            CollectionStatus::Sent => "sent",
            CollectionStatus::Signed => "signed",
            CollectionStatus::Declined => "declined",
            CollectionStatus::Canceled => "canceled",
            CollectionStatus::Deleted => "deleted",
        }
    }

    /// Retention class for live collections; `None` once soft-deleted.
    pub fn retention_class(&self) -> Option<RetentionClass> {
        match self {
            CollectionStatus::Signed => Some(RetentionClass::Signed),
            CollectionStatus::Deleted => None,
            _ => Some(RetentionClass::Unsigned),
        }
    }

    /// Stored statuses that belong to a retention class.
    pub fn in_class(class: RetentionClass) -> &'static [CollectionStatus] {
        match class {
            RetentionClass::Signed => &[CollectionStatus::Signed],
            RetentionClass::Unsigned => &[
                CollectionStatus::Draft,
                CollectionStatus::Sent,
                CollectionStatus::Declined,
                CollectionStatus::Canceled,
            ],
        }
    }
}

impl FromStr for CollectionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CollectionStatus::Draft),
            "sent" => Ok(CollectionStatus::Sent),
            "signed" => Ok(CollectionStatus::Signed),
            "declined" => Ok(CollectionStatus::Declined),
            "canceled" => Ok(CollectionStatus::Canceled),
            "deleted" => Ok(CollectionStatus::Deleted),
            other => Err(UnknownVariant {
                kind: "collection status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub template_id: TemplateId,
}

/// A signing envelope: one or more documents sent together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentCollection {
    pub id: CollectionId,
    pub group_id: GroupId,
    /// Owner.
    pub user_id: UserId,
    pub name: String,
    pub status: CollectionStatus,
    pub created_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
    pub documents: Vec<Document>,
}

impl DocumentCollection {
    /// Timestamp the retention interval is measured from.
    pub fn retention_anchor(&self, class: RetentionClass) -> Option<DateTime<Utc>> {
        match class {
            RetentionClass::Signed => self.signed_at,
            RetentionClass::Unsigned => Some(self.created_at),
        }
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.status == CollectionStatus::Deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn collection(status: CollectionStatus) -> DocumentCollection {
        let created_at = Utc::now() - Duration::days(20);
        DocumentCollection {
            id: CollectionId(1),
            group_id: GroupId(1),
            user_id: UserId(1),
            name: "Lease".to_string(),
            status,
            created_at,
            signed_at: Some(created_at + Duration::days(2)),
            documents: vec![],
        }
    }

    #[test]
    fn test_retention_class_by_status() {
        assert_eq!(
            CollectionStatus::Signed.retention_class(),
            Some(RetentionClass::Signed)
        );
        assert_eq!(
            CollectionStatus::Declined.retention_class(),
            Some(RetentionClass::Unsigned)
        );
        assert_eq!(CollectionStatus::Deleted.retention_class(), None);
    }

    #[test]
    fn test_class_statuses_match_retention_class() {
        for class in [RetentionClass::Signed, RetentionClass::Unsigned] {
            for status in CollectionStatus::in_class(class) {
                assert_eq!(status.retention_class(), Some(class));
            }
        }
    }

    #[test]
    fn test_retention_anchor() {
        let c = collection(CollectionStatus::Signed);
        assert_eq!(c.retention_anchor(RetentionClass::Signed), c.signed_at);
        assert_eq!(
            c.retention_anchor(RetentionClass::Unsigned),
            Some(c.created_at)
        );
        assert!(!c.is_soft_deleted());
        assert!(collection(CollectionStatus::Deleted).is_soft_deleted());
    }
}
