use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::model::{
    CollectionId, CollectionStatus, Company, CompanyId, DocumentCollection, DocumentId, FieldType,
    GroupId, Template, TemplateId, UserId,
};

use crate::reclaim::Trigger;

/// Compliance record of a document collection, captured before its storage
/// is destroyed.
///
/// Only structural metadata is kept: no collection name, no document
/// content and no signature field values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSnapshot {
    pub collection_id: CollectionId,
    pub company_id: Option<CompanyId>,
    pub company_name: Option<String>,
    pub group_id: GroupId,
    pub owner_id: UserId,
    pub status: CollectionStatus,
    pub created_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
    pub reclaimed_at: DateTime<Utc>,
    pub trigger: Trigger,
    pub documents: Vec<DocumentAudit>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAudit {
    pub document_id: DocumentId,
    pub template_id: TemplateId,
    /// Field types of the template, in placement order.
    pub field_types: Vec<FieldType>,
}

impl AuditSnapshot {
    /// Build the snapshot from the collection, its company (when still
    /// resolvable) and the templates its documents were rendered from.
    ///
    /// Documents whose template is gone are recorded with no field types.
    pub fn capture(
        collection: &DocumentCollection,
        company: Option<&Company>,
        templates: &[Template],
        trigger: Trigger,
        reclaimed_at: DateTime<Utc>,
    ) -> Self {
        let documents = collection
            .documents
            .iter()
            .map(|document| DocumentAudit {
                document_id: document.id,
                template_id: document.template_id,
                field_types: templates
                    .iter()
                    .find(|t| t.id == document.template_id)
                    .map(|t| t.signature_fields.iter().map(|f| f.field_type).collect())
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            collection_id: collection.id,
            company_id: company.map(|c| c.id),
            company_name: company.map(|c| c.name.clone()),
            group_id: collection.group_id,
            owner_id: collection.user_id,
            status: collection.status,
            created_at: collection.created_at,
            signed_at: collection.signed_at,
            reclaimed_at,
            trigger,
            documents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::model::{Document, EntityStatus, SignatureField};

    fn collection() -> DocumentCollection {
        DocumentCollection {
            id: CollectionId(5),
            group_id: GroupId(2),
            user_id: UserId(3),
            name: "Lease for Jane Doe".to_string(),
            status: CollectionStatus::Signed,
            created_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            signed_at: Some(Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()),
            documents: vec![
                Document {
                    id: DocumentId(50),
                    template_id: TemplateId(8),
                },
                Document {
                    id: DocumentId(51),
                    template_id: TemplateId(9),
                },
            ],
        }
    }

    fn template() -> Template {
        Template {
            id: TemplateId(8),
            group_id: GroupId(2),
            name: "Lease".to_string(),
            status: EntityStatus::Active,
            is_one_time: false,
            signature_fields: vec![
                SignatureField {
                    name: "tenant_signature".to_string(),
                    field_type: FieldType::Signature,
                    value: None,
                },
                SignatureField {
                    name: "tenant_ssn".to_string(),
                    field_type: FieldType::Text,
                    value: Some("123-45-6789".to_string()),
                },
            ],
        }
    }

    fn company() -> Company {
        Company {
            id: CompanyId(1),
            name: "Acme".to_string(),
            status: EntityStatus::Active,
            signed_retention_days: None,
            unsigned_retention_days: None,
            groups: Vec::new(),
        }
    }

    #[test]
    fn test_capture_keeps_field_types_only() {
        let now = Utc::now();
        let snapshot = AuditSnapshot::capture(
            &collection(),
            Some(&company()),
            &[template()],
            Trigger::Retention,
            now,
        );

        assert_eq!(snapshot.company_name.as_deref(), Some("Acme"));
        assert_eq!(snapshot.owner_id, UserId(3));
        assert_eq!(
            snapshot.documents[0].field_types,
            vec![FieldType::Signature, FieldType::Text]
        );
        // Template 9 is gone
        assert!(snapshot.documents[1].field_types.is_empty());

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("123-45-6789"));
        assert!(!json.contains("tenant_ssn"));
        assert!(!json.contains("Jane Doe"));
        assert!(json.contains("\"collectionId\":5"));
        assert!(json.contains("\"fieldTypes\":[\"signature\",\"text\"]"));
    }

    #[test]
    fn test_capture_without_company() {
        let snapshot =
            AuditSnapshot::capture(&collection(), None, &[], Trigger::SoftDeleted, Utc::now());

        assert!(snapshot.company_id.is_none());
        assert!(snapshot.company_name.is_none());
        assert_eq!(snapshot.documents.len(), 2);
    }
}
