use std::sync::Arc;

use chrono::Duration;
use common::model::{
    CollectionId, CompanyId, ContactId, EntityStatus, GroupId, ProgramTier, TemplateId, UserId,
};
use object_store::memory::InMemory;
use reclaimer::artifacts::ObjectStoreArtifacts;
use reclaimer::certificates::ObjectStoreCertificates;
use reclaimer::store::SqliteStore;
use reclaimer::testing::{self, Harness, RecordingAuditSink, RecordingNotifier};
use reclaimer::{Collaborators, Connectors, EntityKind, ReclaimMetrics, ReclamationPipeline};

fn deleted<T>(mut entity: T, set: impl FnOnce(&mut T)) -> T {
    set(&mut entity);
    entity
}

#[tokio::test]
async fn test_empty_deleted_group_then_company() {
    let harness = Harness::new();
    harness
        .store
        .insert_company(deleted(testing::company(1), |c| c.status = EntityStatus::Deleted))
        .await;
    harness
        .store
        .insert_group(deleted(testing::group(10, CompanyId(1)), |g| {
            g.status = EntityStatus::Deleted
        }))
        .await;

    let groups = harness.pipeline.groups().run().await.unwrap();
    let companies = harness.pipeline.companies().run().await.unwrap();

    assert_eq!(groups.reclaimed, 1);
    assert_eq!(companies.reclaimed, 1);
    assert!(!harness.store.has_group(GroupId(10)).await);
    assert!(!harness.store.has_company(CompanyId(1)).await);
}

#[tokio::test]
async fn test_signed_collection_against_company_retention() {
    let harness = Harness::new();
    let company = harness
        .store
        .insert_company(testing::company_with_retention(1, Some(30), None))
        .await;
    harness.store.insert_group(testing::group(10, company.id)).await;
    harness
        .store
        .insert_collection(testing::signed_collection(100, GroupId(10), Duration::days(40)))
        .await;
    harness
        .store
        .insert_collection(testing::signed_collection(101, GroupId(10), Duration::days(10)))
        .await;

    harness.pipeline.run_once().await;

    assert!(!harness.store.has_collection(CollectionId(100)).await);
    assert!(harness.store.has_collection(CollectionId(101)).await);
    let events = harness.notifier.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].collection_id, CollectionId(100));
    assert_eq!(events[0].company_id, Some(CompanyId(1)));
}

#[tokio::test]
async fn test_signer_referenced_contact_survives() {
    let harness = Harness::new();
    harness.store.insert_company(testing::company(1)).await;
    harness.store.insert_group(testing::group(10, CompanyId(1))).await;
    harness
        .store
        .insert_contact(deleted(testing::contact(30, GroupId(10)), |c| {
            c.status = EntityStatus::Deleted
        }))
        .await;
    harness.store.insert_signer(ContactId(30)).await;

    let report = harness.pipeline.run_once().await;

    assert!(harness.store.has_contact(ContactId(30)).await);
    assert_eq!(report.report(EntityKind::Contact).unwrap().candidates, 0);
}

#[tokio::test]
async fn test_template_row_removed_when_pdf_delete_fails() {
    let harness = Harness::with_failing_artifacts();
    harness.store.insert_company(testing::company(1)).await;
    harness.store.insert_group(testing::group(10, CompanyId(1))).await;
    harness
        .store
        .insert_template(deleted(testing::template(20, GroupId(10)), |t| {
            t.status = EntityStatus::Deleted
        }))
        .await;

    let report = harness.pipeline.run_once().await;

    assert!(!harness.store.has_template(TemplateId(20)).await);
    assert_eq!(report.report(EntityKind::Template).unwrap().reclaimed, 1);
    assert_eq!(harness.metrics.cleanup_failures(), 1);
}

#[tokio::test]
async fn test_soft_deleted_collection_reclaimed_regardless_of_age() {
    let harness = Harness::new();
    harness.store.insert_company(testing::company(1)).await;
    harness.store.insert_group(testing::group(10, CompanyId(1))).await;
    harness
        .store
        .insert_collection(deleted(
            testing::draft_collection(100, GroupId(10), Duration::minutes(5)),
            |c| c.status = common::model::CollectionStatus::Deleted,
        ))
        .await;

    harness.pipeline.run_once().await;

    assert!(!harness.store.has_collection(CollectionId(100)).await);
    assert_eq!(harness.audit.snapshots().await.len(), 1);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let harness = Harness::new();
    harness
        .store
        .insert_company(testing::company_with_retention(1, Some(30), Some(30)))
        .await;
    harness.store.insert_group(testing::group(10, CompanyId(1))).await;
    harness
        .store
        .insert_group(deleted(testing::group(11, CompanyId(1)), |g| {
            g.status = EntityStatus::Deleted
        }))
        .await;
    harness
        .store
        .insert_collection(testing::signed_collection(100, GroupId(10), Duration::days(60)))
        .await;
    harness
        .store
        .insert_template(deleted(testing::template(20, GroupId(10)), |t| {
            t.status = EntityStatus::Deleted
        }))
        .await;
    harness
        .store
        .insert_user(deleted(testing::user(40, GroupId(10), ProgramTier::Paid), |u| {
            u.status = EntityStatus::Deleted
        }))
        .await;

    let first = harness.pipeline.run_once().await;
    let notifications = harness.notifier.events().await.len();
    let snapshots = harness.audit.snapshots().await.len();

    let second = harness.pipeline.run_once().await;

    assert!(first.total_reclaimed() >= 4);
    assert_eq!(second.total_reclaimed(), 0);
    assert_eq!(second.total_failed(), 0);
    assert_eq!(harness.notifier.events().await.len(), notifications);
    assert_eq!(harness.audit.snapshots().await.len(), snapshots);
}

#[tokio::test]
async fn test_free_trial_user_moves_to_alternate_group() {
    let harness = Harness::new();
    harness.store.insert_company(testing::company(1)).await;
    harness
        .store
        .insert_group(deleted(testing::group(10, CompanyId(1)), |g| {
            g.status = EntityStatus::Deleted
        }))
        .await;
    harness.store.insert_group(testing::group(11, CompanyId(1))).await;
    harness
        .store
        .insert_user(deleted(
            testing::user(40, GroupId(10), ProgramTier::FreeTrial),
            |u| u.additional_group_mappings = vec![GroupId(11)],
        ))
        .await;

    harness.pipeline.run_once().await;

    assert!(!harness.store.has_group(GroupId(10)).await);
    let user = harness.store.user(UserId(40)).await.unwrap();
    assert_eq!(user.group_id, GroupId(11));
    assert!(user.additional_group_mappings.is_empty());
}

#[tokio::test]
async fn test_audit_snapshot_carries_no_field_values() {
    let harness = Harness::new();
    harness.store.insert_company(testing::company(1)).await;
    harness.store.insert_group(testing::group(10, CompanyId(1))).await;
    harness
        .store
        .insert_template(testing::template(20, GroupId(10)))
        .await;
    harness
        .store
        .insert_collection(deleted(
            testing::signed_collection(100, GroupId(10), Duration::days(400)),
            |c| c.documents = vec![testing::document(1000, TemplateId(20))],
        ))
        .await;

    harness.pipeline.run_once().await;

    let snapshots = harness.audit.snapshots().await;
    assert_eq!(snapshots.len(), 1);
    let json = serde_json::to_string(&snapshots[0]).unwrap();
    assert!(!json.contains("Jane Roe"));
    assert!(!json.contains("tenant_name"));
    assert!(!json.contains("Lease 100"));
    assert_eq!(snapshots[0].documents[0].field_types.len(), 2);
}

#[tokio::test]
async fn test_reclaimed_group_has_no_children_left() {
    let harness = Harness::new();
    harness.store.insert_company(testing::company(1)).await;
    harness
        .store
        .insert_group(deleted(testing::group(10, CompanyId(1)), |g| {
            g.status = EntityStatus::Deleted
        }))
        .await;
    for id in 30..33 {
        harness
            .store
            .insert_contact(testing::contact(id, GroupId(10)))
            .await;
    }
    harness
        .store
        .insert_template(testing::template(20, GroupId(10)))
        .await;
    harness
        .store
        .insert_collection(testing::signed_collection(100, GroupId(10), Duration::days(1)))
        .await;
    harness
        .store
        .insert_user(testing::user(40, GroupId(10), ProgramTier::Paid))
        .await;
    harness.seed_user_certificate(UserId(40)).await;

    let report = harness.pipeline.run_once().await;

    assert_eq!(report.report(EntityKind::Group).unwrap().reclaimed, 1);
    let references = harness
        .pipeline
        .metrics()
        .reclaimed(EntityKind::Contact);
    assert_eq!(references, 3);
    assert_eq!(harness.store.row_count().await, 1, "only the company remains");
    assert_eq!(harness.certificate_count().await, 0);
}

#[tokio::test]
async fn test_one_failing_collection_does_not_stop_others() {
    let harness = Harness::new();
    harness
        .store
        .insert_company(testing::company_with_retention(1, None, Some(1)))
        .await;
    harness.store.insert_group(testing::group(10, CompanyId(1))).await;
    for id in [100, 101, 102] {
        harness
            .store
            .insert_collection(testing::draft_collection(id, GroupId(10), Duration::days(3)))
            .await;
    }
    harness
        .store
        .fail_deletes_for(EntityKind::DocumentCollection, 101)
        .await;

    let report = harness.pipeline.run_once().await;

    let collections = report.report(EntityKind::DocumentCollection).unwrap();
    assert_eq!(collections.reclaimed, 2);
    assert_eq!(collections.failed(), 1);
    assert!(harness.store.has_collection(CollectionId(101)).await);
    // Later reclaimers still ran
    assert_eq!(report.reports.len(), EntityKind::ALL.len());
}

#[tokio::test]
async fn test_pipeline_over_sqlite() {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    store
        .insert_company(&deleted(testing::company(1), |c| {
            c.status = EntityStatus::Deleted
        }))
        .await
        .unwrap();
    store
        .insert_group(&deleted(testing::group(10, CompanyId(1)), |g| {
            g.status = EntityStatus::Deleted
        }))
        .await
        .unwrap();
    store
        .insert_template(&testing::template(20, GroupId(10)))
        .await
        .unwrap();
    store
        .insert_collection(&deleted(
            testing::signed_collection(100, GroupId(10), Duration::days(2)),
            |c| c.documents = vec![testing::document(1000, TemplateId(20))],
        ))
        .await
        .unwrap();
    store
        .insert_user(&testing::user(40, GroupId(10), ProgramTier::Paid))
        .await
        .unwrap();

    let audit = Arc::new(RecordingAuditSink::new());
    let collaborators = Collaborators {
        artifacts: Arc::new(ObjectStoreArtifacts::new(Arc::new(InMemory::new()))),
        certificates: Arc::new(ObjectStoreCertificates::new(Arc::new(InMemory::new()))),
        audit: audit.clone(),
        notifier: Arc::new(RecordingNotifier::new()),
    };
    let pipeline = ReclamationPipeline::new(
        &testing::reclaimer_config(250),
        Connectors::from_store(store.clone()),
        collaborators,
        ReclaimMetrics::new(),
    )
    .unwrap();

    let report = pipeline.run_once().await;

    assert!(report.errors.is_empty());
    assert_eq!(report.report(EntityKind::Group).unwrap().reclaimed, 1);
    assert_eq!(report.report(EntityKind::Company).unwrap().reclaimed, 1);
    assert_eq!(audit.snapshots().await.len(), 1);

    let again = pipeline.run_once().await;
    assert_eq!(again.total_reclaimed(), 0);
}
