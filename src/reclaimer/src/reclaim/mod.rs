//! The six reclaimers, leaf kinds first.
//!
//! Each reclaimer selects its candidates through the connectors, removes them
//! one unit of work at a time, and reports per-item outcomes. A failing item
//! is logged and counted; it never stops the rest of the batch.

pub mod collection;
pub mod company;
pub mod contact;
pub mod group;
pub mod template;
pub mod user;

pub use collection::DocumentCollectionReclaimer;
pub use company::{CompanyOutcome, CompanyReclaimer};
pub use contact::{ContactCascade, ContactReclaimer};
pub use group::{GroupOutcome, GroupReclaimer};
pub use template::TemplateReclaimer;
pub use user::{UserDeleter, UserReclaimer};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::connector::ConnectorResult;
use crate::dependency::EntityKind;

/// Why a document collection is being reclaimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Its retention interval passed.
    Retention,
    /// It was explicitly soft-deleted upstream.
    SoftDeleted,
    /// Its group is being torn down.
    Cascade,
}

impl Trigger {
    /// Only retention-driven removals emit a `DocumentDeleted` notification.
    pub fn notifies(&self) -> bool {
        matches!(self, Trigger::Retention)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Retention => f.write_str("retention"),
            Trigger::SoftDeleted => f.write_str("soft_deleted"),
            Trigger::Cascade => f.write_str("cascade"),
        }
    }
}

/// What happened to a single candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposal {
    /// Permanently removed by this run.
    Reclaimed,
    /// Already gone; a previous run (or a concurrent one) removed it.
    AlreadyAbsent,
    /// Kept because something still references it.
    Retained,
}

/// Map a deletion result, treating "not found" as already done.
pub(crate) fn absent_ok(result: ConnectorResult<()>) -> ConnectorResult<Disposal> {
    match result {
        Ok(()) => Ok(Disposal::Reclaimed),
        Err(e) if e.is_not_found() => Ok(Disposal::AlreadyAbsent),
        Err(e) => Err(e),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: i64,
    pub error: String,
}

/// Per-run outcome of one reclaimer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub kind: EntityKind,
    pub candidates: usize,
    pub reclaimed: usize,
    pub already_absent: usize,
    pub retained: usize,
    pub failures: Vec<ItemFailure>,
}

impl ReclaimReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            candidates: 0,
            reclaimed: 0,
            already_absent: 0,
            retained: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, disposal: Disposal) {
        self.candidates += 1;
        match disposal {
            Disposal::Reclaimed => self.reclaimed += 1,
            Disposal::AlreadyAbsent => self.already_absent += 1,
            Disposal::Retained => self.retained += 1,
        }
    }

    pub fn record_failure(&mut self, id: i64, error: &dyn fmt::Display) {
        self.candidates += 1;
        self.failures.push(ItemFailure {
            id,
            error: error.to_string(),
        });
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Fold the counts of another pass over the same kind into this report.
    pub fn merge(&mut self, other: ReclaimReport) {
        self.candidates += other.candidates;
        self.reclaimed += other.reclaimed;
        self.already_absent += other.already_absent;
        self.retained += other.retained;
        self.failures.extend(other.failures);
    }

    pub fn log(&self) {
        tracing::info!(
            kind = %self.kind,
            candidates = self.candidates,
            reclaimed = self.reclaimed,
            already_absent = self.already_absent,
            retained = self.retained,
            failed = self.failed(),
            "Reclaimer finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorError;

    #[test]
    fn test_only_retention_notifies() {
        assert!(Trigger::Retention.notifies());
        assert!(!Trigger::SoftDeleted.notifies());
        assert!(!Trigger::Cascade.notifies());
    }

    #[test]
    fn test_absent_ok() {
        assert_eq!(absent_ok(Ok(())).unwrap(), Disposal::Reclaimed);
        assert_eq!(
            absent_ok(Err(ConnectorError::NotFound {
                kind: EntityKind::User,
                id: 1
            }))
            .unwrap(),
            Disposal::AlreadyAbsent
        );
        assert!(absent_ok(Err(ConnectorError::Unavailable("down".to_string()))).is_err());
    }

    #[test]
    fn test_report_counts_and_merge() {
        let mut report = ReclaimReport::new(EntityKind::Template);
        report.record(Disposal::Reclaimed);
        report.record(Disposal::Retained);

        let mut second = ReclaimReport::new(EntityKind::Template);
        second.record(Disposal::AlreadyAbsent);
        second.record_failure(4, &"disk on fire");

        report.merge(second);

        assert_eq!(report.candidates, 4);
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.retained, 1);
        assert_eq!(report.already_absent, 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].id, 4);
    }
}
