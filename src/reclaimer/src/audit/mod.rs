//! Audit snapshots and downstream notifications for reclaimed document
//! collections.
//!
//! A snapshot is forwarded through exactly one [`AuditSink`] before the
//! collection's storage is destroyed. Retention-driven removals also emit a
//! [`DocumentDeleted`] event through the [`Notifier`].

pub mod key;
pub mod notify;
pub mod sink;
pub mod snapshot;

pub use key::{AesGcmKey, KeyDecryptor, PlaintextKey, key_decryptor_from_config};
pub use notify::{DOCUMENT_DELETED_SUBTYPE, DocumentDeleted, Notifier, QueueNotifier};
pub use sink::{
    AUDIT_SUBTYPE, AuditChannel, AuditError, AuditSink, HttpHistorySink, QueueAuditSink,
    audit_sink_from_config,
};
pub use snapshot::{AuditSnapshot, DocumentAudit};
