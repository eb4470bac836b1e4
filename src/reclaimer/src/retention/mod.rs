//! Retention intervals for document collections.
//!
//! Every company is scanned for signed and unsigned collections whose
//! retention anchor (`signed_at` for signed, `created_at` otherwise) is older
//! than the resolved interval. A company override beats the global default;
//! an unset interval disables age-based reclamation for that class.
//!
//! ## Usage
//!
//! ```no_run
//! use common::config::RetentionConfig;
//! use common::model::{Company, CompanyId, EntityStatus, RetentionClass};
//! use reclaimer::retention::RetentionPolicyResolver;
//!
//! let resolver = RetentionPolicyResolver::new(RetentionConfig::default())?;
//! let company = Company {
//!     id: CompanyId(1),
//!     name: "Acme".to_string(),
//!     status: EntityStatus::Active,
//!     signed_retention_days: Some(30),
//!     unsigned_retention_days: None,
//!     groups: vec![],
//! };
//!
//! if let Some(cutoff) = resolver.compute_cutoff(&company, RetentionClass::Signed, chrono::Utc::now())? {
//!     println!("Retention cutoff: {}", cutoff.display());
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod policy;

pub use policy::{
    RetentionCutoff, RetentionPolicyError, RetentionPolicyResolver, RetentionPolicySource,
};
