//! Cascading reclamation of soft-deleted and expired entities.
//!
//! Six reclaimers permanently remove rows together with the files and
//! certificates they own, children before parents:
//!
//! ```text
//! Company ─▶ Group ─┬▶ DocumentCollection
//!                   ├▶ Template
//!                   ├▶ Contact
//!                   └▶ User
//! ```
//!
//! Document collections are audited before they go. The
//! [`ReclamationPipeline`] wires the reclaimers from a set of [`Connectors`]
//! and [`Collaborators`] and runs them leaf-first.

pub mod artifacts;
pub mod audit;
pub mod certificates;
pub mod connector;
pub mod dependency;
pub mod metrics;
pub mod pipeline;
pub mod reclaim;
pub mod retention;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connector::Connectors;
pub use dependency::EntityKind;
pub use metrics::ReclaimMetrics;
pub use pipeline::{Collaborators, PipelineReport, ReclamationPipeline};
