//! Deletion-ordering DAG over entity kinds.
//!
//! Company → Group → {DocumentCollection, Template, Contact, User}. A row may
//! only be removed once no row of a dependent kind references it; the
//! pipeline runs reclaimers in the leaf-first order derived from these edges.

use serde::{Deserialize, Serialize};
use std::fmt;

use common::model::Company;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Group,
    User,
    Contact,
    Template,
    DocumentCollection,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Company,
        EntityKind::Group,
        EntityKind::User,
        EntityKind::Contact,
        EntityKind::Template,
        EntityKind::DocumentCollection,
    ];

    /// Kinds whose rows reference this kind and must be gone first.
    pub fn dependents(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Company => &[EntityKind::Group],
            EntityKind::Group => &[
                EntityKind::DocumentCollection,
                EntityKind::Template,
                EntityKind::Contact,
                EntityKind::User,
            ],
            EntityKind::User
            | EntityKind::Contact
            | EntityKind::Template
            | EntityKind::DocumentCollection => &[],
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.dependents().is_empty()
    }

    /// Leaf-first topological order (post-order walk of the DAG).
    pub fn reclaim_order() -> Vec<EntityKind> {
        fn visit(kind: EntityKind, order: &mut Vec<EntityKind>) {
            if order.contains(&kind) {
                return;
            }
            for dependent in kind.dependents() {
                visit(*dependent, order);
            }
            order.push(kind);
        }

        let mut order = Vec::with_capacity(Self::ALL.len());
        for kind in Self::ALL {
            visit(kind, &mut order);
        }
        order
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            EntityKind::Company => 0,
            EntityKind::Group => 1,
            EntityKind::User => 2,
            EntityKind::Contact => 3,
            EntityKind::Template => 4,
            EntityKind::DocumentCollection => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Group => "group",
            EntityKind::User => "user",
            EntityKind::Contact => "contact",
            EntityKind::Template => "template",
            EntityKind::DocumentCollection => "document_collection",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows of any status that still point at a group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReferences {
    pub contacts: u64,
    pub templates: u64,
    pub document_collections: u64,
    /// Users whose primary group is the group.
    pub users: u64,
    /// Additional-group links of users and contacts.
    pub additional_mappings: u64,
}

impl GroupReferences {
    /// Nothing references the group; its row may be removed.
    pub fn is_clear(&self) -> bool {
        self.total() == 0
    }

    /// The group still owns signing content (contacts, templates, collections).
    pub fn has_content(&self) -> bool {
        self.contacts + self.templates + self.document_collections > 0
    }

    pub fn total(&self) -> u64 {
        self.contacts
            + self.templates
            + self.document_collections
            + self.users
            + self.additional_mappings
    }
}

impl fmt::Display for GroupReferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "contacts={}, templates={}, collections={}, users={}, mappings={}",
            self.contacts,
            self.templates,
            self.document_collections,
            self.users,
            self.additional_mappings
        )
    }
}

/// Groups of any status that still point at a company.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyReferences {
    pub groups: u64,
    pub active_groups: u64,
}

impl CompanyReferences {
    pub fn of(company: &Company) -> Self {
        Self {
            groups: company.groups.len() as u64,
            active_groups: company.active_groups().count() as u64,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.groups == 0
    }
}
