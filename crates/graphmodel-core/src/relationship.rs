//! Relationship metadata for GraphModel Rust.
//!
//! Relationships are declared as static metadata on each `Model`. The cycle
//! layer walks this metadata to find relation paths that lead back to the type
//! they started from, without any runtime reflection.

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: `Person` has one `Passport`.
    OneToOne,
    /// Many-to-one: many `Node`s point at one parent `Node`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Node` holds many child `Node`s.
    OneToMany,
    /// Many-to-many through a link table.
    ManyToMany,
}

impl RelationshipKind {
    /// Whether the relation resolves to at most one target per source.
    #[must_use]
    pub const fn is_single(self) -> bool {
        matches!(self, RelationshipKind::OneToOne | RelationshipKind::ManyToOne)
    }
}

/// Metadata about a relationship between models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship field.
    pub name: &'static str,

    /// The related model's table name.
    pub related_table: &'static str,

    /// Kind of relationship.
    pub kind: RelationshipKind,

    /// Local foreign key column (for ManyToOne / OneToOne).
    /// e.g., `"parent_id"` on `Node`.
    pub local_key: Option<&'static str>,

    /// Remote foreign key column (for OneToMany).
    /// e.g., `"parent_id"` on `Node` when accessed from the parent.
    pub remote_key: Option<&'static str>,
}

impl RelationshipInfo {
    /// Create a new relationship with required fields.
    #[must_use]
    pub const fn new(
        name: &'static str,
        related_table: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            related_table,
            kind,
            local_key: None,
            remote_key: None,
        }
    }

    /// Set the local foreign key column (ManyToOne).
    #[must_use]
    pub const fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = Some(key);
        self
    }

    /// Set the remote foreign key column (OneToMany).
    #[must_use]
    pub const fn remote_key(mut self, key: &'static str) -> Self {
        self.remote_key = Some(key);
        self
    }
}

impl Default for RelationshipInfo {
    fn default() -> Self {
        Self::new("", "", RelationshipKind::default())
    }
}

/// Find a relationship by field name in a model's RELATIONSHIPS.
pub fn find_relationship<M: crate::Model>(field_name: &str) -> Option<&'static RelationshipInfo> {
    M::RELATIONSHIPS.iter().find(|r| r.name == field_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_keys() {
        let rel = RelationshipInfo::new("parent", "nodes", RelationshipKind::ManyToOne)
            .local_key("parent_id");
        assert_eq!(rel.local_key, Some("parent_id"));
        assert_eq!(rel.remote_key, None);
        assert!(rel.kind.is_single());
    }

    #[test]
    fn collection_kinds_are_not_single() {
        assert!(!RelationshipKind::OneToMany.is_single());
        assert!(!RelationshipKind::ManyToMany.is_single());
        assert!(RelationshipKind::OneToOne.is_single());
    }

    #[test]
    fn default_is_empty_many_to_one() {
        let rel = RelationshipInfo::default();
        assert_eq!(rel.name, "");
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
    }
}
