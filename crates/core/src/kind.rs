//! Record kinds for the polymorphic parts of the model (notes, history,
//! tags, files attach to more than one kind of record).
//!
//! The table/column mapping lives here as data so stores stay generic over
//! the kind instead of keying into ad hoc string tables.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Kind of top-level CRM record a polymorphic child can attach to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Organization,
    Person,
    Deal,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Organization,
        EntityKind::Person,
        EntityKind::Deal,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Organization => "organization",
            EntityKind::Person => "person",
            EntityKind::Deal => "deal",
        }
    }

    /// Table holding records of this kind.
    pub const fn table(self) -> &'static str {
        match self {
            EntityKind::Organization => "organizations",
            EntityKind::Person => "people",
            EntityKind::Deal => "deals",
        }
    }

    /// Foreign-key column that child tables use to point at this kind.
    pub const fn parent_column(self) -> &'static str {
        match self {
            EntityKind::Organization => "organization_id",
            EntityKind::Person => "person_id",
            EntityKind::Deal => "deal_id",
        }
    }

    /// Whether records of this kind can be merged into one another.
    pub const fn supports_merge(self) -> bool {
        matches!(self, EntityKind::Organization | EntityKind::Person)
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(EntityKind::Organization),
            "person" => Ok(EntityKind::Person),
            "deal" => Ok(EntityKind::Deal),
            other => Err(DomainError::validation(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn parent_columns_are_distinct() {
        let mut cols: Vec<_> = EntityKind::ALL.iter().map(|k| k.parent_column()).collect();
        cols.sort_unstable();
        cols.dedup();
        assert_eq!(cols.len(), EntityKind::ALL.len());
    }

    #[test]
    fn only_organizations_and_people_merge() {
        assert!(EntityKind::Organization.supports_merge());
        assert!(EntityKind::Person.supports_merge());
        assert!(!EntityKind::Deal.supports_merge());
    }
}
