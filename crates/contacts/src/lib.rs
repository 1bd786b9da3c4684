//! `funil-contacts` — organizations and people.
//!
//! Pure domain types: validation, CNPJ handling and merge planning. No IO.

pub mod cnpj;
pub mod merge;
pub mod organization;
pub mod person;

pub use cnpj::{format_cnpj, is_valid_cnpj, normalize_cnpj};
pub use merge::{
    suggest_primary, MergeBackup, MergeChildRefs, MergeSide, Mergeable, OrganizationFieldChoices,
    PersonFieldChoices, BACKUP_TTL_DAYS,
};
pub use organization::{Address, EnrichmentData, Organization, OrganizationId, OrganizationPatch};
pub use person::{Person, PersonId, PersonPatch};
