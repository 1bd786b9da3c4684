//! `funil-infra` — persistence and data-shaping infrastructure.
//!
//! Store traits with two complete backends: an in-memory store (default for
//! dev and tests) and a Postgres store (sqlx). Also home to the filter
//! builder, CSV export, reports and the transactional merge execution.

pub mod error;
pub mod export;
pub mod filter;
pub mod reports;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use filter::{Page, Pagination};
pub use store::memory::MemoryStore;
pub use store::postgres::PgStore;
pub use store::{
    ContactsStore, DealFilter, DealStore, DirectoryStore, HistoryView, InboxStore, MergeOutcome,
    NoteView, OrganizationFilter, OutreachStore, PersonFilter, Profile, TagStore, TimelineStore,
};
