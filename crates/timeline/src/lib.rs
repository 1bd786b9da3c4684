//! `funil-timeline` — activities, notes, history, tags and file attachments.
//!
//! These are the polymorphic child records: each attaches to one parent
//! record identified by `(EntityKind, RecordId)`.

pub mod activity;
pub mod file;
pub mod history;
pub mod note;
pub mod tag;

pub use activity::{Activity, ActivityId, ActivityKind};
pub use file::{FileAttachment, FileId};
pub use history::{HistoryEntry, HistoryEntryId, HistoryKind};
pub use note::{Note, NoteId};
pub use tag::{Tag, TagId, TagLink};
