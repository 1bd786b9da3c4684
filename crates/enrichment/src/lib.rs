//! `funil-enrichment` — national-registry enrichment.
//!
//! The registry record model plus the bulk runner: a sequential loop with a
//! fixed inter-call delay and cooperative cancellation. No concurrency, no
//! backoff, no rollback of already-applied updates.

pub mod bulk;
pub mod cancel;
pub mod registry;

pub use bulk::{BulkEnrichment, EnrichTarget, EnrichmentFailure, EnrichmentProgress};
pub use cancel::CancelToken;
pub use registry::RegistryRecord;
