//! `funil-deals` — deals and pipelines.

pub mod deal;
pub mod pipeline;

pub use deal::{Deal, DealId, DealPatch, DealStatus};
pub use pipeline::{Pipeline, PipelineId, Stage, StageId};
