//! Scan engine — the per-cycle pipeline and its stages.
//!
//! `pipeline` defines the context/stage contract, `stages` the concrete
//! stage implementations, and `confidence` the multi-strategy agreement
//! detector used by the confidence stage.

pub mod confidence;
pub mod pipeline;
pub mod stages;

pub use confidence::ConfidenceDetector;
pub use pipeline::{ScanContext, ScanPipeline, ScanStage};
