//! Encode-and-pace pipeline

pub mod coordinator;
pub mod credit;
pub mod stream;

pub use coordinator::{Coordinator, CycleReport, PipelineHandle, PipelineStats, SourceMode};
pub use credit::{CreditReleaser, CreditTracker};
pub use stream::{StreamCounters, StreamSlot, StreamStats};
