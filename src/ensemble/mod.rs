// src/ensemble/mod.rs
//
// Multi-view statistical fusion.
//
// Signal flow:
//   per-view FlowSeries ─→ confidence ──┐
//                        ─→ volume norm ┼→ fusion → postprocess → metrics
//   manual volume ───────────────────────┘
//
// Orchestrated by aggregator::EnsembleAggregator.

pub mod aggregator;
pub mod confidence;
pub mod fusion;
pub mod postprocess;

pub use aggregator::EnsembleAggregator;
pub use confidence::calculate_confidence;
pub use fusion::{fuse_signals, synchronize_signals};
pub use postprocess::post_process_flow;
