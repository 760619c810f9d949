// src/engine/mod.rs

pub mod aggregator;
pub mod machine;
pub mod scorer;

pub use aggregator::{Admission, EvidenceAggregator};
pub use machine::SessionEngine;
pub use scorer::{IntegrityPolicy, IntegrityScorer};
