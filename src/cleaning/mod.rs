//! Ghost trip detection.
//!
//! Each unified trip is labelled clean or with the first anomaly rule it
//! trips. Clean trips continue down the pipeline; flagged ones go to an audit
//! stream with their derived duration, speed and source file.

pub mod detector;
pub mod patterns;
pub mod rules;

pub use detector::{CleanStats, DetectionStats, GhostTripRecord, clean_all, detect_file};
pub use patterns::analyze_ghost_patterns;
pub use rules::{GhostFlag, TripMetrics, classify};
