//! Compliance, leakage and provider comparison over the aggregated data.

pub mod comparison;
pub mod leakage;

pub use comparison::{ComparisonRow, WindowTotals, compare_providers};
pub use leakage::{LeakageLocation, LeakageSummary, analyze_leakage, summarize_leakage};
