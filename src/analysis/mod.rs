pub mod aggregator;
pub mod analyzer;
pub mod report;

pub use aggregator::AnalysisState;
pub use analyzer::{analyze_many, Analyzer};
