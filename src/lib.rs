//! Offline packet capture analysis.
//!
//! Reads classic pcap and pcapng captures, decodes each frame down to the
//! transport layer (and DNS questions), and folds the result into a report of
//! protocol shares, top conversations, DNS query names and flows.

pub mod analysis;
pub mod capture;
pub mod export;
pub mod models;
pub mod utils;

pub use analysis::{analyze_many, AnalysisState, Analyzer};
pub use capture::{CaptureReader, FrameDecoder};
pub use models::config::AnalyzerConfig;
pub use models::stats::{AnalysisReport, BatchReport, CaptureOutcome};
pub use utils::error::{AnalyzerError, AnalyzerResult, ErrorKind, ErrorReport};
