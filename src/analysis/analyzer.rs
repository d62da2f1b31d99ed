use futures::future::join_all;
use log::{debug, info, warn};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analysis::aggregator::AnalysisState;
use crate::analysis::report;
use crate::capture::parser::FrameDecoder;
use crate::capture::reader::CaptureReader;
use crate::models::config::AnalyzerConfig;
use crate::models::packet::CaptureFormat;
use crate::models::stats::{AnalysisReport, BatchReport, CaptureOutcome};
use crate::utils::error::{AnalyzerError, AnalyzerResult};

/// Byte offset of the link type field in a classic pcap global header
const PCAP_LINK_TYPE_OFFSET: u64 = 20;

/// Runs capture reader, frame decoder and aggregator over one source
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: AnalyzerConfig,
    decoder: FrameDecoder,
    cancelled: Arc<AtomicBool>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self::with_cancel_flag(config, Arc::new(AtomicBool::new(false)))
    }

    /// Create an analyzer that stops as soon as `cancelled` is set
    pub fn with_cancel_flag(config: AnalyzerConfig, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            config,
            decoder: FrameDecoder::new(),
            cancelled,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Handle that cancels every run of this analyzer when set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Analyse a capture file
    pub fn analyze_path<P: AsRef<Path>>(&self, path: P) -> AnalyzerResult<AnalysisReport> {
        let state = self.collect_path(path)?;
        Ok(report::build(&state, &self.config))
    }

    /// Analyse any byte stream holding a capture
    pub fn analyze_reader<R: Read>(&self, source: R) -> AnalyzerResult<AnalysisReport> {
        let state = self.collect_reader(source)?;
        Ok(report::build(&state, &self.config))
    }

    /// Analyse a capture already held in memory
    pub fn analyze_bytes(&self, bytes: &[u8]) -> AnalyzerResult<AnalysisReport> {
        self.analyze_reader(Cursor::new(bytes))
    }

    /// Fold a capture file into aggregator state without building a report
    pub fn collect_path<P: AsRef<Path>>(&self, path: P) -> AnalyzerResult<AnalysisState> {
        let path = path.as_ref();
        info!("Analyzing {}", path.display());
        let reader = CaptureReader::open(path)?;
        self.fold(reader)
    }

    /// Fold a byte stream into aggregator state without building a report
    pub fn collect_reader<R: Read>(&self, source: R) -> AnalyzerResult<AnalysisState> {
        info!("Analyzing capture stream");
        let reader = CaptureReader::new(source)?;
        self.fold(reader)
    }

    /// The single pass: every record is decoded and observed exactly once
    fn fold<R: Read>(&self, mut reader: CaptureReader<R>) -> AnalyzerResult<AnalysisState> {
        let header = reader.header().clone();
        debug!(
            "Capture header: {:?}, version {}.{}, snaplen {}, link type {}",
            header.format, header.version_major, header.version_minor, header.snaplen, header.link_type
        );

        if self.config.strict_link_type && !header.link_type.is_supported() {
            let offset = match header.format {
                CaptureFormat::Pcap => PCAP_LINK_TYPE_OFFSET,
                CaptureFormat::PcapNg => 0,
            };
            return Err(AnalyzerError::UnsupportedLinkType {
                link_type: header.link_type.0,
                offset,
            });
        }

        let mut state = AnalysisState::new();

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                info!("Analysis cancelled after {} packets", state.packet_count());
                return Err(AnalyzerError::Cancelled {
                    packets: state.packet_count(),
                });
            }

            let record = match reader.next_record()? {
                Some(record) => record,
                None => break,
            };

            if self.config.strict_link_type && !record.link_type.is_supported() {
                return Err(AnalyzerError::UnsupportedLinkType {
                    link_type: record.link_type.0,
                    offset: record.offset,
                });
            }

            let packet = self.decoder.decode(&record);
            state.observe(&packet);
        }

        if state.malformed_count() > 0 {
            warn!(
                "{} of {} frames could not be fully decoded",
                state.malformed_count(),
                state.packet_count()
            );
        }
        info!(
            "Analysis complete: {} packets, {} bytes, {} flows",
            state.packet_count(),
            state.byte_count(),
            state.flows().len()
        );

        Ok(state)
    }
}

/// Analyse several capture files in parallel.
///
/// Each file runs on Tokio's blocking pool with its own state; a failure in
/// one file is reported in its outcome and does not affect the others. When
/// `merge` is set the successful states are also folded into one report.
pub async fn analyze_many(paths: Vec<PathBuf>, analyzer: Analyzer, merge: bool) -> BatchReport {
    let tasks = paths.iter().cloned().map(|path| {
        let analyzer = analyzer.clone();
        tokio::task::spawn_blocking(move || analyzer.collect_path(&path))
    });

    let results = join_all(tasks).await;

    let mut merged_state: Option<AnalysisState> = None;
    let mut captures = Vec::with_capacity(paths.len());

    for (path, joined) in paths.iter().zip(results) {
        let result = joined.unwrap_or_else(|e| {
            Err(AnalyzerError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("analysis task failed: {}", e),
            )))
        });

        let path = path.display().to_string();
        match result {
            Ok(state) => {
                let report = report::build(&state, analyzer.config());
                if merge {
                    match merged_state.as_mut() {
                        Some(merged) => merged.merge(&state),
                        None => merged_state = Some(state),
                    }
                }
                captures.push(CaptureOutcome {
                    path,
                    report: Some(report),
                    error: None,
                });
            }
            Err(e) => {
                warn!("Failed to analyze {}: {}", path, e);
                captures.push(CaptureOutcome {
                    path,
                    report: None,
                    error: Some(e.to_report()),
                });
            }
        }
    }

    let merged = merged_state.map(|state| report::build(&state, analyzer.config()));

    BatchReport { captures, merged }
}
