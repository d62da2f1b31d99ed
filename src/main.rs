use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use termcolor::{Color, ColorChoice, ColorSpec, NoColor, StandardStream, WriteColor};

use pcapstat::export::{csv, json, text};
use pcapstat::models::stats::BatchReport;
use pcapstat::utils::logging;
use pcapstat::{analyze_many, Analyzer, AnalyzerConfig};

/// Output format of the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Text,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Offline pcap/pcapng traffic analyzer")]
struct Args {
    /// Capture files to analyze
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Report format
    #[clap(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Write the report to this file instead of stdout
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON
    #[clap(long)]
    pretty: bool,

    /// Also build one report over all inputs
    #[clap(long)]
    merge: bool,

    /// Number of conversations in the top talkers table
    #[clap(long)]
    top_conversations: Option<usize>,

    /// Number of DNS query names reported
    #[clap(long)]
    top_dns: Option<usize>,

    /// Fail on link-layer types the decoder cannot interpret
    #[clap(long)]
    strict_link_type: bool,

    /// JSON file with analyzer settings
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Settings from the config file, overridden by explicit flags
    fn analyzer_config(&self) -> Result<AnalyzerConfig> {
        let mut config = match &self.config {
            Some(path) => AnalyzerConfig::from_file(path)
                .with_context(|| format!("Cannot load config {}", path.display()))?,
            None => AnalyzerConfig::default(),
        };

        if let Some(limit) = self.top_conversations {
            config = config.with_top_conversations(limit);
        }
        if let Some(limit) = self.top_dns {
            config = config.with_top_dns(limit);
        }
        if self.strict_link_type {
            config = config.with_strict_link_type(true);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger with specified level
    logging::init_logger(logging::get_log_level(&args.log_level));

    info!("Starting pcapstat v{}", env!("CARGO_PKG_VERSION"));

    let config = args.analyzer_config()?;
    info!(
        "Top conversations: {}, top DNS names: {}, strict link type: {}",
        config.top_conversations_limit, config.top_dns_limit, config.strict_link_type
    );

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling analysis");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let analyzer = Analyzer::with_cancel_flag(config, cancelled);
    let batch = analyze_many(args.inputs.clone(), analyzer, args.merge).await;

    let failed = batch.captures.iter().filter(|c| c.error.is_some()).count();

    write_output(&args, &batch)?;

    if failed > 0 {
        error!("{} of {} captures could not be analyzed", failed, batch.captures.len());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Render the batch in the requested format to the output file or stdout
fn write_output(args: &Args, batch: &BatchReport) -> Result<()> {
    let single = args.inputs.len() == 1 && !args.merge;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Cannot create output file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            if args.format == OutputFormat::Text {
                render_text(&mut NoColor::new(&mut writer), batch)?;
            } else {
                render(&mut writer, args, batch, single)?;
            }
            writer.flush()?;
            info!("Report written to {}", path.display());
        }
        None => {
            if args.format == OutputFormat::Text {
                let mut stdout = StandardStream::stdout(ColorChoice::Auto);
                render_text(&mut stdout, batch)?;
            } else {
                let stdout = io::stdout();
                let mut lock = stdout.lock();
                render(&mut lock, args, batch, single)?;
                lock.flush()?;
            }
        }
    }
    Ok(())
}

/// JSON or CSV rendering
fn render<W: Write>(writer: &mut W, args: &Args, batch: &BatchReport, single: bool) -> Result<()> {
    let single_outcome = if single { batch.captures.first() } else { None };

    match (args.format, single_outcome) {
        (OutputFormat::Json, Some(outcome)) => match (&outcome.report, &outcome.error) {
            (Some(report), _) => json::write_json(writer, report, args.pretty),
            (None, Some(err)) => json::write_json(writer, err, args.pretty),
            (None, None) => Ok(()),
        },
        (OutputFormat::Json, None) => json::write_json(writer, batch, args.pretty),
        (OutputFormat::Csv, Some(outcome)) => match &outcome.report {
            Some(report) => csv::write_conversations(writer, report),
            None => Ok(()),
        },
        (OutputFormat::Csv, None) => csv::write_batch_conversations(writer, batch),
        (OutputFormat::Text, _) => Ok(()),
    }
}

/// Coloured text rendering of every capture, then the merged report
fn render_text<W: WriteColor>(out: &mut W, batch: &BatchReport) -> Result<()> {
    for outcome in &batch.captures {
        match (&outcome.report, &outcome.error) {
            (Some(report), _) => text::render_report(out, &outcome.path, report)?,
            (None, Some(err)) => {
                out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
                writeln!(out, "{}: {} ({})", outcome.path, err.kind, err.message)?;
                out.reset()?;
                writeln!(out)?;
            }
            (None, None) => {}
        }
    }
    if let Some(merged) = &batch.merged {
        text::render_report(out, "All captures", merged)?;
    }
    Ok(())
}
