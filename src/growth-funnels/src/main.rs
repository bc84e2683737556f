//! Growth Funnels — conversion funnel reports over exported event logs.
//!
//! Loads funnel definitions and a JSON-lines event export, runs the requested
//! analysis, and prints the report as JSON on stdout.

mod input;

use clap::{Parser, Subcommand};
use growth_core::config::AppConfig;
use growth_core::Timeframe;
use growth_reporting::FunnelAnalyzer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "growth-funnels")]
#[command(about = "Conversion funnel analysis over exported user events")]
#[command(version)]
struct Cli {
    /// Optional TOML config file
    #[arg(long, env = "GROWTH_FUNNELS_CONFIG")]
    config: Option<PathBuf>,

    /// JSON file holding an array of funnel definitions
    #[arg(long)]
    funnels: PathBuf,

    /// JSON-lines file of events
    #[arg(long)]
    events: PathBuf,

    /// Skip events whose event_id was already ingested (overrides config)
    #[arg(long, default_value_t = false)]
    dedupe: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct Window {
    /// Window start, epoch milliseconds (inclusive)
    #[arg(long, requires = "end")]
    start: Option<i64>,

    /// Window end, epoch milliseconds (inclusive)
    #[arg(long, requires = "start")]
    end: Option<i64>,
}

impl Window {
    fn timeframe(self) -> Option<Timeframe> {
        Some(Timeframe::new(self.start?, self.end?))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Step-by-step conversion report for one funnel
    Analyze {
        #[arg(long)]
        funnel: String,
        #[command(flatten)]
        window: Window,
    },

    /// Conversion report with a breakdown per segment
    Segments {
        #[arg(long)]
        funnel: String,
        /// JSON object mapping segment names to property filter lists
        #[arg(long)]
        segments: PathBuf,
        #[command(flatten)]
        window: Window,
    },

    /// Reports for several funnels over the same window
    Compare {
        #[arg(long = "funnel", required = true)]
        funnels: Vec<String>,
        /// Fail on the first unknown funnel instead of reporting it per id
        #[arg(long, default_value_t = false)]
        strict: bool,
        #[command(flatten)]
        window: Window,
    },

    /// Drop-off between adjacent steps over the whole event log
    Dropoff {
        #[arg(long)]
        funnel: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum ComparisonEntry {
    Report(growth_reporting::ConversionFunnel),
    Error(String),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = AppConfig::load(cli.config.as_deref());
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => AppConfig::default(),
    };
    init_tracing(&config);
    if let Err(e) = loaded {
        warn!(error = %e, "Failed to load config, using defaults");
    }

    if cli.dedupe {
        config.funnel.dedupe_event_ids = true;
    }

    let analyzer = FunnelAnalyzer::with_config(config.funnel.clone());
    for funnel in input::read_funnels(&cli.funnels)? {
        analyzer.register_funnel(funnel)?;
    }
    let summary = analyzer.process_events(input::read_events(&cli.events)?);
    info!(
        funnels = analyzer.list_funnels().len(),
        events = summary.accepted,
        users = analyzer.user_count(),
        "Inputs loaded"
    );

    let output = match cli.command {
        Commands::Analyze { funnel, window } => {
            serde_json::to_string_pretty(&analyzer.analyze_funnel(&funnel, window.timeframe())?)?
        }
        Commands::Segments {
            funnel,
            segments,
            window,
        } => {
            let segments = input::read_segments(&segments)?;
            let report =
                analyzer.analyze_funnel_with_segments(&funnel, &segments, window.timeframe())?;
            serde_json::to_string_pretty(&report)?
        }
        Commands::Compare {
            funnels,
            strict,
            window,
        } => {
            if strict {
                let reports = analyzer.compare_funnels_strict(&funnels, window.timeframe())?;
                serde_json::to_string_pretty(&reports)?
            } else {
                let entries: BTreeMap<String, ComparisonEntry> = analyzer
                    .compare_funnels(&funnels, window.timeframe())
                    .into_iter()
                    .map(|(id, result)| {
                        let entry = match result {
                            Ok(report) => ComparisonEntry::Report(report),
                            Err(e) => ComparisonEntry::Error(e.to_string()),
                        };
                        (id, entry)
                    })
                    .collect();
                serde_json::to_string_pretty(&entries)?
            }
        }
        Commands::Dropoff { funnel } => {
            serde_json::to_string_pretty(&analyzer.calculate_drop_off_rates(&funnel)?)?
        }
    };

    println!("{output}");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
