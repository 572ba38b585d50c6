use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod config;
mod detect;
mod error;
mod export;
mod ingest;
mod models;
mod normalize;
mod periods;
mod pipeline;
mod reference;
mod report;
mod series;

use config::{Combinator, DetectionConfig, DetectionStrategy};
use export::ExportFormat;
use ingest::Layout;

#[derive(Parser)]
#[command(name = "meter-anomaly-check")]
#[command(about = "Flags abnormal water-meter consumption in periodic spreadsheet exports", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection and print the most severe anomalies
    Analyze {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Write the Anomalies / All Data / Summary sheets
    Export {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output directory for CSV sheets
        #[arg(long, default_value = "export")]
        out_dir: PathBuf,
        /// Output file for the JSON workbook
        #[arg(long, default_value = "export.json")]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Threshold,
    ZScore,
    Iqr,
    MeanDeviation,
}

#[derive(Args)]
struct RunArgs {
    /// Uploaded readings (CSV)
    #[arg(long)]
    input: PathBuf,
    #[arg(long, value_enum, default_value_t = Layout::Auto)]
    layout: Layout,
    /// TOML file with detection settings
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    method: Option<Method>,
    #[arg(long)]
    pct_threshold: Option<f64>,
    /// Absolute deviation threshold in m³
    #[arg(long)]
    abs_threshold: Option<f64>,
    #[arg(long, value_enum)]
    combinator: Option<CombinatorArg>,
    #[arg(long)]
    z_threshold: Option<f64>,
    #[arg(long)]
    iqr_multiplier: Option<f64>,
    /// Days measured in the current period (direct layout)
    #[arg(long)]
    measured_days: Option<u32>,
    #[arg(long)]
    tolerance_pct: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CombinatorArg {
    Or,
    And,
    Weighted,
}

impl From<CombinatorArg> for Combinator {
    fn from(arg: CombinatorArg) -> Self {
        match arg {
            CombinatorArg::Or => Combinator::Or,
            CombinatorArg::And => Combinator::And,
            CombinatorArg::Weighted => Combinator::Weighted,
        }
    }
}

impl RunArgs {
    /// Config file (or defaults) with command-line overrides applied on top.
    fn detection_config(&self) -> anyhow::Result<DetectionConfig> {
        let mut config = match &self.config {
            Some(path) => DetectionConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => DetectionConfig::default(),
        };

        let (base_pct, base_abs, base_combinator) = match &config.strategy {
            DetectionStrategy::Threshold {
                pct_threshold,
                abs_threshold,
                combinator,
            } => (*pct_threshold, *abs_threshold, *combinator),
            _ => (30.0, 100.0, Combinator::Or),
        };

        let method = self.method.unwrap_or(match config.strategy {
            DetectionStrategy::Threshold { .. } => Method::Threshold,
            DetectionStrategy::ZScore { .. } => Method::ZScore,
            DetectionStrategy::Iqr { .. } => Method::Iqr,
            DetectionStrategy::MeanDeviation { .. } => Method::MeanDeviation,
        });
        self.reject_foreign_overrides(method)?;

        config.strategy = match (method, &config.strategy) {
            (Method::ZScore, DetectionStrategy::ZScore { threshold }) => {
                DetectionStrategy::ZScore {
                    threshold: self.z_threshold.unwrap_or(*threshold),
                }
            }
            (Method::ZScore, _) => DetectionStrategy::ZScore {
                threshold: self.z_threshold.unwrap_or(2.0),
            },
            (Method::Iqr, DetectionStrategy::Iqr { multiplier }) => DetectionStrategy::Iqr {
                multiplier: self.iqr_multiplier.unwrap_or(*multiplier),
            },
            (Method::Iqr, _) => DetectionStrategy::Iqr {
                multiplier: self.iqr_multiplier.unwrap_or(1.5),
            },
            (Method::MeanDeviation, DetectionStrategy::MeanDeviation { threshold_pct }) => {
                DetectionStrategy::MeanDeviation {
                    threshold_pct: self.pct_threshold.unwrap_or(*threshold_pct),
                }
            }
            (Method::MeanDeviation, _) => DetectionStrategy::MeanDeviation {
                threshold_pct: self.pct_threshold.unwrap_or(30.0),
            },
            (Method::Threshold, _) => DetectionStrategy::Threshold {
                pct_threshold: self.pct_threshold.unwrap_or(base_pct),
                abs_threshold: self.abs_threshold.unwrap_or(base_abs),
                combinator: self.combinator.map(Into::into).unwrap_or(base_combinator),
            },
        };

        if let Some(days) = self.measured_days {
            config.measured_period_days = days;
        }
        if let Some(tolerance) = self.tolerance_pct {
            config.tolerance_pct = tolerance;
        }

        config.validate().context("invalid detection settings")?;
        Ok(config)
    }

    /// Parameter flags that the selected method would silently ignore.
    fn reject_foreign_overrides(&self, method: Method) -> anyhow::Result<()> {
        let (name, foreign) = match method {
            Method::Threshold => (
                "threshold",
                vec![
                    ("--z-threshold", self.z_threshold.is_some()),
                    ("--iqr-multiplier", self.iqr_multiplier.is_some()),
                ],
            ),
            Method::ZScore => (
                "z-score",
                vec![
                    ("--pct-threshold", self.pct_threshold.is_some()),
                    ("--abs-threshold", self.abs_threshold.is_some()),
                    ("--combinator", self.combinator.is_some()),
                    ("--tolerance-pct", self.tolerance_pct.is_some()),
                    ("--iqr-multiplier", self.iqr_multiplier.is_some()),
                ],
            ),
            Method::Iqr => (
                "iqr",
                vec![
                    ("--pct-threshold", self.pct_threshold.is_some()),
                    ("--abs-threshold", self.abs_threshold.is_some()),
                    ("--combinator", self.combinator.is_some()),
                    ("--tolerance-pct", self.tolerance_pct.is_some()),
                    ("--z-threshold", self.z_threshold.is_some()),
                ],
            ),
            Method::MeanDeviation => (
                "mean-deviation",
                vec![
                    ("--abs-threshold", self.abs_threshold.is_some()),
                    ("--combinator", self.combinator.is_some()),
                    ("--tolerance-pct", self.tolerance_pct.is_some()),
                    ("--z-threshold", self.z_threshold.is_some()),
                    ("--iqr-multiplier", self.iqr_multiplier.is_some()),
                ],
            ),
        };

        if let Some((flag, _)) = foreign.iter().find(|(_, given)| *given) {
            anyhow::bail!("{flag} does not apply to the {name} method");
        }
        Ok(())
    }

    fn analyze(&self) -> anyhow::Result<pipeline::Analysis> {
        let config = self.detection_config()?;
        let dataset = ingest::load(&self.input, self.layout, &config.sentinels)
            .with_context(|| format!("failed to read {}", self.input.display()))?;
        let analysis = pipeline::run(dataset, &config).context("detection could not run")?;
        Ok(analysis)
    }
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::default().add_directive(level_filter(log_level)?.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn level_filter(log_level: &str) -> anyhow::Result<LevelFilter> {
    log_level
        .parse::<LevelFilter>()
        .with_context(|| format!("invalid --log-level {log_level:?}"))
}

fn print_summary(analysis: &pipeline::Analysis) {
    let summary = &analysis.summary;
    println!("Method: {}", analysis.method);
    println!(
        "Facilities: {} evaluated, {} anomalies, {} normal ({:.1}% anomalous)",
        summary.evaluated_count,
        summary.anomaly_count,
        summary.normal_count,
        summary.anomaly_ratio * 100.0
    );

    let diagnostics = &analysis.diagnostics;
    if !diagnostics.excluded_periods.is_empty() || diagnostics.dropped_cells() > 0 {
        println!(
            "Excluded: {} period column(s), {} cell(s) ({} no-data, {} non-numeric, {} empty)",
            diagnostics.excluded_periods.len(),
            diagnostics.dropped_cells(),
            diagnostics.sentinel_cells,
            diagnostics.unparseable_cells,
            diagnostics.empty_cells
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Analyze { run, limit } => {
            let analysis = run.analyze()?;
            print_summary(&analysis);

            let anomalies = analysis.anomalies();
            if anomalies.is_empty() {
                println!("No anomalies detected.");
                return Ok(());
            }

            println!("Top facilities by severity:");
            for result in anomalies.iter().take(limit) {
                println!(
                    "- {} ({}) {:.2} m³/30d: {}",
                    result.facility_id,
                    result.current.period_label,
                    result.current.normalized,
                    result.verdict.reason
                );
            }
        }
        Commands::Report { run, out } => {
            let analysis = run.analyze()?;
            let report = report::build_report(&run.input.display().to_string(), &analysis);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), "report written");
            println!("Report written to {}.", out.display());
        }
        Commands::Export {
            run,
            format,
            out_dir,
            out,
        } => {
            let analysis = run.analyze()?;
            print_summary(&analysis);
            match format {
                ExportFormat::Csv => {
                    let paths = export::write_csv_dir(&out_dir, &analysis)
                        .with_context(|| format!("failed to export to {}", out_dir.display()))?;
                    let reread = export::read_all_data(&out_dir.join(export::ALL_DATA_FILE))
                        .context("failed to re-read exported All Data sheet")?;
                    anyhow::ensure!(
                        reread.len() == analysis.results.len(),
                        "All Data sheet has {} rows, expected {}",
                        reread.len(),
                        analysis.results.len()
                    );
                    println!("Wrote {} sheets to {}.", paths.len(), out_dir.display());
                }
                ExportFormat::Json => {
                    export::write_json(&out, &analysis)
                        .with_context(|| format!("failed to export to {}", out.display()))?;
                    println!("Workbook written to {}.", out.display());
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["meter-anomaly-check", "analyze", "--input", "upload.csv"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("arguments should parse").command {
            Commands::Analyze { run, .. } => run,
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn overrides_apply_to_selected_method() {
        let config = run_args(&["--method", "z-score", "--z-threshold", "3"])
            .detection_config()
            .unwrap();
        assert_eq!(config.strategy, DetectionStrategy::ZScore { threshold: 3.0 });

        let config = run_args(&["--abs-threshold", "2000", "--combinator", "and"])
            .detection_config()
            .unwrap();
        assert_eq!(
            config.strategy,
            DetectionStrategy::Threshold {
                pct_threshold: 30.0,
                abs_threshold: 2000.0,
                combinator: Combinator::And,
            }
        );
    }

    #[test]
    fn overrides_for_another_method_are_rejected() {
        let err = run_args(&["--z-threshold", "3"]).detection_config().unwrap_err();
        assert!(err.to_string().contains("--z-threshold"), "got: {err}");

        let err = run_args(&["--method", "z-score", "--abs-threshold", "50"])
            .detection_config()
            .unwrap_err();
        assert!(err.to_string().contains("--abs-threshold"), "got: {err}");

        assert!(run_args(&["--method", "iqr", "--tolerance-pct", "5"])
            .detection_config()
            .is_err());
    }

    #[test]
    fn log_level_must_be_a_level_name() {
        assert_eq!(level_filter("debug").unwrap(), LevelFilter::DEBUG);
        assert_eq!(level_filter("WARN").unwrap(), LevelFilter::WARN);
        assert!(level_filter("verbose").is_err());
    }
}
