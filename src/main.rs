//! Command-line front end: option parsing, input/output plumbing, and the
//! run loop around the engine.

use clap::Parser;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use flowscan::config::{ScanConfig, progress_mask};
use flowscan::ipset::IpSet;
use flowscan::models::trw;
use flowscan::{ScanEngine, ScanError, ScanModel};

/// Detects scanning activity in pre-sorted flow records.
///
/// The output is a pipe-delimited textual file suitable for loading into a
/// relational database. Input records must be pre-sorted by source IP,
/// protocol, and destination IP.
#[derive(Parser, Debug)]
#[command(name = "flowscan", version)]
struct Cli {
    /// Scan model: 0 = hybrid TRW + BLR, 1 = TRW only, 2 = BLR only
    #[arg(
        long = "scan-model",
        value_name = "N",
        default_value_t = 0,
        value_parser = clap::value_parser!(u32).range(0..=2)
    )]
    scan_model: u32,

    /// IP-set file of all valid internal IP addresses; required when the
    /// TRW model is enabled
    #[arg(
        long = "trw-internal-set",
        alias = "trw-sip-set",
        value_name = "PATH"
    )]
    trw_internal_set: Option<PathBuf>,

    /// Probability a connection succeeds given a benign source
    #[arg(long = "trw-theta0", value_name = "X", default_value_t = trw::DEFAULT_THETA0)]
    trw_theta0: f64,

    /// Probability a connection succeeds given a scanning source
    #[arg(long = "trw-theta1", value_name = "X", default_value_t = trw::DEFAULT_THETA1)]
    trw_theta1: f64,

    /// Write the textual scan records to this file instead of stdout
    #[arg(long = "output-path", value_name = "PATH")]
    output_path: Option<PathBuf>,

    /// Do not print column headers
    #[arg(long = "no-titles")]
    no_titles: bool,

    /// Disable fixed-width columnar output
    #[arg(long = "no-columns")]
    no_columns: bool,

    /// Use the specified character between columns
    #[arg(long = "column-separator", value_name = "C")]
    column_separator: Option<char>,

    /// Shortcut for --no-columns --no-final-delimiter, optionally setting
    /// the separator
    #[arg(long = "delimited", value_name = "C", num_args = 0..=1, require_equals = true)]
    delimited: Option<Option<char>>,

    /// Suppress the column delimiter at end of line
    #[arg(long = "no-final-delimiter")]
    no_final_delimiter: bool,

    /// Print IP numbers as integers
    #[arg(long = "integer-ips")]
    integer_ips: bool,

    /// Show the scan-model detail fields
    #[arg(long = "model-fields")]
    model_fields: bool,

    /// Produce output suitable for loading into a RDBMS: shortcut for
    /// --no-titles --no-columns --model-fields --no-final-delimiter
    /// --integer-ips
    #[arg(long = "scandb")]
    scandb: bool,

    /// Number of worker threads
    #[arg(long = "threads", value_name = "N", default_value_t = 1)]
    threads: u32,

    /// Work queue depth; defaults to the thread count, 0 is unbounded
    #[arg(long = "queue-depth", value_name = "N")]
    queue_depth: Option<u32>,

    /// Report detailed progress, one message per /N CIDR block
    #[arg(long = "verbose-progress", value_name = "N")]
    verbose_progress: Option<u32>,

    /// Write individual flows for events (debugging; very chatty)
    #[arg(long = "verbose-flows")]
    verbose_flows: bool,

    /// Print per-source results, optionally only for events of at least
    /// MIN flows
    #[arg(
        long = "verbose-results",
        value_name = "MIN",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "1"
    )]
    verbose_results: Option<u32>,

    /// Flowpack input files; '-' or no arguments reads standard input
    #[arg(value_name = "FILE")]
    inputs: Vec<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<ScanConfig, ScanError> {
    for (name, value) in [("trw-theta0", cli.trw_theta0), ("trw-theta1", cli.trw_theta1)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ScanError::Config {
                message: format!("invalid --{name} '{value}': must be between 0 and 1"),
            });
        }
    }
    let scan_model = ScanModel::try_from(cli.scan_model).map_err(|n| ScanError::Config {
        message: format!("invalid --scan-model '{n}'"),
    })?;

    let worker_threads = cli.threads.max(1);
    let mut config = ScanConfig {
        scan_model,
        trw_theta0: cli.trw_theta0,
        trw_theta1: cli.trw_theta1,
        no_titles: cli.no_titles,
        no_columns: cli.no_columns,
        no_final_delimiter: cli.no_final_delimiter,
        integer_ips: cli.integer_ips,
        model_fields: cli.model_fields,
        verbose_flows: cli.verbose_flows,
        verbose_results: cli.verbose_results.unwrap_or(0),
        verbose_progress: progress_mask(cli.verbose_progress.unwrap_or(0)),
        worker_threads,
        work_queue_depth: cli.queue_depth.unwrap_or(worker_threads),
        ..ScanConfig::default()
    };

    if let Some(sep) = cli.column_separator {
        config.delimiter = sep;
    }
    if let Some(delimited) = cli.delimited {
        config.no_columns = true;
        config.no_final_delimiter = true;
        if let Some(sep) = delimited {
            config.delimiter = sep;
        }
    }
    if cli.scandb {
        config.no_titles = true;
        config.no_columns = true;
        config.model_fields = true;
        config.no_final_delimiter = true;
        config.integer_ips = true;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), ScanError> {
    let config = build_config(&cli)?;

    let existing = if config.trw_enabled() {
        let path = cli.trw_internal_set.as_ref().ok_or_else(|| ScanError::Config {
            message: "TRW scan model enabled, but --trw-internal-set not specified"
                .to_string(),
        })?;
        IpSet::load(path)?
    } else {
        IpSet::new()
    };

    let out: Box<dyn Write + Send> = match &cli.output_path {
        Some(path) => {
            let file = File::create(path).map_err(|source| ScanError::Io {
                context: format!("cannot open '{}' for writing", path.display()),
                source,
            })?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };

    let mut engine = ScanEngine::new(config, existing, out)?;
    engine.start_workers();

    let inputs = if cli.inputs.is_empty() {
        vec![PathBuf::from("-")]
    } else {
        cli.inputs.clone()
    };
    for path in &inputs {
        let result = if path.as_os_str() == "-" {
            engine.process_stream("stdin", std::io::stdin().lock())
        } else {
            match File::open(path) {
                Ok(file) => {
                    engine.process_stream(&path.display().to_string(), BufReader::new(file))
                }
                Err(source) => Err(ScanError::Io {
                    context: format!("cannot open '{}'", path.display()),
                    source,
                }),
            }
        };
        // An input failure skips to the next file; events already grouped
        // from the failed stream are still classified.
        if let Err(e) = result {
            eprintln!("flowscan: {e}");
        }
    }

    engine.finish()?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("flowscan: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("flowscan").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let config = build_config(&parse(&[])).unwrap();
        assert_eq!(config.scan_model, ScanModel::Hybrid);
        assert_eq!(config.trw_theta0, 0.8);
        assert_eq!(config.trw_theta1, 0.2);
        assert_eq!(config.delimiter, '|');
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.work_queue_depth, 1);
        assert!(!config.no_titles && !config.no_columns);
        assert!(!config.model_fields);
    }

    #[test]
    fn queue_depth_defaults_to_thread_count() {
        let config = build_config(&parse(&["--threads", "8"])).unwrap();
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.work_queue_depth, 8);

        let config = build_config(&parse(&["--threads", "4", "--queue-depth", "0"])).unwrap();
        assert_eq!(config.work_queue_depth, 0);

        let config = build_config(&parse(&["--threads", "0"])).unwrap();
        assert_eq!(config.worker_threads, 1);
    }

    #[test]
    fn scandb_shortcut() {
        let config = build_config(&parse(&["--scandb"])).unwrap();
        assert!(config.no_titles);
        assert!(config.no_columns);
        assert!(config.model_fields);
        assert!(config.no_final_delimiter);
        assert!(config.integer_ips);
    }

    #[test]
    fn delimited_shortcut() {
        let config = build_config(&parse(&["--delimited"])).unwrap();
        assert!(config.no_columns);
        assert!(config.no_final_delimiter);
        assert_eq!(config.delimiter, '|');

        let config = build_config(&parse(&["--delimited=,"])).unwrap();
        assert_eq!(config.delimiter, ',');
    }

    #[test]
    fn verbose_results_default_threshold() {
        let config = build_config(&parse(&["--verbose-results"])).unwrap();
        assert_eq!(config.verbose_results, 1);
        let config = build_config(&parse(&["--verbose-results=64"])).unwrap();
        assert_eq!(config.verbose_results, 64);
        let config = build_config(&parse(&[])).unwrap();
        assert_eq!(config.verbose_results, 0);
    }

    #[test]
    fn verbose_progress_builds_mask() {
        let config = build_config(&parse(&["--verbose-progress", "8"])).unwrap();
        assert_eq!(config.verbose_progress, 0xFF00_0000);
    }

    #[test]
    fn theta_range_is_validated() {
        assert!(build_config(&parse(&["--trw-theta0", "1.5"])).is_err());
        assert!(build_config(&parse(&["--trw-theta1", "-0.1"])).is_err());
        assert!(build_config(&parse(&["--trw-theta0", "0.9"])).is_ok());
    }

    #[test]
    fn deprecated_sip_set_alias() {
        let cli = parse(&["--trw-sip-set", "/tmp/set.txt"]);
        assert_eq!(
            cli.trw_internal_set,
            Some(PathBuf::from("/tmp/set.txt"))
        );
    }

    #[test]
    fn rejects_out_of_range_scan_model() {
        assert!(
            Cli::try_parse_from(["flowscan", "--scan-model", "3"]).is_err()
        );
    }
}
