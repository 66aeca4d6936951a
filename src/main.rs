// ECG Sentinel command line
// Offline scoring, the live monitor loop and weight/config maintenance

use clap::{Parser, Subcommand};
use env_logger::Env;
use std::error::Error;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ecg_sentinel_lib::service::{forward_lines, JsonlAlertSink, Monitor};
use ecg_sentinel_lib::storage::read_tensor_file;
use ecg_sentinel_lib::{
    parse_payload, AnomalyDetector, DetectorConfig, WaveformBuffer, WeightSet,
};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "ecg-sentinel")]
#[command(about = "Flag anomalous ECG waveforms by autoencoder reconstruction error")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the per-user config if present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Weight directory, overriding the config
    #[arg(short, long, global = true, value_name = "DIR")]
    weights: Option<PathBuf>,

    /// Anomaly threshold, overriding the config
    #[arg(short, long, global = true)]
    threshold: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score payload lines from a file (or stdin) and print one decision per line
    Score {
        #[arg(value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Read payloads from stdin as the sensor feed and append alerts to a JSONL file
    Monitor {
        #[arg(short, long, default_value = "alerts.jsonl")]
        alerts: PathBuf,

        /// Inbound queue depth
        #[arg(long, default_value_t = 64)]
        queue: usize,
    },

    /// Score every row of a 2-D sample matrix (.npy or .ecgt)
    Replay {
        #[arg(value_name = "FILE")]
        samples: PathBuf,

        /// Only score the first N rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Convert a weight directory (.npy or .ecgt) into .ecgt files
    Convert {
        #[arg(value_name = "SRC")]
        source: PathBuf,

        #[arg(value_name = "DEST")]
        dest: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        /// Destination (defaults to the per-user config path)
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let mut config = DetectorConfig::load_or_default(cli.config.as_deref())?;
    if let Some(weights) = cli.weights {
        config.weights_dir = weights;
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    config.validate()?;

    match cli.command {
        Command::Score { input } => score(&config, input.as_deref()),
        Command::Monitor { alerts, queue } => monitor(&config, alerts, queue),
        Command::Replay { samples, limit } => replay(&config, &samples, limit),
        Command::Convert { source, dest } => convert(&source, &dest),
        Command::InitConfig { path, force } => init_config(&config, path, force),
    }
}

fn load_detector(config: &DetectorConfig) -> CliResult<AnomalyDetector> {
    let weights = WeightSet::load_dir(&config.weights_dir)?;
    log::info!(
        "{} parameters, input length {}, threshold {}",
        weights.parameter_count(),
        config.input_dim,
        config.threshold
    );
    Ok(AnomalyDetector::from_config(Arc::new(weights), config)?)
}

fn score(config: &DetectorConfig, input: Option<&Path>) -> CliResult<()> {
    let detector = load_detector(config)?;

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(fs::File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let waveform = match parse_payload(&line) {
            Ok(waveform) => waveform,
            Err(e) => {
                log::warn!("Line {}: {}", line_no + 1, e);
                continue;
            }
        };

        match detector.evaluate(&waveform) {
            Ok(decision) => println!("{}", serde_json::to_string(&decision)?),
            Err(e) if e.is_recoverable() => log::warn!("Line {}: {}", line_no + 1, e),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn monitor(config: &DetectorConfig, alerts: PathBuf, queue: usize) -> CliResult<()> {
    let detector = load_detector(config)?;
    log::info!("Appending alerts to {}", alerts.display());

    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime.block_on(async {
        let (tx, rx) = tokio::sync::mpsc::channel(queue.max(1));
        let monitor = Monitor::new(
            detector,
            JsonlAlertSink::new(alerts),
            config.messaging.clone(),
        );

        let input = tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            forward_lines(stdin, tx).await
        });

        let (_, stats) = monitor.run(rx).await;
        match input.await {
            Ok(Ok(count)) => log::debug!("Forwarded {} payloads", count),
            Ok(Err(e)) => log::error!("Reading stdin failed: {}", e),
            Err(e) => log::error!("Input task failed: {}", e),
        }
        stats
    });

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn replay(config: &DetectorConfig, samples: &Path, limit: Option<usize>) -> CliResult<()> {
    let detector = load_detector(config)?;
    let matrix = read_tensor_file(samples)?.into_array::<ndarray::Ix2>()?;
    log::info!("Replaying {} rows of {} samples", matrix.nrows(), matrix.ncols());

    let rows = limit.unwrap_or(matrix.nrows()).min(matrix.nrows());
    for (i, row) in matrix.outer_iter().take(rows).enumerate() {
        let waveform = WaveformBuffer::new(row.to_vec());
        match detector.evaluate(&waveform) {
            Ok(decision) => println!(
                "{:>4}  error {:.6}  {}",
                i,
                decision.error,
                if decision.anomalous { "ANOMALY" } else { "normal" }
            ),
            Err(e) if e.is_recoverable() => log::warn!("Row {}: {}", i, e),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn convert(source: &Path, dest: &Path) -> CliResult<()> {
    let weights = WeightSet::load_dir(source)?;
    fs::create_dir_all(dest)?;
    weights.save_dir(dest)?;
    println!(
        "Wrote {} parameters to {} (fingerprint {})",
        weights.parameter_count(),
        dest.display(),
        weights.fingerprint()
    );
    Ok(())
}

fn init_config(config: &DetectorConfig, path: Option<PathBuf>, force: bool) -> CliResult<()> {
    let path = match path {
        Some(path) => path,
        None => DetectorConfig::default_path()?,
    };
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }

    config.save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
