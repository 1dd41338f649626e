//! RF-Sentinel command-line front-end.
//!
//! # Usage
//!
//! ```bash
//! # Scan the FM band against the synthetic tuner
//! rf-sentinel scan --start-mhz 87.5 --end-mhz 108 --simulate
//!
//! # Create and run a survey
//! rf-sentinel survey create "Home sweep" --start-mhz 88 --end-mhz 1000
//! rf-sentinel survey resume <survey-id> --simulate
//!
//! # Watch the aircraft band with push notifications
//! rf-sentinel watch --band aircraft-vhf --ntfy my-alerts --simulate
//! ```
//!
//! The hardware tuner driver is an external integration; every scanning
//! subcommand takes `--simulate` to run against the synthetic front-end.
//!
//! Exit codes: 0 on success, 1 on runtime failure, 2 on argument errors.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rf_sentinel::device::sim::SimulatedTuner;
use rf_sentinel::device::{Tuner, TunerParams};
use rf_sentinel::dsp::Window;
use rf_sentinel::observability::AuditLogger;
use rf_sentinel::scanner::SpectrumScanner;
use rf_sentinel::sigmf::{SigMFDataType, SigMFRecording};
use rf_sentinel::storage::transform::{MedallionTransformer, TransformOptions};
use rf_sentinel::storage::UnifiedDb;
use rf_sentinel::survey::{
    CreateSurveyOptions, SurveyExecutor, SurveyManager, SurveyStatus,
};
use rf_sentinel::watch::{
    create_watch_for_band, create_watch_for_frequency, AlertCondition, AlertConditionType,
    FrequencyBand, SpectrumWatch,
};

#[derive(Parser)]
#[command(name = "rf-sentinel", version, about = "RF spectrum discovery and monitoring engine")]
struct Cli {
    /// Store location
    #[arg(long, global = true, default_value = "data/rf-sentinel.db", env = "RF_SENTINEL_DB")]
    db: PathBuf,

    /// Run against the synthetic tuner instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a frequency range for signals
    Scan {
        #[arg(long)]
        start_mhz: f64,
        #[arg(long)]
        end_mhz: f64,
        /// Step size in kHz (default: 80% of the sample rate)
        #[arg(long)]
        step_khz: Option<f64>,
        #[arg(long, default_value_t = 100.0)]
        dwell_ms: f64,
        #[arg(long, default_value_t = -30.0)]
        threshold_db: f64,
        /// Emit the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record IQ samples to a SigMF pair
    Record {
        #[arg(long)]
        freq_mhz: f64,
        #[arg(long, default_value_t = 10.0)]
        duration_secs: f64,
        #[arg(long, default_value = "recordings")]
        output_dir: PathBuf,
    },

    /// Demodulate FM to a raw f32 audio file
    Fm {
        #[arg(long)]
        freq_mhz: f64,
        #[arg(long, default_value_t = 10.0)]
        duration_secs: f64,
        #[arg(long, default_value = "audio.f32")]
        output: PathBuf,
    },

    /// Demodulate AM to a raw f32 audio file
    Am {
        #[arg(long)]
        freq_mhz: f64,
        #[arg(long, default_value_t = 10.0)]
        duration_secs: f64,
        #[arg(long, default_value = "audio.f32")]
        output: PathBuf,
    },

    /// Continuously watch bands and alert on anomalies
    Watch {
        /// Load a full watch configuration from a TOML file
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        band: Option<FrequencyBand>,
        /// Watch a single frequency instead of a band
        #[arg(long)]
        freq_mhz: Option<f64>,
        /// ntfy topic for push notifications
        #[arg(long)]
        ntfy: Option<String>,
        /// Seconds between scan iterations (default 5)
        #[arg(long)]
        interval_secs: Option<f64>,
        /// Scans required to establish the baseline (default 12)
        #[arg(long)]
        baseline_scans: Option<u32>,
        /// Peak detection threshold in dB (default -30)
        #[arg(long)]
        threshold_db: Option<f64>,
    },

    /// Manage spectrum surveys
    Survey {
        #[command(subcommand)]
        command: SurveyCommand,
    },

    /// Run the medallion bronze/silver/gold transform
    Transform {
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value_t = 0.0)]
        min_silver_power: f64,
        #[arg(long, default_value_t = 1)]
        min_detections: u32,
        #[arg(long, default_value_t = 10.0)]
        min_gold_power: f64,
    },

    /// Export the store as Parquet (and optionally assets as CSV)
    Export {
        #[arg(long, default_value = "export")]
        output_dir: PathBuf,
        /// Also write assets.csv
        #[arg(long)]
        csv: bool,
    },
}

#[derive(Subcommand)]
enum SurveyCommand {
    /// Create a survey with prioritized segments
    Create {
        name: String,
        #[arg(long, default_value_t = 24.0)]
        start_mhz: f64,
        #[arg(long, default_value_t = 1766.0)]
        end_mhz: f64,
        /// Skip gap-filling segments
        #[arg(long)]
        priority_only: bool,
        #[arg(long)]
        location: Option<String>,
    },
    /// List surveys
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a survey's progress
    Status { survey_id: String },
    /// Execute the next pending segment
    Next { survey_id: String },
    /// Run segments until the survey completes
    Resume {
        survey_id: String,
        #[arg(long)]
        max_segments: Option<u32>,
    },
}

/// Build the RF front-end. Hardware drivers integrate here; the shipped
/// binary only carries the synthetic tuner.
fn open_tuner(simulate: bool, center_freq: f64) -> Result<Box<dyn Tuner + Send>> {
    if !simulate {
        bail!(
            "no hardware tuner driver linked into this build; \
             pass --simulate to run against the synthetic front-end"
        );
    }
    let params = TunerParams {
        center_freq,
        ..TunerParams::default()
    };
    // A couple of fixed carriers so simulated scans find something
    Ok(Box::new(
        SimulatedTuner::new(params, -60.0)
            .with_carrier(100.1e6, -20.0)
            .with_carrier(121.5e6, -22.0)
            .with_carrier(433.92e6, -25.0),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let audit = AuditLogger::new("audit.jsonl");

    match cli.command {
        Command::Scan {
            start_mhz,
            end_mhz,
            step_khz,
            dwell_ms,
            threshold_db,
            json,
        } => {
            let mut tuner = open_tuner(cli.simulate, start_mhz * 1e6)?;
            let scanner = SpectrumScanner {
                threshold_db,
                window: Window::Hann,
                ..SpectrumScanner::default()
            };
            let result = scanner.scan(
                tuner.as_mut(),
                start_mhz * 1e6,
                end_mhz * 1e6,
                step_khz.map(|k| k * 1e3),
                dwell_ms,
            )?;

            audit.log_scan(
                "cli_scan",
                result.start_freq_hz,
                result.end_freq_hz,
                result.peaks.len(),
                result.scan_time_seconds,
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Scanned {start_mhz:.1}-{end_mhz:.1} MHz in {:.1}s (noise floor {:.1} dB)",
                    result.scan_time_seconds, result.noise_floor_db
                );
                for peak in &result.peaks {
                    println!("  {peak}");
                }
            }
        }

        Command::Record {
            freq_mhz,
            duration_secs,
            output_dir,
        } => {
            let mut tuner = open_tuner(cli.simulate, freq_mhz * 1e6)?;
            let sample_rate = tuner.sample_rate();
            let samples = tuner.read_samples((sample_rate * duration_secs) as usize)?;

            let recording = SigMFRecording::create(
                &samples,
                sample_rate,
                freq_mhz * 1e6,
                &output_dir,
                None,
                Some("rf-sentinel recording"),
                SigMFDataType::Cf32Le,
            )?;

            let size = std::fs::metadata(&recording.data_path)?.len();
            audit.log_recording(
                "cli_record",
                freq_mhz * 1e6,
                duration_secs,
                &recording.data_path,
                size,
            );
            println!("Recorded {} samples to {}", samples.len(), recording.data_path.display());
        }

        Command::Fm {
            freq_mhz,
            duration_secs,
            output,
        } => {
            let mut tuner = open_tuner(cli.simulate, freq_mhz * 1e6)?;
            let sample_rate = tuner.sample_rate();
            let samples = tuner.read_samples((sample_rate * duration_secs) as usize)?;
            let (audio, rate) = rf_sentinel::dsp::fm_demodulate_default(&samples, sample_rate);
            write_f32_le(&output, &audio)?;
            println!("Wrote {} samples at {rate} Hz to {}", audio.len(), output.display());
        }

        Command::Am {
            freq_mhz,
            duration_secs,
            output,
        } => {
            let mut tuner = open_tuner(cli.simulate, freq_mhz * 1e6)?;
            let sample_rate = tuner.sample_rate();
            let samples = tuner.read_samples((sample_rate * duration_secs) as usize)?;
            let (audio, rate) = rf_sentinel::dsp::am_demodulate(
                &samples,
                sample_rate,
                rf_sentinel::config::FM_AUDIO_RATE,
            );
            write_f32_le(&output, &audio)?;
            println!("Wrote {} samples at {rate} Hz to {}", audio.len(), output.display());
        }

        Command::Watch {
            config: config_path,
            band,
            freq_mhz,
            ntfy,
            interval_secs,
            baseline_scans,
            threshold_db,
        } => {
            let mut config = match (config_path, band, freq_mhz) {
                (Some(path), _, _) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    toml::from_str(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                (None, Some(band), _) => create_watch_for_band(band, "cli watch"),
                (None, None, Some(freq)) => create_watch_for_frequency(freq * 1e6, "cli watch"),
                (None, None, None) => bail!("pass --config, --band, or --freq-mhz"),
            };
            if let Some(interval) = interval_secs {
                config.scan_interval_seconds = interval;
            }
            if let Some(scans) = baseline_scans {
                config.baseline_scans = scans;
            }
            if let Some(threshold) = threshold_db {
                config.threshold_db = threshold;
            }
            if config.alert_conditions.is_empty() {
                config
                    .alert_conditions
                    .push(AlertCondition::new(AlertConditionType::NewSignal));
            }
            if let Some(topic) = ntfy {
                config.notifications.push(format!("ntfy:{topic}"));
            }

            let center = config
                .frequency_ranges()
                .first()
                .map_or(100.0e6, |(start, _)| *start);
            let tuner = open_tuner(cli.simulate, center)?;
            let (watch, handle) = SpectrumWatch::new(config, tuner);

            let runner = tokio::spawn(watch.run());
            tokio::signal::ctrl_c().await.context("signal handler")?;
            info!("stopping watch...");
            handle.stop().await;

            let state = runner.await.context("watch task panicked")?;
            println!(
                "Watch stopped after {} scans, {} alerts",
                state.scans_completed, state.alerts_sent
            );
        }

        Command::Survey { command } => run_survey_command(&cli.db, cli.simulate, command)?,

        Command::Transform {
            dry_run,
            min_silver_power,
            min_detections,
            min_gold_power,
        } => {
            let db = UnifiedDb::open(&cli.db)?;
            let transformer = MedallionTransformer::new(&db);
            let results = transformer.run_full_pipeline(&TransformOptions {
                min_silver_power_db: min_silver_power,
                min_silver_detections: min_detections,
                min_gold_power_db: min_gold_power,
                dry_run,
                ..TransformOptions::default()
            });

            for result in &results {
                let marker = if result.success { "ok" } else { "FAILED" };
                println!(
                    "[{marker}] {}.{}: {} rows (from {}){}",
                    result.layer,
                    result.table,
                    result.rows_created,
                    result.rows_source,
                    result.error.as_deref().map(|e| format!(" - {e}")).unwrap_or_default(),
                );
            }
            if results.iter().any(|r| !r.success) {
                bail!("transform pipeline reported failures");
            }
        }

        Command::Export { output_dir, csv } => {
            let db = UnifiedDb::open(&cli.db)?;
            for (table, rows) in db.export_parquet(&output_dir)? {
                println!("{table}: {rows} rows");
            }
            if csv {
                let path = output_dir.join("assets.csv");
                let rows = db.export_assets_csv(&path)?;
                println!("assets.csv: {rows} rows");
            }
        }
    }

    Ok(())
}

fn run_survey_command(db_path: &PathBuf, simulate: bool, command: SurveyCommand) -> Result<()> {
    let db = UnifiedDb::open(db_path)?;
    let manager = SurveyManager::new(&db);

    match command {
        SurveyCommand::Create {
            name,
            start_mhz,
            end_mhz,
            priority_only,
            location,
        } => {
            let survey = manager.create_survey(
                &name,
                CreateSurveyOptions {
                    start_hz: start_mhz * 1e6,
                    end_hz: end_mhz * 1e6,
                    full_coverage: !priority_only,
                    location_name: location,
                    ..CreateSurveyOptions::default()
                },
            )?;
            println!(
                "Created survey {} ({} segments)",
                survey.survey_id, survey.total_segments
            );
        }

        SurveyCommand::List { status } => {
            let status = status
                .as_deref()
                .map(|s| SurveyStatus::parse(s).context("unknown status"))
                .transpose()?;
            for survey in manager.list_surveys(status, 100)? {
                println!(
                    "{}  {:<12} {:5.1}%  {}",
                    survey.survey_id,
                    survey.status.as_str(),
                    survey.completion_pct,
                    survey.name
                );
            }
        }

        SurveyCommand::Status { survey_id } => {
            let survey = manager
                .get_survey(&survey_id)?
                .context("survey not found")?;
            println!("{}", serde_json::to_string_pretty(&survey)?);
        }

        SurveyCommand::Next { survey_id } => {
            let executor = SurveyExecutor::new(&manager, &db);
            let mut tuner = open_tuner(simulate, 100.0e6)?;
            match executor.execute_next(tuner.as_mut(), &survey_id, true)? {
                Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                None => println!("No pending segments"),
            }
        }

        SurveyCommand::Resume {
            survey_id,
            max_segments,
        } => {
            let executor = SurveyExecutor::new(&manager, &db);
            let mut tuner = open_tuner(simulate, 100.0e6)?;
            let result =
                executor.run_continuous(tuner.as_mut(), &survey_id, max_segments, true)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

fn write_f32_le(path: &PathBuf, samples: &[f32]) -> Result<()> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}
