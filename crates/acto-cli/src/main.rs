use acto_lib::epoch::EpochAlignment;
use acto_lib::filter::BandPass;
use acto_lib::io::cwa::{CwaReader, CwaReaderOptions, Diagnostics};
use acto_lib::io::zipped::{ResolvedInput, DEFAULT_EXTENSIONS};
use acto_lib::metrics::svm::{SvmAggregator, SvmConfig, SvmMode};
use acto_lib::metrics::wtv::{WtvAggregator, WtvConfig};
use acto_lib::omconvert;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "acto",
    version,
    about = "acto: wearable accelerometer container tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SvmModeArg {
    /// abs(svm - 1)
    Abs,
    /// max(svm - 1, 0)
    Clamp,
    /// svm - 1
    Signed,
}

impl From<SvmModeArg> for SvmMode {
    fn from(arg: SvmModeArg) -> SvmMode {
        match arg {
            SvmModeArg::Abs => SvmMode::Abs,
            SvmModeArg::Clamp => SvmMode::ClampZero,
            SvmModeArg::Signed => SvmMode::Signed,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum InterpolateArg {
    Nearest,
    Linear,
    Cubic,
}

impl From<InterpolateArg> for omconvert::InterpolateMode {
    fn from(arg: InterpolateArg) -> Self {
        match arg {
            InterpolateArg::Nearest => omconvert::InterpolateMode::Nearest,
            InterpolateArg::Linear => omconvert::InterpolateMode::Linear,
            InterpolateArg::Cubic => omconvert::InterpolateMode::Cubic,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the decoded container header as JSON (add --scan for stream diagnostics)
    Info {
        input: PathBuf,
        /// Decode the whole stream and include sample/fault counts
        #[arg(long)]
        scan: bool,
    },
    /// Export the decoded sample stream as CSV
    Export {
        input: PathBuf,
        /// Output path; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        /// Drop gyroscope columns even when present
        #[arg(long)]
        no_gyro: bool,
        /// Include the per-block temperature column
        #[arg(long)]
        temperature: bool,
        /// Stop after this many samples
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Mean SVM per epoch
    Svm {
        input: PathBuf,
        /// Output path; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        /// Epoch duration in seconds
        #[arg(long, default_value_t = 60.0)]
        epoch: f64,
        /// Align epochs to the wall clock instead of the first sample
        #[arg(long)]
        wall_clock: bool,
        /// Band-pass filter each axis (0.5-20 Hz) before the magnitude
        #[arg(long)]
        filter: bool,
        #[arg(long, value_enum, default_value = "abs")]
        mode: SvmModeArg,
        /// Emit full epoch records as JSON lines instead of CSV
        #[arg(long)]
        json: bool,
    },
    /// Wear-time validation per 30-minute epoch
    Wtv {
        input: PathBuf,
        /// Output path; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        /// Align epochs to the wall clock instead of the first sample
        #[arg(long)]
        wall_clock: bool,
        /// Emit full epoch records as JSON lines instead of CSV
        #[arg(long)]
        json: bool,
    },
    /// Run the external omconvert executable over a container
    Convert {
        input: PathBuf,
        /// Path to the omconvert executable (searched for when omitted)
        #[arg(long)]
        executable: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "linear")]
        interpolate_mode: InterpolateArg,
        #[arg(long)]
        csv_file: Option<PathBuf>,
        #[arg(long)]
        svm_file: Option<PathBuf>,
        #[arg(long, default_value_t = 60)]
        svm_epoch: u32,
        /// Disable the converter's SVM band-pass filter
        #[arg(long)]
        no_svm_filter: bool,
        #[arg(long)]
        wtv_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Info { input, scan } => cmd_info(&input, scan)?,
        Commands::Export {
            input,
            out,
            no_gyro,
            temperature,
            limit,
        } => cmd_export(&input, out.as_deref(), no_gyro, temperature, limit)?,
        Commands::Svm {
            input,
            out,
            epoch,
            wall_clock,
            filter,
            mode,
            json,
        } => cmd_svm(&input, out.as_deref(), epoch, wall_clock, filter, mode.into(), json)?,
        Commands::Wtv {
            input,
            out,
            wall_clock,
            json,
        } => cmd_wtv(&input, out.as_deref(), wall_clock, json)?,
        Commands::Convert {
            input,
            executable,
            interpolate_mode,
            csv_file,
            svm_file,
            svm_epoch,
            no_svm_filter,
            wtv_file,
        } => cmd_convert(
            &input,
            executable,
            interpolate_mode.into(),
            csv_file,
            svm_file,
            svm_epoch,
            !no_svm_filter,
            wtv_file,
        )?,
    }
    Ok(())
}

fn open_reader(input: &Path) -> Result<(ResolvedInput, CwaReader<BufReader<File>>)> {
    open_reader_with(input, CwaReaderOptions::default())
}

fn open_reader_with(
    input: &Path,
    options: CwaReaderOptions,
) -> Result<(ResolvedInput, CwaReader<BufReader<File>>)> {
    let resolved = ResolvedInput::resolve(input, DEFAULT_EXTENSIONS)?;
    let reader = CwaReader::open_with(resolved.path(), options)
        .with_context(|| format!("decoding {}", input.display()))?;
    Ok((resolved, reader))
}

#[derive(Serialize)]
struct InfoReport<'a> {
    header: &'a acto_lib::io::cwa::CwaHeader,
    sample_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_sample_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_sample_time: Option<f64>,
    diagnostics: &'a Diagnostics,
}

fn cmd_info(input: &Path, scan: bool) -> Result<()> {
    let (_resolved, mut reader) = open_reader(input)?;
    let mut sample_count = None;
    let mut first = None;
    let mut last = None;
    if scan {
        let mut count = 0u64;
        while let Some(batch) = reader.next_batch() {
            count += batch.samples.len() as u64;
            if first.is_none() {
                first = batch.samples.first().map(|s| s.time);
            }
            if let Some(sample) = batch.samples.last() {
                last = Some(sample.time);
            }
        }
        sample_count = Some(count);
    }
    let report = InfoReport {
        header: reader.header(),
        sample_rate: reader.sample_rate(),
        sample_count,
        first_sample_time: first,
        last_sample_time: last,
        diagnostics: reader.diagnostics(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn out_writer(out: Option<&Path>) -> Result<Box<dyn Write>> {
    match out {
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// UTC timestamp string; epoch rows use whole seconds, samples milliseconds.
fn time_string(time: f64, with_millis: bool) -> String {
    let secs = time.floor() as i64;
    let nanos = ((time - secs as f64) * 1e9).round() as u32;
    let moment = DateTime::<Utc>::from_timestamp(secs, nanos.min(999_999_999))
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch"));
    if with_millis {
        moment.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    } else {
        moment.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn cmd_export(
    input: &Path,
    out: Option<&Path>,
    no_gyro: bool,
    temperature: bool,
    limit: Option<usize>,
) -> Result<()> {
    let options = CwaReaderOptions {
        include_gyro: !no_gyro,
        include_temperature: temperature,
        ..Default::default()
    };
    let (_resolved, reader) = open_reader_with(input, options)?;
    let has_gyro = !no_gyro && reader.header().gyro_range > 0;

    let mut writer = csv::WriterBuilder::new().from_writer(out_writer(out)?);
    let mut columns = vec![
        "Time".to_string(),
        "Accel-X (g)".to_string(),
        "Accel-Y (g)".to_string(),
        "Accel-Z (g)".to_string(),
    ];
    if has_gyro {
        columns.extend(
            ["Gyro-X (d/s)", "Gyro-Y (d/s)", "Gyro-Z (d/s)"]
                .iter()
                .map(|s| s.to_string()),
        );
    }
    if temperature {
        columns.push("Temperature (C)".to_string());
    }
    writer.write_record(&columns)?;

    let limit = limit.unwrap_or(usize::MAX);
    for sample in reader.into_samples().take(limit) {
        let mut record = vec![time_string(sample.time, true)];
        record.extend(sample.accel.iter().map(|v| v.to_string()));
        if has_gyro {
            let gyro = sample.gyro.unwrap_or([0.0; 3]);
            record.extend(gyro.iter().map(|v| v.to_string()));
        }
        if temperature {
            record.push(sample.temperature.unwrap_or(0.0).to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn alignment(wall_clock: bool) -> EpochAlignment {
    if wall_clock {
        EpochAlignment::WallClock
    } else {
        EpochAlignment::StreamStart
    }
}

fn cmd_svm(
    input: &Path,
    out: Option<&Path>,
    epoch: f64,
    wall_clock: bool,
    filter: bool,
    mode: SvmMode,
    json: bool,
) -> Result<()> {
    let (_resolved, reader) = open_reader(input)?;
    let rate = reader.sample_rate();
    let config = SvmConfig {
        epoch_seconds: epoch,
        alignment: alignment(wall_clock),
        mode,
        expected_rate: Some(rate),
    };
    let mut aggregator = if filter {
        SvmAggregator::with_filter(config, Box::new(BandPass::activity_band(rate)))
    } else {
        SvmAggregator::new(config)
    };

    let mut out = out_writer(out)?;
    if !json {
        writeln!(out, "Time,Mean SVM (g)")?;
    }
    let mut samples = reader.into_samples();
    let emit = |epoch: acto_lib::metrics::svm::SvmEpoch, out: &mut dyn Write| -> Result<()> {
        if json {
            writeln!(out, "{}", serde_json::to_string(&epoch)?)?;
        } else {
            writeln!(out, "{},{}", time_string(epoch.time, false), epoch.mean_svm)?;
        }
        Ok(())
    };
    for sample in samples.by_ref() {
        if let Some(done) = aggregator.push(&sample) {
            emit(done, &mut out)?;
        }
    }
    if let Some(done) = aggregator.finish() {
        emit(done, &mut out)?;
    }
    out.flush()?;
    report_faults(samples.diagnostics());
    Ok(())
}

fn cmd_wtv(input: &Path, out: Option<&Path>, wall_clock: bool, json: bool) -> Result<()> {
    let (_resolved, reader) = open_reader(input)?;
    let config = WtvConfig {
        alignment: alignment(wall_clock),
        ..Default::default()
    };
    let mut aggregator = WtvAggregator::new(config);

    let mut out = out_writer(out)?;
    if !json {
        writeln!(out, "Time,Wear time (30 mins)")?;
    }
    let mut samples = reader.into_samples();
    let emit = |epoch: acto_lib::metrics::wtv::WtvEpoch, out: &mut dyn Write| -> Result<()> {
        if json {
            writeln!(out, "{}", serde_json::to_string(&epoch)?)?;
        } else {
            writeln!(
                out,
                "{},{}",
                time_string(epoch.time, false),
                u8::from(epoch.worn)
            )?;
        }
        Ok(())
    };
    for sample in samples.by_ref() {
        if let Some(done) = aggregator.push(&sample) {
            emit(done, &mut out)?;
        }
    }
    if let Some(done) = aggregator.finish() {
        emit(done, &mut out)?;
    }
    out.flush()?;
    report_faults(samples.diagnostics());
    Ok(())
}

fn report_faults(diagnostics: &Diagnostics) {
    if diagnostics.any_faults() {
        eprintln!(
            "warning: recovered faults while decoding: {}",
            serde_json::to_string(diagnostics).unwrap_or_default()
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_convert(
    input: &Path,
    executable: Option<PathBuf>,
    interpolate_mode: omconvert::InterpolateMode,
    csv_file: Option<PathBuf>,
    svm_file: Option<PathBuf>,
    svm_epoch: u32,
    svm_filter: bool,
    wtv_file: Option<PathBuf>,
) -> Result<()> {
    let resolved = ResolvedInput::resolve(input, DEFAULT_EXTENSIONS)?;
    let options = omconvert::ConvertOptions {
        executable,
        interpolate_mode,
        csv_file,
        svm_file,
        svm_epoch,
        svm_filter,
        wtv_file,
        ..Default::default()
    };
    let outcome = omconvert::run(resolved.path(), &options)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
