//! Wrapper around the external `omconvert` analysis executable.
//!
//! The core decoder never depends on this tool; it is a collaborator with a
//! documented CLI contract: `omconvert <source> -key value ... -info <file>`,
//! exit status zero on success, and a key/value report written to the info
//! file. This module locates the binary, builds the argument list from a
//! validated option set, and parses the report into a structured outcome.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Resampling interpolation used by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolateMode {
    Nearest,
    Linear,
    Cubic,
}

impl InterpolateMode {
    fn code(&self) -> u8 {
        match self {
            InterpolateMode::Nearest => 1,
            InterpolateMode::Linear => 2,
            InterpolateMode::Cubic => 3,
        }
    }
}

/// Recognized converter options with documented defaults. Validated once at
/// entry rather than looked up ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Explicit path to the executable; otherwise it is searched for.
    pub executable: Option<PathBuf>,
    pub interpolate_mode: InterpolateMode,
    /// Auto-calibration in the converter.
    pub calibrate: bool,
    /// Resample frequency in Hz; `None` keeps the configured rate.
    pub resample: Option<f64>,
    /// Resampled CSV export path.
    pub csv_file: Option<PathBuf>,
    /// SVM analysis output path.
    pub svm_file: Option<PathBuf>,
    /// SVM epoch period in seconds.
    pub svm_epoch: u32,
    /// Band-pass filter the signal before SVM (0.5-20 Hz).
    pub svm_filter: bool,
    /// SVM mode: 0 = abs(svm-1), 1 = max(svm-1, 0), 2 = svm-1.
    pub svm_mode: u8,
    /// Wear-time validation output path.
    pub wtv_file: Option<PathBuf>,
    /// WTV epoch as a count of 30-minute windows.
    pub wtv_epoch: u32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            executable: None,
            interpolate_mode: InterpolateMode::Linear,
            calibrate: true,
            resample: None,
            csv_file: None,
            svm_file: None,
            svm_epoch: 60,
            svm_filter: true,
            svm_mode: 0,
            wtv_file: None,
            wtv_epoch: 1,
        }
    }
}

impl ConvertOptions {
    fn validate(&self) -> Result<()> {
        if self.csv_file.is_none() && self.svm_file.is_none() && self.wtv_file.is_none() {
            bail!("no output requested: set at least one of csv_file, svm_file, wtv_file");
        }
        if self.svm_mode > 2 {
            bail!("svm_mode must be 0, 1 or 2 (got {})", self.svm_mode);
        }
        if let Some(rate) = self.resample {
            if rate <= 0.0 {
                bail!("resample rate must be positive (got {})", rate);
            }
        }
        Ok(())
    }

    fn to_args(&self, source: &Path, info_file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![source.into()];
        let mut push_kv = |key: &str, value: OsString| {
            args.push(format!("-{}", key).into());
            args.push(value);
        };
        push_kv(
            "interpolate-mode",
            self.interpolate_mode.code().to_string().into(),
        );
        push_kv("calibrate", u8::from(self.calibrate).to_string().into());
        if let Some(rate) = self.resample {
            push_kv("resample", rate.to_string().into());
        }
        if let Some(path) = &self.csv_file {
            push_kv("csv-file", path.into());
        }
        if let Some(path) = &self.svm_file {
            push_kv("svm-file", path.into());
            push_kv("svm-epoch", self.svm_epoch.to_string().into());
            push_kv("svm-filter", u8::from(self.svm_filter).to_string().into());
            push_kv("svm-mode", self.svm_mode.to_string().into());
        }
        if let Some(path) = &self.wtv_file {
            push_kv("wtv-file", path.into());
            push_kv("wtv-epoch", self.wtv_epoch.to_string().into());
        }
        push_kv("info", info_file.into());
        args
    }
}

/// Structured result of one converter run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Key/value pairs from the converter's info report.
    pub info: BTreeMap<String, String>,
    /// Requested output files that exist after the run.
    pub generated: Vec<PathBuf>,
    /// Captured diagnostic text (stderr).
    pub diagnostics: String,
}

/// Search for the converter binary: explicit path, the working directory,
/// alongside the current executable, then `PATH`.
pub fn locate_executable(explicit: Option<&Path>) -> Option<PathBuf> {
    let name = format!("omconvert{}", std::env::consts::EXE_SUFFIX);
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(&name));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(&name));
        }
    }
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            candidates.push(dir.join(&name));
        }
    }
    candidates.into_iter().find(|path| path.is_file())
}

/// Run the converter over `source`. Fails when the binary cannot be found,
/// exits non-zero, or produces no info report.
pub fn run(source: &Path, options: &ConvertOptions) -> Result<ConvertOutcome> {
    options.validate()?;
    let executable = locate_executable(options.executable.as_deref())
        .context("omconvert executable not found: pass an explicit path or install it on PATH")?;

    let info_file = tempfile::Builder::new()
        .prefix("acto-convert-")
        .suffix(".yml")
        .tempfile()
        .context("creating info scratch file")?;

    let args = options.to_args(source, info_file.path());
    debug!("running {} {:?}", executable.display(), args);
    let output = Command::new(&executable)
        .args(&args)
        .output()
        .with_context(|| format!("spawning {}", executable.display()))?;

    let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        bail!(
            "conversion failed with status {:?}: {}",
            output.status.code(),
            diagnostics.trim()
        );
    }

    let report = std::fs::read_to_string(info_file.path())
        .context("conversion reported success but wrote no info report")?;
    let info = parse_info(&report);

    let generated = [&options.csv_file, &options.svm_file, &options.wtv_file]
        .into_iter()
        .flatten()
        .filter(|path| path.is_file())
        .cloned()
        .collect();

    Ok(ConvertOutcome {
        success: true,
        exit_code: output.status.code(),
        info,
        generated,
        diagnostics,
    })
}

/// Parse the info report: `Key: value` lines, blank lines and `#` comments
/// ignored, keys that vary per run dropped.
fn parse_info(text: &str) -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        if key.is_empty() || key == "Processed" || key == "Results-output" {
            continue;
        }
        let value = parts.next().unwrap_or("").trim();
        info.insert(key.to_string(), value.to_string());
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_need_an_output() {
        assert!(ConvertOptions::default().validate().is_err());
        let options = ConvertOptions {
            svm_file: Some("out.csvm.csv".into()),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn args_cover_requested_analyses() {
        let options = ConvertOptions {
            interpolate_mode: InterpolateMode::Nearest,
            svm_file: Some("out.csvm.csv".into()),
            svm_filter: false,
            wtv_file: Some("out.cwtv.csv".into()),
            ..Default::default()
        };
        let args = options.to_args(Path::new("in.cwa"), Path::new("info.yml"));
        let flat: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(flat[0], "in.cwa");
        let find = |key: &str| {
            flat.iter()
                .position(|a| a == key)
                .map(|i| flat[i + 1].clone())
        };
        assert_eq!(find("-interpolate-mode").as_deref(), Some("1"));
        assert_eq!(find("-svm-file").as_deref(), Some("out.csvm.csv"));
        assert_eq!(find("-svm-filter").as_deref(), Some("0"));
        assert_eq!(find("-svm-epoch").as_deref(), Some("60"));
        assert_eq!(find("-wtv-file").as_deref(), Some("out.cwtv.csv"));
        assert_eq!(find("-info").as_deref(), Some("info.yml"));
        assert_eq!(find("-csv-file"), None);
    }

    #[test]
    fn info_report_parses_key_values() {
        let report = "\
# comment line
Devices: 1

Start: 2021-04-01 12:00:00.000
Samples: 1234567
Processed: 2021-04-02 09:00:00.000
";
        let info = parse_info(report);
        assert_eq!(info.get("Devices").map(String::as_str), Some("1"));
        assert_eq!(info.get("Samples").map(String::as_str), Some("1234567"));
        assert_eq!(
            info.get("Start").map(String::as_str),
            Some("2021-04-01 12:00:00.000")
        );
        assert!(!info.contains_key("Processed"));
    }

    #[test]
    fn missing_executable_is_reported() {
        let missing = Path::new("/nonexistent/omconvert-binary");
        assert!(locate_executable(Some(missing)).is_none());
    }
}
