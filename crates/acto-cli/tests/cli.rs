use acto_lib::io::cwa::{ContainerWriter, PackingFormat};
use assert_cmd::Command;
use serde_json::Value;
use std::error::Error;
use std::path::PathBuf;

const RATE_CODE_100HZ: u8 = 0x4a;

/// Write a synthetic container with `minutes` of constant gravity.
fn gravity_file(dir: &tempfile::TempDir, minutes: usize) -> PathBuf {
    let mut writer = ContainerWriter::new(1, RATE_CODE_100HZ, PackingFormat::Packed32);
    let blocks = minutes * 60 * 100 / 120;
    for i in 0..blocks {
        let start = 1_600_000_000.0 + (i * 120) as f64 / 100.0;
        writer.push_block(start, &[[0.0, 0.0, 1.0]; 120]);
    }
    let path = dir.path().join("sample.cwa");
    std::fs::write(&path, writer.into_bytes()).expect("write container");
    path
}

#[test]
fn info_reports_header_fields() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = gravity_file(&dir, 1);

    let output = Command::cargo_bin("acto")?
        .args(["info", input.to_str().expect("utf8 path")])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output)?;
    assert_eq!(report["header"]["session_id"], 1);
    assert_eq!(report["sample_rate"], 100.0);
    Ok(())
}

#[test]
fn info_scan_counts_samples() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = gravity_file(&dir, 1);

    let output = Command::cargo_bin("acto")?
        .args(["info", "--scan", input.to_str().expect("utf8 path")])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output)?;
    assert_eq!(report["sample_count"], 6000);
    assert_eq!(report["diagnostics"]["corrupt_blocks"], 0);
    Ok(())
}

#[test]
fn svm_emits_zero_epochs_for_gravity() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = gravity_file(&dir, 3);

    let output = Command::cargo_bin("acto")?
        .args(["svm", input.to_str().expect("utf8 path")])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output)?;
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Time,Mean SVM (g)"));
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert!(row.ends_with(",0"), "expected zero SVM row, got {}", row);
    }
    Ok(())
}

#[test]
fn svm_json_rows_carry_counts() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = gravity_file(&dir, 2);

    let output = Command::cargo_bin("acto")?
        .args(["svm", "--json", input.to_str().expect("utf8 path")])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output)?;
    let rows: Vec<Value> = text
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["sample_count"], 6000);
    assert_eq!(rows[0]["partial"], false);
    Ok(())
}

#[test]
fn wtv_classifies_resting_container_as_non_wear() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = gravity_file(&dir, 30);

    let output = Command::cargo_bin("acto")?
        .args(["wtv", input.to_str().expect("utf8 path")])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output)?;
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Time,Wear time (30 mins)"));
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].ends_with(",0"), "resting device should be non-wear");
    Ok(())
}

#[test]
fn export_limits_rows() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = gravity_file(&dir, 1);

    let output = Command::cargo_bin("acto")?
        .args([
            "export",
            "--limit",
            "5",
            input.to_str().expect("utf8 path"),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6); // header + 5 rows
    assert!(lines[0].starts_with("Time,Accel-X"));
    assert!(lines[1].contains(",0,0,1"));
    Ok(())
}

#[test]
fn missing_input_fails_cleanly() -> Result<(), Box<dyn Error>> {
    Command::cargo_bin("acto")?
        .args(["info", "/nonexistent/recording.cwa"])
        .assert()
        .failure();
    Ok(())
}
