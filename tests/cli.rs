use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

fn write_csv(path: &Path, rows: &[Vec<f64>]) {
    let mut text = String::new();
    for row in rows {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.18e}")).collect();
        writeln!(text, "{}", cells.join(",")).expect("format row");
    }
    fs::write(path, text).expect("write csv");
}

fn write_linear_dataset(dir: &Path, units: usize) {
    let g: Vec<f64> = (0..units)
        .map(|i| (i as f64 * 0.7).sin() * 3.0 + i as f64 * 0.5 - 3.0)
        .collect();
    let distance: Vec<Vec<f64>> = (0..units)
        .map(|i| (0..units).map(|j| i.abs_diff(j) as f64 * 0.5 + 1.0).collect())
        .collect();
    let flow: Vec<Vec<f64>> = (0..units)
        .map(|i| {
            (0..units)
                .map(|j| g[i] - g[j] + 0.5 * distance[i][j])
                .collect()
        })
        .collect();

    write_csv(&dir.join("X.csv"), &g.iter().map(|v| vec![1.0, *v]).collect::<Vec<_>>());
    write_csv(
        &dir.join("Y.csv"),
        &g.iter().map(|v| vec![1.0 + 1.5 * v]).collect::<Vec<_>>(),
    );
    write_csv(&dir.join("F_dist.csv"), &distance);
    write_csv(&dir.join("F_flow.csv"), &flow);
}

fn crimecrf(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_crimecrf"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run crimecrf cli")
}

#[test]
fn fit_writes_a_model_artifact() {
    let tmp = tempdir().expect("temporary directory");
    write_linear_dataset(tmp.path(), 12);

    let output = crimecrf(tmp.path(), &["fit", "."]);
    assert!(output.status.success(), "fit failed: {output:?}");

    let model = fs::read_to_string(tmp.path().join("crf_model.toml")).expect("model file");
    assert!(model.contains("alpha"));
    assert!(model.contains("[admm]"));
}

#[test]
fn evaluate_prints_both_summaries_and_saves_report() {
    let tmp = tempdir().expect("temporary directory");
    write_linear_dataset(tmp.path(), 12);

    let output = crimecrf(
        tmp.path(),
        &["evaluate", ".", "--sequential", "--max-iterations", "5000", "--report", "loo.toml"],
    );
    assert!(output.status.success(), "evaluate failed: {output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Use 1-norm (median) inference mae"), "{stdout}");
    assert!(stdout.contains("Use 2-norm (mean) inference mae"), "{stdout}");
    assert!(tmp.path().join("loo.toml").exists());
}

#[test]
fn export_writes_pairwise_matrices() {
    let tmp = tempdir().expect("temporary directory");
    write_linear_dataset(tmp.path(), 5);

    let output = crimecrf(tmp.path(), &["export", ".", "--output-dir", "out", "--joint"]);
    assert!(output.status.success(), "export failed: {output:?}");

    let features = fs::read_to_string(tmp.path().join("out/F.csv")).expect("F.csv");
    let target = fs::read_to_string(tmp.path().join("out/Yp.csv")).expect("Yp.csv");
    let joint = fs::read_to_string(tmp.path().join("out/F_joint.csv")).expect("F_joint.csv");
    assert_eq!(features.lines().count(), 20);
    assert_eq!(target.lines().count(), 20);
    assert!(joint.lines().all(|line| line.split(',').count() == 5));
}

#[test]
fn missing_data_directory_is_an_error() {
    let tmp = tempdir().expect("temporary directory");
    let output = crimecrf(tmp.path(), &["evaluate", "does-not-exist"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}
