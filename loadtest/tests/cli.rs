use std::process::{Command, Output};

const LOADTEST_EXE: &str = env!("CARGO_BIN_EXE_loadtest");

fn loadtest(args: &[&str]) -> Output {
    Command::new(LOADTEST_EXE)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run loadtest")
}

fn stdout_lines(output: &Output) -> Vec<String> {
    assert!(
        output.status.success(),
        "Process exited with non-zero status: {:?}\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone())
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn prints_seeded_filters() {
    let args = [
        "filter",
        "--shape-size",
        "10",
        "--total-size",
        "100",
        "--seed",
        "7",
        "--count",
        "5",
    ];
    let first = stdout_lines(&loadtest(&args));
    let second = stdout_lines(&loadtest(&args));

    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
    for line in &first {
        assert!(line.starts_with("id>='00000000-0000-0000-0000-000000000"));
        assert!(line.contains("' and id<='"));
    }
}

#[test]
fn prints_aligned_exclusive_filters() {
    let output = loadtest(&[
        "filter",
        "--shape-size",
        "100",
        "--total-size",
        "10",
        "--aligned",
        "--exclusive",
        "--count",
        "20",
    ]);

    for line in stdout_lines(&output) {
        // aligned shapes of 100 rows start at a multiple of 100
        assert!(line.starts_with("id>='00000000-0000-0000-0000-0000000"));
        assert!(line[..line.find("' and").unwrap()].ends_with("00"));
        assert!(line.contains("' and id<'"));
    }
}

#[test]
fn rejects_oversized_shapes() {
    let output = loadtest(&["filter", "--shape-size", "11", "--total-size", "10"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("shape size 11 exceeds total size 10"));
}

#[test]
fn prints_identifiers() {
    let lines = stdout_lines(&loadtest(&["ids", "--count", "3", "--start", "99"]));
    assert_eq!(
        lines,
        [
            "00000000-0000-0000-0000-000000000099",
            "00000000-0000-0000-0000-000000000100",
            "00000000-0000-0000-0000-000000000101",
        ]
    );
}

#[test]
fn run_requires_workloads() {
    let output = loadtest(&["run"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no workloads configured"));
}
