//! Exit code integration tests
//!
//! | Exit Code | Meaning |
//! |-----------|---------|
//! | 0 | Solved / valid |
//! | 1 | Unsolvable |
//! | 2 | Timeout |
//! | 3 | Invalid input |

use std::io::Write;
use std::process::Command;

fn stas_binary() -> &'static str {
    env!("CARGO_BIN_EXE_stas")
}

fn write_problem(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write problem");
    file
}

const SOLVABLE: &str = r#"{
    "species": [
        {"name": "rover", "traits": [1.0], "bounding_radius": 0.5, "speed": 1.0}
    ],
    "robots": [
        {"name": "r0", "species": "rover",
         "initial_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0}}
    ],
    "tasks": [
        {"name": "survey", "duration": 1.0, "desired_traits": [1.0],
         "initial_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0},
         "terminal_configuration": {"configuration_type": "ompl", "state_space_type": "se2", "x": 0.0, "y": 0.0}}
    ],
    "alpha": 1.0,
    "best_makespan": 1.0,
    "worst_makespan": 1.0
}"#;

#[test]
fn solve_exits_zero_on_success() {
    let file = write_problem(SOLVABLE);
    let output = Command::new(stas_binary())
        .arg("solve")
        .arg(file.path())
        .output()
        .expect("run stas");
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    // The emitted document carries the allocation and makespan.
    let text = String::from_utf8_lossy(&output.stdout);
    let doc: serde_json::Value = serde_json::from_str(&text).expect("valid solution JSON");
    assert_eq!(doc["allocation"][0][0], 1);
    assert!((doc["makespan"].as_f64().unwrap() - 1.0).abs() < 1e-3);
}

#[test]
fn solve_writes_output_file() {
    let file = write_problem(SOLVABLE);
    let out = tempfile::NamedTempFile::new().expect("temp out");
    let status = Command::new(stas_binary())
        .arg("solve")
        .arg(file.path())
        .arg("--output")
        .arg(out.path())
        .status()
        .expect("run stas");
    assert_eq!(status.code(), Some(0));

    let text = std::fs::read_to_string(out.path()).expect("read solution");
    let doc: serde_json::Value = serde_json::from_str(&text).expect("valid solution JSON");
    assert_eq!(doc["tasks"][0]["name"], "survey");
}

// Coverage-wise feasible (the walker carries the trait both tasks want,
// so validation passes), but the second task sits on a roadmap vertex no
// edge reaches: every covering allocation fails scheduling, the search
// exhausts its frontier, and the run is unsolvable rather than invalid.
const UNSOLVABLE: &str = r#"{
    "motion_planners": [
        {"mp_type": "graph",
         "environment_parameters": {
            "vertices": [{"id": 0, "x": 0.0, "y": 0.0}, {"id": 1, "x": 5.0, "y": 0.0}],
            "edges": []
         }}
    ],
    "species": [
        {"name": "walker", "traits": [1.0], "bounding_radius": 0.4, "speed": 1.0, "mp_index": 0}
    ],
    "robots": [
        {"name": "w0", "species": "walker",
         "initial_configuration": {"configuration_type": "graph", "vertex": 0}}
    ],
    "tasks": [
        {"name": "here", "duration": 1.0, "desired_traits": [1.0],
         "initial_configuration": {"configuration_type": "graph", "vertex": 0},
         "terminal_configuration": {"configuration_type": "graph", "vertex": 0}},
        {"name": "stranded", "duration": 1.0, "desired_traits": [1.0],
         "initial_configuration": {"configuration_type": "graph", "vertex": 1, "x": 5.0},
         "terminal_configuration": {"configuration_type": "graph", "vertex": 1, "x": 5.0}}
    ],
    "alpha": 1.0,
    "best_makespan": 2.0,
    "worst_makespan": 10.0
}"#;

#[test]
fn unreachable_task_exits_one() {
    let file = write_problem(UNSOLVABLE);
    let output = Command::new(stas_binary())
        .arg("solve")
        .arg(file.path())
        .output()
        .expect("run stas");
    assert_eq!(
        output.status.code(),
        Some(1),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    // Exhaustion, not timeout or rejection.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsolvable"), "stderr: {stderr}");
}

#[test]
fn invalid_json_exits_three() {
    let file = write_problem("{ not json ");
    let status = Command::new(stas_binary())
        .arg("solve")
        .arg(file.path())
        .status()
        .expect("run stas");
    assert_eq!(status.code(), Some(3));
}

#[test]
fn infeasible_team_exits_three() {
    // The one robot can never muster trait level 2: rejected eagerly.
    let text = SOLVABLE.replace("\"desired_traits\": [1.0]", "\"desired_traits\": [2.0]");
    let file = write_problem(&text);
    let status = Command::new(stas_binary())
        .arg("solve")
        .arg(file.path())
        .status()
        .expect("run stas");
    assert_eq!(status.code(), Some(3));
}

#[test]
fn zero_budget_exits_two() {
    let text = SOLVABLE.replace(
        "\"alpha\": 1.0",
        "\"itags_parameters\": {\"timeout\": 0.0, \"save_closed_nodes\": true, \"save_pruned_nodes\": true}, \"alpha\": 1.0",
    );
    let file = write_problem(&text);
    let status = Command::new(stas_binary())
        .arg("solve")
        .arg(file.path())
        .status()
        .expect("run stas");
    assert_eq!(status.code(), Some(2));
}

#[test]
fn check_exits_zero_on_valid_document() {
    let file = write_problem(SOLVABLE);
    let status = Command::new(stas_binary())
        .arg("check")
        .arg(file.path())
        .status()
        .expect("run stas");
    assert_eq!(status.code(), Some(0));
}

#[test]
fn check_exits_three_on_bad_alpha() {
    let text = SOLVABLE.replace("\"alpha\": 1.0", "\"alpha\": 7.0");
    let file = write_problem(&text);
    let status = Command::new(stas_binary())
        .arg("check")
        .arg(file.path())
        .status()
        .expect("run stas");
    assert_eq!(status.code(), Some(3));
}
