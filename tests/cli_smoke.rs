//! End-to-end CLI smoke test: index a small workspace, then search it.
//! Mirrors the pack's own stdio smoke test (subprocess + line-delimited
//! JSON) but drives the `index`/`search`/`status` subcommands instead of
//! an MCP server loop.

use std::process::Command;

fn run(bin: &str, args: &[&str]) -> serde_json::Value {
    let output = Command::new(bin).args(args).output().expect("spawn codeidx");
    assert!(
        output.status.success(),
        "codeidx {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn index_then_search_finds_the_indexed_function() {
    let bin = env!("CARGO_BIN_EXE_codeidx");
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("lib.rs"),
        "fn calculate_total(items: &[i32]) -> i32 {\n    items.iter().sum()\n}\n",
    )
    .unwrap();

    let status = run(bin, &["index", dir.path().to_str().unwrap()]);
    assert_eq!(status.get("total_files").and_then(|v| v.as_u64()), Some(1));
    assert!(status.get("total_chunks").and_then(|v| v.as_u64()).unwrap_or(0) > 0);

    let results = run(bin, &["search", dir.path().to_str().unwrap(), "calculate_total"]);
    let rendered = results.as_array().expect("search results array");
    assert!(!rendered.is_empty(), "expected at least one hit for calculate_total");
    assert!(rendered[0]["content"].as_str().unwrap_or("").contains("calculate_total"));

    let status_report = run(bin, &["status", dir.path().to_str().unwrap()]);
    assert_eq!(status_report["status"]["total_files"].as_u64(), Some(1));
}
