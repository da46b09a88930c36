//! Example: batch run with a custom failure policy.
//! Run with: cargo run --example assertion_policy [fixture dir]

use devicefile::{
    load_definitions_from_directory, AssertionHandlers, Behavior, DeviceFileCore, ErrorKind,
    JsonDeviceSource, Matcher, MergeOptions, ValidDeviceList,
};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let fixtures = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"));

    let (definitions, errors) = load_definitions_from_directory(&fixtures.join("clusters"));
    for error in &errors {
        eprintln!("skipped: {}", error);
    }
    let valid: ValidDeviceList =
        serde_json::from_str(&std::fs::read_to_string(fixtures.join("valid_devices.json"))?)?;
    let source = JsonDeviceSource::new(fixtures.join("devices"));

    // Missing device data is expected while a family is being curated;
    // anything the merger or verifier rejects must stop the run.
    let mut handlers = AssertionHandlers::strict();
    handlers
        .on(
            "missing-devices",
            Matcher::module("cluster").failing_with(ErrorKind::UnknownDevice),
            Behavior::Ignore,
        )
        .on("strict-merge", Matcher::module("merge"), Behavior::Fail)
        .on("strict-verify", Matcher::module("verify"), Behavior::Fail);

    let report = DeviceFileCore::process_batch(
        &definitions,
        &valid,
        &source,
        &MergeOptions::default(),
        &handlers,
    )?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
