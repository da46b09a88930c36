//! Example: merge the fixture family, persist it and extract one device.
//! Run with: cargo run --example merge_family [fixture dir] [identifier]

use devicefile::prelude::*;
use devicefile::{store, JsonDeviceSource};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let fixtures = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"));
    let identifier = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "stm32f103rb".to_string());

    let definition = ClusterDefinition::from_file(&fixtures.join("clusters/stm32f1-03.json"))?;
    let valid: ValidDeviceList =
        serde_json::from_str(&std::fs::read_to_string(fixtures.join("valid_devices.json"))?)?;
    let source = JsonDeviceSource::new(fixtures.join("devices"));

    let options = MergeOptions {
        sort_keys: SortKeys::new().by_attribute("driver", "name"),
        ..MergeOptions::default()
    };
    let tree = DeviceFileCore::merge_definition(&definition, &valid, &source, &options)?;

    println!(
        "Merged {}: {} devices, {} nodes, {} filtered",
        tree.cluster(),
        tree.devices().len(),
        tree.root().count(),
        tree.root().count_filtered()
    );
    println!("{}", store::to_json(&tree, true)?);

    let mut cache = DecompositionCache::new();
    let device = devicefile::extract_identifier(&tree, &identifier, &mut cache)?;
    println!();
    println!("{}:", identifier);
    print_node(&device, 1);
    Ok(())
}

fn print_node(node: &Node, depth: usize) {
    for child in node.children() {
        println!("{}{}", "  ".repeat(depth), child.label());
        print_node(child, depth + 1);
    }
}
