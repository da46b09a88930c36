//! Property tests over randomized synthetic clusters

use devicefile::merge::minimizer::{exact, FilterMinimizer};
use devicefile::prelude::*;
use devicefile::ConsistencyVerifier;
use devicefile::{DeviceMerger, FilterExpr};
use proptest::prelude::*;

const VALUES: [&str; 3] = ["0", "1", "2"];
const FLASH: [&str; 3] = ["32768", "65536", "131072"];

fn schema() -> IdentifierSchema {
    IdentifierSchema::new(
        "d{a}{b}{c}",
        [
            ("a", VALUES.to_vec()),
            ("b", VALUES.to_vec()),
            ("c", VALUES.to_vec()),
        ],
    )
    .unwrap()
}

fn traits_of(index: usize) -> TraitSet {
    TraitSet::new()
        .with("a", VALUES[index / 9])
        .with("b", VALUES[(index / 3) % 3])
        .with("c", VALUES[index % 3])
}

/// Drivers always appear in the same relative order, so any subset is
/// mergeable.
fn device_tree(features: u8, variant: u8) -> Node {
    let mut root = Node::new("device");
    root.add_child("core").set_attribute("name", "cortex-m0");
    root.add_child("memory")
        .set_attribute("name", "flash")
        .set_attribute("size", FLASH[usize::from(variant % 3)]);
    for k in 0..6u8 {
        if features & (1 << k) == 0 {
            continue;
        }
        let driver = root.add_child("driver");
        driver.set_attribute("name", format!("p{}", k));
        let instances = 1 + (variant >> k) % 3;
        for i in 1..=instances {
            driver.add_child("instance").set_attribute("value", i.to_string());
        }
    }
    root
}

fn cluster(devices: &std::collections::BTreeMap<usize, (u8, u8)>) -> Cluster {
    let mut cluster = Cluster::new("synthetic", schema());
    for (&index, &(features, variant)) in devices {
        cluster
            .add_device(traits_of(index), device_tree(features, variant))
            .unwrap();
    }
    cluster
}

proptest! {
    #[test]
    fn prop_extract_reproduces_every_device(
        devices in prop::collection::btree_map(0..27usize, (any::<u8>(), any::<u8>()), 1..12)
    ) {
        let cluster = cluster(&devices);
        let options = MergeOptions { max_filter_traits: 3, ..MergeOptions::default() };
        let merger = DeviceMerger::new(&options);
        let tree = merger.merge(&cluster).unwrap();

        for device in cluster.devices() {
            let view = tree.extract(&device.traits).unwrap();
            prop_assert_eq!(&view, &device.tree);
        }
        prop_assert!(ConsistencyVerifier::verify(tree, &cluster, &merger).is_ok());
    }

    #[test]
    fn prop_minimized_filters_are_exact(roles in prop::collection::vec(0..3u8, 27)) {
        let schema = schema();
        let all: Vec<TraitSet> = (0..27).map(traits_of).collect();
        let group: Vec<&TraitSet> = all.iter().zip(&roles).filter(|(_, r)| **r == 1).map(|(t, _)| t).collect();
        let complement: Vec<&TraitSet> = all.iter().zip(&roles).filter(|(_, r)| **r == 2).map(|(t, _)| t).collect();
        prop_assume!(!group.is_empty());

        let filter = FilterMinimizer::new(&schema, 3).minimize(&group, &complement).unwrap();
        match filter {
            Some(filter) => prop_assert!(exact(&filter, &group, &complement)),
            None => prop_assert!(complement.is_empty()),
        }

        match FilterMinimizer::new(&schema, 2).minimize(&group, &complement) {
            Ok(Some(filter)) => {
                prop_assert!(exact(&filter, &group, &complement));
                prop_assert!(filter.trait_names().len() <= 2);
            }
            Ok(None) => prop_assert!(complement.is_empty()),
            Err(e) => prop_assert_eq!(e.kind(), devicefile::ErrorKind::UnfilterableGroup),
        }
    }

    #[test]
    fn prop_identifier_round_trip(index in 0..81usize) {
        let schema = IdentifierSchema::new(
            "stm32{family}{name}{pin}{size}",
            [
                ("family", vec!["f0", "f1", "f4"]),
                ("name", vec!["03", "05", "1"]),
                ("pin", vec!["c", "r", "rb"]),
                ("size", vec!["8", "b", "e"]),
            ],
        )
        .unwrap();
        let combinations = schema.combinations();
        let valid = ValidDeviceList::from_traits(&schema, &combinations).unwrap();
        let traits = &combinations[index];

        let identifier = schema.compose(traits).unwrap();
        let mut cache = DecompositionCache::new();
        prop_assert_eq!(&cache.decompose(&schema, &identifier, &valid).unwrap(), traits);
    }

    #[test]
    fn prop_filter_text_round_trip(
        roles in prop::collection::vec(0..3u8, 27)
    ) {
        let schema = schema();
        let all: Vec<TraitSet> = (0..27).map(traits_of).collect();
        let group: Vec<&TraitSet> = all.iter().zip(&roles).filter(|(_, r)| **r != 0).map(|(t, _)| t).collect();
        let complement: Vec<&TraitSet> = all.iter().zip(&roles).filter(|(_, r)| **r == 0).map(|(t, _)| t).collect();
        prop_assume!(!group.is_empty() && !complement.is_empty());

        let filter = FilterMinimizer::new(&schema, 3).minimize(&group, &complement).unwrap().unwrap();
        let parsed: FilterExpr = filter.to_string().parse().unwrap();
        prop_assert_eq!(parsed, filter);
    }
}
