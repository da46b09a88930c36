//! Smallest filters that pick one group of devices out of a cluster.
//!
//! The search prefers, in this order:
//!
//! 1. fewer distinct trait names,
//! 2. a single conjunction over a disjunction,
//! 3. trait names further left in the identifier schema.
//!
//! Candidate trait subsets are tried by size, and within one size in
//! lexicographic order of schema position. Traits that take the same value
//! on every device in question can never separate anything and are skipped.

use std::collections::{BTreeSet, HashSet};

use crate::core::DeviceFileError;
use crate::identifier::{IdentifierSchema, TraitSet};
use crate::tree::{Conjunction, FilterExpr};

pub struct FilterMinimizer<'a> {
    schema: &'a IdentifierSchema,
    max_traits: usize,
}

impl<'a> FilterMinimizer<'a> {
    pub fn new(schema: &'a IdentifierSchema, max_traits: usize) -> Self {
        Self { schema, max_traits }
    }

    /// Compute a filter matching every trait set in `group` and none in
    /// `complement`. Returns `None` when `complement` is empty, i.e. the
    /// node applies to every device in scope.
    pub fn minimize(
        &self,
        group: &[&TraitSet],
        complement: &[&TraitSet],
    ) -> Result<Option<FilterExpr>, DeviceFileError> {
        if complement.is_empty() {
            return Ok(None);
        }
        if group.is_empty() {
            return Err(self.unfilterable(group, complement));
        }

        let candidates = self.informative_traits(group, complement);
        let limit = self.max_traits.min(candidates.len());

        for size in 1..=limit {
            let mut first_separable: Option<Vec<&str>> = None;
            for subset in combinations(candidates.len(), size) {
                let names: Vec<&str> = subset.iter().map(|&i| candidates[i]).collect();
                if let Some(conjunction) = box_filter(&names, group, complement) {
                    return Ok(Some(FilterExpr::single(conjunction)));
                }
                if first_separable.is_none() && separable(&names, group, complement) {
                    first_separable = Some(names);
                }
            }
            if let Some(names) = first_separable {
                let filter = FilterExpr::any_of(cover(&names, group, complement))?;
                if exact(&filter, group, complement) {
                    return Ok(Some(filter));
                }
            }
        }

        Err(self.unfilterable(group, complement))
    }

    /// Schema traits, in schema order, that take more than one value over
    /// `group` and `complement` together.
    fn informative_traits(&self, group: &[&TraitSet], complement: &[&TraitSet]) -> Vec<&'a str> {
        self.schema
            .trait_names()
            .filter(|name| {
                let values: HashSet<Option<&str>> = group
                    .iter()
                    .chain(complement.iter())
                    .map(|t| t.get(name))
                    .collect();
                values.len() > 1
            })
            .collect()
    }

    fn unfilterable(&self, group: &[&TraitSet], complement: &[&TraitSet]) -> DeviceFileError {
        DeviceFileError::UnfilterableGroup {
            path: String::new(),
            group: group.iter().map(|t| self.spell(t)).collect(),
            complement: complement.iter().map(|t| self.spell(t)).collect(),
        }
    }

    fn spell(&self, traits: &TraitSet) -> String {
        self.schema
            .compose(traits)
            .unwrap_or_else(|_| traits.to_string())
    }
}

/// Does `filter` select exactly `group`?
pub fn exact(filter: &FilterExpr, group: &[&TraitSet], complement: &[&TraitSet]) -> bool {
    group.iter().all(|t| filter.matches(t)) && !complement.iter().any(|t| filter.matches(t))
}

fn project<'t>(traits: &'t TraitSet, names: &[&str]) -> Vec<&'t str> {
    names.iter().map(|n| traits.get(n).unwrap_or_default()).collect()
}

/// Constrain each trait to the values the group uses; succeed if that
/// already keeps the complement out.
fn box_filter(names: &[&str], group: &[&TraitSet], complement: &[&TraitSet]) -> Option<Conjunction> {
    let mut conjunction = Conjunction::new();
    for name in names {
        conjunction.constrain(*name, group.iter().filter_map(|t| t.get(name)));
    }
    if complement.iter().any(|t| conjunction.matches(t)) {
        None
    } else {
        Some(conjunction)
    }
}

/// No group member and complement member agree on all of `names`.
fn separable(names: &[&str], group: &[&TraitSet], complement: &[&TraitSet]) -> bool {
    let outside: HashSet<Vec<&str>> = complement.iter().map(|t| project(t, names)).collect();
    group.iter().all(|t| !outside.contains(&project(t, names)))
}

/// Cover the group with boxes, none of which contains a complement point.
///
/// Points are visited in sorted order. Each uncovered point seeds a box
/// that grows one value at a time (traits in schema order, values sorted)
/// as long as it stays clear of the complement. Constraints that turn out
/// to be unnecessary are dropped again, rightmost trait first.
fn cover(names: &[&str], group: &[&TraitSet], complement: &[&TraitSet]) -> Vec<Conjunction> {
    let points: BTreeSet<Vec<&str>> = group.iter().map(|t| project(t, names)).collect();
    let outside: Vec<Vec<&str>> = complement.iter().map(|t| project(t, names)).collect();
    let values: Vec<BTreeSet<&str>> = (0..names.len())
        .map(|i| points.iter().map(|p| p[i]).collect())
        .collect();

    let mut covered: HashSet<Vec<&str>> = HashSet::new();
    let mut conjunctions = Vec::new();
    for seed in &points {
        if covered.contains(seed) {
            continue;
        }
        let mut bounds: Vec<Option<BTreeSet<&str>>> =
            seed.iter().map(|v| Some(BTreeSet::from([*v]))).collect();

        for i in 0..names.len() {
            for value in &values[i] {
                let Some(current) = bounds[i].as_ref() else {
                    continue;
                };
                if current.contains(value) {
                    continue;
                }
                let mut widened = current.clone();
                widened.insert(*value);
                let previous = bounds[i].replace(widened);
                if !clear(&bounds, &outside) {
                    bounds[i] = previous;
                }
            }
        }

        for i in (0..names.len()).rev() {
            let previous = bounds[i].take();
            if !clear(&bounds, &outside) {
                bounds[i] = previous;
            }
        }

        for point in &points {
            if inside(&bounds, point) {
                covered.insert(point.clone());
            }
        }

        let mut conjunction = Conjunction::new();
        for (name, allowed) in names.iter().zip(&bounds) {
            if let Some(allowed) = allowed {
                conjunction.constrain(*name, allowed.iter().copied());
            }
        }
        conjunctions.push(conjunction);
    }
    conjunctions
}

/// Is `point` within `bounds`? `None` bounds accept any value.
fn inside<'v>(bounds: &[Option<BTreeSet<&'v str>>], point: &[&'v str]) -> bool {
    bounds
        .iter()
        .zip(point)
        .all(|(allowed, v)| allowed.as_ref().map_or(true, |a| a.contains(v)))
}

fn clear<'v>(bounds: &[Option<BTreeSet<&'v str>>], outside: &[Vec<&'v str>]) -> bool {
    !outside.iter().any(|point| inside(bounds, point))
}

/// All `k`-element subsets of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        let mut i = k;
        while i > 0 && current[i - 1] == n - k + i - 1 {
            i -= 1;
        }
        if i == 0 {
            return out;
        }
        current[i - 1] += 1;
        for j in i..k {
            current[j] = current[j - 1] + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> IdentifierSchema {
        IdentifierSchema::new(
            "{family}{name}{pin}{size}",
            [
                ("family", vec!["f1", "f4"]),
                ("name", vec!["03", "05"]),
                ("pin", vec!["c", "r", "v"]),
                ("size", vec!["8", "b", "c"]),
            ],
        )
        .unwrap()
    }

    fn dev(family: &str, name: &str, pin: &str, size: &str) -> TraitSet {
        TraitSet::new()
            .with("family", family)
            .with("name", name)
            .with("pin", pin)
            .with("size", size)
    }

    #[test]
    fn test_combinations() {
        assert_eq!(
            combinations(4, 2),
            vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]
        );
        assert_eq!(combinations(3, 3), vec![vec![0, 1, 2]]);
        assert!(combinations(2, 3).is_empty());
    }

    #[test]
    fn test_empty_complement_is_universal() {
        let schema = schema();
        let a = dev("f1", "03", "c", "8");
        let m = FilterMinimizer::new(&schema, 2);
        assert_eq!(m.minimize(&[&a], &[]).unwrap(), None);
    }

    #[test]
    fn test_single_trait() {
        let schema = schema();
        let a = dev("f1", "03", "c", "8");
        let b = dev("f1", "03", "c", "b");
        let m = FilterMinimizer::new(&schema, 2);
        let filter = m.minimize(&[&a], &[&b]).unwrap().unwrap();
        assert_eq!(filter.to_string(), "size=8");
    }

    #[test]
    fn test_tie_break_prefers_leftmost_trait() {
        // both name and pin separate the groups on their own
        let schema = schema();
        let a = dev("f1", "03", "c", "8");
        let b = dev("f1", "05", "r", "8");
        let m = FilterMinimizer::new(&schema, 2);
        assert_eq!(m.minimize(&[&a], &[&b]).unwrap().unwrap().to_string(), "name=03");
        assert_eq!(m.minimize(&[&b], &[&a]).unwrap().unwrap().to_string(), "name=05");
    }

    #[test]
    fn test_constant_traits_are_skipped() {
        let schema = schema();
        let group = [dev("f1", "03", "c", "8"), dev("f1", "03", "r", "8")];
        let complement = [dev("f1", "03", "v", "8")];
        let g: Vec<&TraitSet> = group.iter().collect();
        let c: Vec<&TraitSet> = complement.iter().collect();
        let filter = FilterMinimizer::new(&schema, 1).minimize(&g, &c).unwrap().unwrap();
        assert_eq!(filter.to_string(), "pin=c,r");
    }

    #[test]
    fn test_pair_conjunction() {
        let schema = schema();
        let group = [dev("f1", "03", "r", "b")];
        let complement = [dev("f1", "03", "c", "b"), dev("f1", "03", "r", "8")];
        let g: Vec<&TraitSet> = group.iter().collect();
        let c: Vec<&TraitSet> = complement.iter().collect();
        let filter = FilterMinimizer::new(&schema, 2).minimize(&g, &c).unwrap().unwrap();
        assert_eq!(filter.to_string(), "pin=r & size=b");
        assert!(exact(&filter, &g, &c));
    }

    #[test]
    fn test_disjunction_when_no_box_fits() {
        // group is the diagonal {(c,8), (r,b)}; the off-diagonal is excluded
        let schema = schema();
        let group = [dev("f1", "03", "c", "8"), dev("f1", "03", "r", "b")];
        let complement = [dev("f1", "03", "c", "b"), dev("f1", "03", "r", "8")];
        let g: Vec<&TraitSet> = group.iter().collect();
        let c: Vec<&TraitSet> = complement.iter().collect();
        let filter = FilterMinimizer::new(&schema, 2).minimize(&g, &c).unwrap().unwrap();
        assert_eq!(filter.conjunctions().len(), 2);
        assert_eq!(filter.to_string(), "pin=c & size=8 | pin=r & size=b");
        assert!(exact(&filter, &g, &c));
    }

    #[test]
    fn test_disjunction_merges_points_into_boxes() {
        let schema = schema();
        let group = [
            dev("f1", "03", "c", "8"),
            dev("f1", "03", "c", "b"),
            dev("f1", "03", "r", "c"),
        ];
        let complement = [dev("f1", "03", "c", "c"), dev("f1", "03", "r", "8")];
        let g: Vec<&TraitSet> = group.iter().collect();
        let c: Vec<&TraitSet> = complement.iter().collect();
        let filter = FilterMinimizer::new(&schema, 2).minimize(&g, &c).unwrap().unwrap();
        assert!(exact(&filter, &g, &c));
        assert_eq!(filter.trait_names().len(), 2);
        assert!(filter.conjunctions().len() <= 3);
    }

    #[test]
    fn test_unfilterable_beyond_limit() {
        // even parity of three binary traits: no pair of traits separates it
        let schema = IdentifierSchema::new(
            "{x}{y}{z}",
            [("x", vec!["0", "1"]), ("y", vec!["0", "1"]), ("z", vec!["0", "1"])],
        )
        .unwrap();
        let all: Vec<TraitSet> = schema.combinations();
        let parity = |t: &TraitSet| {
            ["x", "y", "z"]
                .iter()
                .filter(|n| t.get(n) == Some("1"))
                .count()
                % 2
        };
        let g: Vec<&TraitSet> = all.iter().filter(|t| parity(t) == 0).collect();
        let c: Vec<&TraitSet> = all.iter().filter(|t| parity(t) == 1).collect();

        let err = FilterMinimizer::new(&schema, 2).minimize(&g, &c).unwrap_err();
        match err {
            DeviceFileError::UnfilterableGroup { group, complement, .. } => {
                assert_eq!(group.len(), 4);
                assert_eq!(complement.len(), 4);
            }
            other => panic!("unexpected error {:?}", other),
        }

        let filter = FilterMinimizer::new(&schema, 3).minimize(&g, &c).unwrap().unwrap();
        assert!(exact(&filter, &g, &c));
    }

    #[test]
    fn test_identical_trait_sets_are_unfilterable() {
        let schema = schema();
        let a = dev("f1", "03", "c", "8");
        let b = dev("f1", "03", "c", "8");
        assert!(FilterMinimizer::new(&schema, 4).minimize(&[&a], &[&b]).is_err());
    }
}
