//! Filter expressions over device traits.
//!
//! A filter is a disjunction of conjunctions. Each conjunction constrains a
//! few trait names to sets of accepted values:
//!
//! ```text
//! pin=c,r & size=b | name=05
//! ```
//!
//! reads "(pin is c or r, and size is b) or name is 05". `&` binds tighter
//! than `|`. An empty trait value is written `""`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::DeviceFileError;
use crate::identifier::TraitSet;

const EMPTY_VALUE: &str = "\"\"";

/// Every listed trait must take one of its accepted values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Conjunction {
    constraints: Vec<(String, BTreeSet<String>)>,
}

impl Conjunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.constrain(name, values);
        self
    }

    /// Constrain `name`, intersecting with an existing constraint on it.
    pub fn constrain<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) {
        let name = name.into();
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        match self.constraints.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => existing.retain(|v| values.contains(v)),
            None => self.constraints.push((name, values)),
        }
    }

    pub fn constraints(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.constraints.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn trait_names(&self) -> impl Iterator<Item = &str> {
        self.constraints.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn matches(&self, traits: &TraitSet) -> bool {
        self.constraints.iter().all(|(name, accepted)| {
            traits
                .get(name)
                .map(|value| accepted.contains(value))
                .unwrap_or(false)
        })
    }
}

/// Disjunction of [`Conjunction`]s. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilterExpr {
    conjunctions: Vec<Conjunction>,
}

impl FilterExpr {
    pub fn single(conjunction: Conjunction) -> Self {
        Self {
            conjunctions: vec![conjunction],
        }
    }

    pub fn any_of(conjunctions: Vec<Conjunction>) -> Result<Self, DeviceFileError> {
        if conjunctions.is_empty() {
            return Err(DeviceFileError::InvalidFilter(
                String::new(),
                "a filter needs at least one conjunction".to_string(),
            ));
        }
        Ok(Self { conjunctions })
    }

    /// Shorthand for a one-trait filter.
    pub fn trait_in<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::single(Conjunction::new().with(name, values))
    }

    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.conjunctions
    }

    /// Distinct trait names referenced anywhere in the filter.
    pub fn trait_names(&self) -> BTreeSet<&str> {
        self.conjunctions
            .iter()
            .flat_map(|c| c.trait_names())
            .collect()
    }

    pub fn matches(&self, traits: &TraitSet) -> bool {
        self.conjunctions.iter().any(|c| c.matches(traits))
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, values)) in self.constraints.iter().enumerate() {
            if i > 0 {
                write!(f, " & ")?;
            }
            write!(f, "{}=", name)?;
            for (j, value) in values.iter().enumerate() {
                if j > 0 {
                    write!(f, ",")?;
                }
                if value.is_empty() {
                    write!(f, "{}", EMPTY_VALUE)?;
                } else {
                    write!(f, "{}", value)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, conjunction) in self.conjunctions.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", conjunction)?;
        }
        Ok(())
    }
}

impl FromStr for FilterExpr {
    type Err = DeviceFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| DeviceFileError::InvalidFilter(s.to_string(), reason);

        let mut conjunctions = Vec::new();
        for clause in s.split('|') {
            let mut conjunction = Conjunction::new();
            for term in clause.split('&') {
                let term = term.trim();
                let (name, values) = term
                    .split_once('=')
                    .ok_or_else(|| invalid(format!("'{}' is not of the form trait=values", term)))?;
                let name = name.trim();
                if name.is_empty() || !name.chars().all(is_name_char) {
                    return Err(invalid(format!("bad trait name '{}'", name)));
                }
                if conjunction.trait_names().any(|n| n == name) {
                    return Err(invalid(format!("'{}' constrained twice in one clause", name)));
                }
                let mut accepted = BTreeSet::new();
                for value in values.split(',') {
                    let value = value.trim();
                    if value == EMPTY_VALUE {
                        accepted.insert(String::new());
                    } else if value.is_empty() || !value.chars().all(is_value_char) {
                        return Err(invalid(format!("bad value '{}' for '{}'", value, name)));
                    } else {
                        accepted.insert(value.to_string());
                    }
                }
                conjunction.constraints.push((name.to_string(), accepted));
            }
            conjunctions.push(conjunction);
        }
        Ok(Self { conjunctions })
    }
}

impl TryFrom<String> for FilterExpr {
    type Error = DeviceFileError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FilterExpr> for String {
    fn from(filter: FilterExpr) -> Self {
        filter.to_string()
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Characters a trait value may use so that it can appear in filter text.
pub(crate) fn is_value_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, ',' | '&' | '|' | '=' | '"')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(pin: &str, size: &str) -> TraitSet {
        TraitSet::new().with("pin", pin).with("size", size)
    }

    #[test]
    fn test_conjunction_matches() {
        let c = Conjunction::new().with("pin", ["c", "r"]).with("size", ["b"]);
        assert!(c.matches(&device("r", "b")));
        assert!(!c.matches(&device("r", "8")));
        assert!(!c.matches(&device("v", "b")));
    }

    #[test]
    fn test_missing_trait_does_not_match() {
        let filter = FilterExpr::trait_in("package", ["t"]);
        assert!(!filter.matches(&device("r", "b")));
    }

    #[test]
    fn test_disjunction() {
        let filter: FilterExpr = "pin=c & size=b | pin=v".parse().unwrap();
        assert!(filter.matches(&device("c", "b")));
        assert!(filter.matches(&device("v", "8")));
        assert!(!filter.matches(&device("c", "8")));
        assert_eq!(filter.trait_names().into_iter().collect::<Vec<_>>(), vec!["pin", "size"]);
    }

    #[test]
    fn test_display_parse_round_trip() {
        let text = "family=f1,f4 & size=8 | variant=\"\",p";
        let filter: FilterExpr = text.parse().unwrap();
        assert_eq!(filter.to_string(), text);
        assert!(filter.matches(&TraitSet::new().with("variant", "")));
    }

    #[test]
    fn test_constrain_intersects() {
        let mut c = Conjunction::new().with("pin", ["c", "r", "v"]);
        c.constrain("pin", ["r", "v", "z"]);
        assert_eq!(c.to_string(), "pin=r,v");
    }

    #[test]
    fn test_rejects_malformed() {
        for text in ["", "pin", "=c", "pin=", "pin=c d", "pin=c & pin=r", "pin=c &", "p in=c"] {
            assert!(text.parse::<FilterExpr>().is_err(), "accepted '{}'", text);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let filter = FilterExpr::trait_in("size", ["8"]);
        assert_eq!(serde_json::to_string(&filter).unwrap(), "\"size=8\"");
        let back: FilterExpr = serde_json::from_str("\"size=8\"").unwrap();
        assert_eq!(back, filter);
    }
}
