//! Identifier schemas: how a [`TraitSet`] is spelled as a device identifier.
//!
//! A schema is written as a template such as
//! `{platform}{family}{name}{pin}{size}{package}` where every `{...}` is a
//! placeholder for one trait and everything else is literal text. Each
//! placeholder declares its finite alphabet, which is what makes splitting
//! an identifier back into traits a bounded search instead of a guess.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::decompose::ValidDeviceList;
use super::traits::TraitSet;
use crate::core::DeviceFileError;
use crate::tree::filter::is_value_char;

/// One piece of a schema template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// The finite set of values one trait can take, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitDomain {
    pub name: String,
    pub values: Vec<String>,
}

/// On-disk form of a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDef {
    pub template: String,
    pub traits: BTreeMap<String, Vec<String>>,
}

/// Parsed, validated identifier schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct IdentifierSchema {
    template: String,
    segments: Vec<Segment>,
    /// Domains in placeholder order.
    domains: Vec<TraitDomain>,
}

impl IdentifierSchema {
    /// Build a schema from a template and one domain per placeholder.
    pub fn new<N, V>(
        template: &str,
        domains: impl IntoIterator<Item = (N, Vec<V>)>,
    ) -> Result<Self, DeviceFileError>
    where
        N: Into<String>,
        V: Into<String>,
    {
        let segments = parse_template(template)?;
        let mut declared: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, values) in domains {
            let name = name.into();
            let values: Vec<String> = values.into_iter().map(Into::into).collect();
            if declared.insert(name.clone(), values).is_some() {
                return Err(DeviceFileError::Schema(format!(
                    "domain for '{}' declared twice",
                    name
                )));
            }
        }

        let mut ordered = Vec::new();
        for segment in &segments {
            if let Segment::Placeholder(name) = segment {
                let values = declared.remove(name).ok_or_else(|| {
                    DeviceFileError::Schema(format!("placeholder '{{{}}}' has no domain", name))
                })?;
                if values.is_empty() {
                    return Err(DeviceFileError::Schema(format!(
                        "domain of '{}' is empty",
                        name
                    )));
                }
                // values end up in filter text, so they share its alphabet
                if let Some(bad) = values
                    .iter()
                    .find(|v| !v.chars().all(is_value_char))
                {
                    return Err(DeviceFileError::Schema(format!(
                        "value '{}' of '{}' may not contain whitespace or any of ,&|=\"",
                        bad, name
                    )));
                }
                let mut seen = HashSet::new();
                if let Some(dup) = values.iter().find(|v| !seen.insert(v.as_str())) {
                    return Err(DeviceFileError::Schema(format!(
                        "domain of '{}' lists '{}' twice",
                        name, dup
                    )));
                }
                ordered.push(TraitDomain {
                    name: name.clone(),
                    values,
                });
            }
        }

        if let Some(name) = declared.keys().next() {
            return Err(DeviceFileError::Schema(format!(
                "domain declared for '{}' which the template does not use",
                name
            )));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
            domains: ordered,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Trait names in schema (left-to-right) order.
    pub fn trait_names(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|d| d.name.as_str())
    }

    /// Position of a trait in the schema, used as the tie-break when
    /// several filters are equally small.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.domains.iter().position(|d| d.name == name)
    }

    pub fn domain(&self, name: &str) -> Option<&[String]> {
        self.domains
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.values.as_slice())
    }

    pub fn domains(&self) -> &[TraitDomain] {
        &self.domains
    }

    /// Sort key of a device: the index of each trait value in its domain,
    /// traits taken left to right. Values outside the schema sort last.
    pub fn order_key(&self, traits: &TraitSet) -> Vec<usize> {
        self.domains
            .iter()
            .map(|d| {
                traits
                    .get(&d.name)
                    .and_then(|v| d.values.iter().position(|x| x == v))
                    .unwrap_or(usize::MAX)
            })
            .collect()
    }

    /// Spell `traits` as an identifier string.
    pub fn compose(&self, traits: &TraitSet) -> Result<String, DeviceFileError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = traits.get(name).ok_or_else(|| {
                        DeviceFileError::Schema(format!(
                            "trait '{}' missing from {}",
                            name, traits
                        ))
                    })?;
                    let known = self.domain(name).unwrap_or_default();
                    if !known.iter().any(|v| v == value) {
                        return Err(DeviceFileError::Schema(format!(
                            "value '{}' is not in the domain of '{}'",
                            value, name
                        )));
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Every trait set whose spelling is `identifier`, ignoring whether
    /// such a device exists.
    pub fn parses(&self, identifier: &str) -> Vec<TraitSet> {
        let mut out = Vec::new();
        let mut current = Vec::with_capacity(self.domains.len());
        self.enumerate(identifier, 0, &mut current, &mut out);
        out
    }

    fn enumerate<'a>(
        &'a self,
        rest: &str,
        index: usize,
        current: &mut Vec<(&'a str, &'a str)>,
        out: &mut Vec<TraitSet>,
    ) {
        let Some(segment) = self.segments.get(index) else {
            if rest.is_empty() {
                out.push(current.iter().copied().collect());
            }
            return;
        };
        match segment {
            Segment::Literal(text) => {
                if let Some(tail) = rest.strip_prefix(text.as_str()) {
                    self.enumerate(tail, index + 1, current, out);
                }
            }
            Segment::Placeholder(name) => {
                for value in self.domain(name).unwrap_or_default() {
                    if let Some(tail) = rest.strip_prefix(value.as_str()) {
                        current.push((name.as_str(), value.as_str()));
                        self.enumerate(tail, index + 1, current, out);
                        current.pop();
                    }
                }
            }
        }
    }

    /// Split `identifier` into its trait set.
    ///
    /// Identifiers that are not in `valid` are unknown even when the
    /// template would accept them.
    pub fn decompose(
        &self,
        identifier: &str,
        valid: &ValidDeviceList,
    ) -> Result<TraitSet, DeviceFileError> {
        if !valid.contains(identifier) {
            return Err(DeviceFileError::UnknownDevice {
                identifier: identifier.to_string(),
            });
        }
        let mut candidates = self.parses(identifier);
        match candidates.len() {
            0 => Err(DeviceFileError::UnknownDevice {
                identifier: identifier.to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(DeviceFileError::AmbiguousIdentifier {
                identifier: identifier.to_string(),
                candidates: candidates.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    /// Fail unless every valid identifier has exactly one decomposition.
    pub fn check_unambiguous(&self, valid: &ValidDeviceList) -> Result<(), DeviceFileError> {
        for identifier in valid.iter() {
            self.decompose(identifier, valid).map_err(|e| {
                DeviceFileError::Schema(format!("schema '{}' rejects {}: {}", self.template, identifier, e))
            })?;
        }
        Ok(())
    }

    /// Every trait combination the domains admit, in schema order.
    pub fn combinations(&self) -> Vec<TraitSet> {
        let mut out = vec![TraitSet::new()];
        for domain in &self.domains {
            out = out
                .into_iter()
                .flat_map(|partial| {
                    domain
                        .values
                        .iter()
                        .map(move |v| partial.clone().with(domain.name.clone(), v.clone()))
                })
                .collect();
        }
        out
    }
}

impl fmt::Display for IdentifierSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl TryFrom<SchemaDef> for IdentifierSchema {
    type Error = DeviceFileError;

    fn try_from(def: SchemaDef) -> Result<Self, Self::Error> {
        IdentifierSchema::new(&def.template, def.traits)
    }
}

impl From<IdentifierSchema> for SchemaDef {
    fn from(schema: IdentifierSchema) -> Self {
        SchemaDef {
            template: schema.template,
            traits: schema
                .domains
                .into_iter()
                .map(|d| (d.name, d.values))
                .collect(),
        }
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>, DeviceFileError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut seen = HashSet::new();
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => name.push(c),
                        other => {
                            return Err(DeviceFileError::Schema(format!(
                                "unexpected '{}' inside placeholder in '{}'",
                                other, template
                            )))
                        }
                    }
                }
                if !closed {
                    return Err(DeviceFileError::Schema(format!(
                        "unterminated placeholder in '{}'",
                        template
                    )));
                }
                if name.is_empty() {
                    return Err(DeviceFileError::Schema(format!(
                        "empty placeholder in '{}'",
                        template
                    )));
                }
                if !seen.insert(name.clone()) {
                    return Err(DeviceFileError::Schema(format!(
                        "placeholder '{{{}}}' used twice in '{}'",
                        name, template
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => {
                return Err(DeviceFileError::Schema(format!(
                    "unbalanced '}}' in '{}'",
                    template
                )))
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    if seen.is_empty() {
        return Err(DeviceFileError::Schema(format!(
            "template '{}' has no placeholders",
            template
        )));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stm32() -> IdentifierSchema {
        IdentifierSchema::new(
            "{platform}{family}{name}{pin}{size}",
            [
                ("platform", vec!["stm32"]),
                ("family", vec!["f1", "f4"]),
                ("name", vec!["03", "05"]),
                ("pin", vec!["c", "r", "v"]),
                ("size", vec!["8", "b"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_template_with_literals() {
        let schema = IdentifierSchema::new(
            "at{family}-{size}",
            [("family", vec!["mega", "tiny"]), ("size", vec!["8", "16"])],
        )
        .unwrap();
        assert_eq!(
            schema.segments(),
            &[
                Segment::Literal("at".into()),
                Segment::Placeholder("family".into()),
                Segment::Literal("-".into()),
                Segment::Placeholder("size".into()),
            ]
        );
        let traits = TraitSet::new().with("family", "tiny").with("size", "16");
        assert_eq!(schema.compose(&traits).unwrap(), "attiny-16");
    }

    #[test]
    fn test_malformed_templates() {
        let domains = || [("a", vec!["x"])];
        assert!(IdentifierSchema::new("{a", domains()).is_err());
        assert!(IdentifierSchema::new("a}", domains()).is_err());
        assert!(IdentifierSchema::new("{}{a}", domains()).is_err());
        assert!(IdentifierSchema::new("{a}{a}", domains()).is_err());
        assert!(IdentifierSchema::new("{a}{b}", domains()).is_err());
        assert!(IdentifierSchema::new("plain", Vec::<(&str, Vec<&str>)>::new()).is_err());
        assert!(IdentifierSchema::new("{a}", [("a", vec!["x", "x"])]).is_err());
        assert!(IdentifierSchema::new("{a}", [("a", vec!["x"]), ("b", vec!["y"])]).is_err());
    }

    #[test]
    fn test_order_key_follows_domain_order() {
        let schema = IdentifierSchema::new(
            "{fam}{size}",
            [("fam", vec!["f1", "f0"]), ("size", vec!["e", "8", "b"])],
        )
        .unwrap();
        let key = |fam: &str, size: &str| {
            schema.order_key(&TraitSet::new().with("fam", fam).with("size", size))
        };
        assert_eq!(key("f0", "8"), vec![1, 1]);
        assert!(key("f1", "b") < key("f0", "e"));
        assert!(key("f1", "e") < key("f1", "8"));
        assert_eq!(schema.order_key(&TraitSet::new().with("fam", "f1")), vec![0, usize::MAX]);
    }

    #[test]
    fn test_values_must_fit_filter_text() {
        for bad in ["8 k", "b,x", "a&b", "a|b", "a=b", "\"q\""] {
            match IdentifierSchema::new("{size}", [("size", vec!["8", bad])]) {
                Err(DeviceFileError::Schema(message)) => assert!(message.contains(bad)),
                other => panic!("expected schema error for {:?}, got {:?}", bad, other),
            }
        }
        let json = r#"{"template": "{size}", "traits": {"size": ["8 k"]}}"#;
        assert!(serde_json::from_str::<IdentifierSchema>(json).is_err());
        assert!(IdentifierSchema::new("{size}", [("size", vec!["", "8"])]).is_ok());
    }

    #[test]
    fn test_compose_requires_every_trait() {
        let schema = stm32();
        let partial = TraitSet::new().with("platform", "stm32").with("family", "f1");
        assert!(matches!(
            schema.compose(&partial),
            Err(DeviceFileError::Schema(_))
        ));
    }

    #[test]
    fn test_compose_rejects_values_outside_domain() {
        let schema = IdentifierSchema::new("{family}", [("family", vec!["f1"])]).unwrap();
        let traits = TraitSet::new().with("family", "f7");
        assert!(schema.compose(&traits).is_err());
    }

    #[test]
    fn test_decompose_round_trip() {
        let schema = stm32();
        let traits = TraitSet::new()
            .with("platform", "stm32")
            .with("family", "f1")
            .with("name", "03")
            .with("pin", "r")
            .with("size", "b");
        let id = schema.compose(&traits).unwrap();
        assert_eq!(id, "stm32f103rb");
        let valid = ValidDeviceList::new([id.clone()]);
        assert_eq!(schema.decompose(&id, &valid).unwrap(), traits);
    }

    #[test]
    fn test_decompose_unknown_even_if_grammatical() {
        let schema = stm32();
        let valid = ValidDeviceList::new(["stm32f103rb"]);
        let err = schema.decompose("stm32f103c8", &valid).unwrap_err();
        assert!(matches!(err, DeviceFileError::UnknownDevice { .. }));
    }

    #[test]
    fn test_decompose_ambiguous() {
        // "ab" + "c" and "a" + "bc" spell the same identifier
        let schema = IdentifierSchema::new(
            "{x}{y}",
            [("x", vec!["a", "ab"]), ("y", vec!["bc", "c"])],
        )
        .unwrap();
        let valid = ValidDeviceList::new(["abc"]);
        match schema.decompose("abc", &valid) {
            Err(DeviceFileError::AmbiguousIdentifier { candidates, .. }) => {
                assert_eq!(candidates.len(), 2)
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
        assert!(schema.check_unambiguous(&valid).is_err());
    }

    #[test]
    fn test_optional_trait_with_empty_value() {
        let schema = IdentifierSchema::new(
            "{name}{variant}",
            [("name", vec!["l476"]), ("variant", vec!["", "p"])],
        )
        .unwrap();
        let valid = ValidDeviceList::new(["l476", "l476p"]);
        schema.check_unambiguous(&valid).unwrap();
        let plain = schema.decompose("l476", &valid).unwrap();
        assert_eq!(plain.get("variant"), Some(""));
    }

    #[test]
    fn test_combinations_cover_domains() {
        let schema = stm32();
        assert_eq!(schema.combinations().len(), 24);
    }

    #[test]
    fn test_serde_uses_template_form() {
        let schema = stm32();
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("\"template\""));
        let back: IdentifierSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
