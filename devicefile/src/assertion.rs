//! Failure policy for batch runs.
//!
//! Every failure of a cluster is raised as an [`Assertion`]: the module that
//! raised it, where (the cluster), and what went wrong. Registered handlers
//! are asked in registration order and each answers with a [`Behavior`].
//! Their answers combine as follows:
//!
//! - any handler answering `Fail` abandons the run;
//! - otherwise any handler answering `Ignore` lets the run continue;
//! - if every handler answers `DontCare` (or none is registered) the run
//!   is abandoned.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::core::{DeviceFileError, ErrorKind};

/// One failure raised during a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assertion {
    pub module: String,
    pub location: String,
    pub failure: ErrorKind,
    pub context: String,
}

impl Assertion {
    pub fn new(module: impl Into<String>, location: impl Into<String>, failure: ErrorKind) -> Self {
        Self {
            module: module.into(),
            location: location.into(),
            failure,
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn from_error(module: &str, location: &str, error: &DeviceFileError) -> Self {
        Self::new(module, location, error.kind()).with_context(error.to_string())
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.module, self.location, self.failure)?;
        if !self.context.is_empty() {
            write!(f, " ({})", self.context)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Behavior {
    Fail,
    Ignore,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Continue,
    Abandon,
}

/// Combined answer of all handlers, with the handler that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub decided_by: Option<String>,
}

/// Which assertions a handler is asked about. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matcher {
    pub module: Option<String>,
    pub location: Option<String>,
    pub failure: Option<ErrorKind>,
}

impl Matcher {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn module(module: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            ..Self::default()
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn failing_with(mut self, failure: ErrorKind) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn matches(&self, assertion: &Assertion) -> bool {
        self.module.as_deref().map_or(true, |m| m == assertion.module)
            && self.location.as_deref().map_or(true, |l| l == assertion.location)
            && self.failure.map_or(true, |k| k == assertion.failure)
    }
}

type Action = Arc<dyn Fn(&Assertion) -> Behavior + Send + Sync>;

#[derive(Clone)]
struct Handler {
    name: String,
    matcher: Matcher,
    action: Action,
}

/// Ordered registry of failure handlers.
///
/// The default registry is [`AssertionHandlers::isolate_clusters`]; start
/// from [`AssertionHandlers::strict`] to abandon on every failure.
#[derive(Clone)]
pub struct AssertionHandlers {
    handlers: Vec<Handler>,
}

impl Default for AssertionHandlers {
    fn default() -> Self {
        Self::isolate_clusters()
    }
}

impl AssertionHandlers {
    /// An empty registry: every failure abandons the run.
    pub fn strict() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Per-cluster failures are ignored; a failure to persist a verified
    /// tree abandons the run.
    pub fn isolate_clusters() -> Self {
        let mut handlers = Self::strict();
        for module in ["cluster", "merge", "verify"] {
            handlers.on(
                format!("isolate-{}", module),
                Matcher::module(module),
                Behavior::Ignore,
            );
        }
        handlers
    }

    /// Register a handler that always answers `behavior` for matching
    /// assertions.
    pub fn on(&mut self, name: impl Into<String>, matcher: Matcher, behavior: Behavior) -> &mut Self {
        self.register(name, matcher, move |_| behavior)
    }

    /// Register a handler that decides per assertion.
    pub fn register<F>(&mut self, name: impl Into<String>, matcher: Matcher, action: F) -> &mut Self
    where
        F: Fn(&Assertion) -> Behavior + Send + Sync + 'static,
    {
        self.handlers.push(Handler {
            name: name.into(),
            matcher,
            action: Arc::new(action),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn evaluate(&self, assertion: &Assertion) -> Verdict {
        let mut first_ignore: Option<&str> = None;

        for handler in self.handlers.iter().filter(|h| h.matcher.matches(assertion)) {
            match (handler.action)(assertion) {
                Behavior::Fail => {
                    return Verdict {
                        outcome: Outcome::Abandon,
                        decided_by: Some(handler.name.clone()),
                    };
                }
                Behavior::Ignore => {
                    first_ignore.get_or_insert(&handler.name);
                }
                Behavior::DontCare => {}
            }
        }

        match first_ignore {
            Some(name) => Verdict {
                outcome: Outcome::Continue,
                decided_by: Some(name.to_string()),
            },
            None => Verdict {
                outcome: Outcome::Abandon,
                decided_by: None,
            },
        }
    }
}

impl fmt::Debug for AssertionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| (&h.name, &h.matcher)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge_failure() -> Assertion {
        Assertion::new("merge", "stm32f1-03", ErrorKind::UnfilterableGroup)
    }

    #[test]
    fn test_no_handlers_abandons() {
        let verdict = AssertionHandlers::strict().evaluate(&merge_failure());
        assert_eq!(verdict.outcome, Outcome::Abandon);
        assert_eq!(verdict.decided_by, None);
    }

    #[test]
    fn test_all_dont_care_abandons() {
        let mut handlers = AssertionHandlers::strict();
        handlers.on("a", Matcher::any(), Behavior::DontCare);
        handlers.on("b", Matcher::module("merge"), Behavior::DontCare);
        assert_eq!(handlers.evaluate(&merge_failure()).outcome, Outcome::Abandon);
    }

    #[test]
    fn test_ignore_continues() {
        let mut handlers = AssertionHandlers::strict();
        handlers.on("quiet", Matcher::any(), Behavior::DontCare);
        handlers.on("skip-merge", Matcher::module("merge"), Behavior::Ignore);
        let verdict = handlers.evaluate(&merge_failure());
        assert_eq!(verdict.outcome, Outcome::Continue);
        assert_eq!(verdict.decided_by.as_deref(), Some("skip-merge"));
    }

    #[test]
    fn test_fail_wins_over_ignore() {
        let mut handlers = AssertionHandlers::isolate_clusters();
        handlers.on(
            "strict-f1",
            Matcher::module("merge").at("stm32f1-03"),
            Behavior::Fail,
        );
        let verdict = handlers.evaluate(&merge_failure());
        assert_eq!(verdict.outcome, Outcome::Abandon);
        assert_eq!(verdict.decided_by.as_deref(), Some("strict-f1"));

        let other = Assertion::new("merge", "stm32f4-05", ErrorKind::UnfilterableGroup);
        assert_eq!(handlers.evaluate(&other).outcome, Outcome::Continue);
    }

    #[test]
    fn test_matcher_on_failure_kind() {
        let mut handlers = AssertionHandlers::strict();
        handlers.on(
            "tolerate-mismatch",
            Matcher::module("merge").failing_with(ErrorKind::StructuralMismatch),
            Behavior::Ignore,
        );
        assert_eq!(handlers.evaluate(&merge_failure()).outcome, Outcome::Abandon);
        let mismatch = Assertion::new("merge", "x", ErrorKind::StructuralMismatch);
        assert_eq!(handlers.evaluate(&mismatch).outcome, Outcome::Continue);
    }

    #[test]
    fn test_dynamic_handler() {
        let mut handlers = AssertionHandlers::strict();
        handlers.register("context", Matcher::any(), |a| {
            if a.context.contains("expected") {
                Behavior::Ignore
            } else {
                Behavior::DontCare
            }
        });
        let a = merge_failure().with_context("expected for this family");
        assert_eq!(handlers.evaluate(&a).outcome, Outcome::Continue);
        assert_eq!(handlers.evaluate(&merge_failure()).outcome, Outcome::Abandon);
    }

    #[test]
    fn test_default_registry_isolates_clusters() {
        let handlers = AssertionHandlers::default();
        assert_eq!(handlers.len(), 3);
        assert_eq!(handlers.evaluate(&merge_failure()).outcome, Outcome::Continue);
        let missing = Assertion::new("cluster", "stm32f1-03v", ErrorKind::UnknownDevice);
        assert_eq!(handlers.evaluate(&missing).outcome, Outcome::Continue);
        assert!(AssertionHandlers::strict().is_empty());
    }

    #[test]
    fn test_default_policy_abandons_on_store_failure() {
        let handlers = AssertionHandlers::isolate_clusters();
        let store = Assertion::new("store", "stm32f1-03", ErrorKind::Io);
        assert_eq!(handlers.evaluate(&store).outcome, Outcome::Abandon);
        let verify = Assertion::from_error(
            "verify",
            "stm32f1-03",
            &DeviceFileError::EmptyDevice {
                device: "stm32f103c8".into(),
            },
        );
        assert_eq!(verify.failure, ErrorKind::EmptyDevice);
        assert_eq!(handlers.evaluate(&verify).outcome, Outcome::Continue);
    }
}
