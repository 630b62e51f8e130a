//! Resource keys and invalidation key patterns.
//!
//! A [`ResourceKey`] identifies one cacheable read: a resource class plus a
//! parameter mapping. Parameters live in a `BTreeMap`, so two keys built with
//! the same parameters in different orders are equal and hash identically.
//!
//! A [`KeyPattern`] is the declarative side of invalidation: a class plus a
//! partial parameter mapping whose values may be literals or placeholders
//! resolved from a mutation's context at invalidation time.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::CacheError;

/// Well-known resource classes served by the tournament API.
pub mod classes {
    pub const DIVISION: &str = "division";
    pub const DIVISION_LIST: &str = "division-list";
    pub const POOL_LIST: &str = "pool-list";
    pub const TEAM_LIST: &str = "team-list";
    pub const MATCH_LIST: &str = "match-list";
    pub const STANDINGS: &str = "standings";
}

/// Primitive parameter value of a resource key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{s}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Canonical identifier for one cacheable read.
///
/// Immutable once constructed; build with [`ResourceKey::new`] and
/// [`ResourceKey::with`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceKey {
    class: String,
    params: BTreeMap<String, ParamValue>,
}

impl ResourceKey {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Canonical rendering, e.g. `team-list{divisionId=5}`. Parameter order
    /// is normalized by the underlying map.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class)?;
        if self.params.is_empty() {
            return Ok(());
        }
        write!(f, "{{")?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

/// One parameter of a [`KeyPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternParam {
    /// Fixed value; matches keys carrying the same value.
    Literal(ParamValue),
    /// Placeholder filled from the mutation context at invalidation time.
    Context(String),
}

/// Declarative match target for invalidation: a resource class plus a
/// partial parameter mapping. A pattern with fewer parameters than a key
/// still matches as long as every pattern parameter agrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    class: String,
    params: BTreeMap<String, PatternParam>,
}

impl KeyPattern {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a literal parameter constraint.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params
            .insert(name.into(), PatternParam::Literal(value.into()));
        self
    }

    /// Add a parameter filled from the mutation context under `context_name`.
    pub fn with_context(
        mut self,
        name: impl Into<String>,
        context_name: impl Into<String>,
    ) -> Self {
        self.params
            .insert(name.into(), PatternParam::Context(context_name.into()));
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Substitute context values into placeholder parameters.
    ///
    /// Fails loudly when a placeholder names a context value the mutation
    /// did not supply; a rule that cannot resolve is a wiring bug.
    pub fn resolve(
        &self,
        context: &BTreeMap<String, ParamValue>,
    ) -> Result<ResolvedPattern, CacheError> {
        let mut params = BTreeMap::new();
        for (name, param) in &self.params {
            let value = match param {
                PatternParam::Literal(value) => value.clone(),
                PatternParam::Context(context_name) => context
                    .get(context_name)
                    .cloned()
                    .ok_or_else(|| CacheError::MissingContext {
                        class: self.class.clone(),
                        name: context_name.clone(),
                    })?,
            };
            params.insert(name.clone(), value);
        }
        Ok(ResolvedPattern {
            class: self.class.clone(),
            params,
        })
    }
}

/// A [`KeyPattern`] with every placeholder substituted; ready to match
/// against store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPattern {
    class: String,
    params: BTreeMap<String, ParamValue>,
}

impl ResolvedPattern {
    pub fn class(&self) -> &str {
        &self.class
    }

    /// True when the key belongs to the pattern's class and carries every
    /// pattern parameter with an equal value. Extra key parameters are
    /// allowed (partial mappings match supersets).
    pub fn matches(&self, key: &ResourceKey) -> bool {
        if self.class != key.class() {
            return false;
        }
        self.params
            .iter()
            .all(|(name, value)| key.param(name) == Some(value))
    }
}

impl fmt::Display for ResolvedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class)?;
        if self.params.is_empty() {
            return Ok(());
        }
        write!(f, "{{")?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_equality_ignores_insertion_order() {
        let a = ResourceKey::new(classes::MATCH_LIST)
            .with("divisionId", 5)
            .with("poolId", 2);
        let b = ResourceKey::new(classes::MATCH_LIST)
            .with("poolId", 2)
            .with("divisionId", 5);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_canonical_rendering() {
        let key = ResourceKey::new(classes::TEAM_LIST).with("divisionId", 5);
        assert_eq!(key.canonical(), "team-list{divisionId=5}");

        let bare = ResourceKey::new(classes::DIVISION_LIST);
        assert_eq!(bare.canonical(), "division-list");
    }

    #[test]
    fn test_pattern_partial_match() {
        let pattern = KeyPattern::new(classes::MATCH_LIST)
            .with("divisionId", 5)
            .resolve(&BTreeMap::new())
            .unwrap();

        let superset = ResourceKey::new(classes::MATCH_LIST)
            .with("divisionId", 5)
            .with("poolId", 2);
        let other_division = ResourceKey::new(classes::MATCH_LIST).with("divisionId", 6);

        assert!(pattern.matches(&superset));
        assert!(!pattern.matches(&other_division));
    }

    #[test]
    fn test_pattern_class_mismatch_never_matches() {
        let pattern = KeyPattern::new(classes::TEAM_LIST)
            .resolve(&BTreeMap::new())
            .unwrap();
        let key = ResourceKey::new(classes::POOL_LIST);
        assert!(!pattern.matches(&key));
    }

    #[test]
    fn test_pattern_resolve_substitutes_context() {
        let mut context = BTreeMap::new();
        context.insert("divisionId".to_string(), ParamValue::Int(5));

        let resolved = KeyPattern::new(classes::TEAM_LIST)
            .with_context("divisionId", "divisionId")
            .resolve(&context)
            .unwrap();

        let key = ResourceKey::new(classes::TEAM_LIST).with("divisionId", 5);
        assert!(resolved.matches(&key));
    }

    #[test]
    fn test_pattern_resolve_missing_context_is_error() {
        let result = KeyPattern::new(classes::TEAM_LIST)
            .with_context("divisionId", "divisionId")
            .resolve(&BTreeMap::new());

        assert!(matches!(
            result,
            Err(CacheError::MissingContext { ref name, .. }) if name == "divisionId"
        ));
    }

    #[test]
    fn test_empty_pattern_matches_whole_class() {
        let pattern = KeyPattern::new(classes::STANDINGS)
            .resolve(&BTreeMap::new())
            .unwrap();
        assert!(pattern.matches(&ResourceKey::new(classes::STANDINGS).with("divisionId", 1)));
        assert!(pattern.matches(&ResourceKey::new(classes::STANDINGS)));
    }
}
