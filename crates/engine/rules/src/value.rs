//! Typed resolvable values and load-time value group expansion
//!
//! A raw configuration string holds `|` separated alternatives. Placeholders
//! naming a registered value group are expanded when the value is parsed, so
//! only per-event parameters are left for runtime:
//!
//! ```text
//! "<trees>_<size>|Rock"   trees = [Beech, Oak], size = [small, big]
//!   -> Beech_small | Beech_big | Oak_small | Oak_big | Rock
//! ```

use crate::parse::{angle_yxz, vec_xzy};
use crate::template::{has_placeholder, resolve, FieldSource, Pars};
use crate::PrefabHash;
use glam::{Quat, Vec3};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

/// Token that resolves to "no value"
pub const NONE_TOKEN: &str = "<none>";

/// Named, finite sets of literal alternatives
#[derive(Debug, Clone, Default)]
pub struct ValueGroups {
    groups: HashMap<String, Vec<String>>,
}

impl ValueGroups {
    pub fn new() -> Self {
        ValueGroups::default()
    }

    /// Register a group as-is. Names are case-insensitive.
    pub fn insert(&mut self, name: &str, values: Vec<String>) {
        self.groups.insert(name.to_lowercase(), values);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.groups.get(&name.to_lowercase()).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Build groups whose values may reference other groups.
    ///
    /// Dependencies are resolved depth first with an explicit stack. A
    /// reference that would close a cycle is logged and kept as a literal.
    pub fn from_definitions(definitions: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        let raw: HashMap<String, Vec<String>> = definitions
            .into_iter()
            .map(|(name, values)| (name.to_lowercase(), values))
            .collect();
        let mut names: Vec<&String> = raw.keys().collect();
        names.sort();

        let mut resolved = ValueGroups::new();
        for root in names {
            let mut visiting: HashSet<String> = HashSet::new();
            let mut stack: Vec<(String, bool)> = vec![(root.clone(), false)];
            while let Some((name, children_done)) = stack.pop() {
                if resolved.groups.contains_key(&name) {
                    continue;
                }
                if children_done {
                    let mut ignored = HashSet::new();
                    let values = raw[&name]
                        .iter()
                        .flat_map(|v| expand_option(v, &resolved, &mut ignored))
                        .collect();
                    resolved.groups.insert(name.clone(), values);
                    visiting.remove(&name);
                    continue;
                }
                visiting.insert(name.clone());
                stack.push((name.clone(), true));
                for value in &raw[&name] {
                    for dep in placeholder_names(value) {
                        let dep = dep.to_lowercase();
                        if !raw.contains_key(&dep) || resolved.groups.contains_key(&dep) {
                            continue;
                        }
                        if visiting.contains(&dep) {
                            tracing::warn!("Value group {} references itself through {}", name, dep);
                            continue;
                        }
                        stack.push((dep, false));
                    }
                }
            }
        }
        resolved
    }
}

/// Names of every `<name>` placeholder in a string, in reading order
fn placeholder_names(text: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(len) = after.find('>') else {
            break;
        };
        let inner = &after[..len];
        // Nested `<` means the outer `<` was not the opening of this token
        match inner.rfind('<') {
            Some(i) => names.push(&inner[i + 1..]),
            None => names.push(inner),
        }
        rest = &after[len + 1..];
    }
    names
}

/// Expand the value group placeholders of one alternative.
///
/// Unknown placeholders are added to `required` and left in place.
pub fn expand_option(option: &str, groups: &ValueGroups, required: &mut HashSet<String>) -> Vec<String> {
    if !has_placeholder(option) {
        return vec![option.to_string()];
    }
    let mut known: Vec<(String, &[String])> = Vec::new();
    for name in placeholder_names(option) {
        match groups.get(name) {
            Some(values) => {
                let token = format!("<{name}>");
                if !known.iter().any(|(t, _)| *t == token) {
                    known.push((token, values));
                }
            }
            None => {
                required.insert(name.to_string());
            }
        }
    }

    // Cross product, one group at a time
    let mut partial = vec![option.to_string()];
    for (token, values) in known {
        let mut next = Vec::with_capacity(partial.len() * values.len());
        for format in &partial {
            for value in values {
                next.push(format.replace(&token, value));
            }
        }
        partial = next;
    }
    partial
}

/// Split a raw value into alternatives and expand value groups
pub fn split_with_values(raw: &str, groups: &ValueGroups, required: &mut HashSet<String>) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .flat_map(|option| expand_option(option, groups, required))
        .collect()
}

/// A type that can be stored in a [`ResolvableValue`]
pub trait ValueType: Sized + Clone + Debug {
    /// Name used in diagnostics
    const KIND: &'static str;

    fn parse_value(text: &str) -> Option<Self>;

    /// Fallback for malformed literals
    fn zero() -> Self;

    fn same(&self, other: &Self) -> bool;
}

impl ValueType for i32 {
    const KIND: &'static str = "int";
    fn parse_value(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
    fn zero() -> Self {
        0
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueType for i64 {
    const KIND: &'static str = "long";
    fn parse_value(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
    fn zero() -> Self {
        0
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueType for f32 {
    const KIND: &'static str = "float";
    fn parse_value(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
    fn zero() -> Self {
        0.0
    }
    fn same(&self, other: &Self) -> bool {
        (self - other).abs() < 0.001
    }
}

impl ValueType for bool {
    const KIND: &'static str = "bool";
    fn parse_value(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
    fn zero() -> Self {
        false
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueType for String {
    const KIND: &'static str = "string";
    fn parse_value(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
    fn zero() -> Self {
        String::new()
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueType for PrefabHash {
    const KIND: &'static str = "hash";
    fn parse_value(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            Some(PrefabHash::NONE)
        } else {
            Some(PrefabHash::of(text))
        }
    }
    fn zero() -> Self {
        PrefabHash::NONE
    }
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl ValueType for Vec3 {
    const KIND: &'static str = "vec";
    fn parse_value(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.split(',').collect();
        vec_xzy(&parts)
    }
    fn zero() -> Self {
        Vec3::ZERO
    }
    fn same(&self, other: &Self) -> bool {
        self.abs_diff_eq(*other, 0.001)
    }
}

impl ValueType for Quat {
    const KIND: &'static str = "quat";
    fn parse_value(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.split(',').collect();
        angle_yxz(&parts)
    }
    fn zero() -> Self {
        Quat::IDENTITY
    }
    fn same(&self, other: &Self) -> bool {
        // q and -q are the same rotation
        self.dot(*other).abs() > 0.9999
    }
}

/// A value that is either known at load time or resolved per event
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvableValue<T> {
    /// Fully concrete, no runtime work
    Constant(T),
    /// Alternatives needing a random pick and parameter substitution
    Template(Vec<String>),
    /// Expansion produced no alternatives
    Empty,
}

impl<T: ValueType> ResolvableValue<T> {
    /// Parse a raw configuration string.
    ///
    /// Placeholders that are not value groups are added to `required`.
    pub fn parse(raw: &str, groups: &ValueGroups, required: &mut HashSet<String>) -> Self {
        let options = split_with_values(raw, groups, required);
        match options.as_slice() {
            [] => ResolvableValue::Empty,
            [single] if !has_placeholder(single) => match T::parse_value(single) {
                Some(value) => ResolvableValue::Constant(value),
                None => {
                    tracing::warn!("Invalid {} value: {}", T::KIND, single);
                    ResolvableValue::Constant(T::zero())
                }
            },
            _ => {
                for option in options.iter().filter(|o| !has_placeholder(o)) {
                    if T::parse_value(option).is_none() {
                        tracing::warn!("Invalid {} value: {}", T::KIND, option);
                    }
                }
                ResolvableValue::Template(options)
            }
        }
    }

    pub fn constant(value: T) -> Self {
        ResolvableValue::Constant(value)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ResolvableValue::Constant(_))
    }

    /// Alternatives left for runtime (empty for constants)
    pub fn alternatives(&self) -> &[String] {
        match self {
            ResolvableValue::Template(options) => options,
            _ => &[],
        }
    }

    /// Resolve one value, picking an alternative uniformly at random
    pub fn get<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        pars: Pars<'_>,
        source: Option<FieldSource<'_>>,
    ) -> Option<T> {
        match self {
            ResolvableValue::Constant(value) => Some(value.clone()),
            ResolvableValue::Empty => None,
            ResolvableValue::Template(options) => {
                let pick = if options.len() == 1 {
                    &options[0]
                } else {
                    &options[rng.random_range(0..options.len())]
                };
                Self::resolve_option(pick, pars, source)
            }
        }
    }

    /// Whether any alternative resolves to `actual`
    pub fn matches(&self, pars: Pars<'_>, source: Option<FieldSource<'_>>, actual: &T) -> bool {
        match self {
            ResolvableValue::Constant(value) => value.same(actual),
            ResolvableValue::Empty => false,
            ResolvableValue::Template(options) => options
                .iter()
                .filter_map(|o| Self::resolve_option(o, pars, source))
                .any(|v| v.same(actual)),
        }
    }

    fn resolve_option(option: &str, pars: Pars<'_>, source: Option<FieldSource<'_>>) -> Option<T> {
        if option == NONE_TOKEN {
            return None;
        }
        T::parse_value(&resolve(option, pars, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Parameters;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn groups() -> ValueGroups {
        let mut g = ValueGroups::new();
        g.insert("trees", vec!["Beech".into(), "Oak".into()]);
        g.insert("size", vec!["small".into(), "medium".into(), "big".into()]);
        g.insert("nothing", vec![]);
        g
    }

    #[test]
    fn test_cross_product_expansion() {
        let mut required = HashSet::new();
        let options = split_with_values("<trees>_<size>", &groups(), &mut required);
        assert_eq!(options.len(), 6);
        assert!(options.iter().all(|o| !has_placeholder(o)));
        assert!(options.contains(&"Oak_medium".to_string()));
        assert!(required.is_empty());
    }

    #[test]
    fn test_group_names_are_case_insensitive() {
        let mut required = HashSet::new();
        let options = split_with_values("<Trees>", &groups(), &mut required);
        assert_eq!(options, vec!["Beech".to_string(), "Oak".to_string()]);
    }

    #[test]
    fn test_unknown_placeholders_become_required() {
        let mut required = HashSet::new();
        let value = ResolvableValue::<String>::parse("<trees>_<par0>", &groups(), &mut required);
        assert!(required.contains("par0"));
        assert_eq!(value.alternatives(), ["Beech_<par0>", "Oak_<par0>"]);
    }

    #[test]
    fn test_constant_fast_path() {
        let mut required = HashSet::new();
        let value = ResolvableValue::<i32>::parse("42", &groups(), &mut required);
        assert_eq!(value, ResolvableValue::Constant(42));

        let value = ResolvableValue::<f32>::parse("abc", &groups(), &mut required);
        assert_eq!(value, ResolvableValue::Constant(0.0));
    }

    #[test]
    fn test_empty_group_resolves_to_none() {
        let mut required = HashSet::new();
        let value = ResolvableValue::<String>::parse("<nothing>", &groups(), &mut required);
        assert_eq!(value, ResolvableValue::Empty);
        let mut rng = StdRng::seed_from_u64(1);
        let pars = Parameters::new();
        assert_eq!(value.get(&mut rng, Pars::new(&pars), None), None);
    }

    #[test]
    fn test_runtime_resolution() {
        let mut required = HashSet::new();
        let value = ResolvableValue::<i32>::parse("<par0>", &groups(), &mut required);
        let pars = Parameters::new().with("par0", "17");
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(value.get(&mut rng, Pars::new(&pars), None), Some(17));

        let none = ResolvableValue::<i32>::parse("<none>|<none>", &groups(), &mut required);
        assert_eq!(none.get(&mut rng, Pars::new(&pars), None), None);
    }

    #[test]
    fn test_random_pick_covers_alternatives() {
        let mut required = HashSet::new();
        let value = ResolvableValue::<String>::parse("<trees>", &groups(), &mut required);
        let pars = Parameters::new();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = HashSet::new();
        for _ in 0..64 {
            seen.insert(value.get(&mut rng, Pars::new(&pars), None).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_matches_any_alternative() {
        let mut required = HashSet::new();
        let value = ResolvableValue::<i32>::parse("1|2|<par0>", &groups(), &mut required);
        let pars = Parameters::new().with("par0", "5");
        assert!(value.matches(Pars::new(&pars), None, &5));
        assert!(value.matches(Pars::new(&pars), None, &2));
        assert!(!value.matches(Pars::new(&pars), None, &3));
    }

    #[test]
    fn test_vector_and_quat_literals() {
        let mut required = HashSet::new();
        let v = ResolvableValue::<Vec3>::parse("1,2,3", &groups(), &mut required);
        assert_eq!(v, ResolvableValue::Constant(Vec3::new(1.0, 3.0, 2.0)));
        let q = ResolvableValue::<Quat>::parse("90", &groups(), &mut required);
        assert!(q.is_constant());
    }

    #[test]
    fn test_nested_group_definitions() {
        let groups = ValueGroups::from_definitions(vec![
            ("all".to_string(), vec!["<trees>".to_string(), "Rock".to_string()]),
            ("trees".to_string(), vec!["Beech".to_string(), "Oak".to_string()]),
        ]);
        assert_eq!(groups.get("all").unwrap(), ["Beech", "Oak", "Rock"]);
    }

    #[test]
    fn test_self_referential_group_terminates() {
        let groups = ValueGroups::from_definitions(vec![
            ("a".to_string(), vec!["<b>".to_string()]),
            ("b".to_string(), vec!["<a>".to_string(), "x".to_string()]),
        ]);
        // One side of the cycle keeps the reference as a literal
        assert!(groups.contains("a"));
        assert!(groups.contains("b"));
        let total: usize = ["a", "b"].iter().map(|n| groups.get(n).unwrap().len()).sum();
        assert!(total <= 5);
    }
}
