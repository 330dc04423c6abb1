//! Object filters: which nearby records count for a rule

use crate::data::{DataEntry, DataRegistry};
use crate::host::{Environment, PrefabRegistry};
use crate::parse::{float_range, int_range, parse_int, to_list};
use crate::template::{has_placeholder, resolve, FieldSource, Pars};
use crate::value::{split_with_values, ValueGroups};
use crate::world::{distance_xz, WorldObject};
use crate::PrefabHash;
use glam::Vec3;
use std::collections::HashSet;

/// How a filter recognizes the prefab of a candidate
#[derive(Debug, Clone, PartialEq)]
pub enum PrefabMatcher {
    Exact(PrefabHash),
    Set(HashSet<PrefabHash>),
    /// Name alternatives resolved per invocation against the candidate
    Template(Vec<String>),
    /// Configured with nothing resolvable, never matches
    Never,
}

impl PrefabMatcher {
    /// Build a matcher from a prefab list. Names are separated by
    /// `,` or `|` and may reference value groups.
    pub fn parse(text: &str, prefabs: &dyn PrefabRegistry, groups: &ValueGroups) -> Self {
        let mut required = HashSet::new();
        let options: Vec<String> = to_list(text)
            .iter()
            .flat_map(|part| split_with_values(part, groups, &mut required))
            .collect();
        if options.iter().any(|o| has_placeholder(o)) {
            return PrefabMatcher::Template(options);
        }
        let mut set = HashSet::new();
        for option in &options {
            match prefabs.resolve(option) {
                Some(hash) => {
                    set.insert(hash);
                }
                None => tracing::warn!("Unknown prefab in filter: {}", option),
            }
        }
        match set.len() {
            0 => PrefabMatcher::Never,
            1 => set
                .into_iter()
                .next()
                .map_or(PrefabMatcher::Never, PrefabMatcher::Exact),
            _ => PrefabMatcher::Set(set),
        }
    }

    pub fn matches(&self, candidate: &WorldObject, ctx: &FilterContext<'_>) -> bool {
        match self {
            PrefabMatcher::Exact(hash) => candidate.prefab == *hash,
            PrefabMatcher::Set(set) => set.contains(&candidate.prefab),
            PrefabMatcher::Template(options) => {
                let source = ctx.source(candidate);
                options
                    .iter()
                    .any(|o| PrefabHash::of(&resolve(o, ctx.pars, Some(source))) == candidate.prefab)
            }
            PrefabMatcher::Never => false,
        }
    }
}

/// Everything a filter needs at evaluation time
#[derive(Clone, Copy)]
pub struct FilterContext<'a> {
    pub pars: Pars<'a>,
    pub prefabs: &'a dyn PrefabRegistry,
    pub environment: &'a dyn Environment,
}

impl<'a> FilterContext<'a> {
    pub fn new(pars: Pars<'a>, prefabs: &'a dyn PrefabRegistry, environment: &'a dyn Environment) -> Self {
        FilterContext {
            pars,
            prefabs,
            environment,
        }
    }

    fn source<'b>(&self, record: &'b WorldObject) -> FieldSource<'b>
    where
        'a: 'b,
    {
        FieldSource::new(record, self.prefabs, self.environment)
    }
}

/// A prefab matcher with a distance band, an optional data filter and a weight
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFilter {
    pub prefab: PrefabMatcher,
    pub min_distance: f32,
    pub max_distance: f32,
    pub data: Option<DataEntry>,
    /// Contribution of each match towards a count
    pub weight: i32,
    /// Set when a configured data name was unknown
    unresolved_data: bool,
}

impl ObjectFilter {
    pub fn new(prefab: PrefabMatcher, max_distance: f32) -> Self {
        ObjectFilter {
            prefab,
            min_distance: 0.0,
            max_distance,
            data: None,
            weight: 1,
            unresolved_data: false,
        }
    }

    /// Set the distance band. Equal bounds mean "within", so the minimum is dropped.
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min_distance = if min == max { 0.0 } else { min };
        self.max_distance = max;
        self
    }

    pub fn with_data(mut self, data: DataEntry) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    /// Parse `prefab, min-max, data, weight`
    pub fn parse(
        line: &str,
        prefabs: &dyn PrefabRegistry,
        groups: &ValueGroups,
        data: &DataRegistry,
        default_distance: f32,
    ) -> Self {
        let split = to_list(line);
        let prefab = split
            .first()
            .map_or(PrefabMatcher::Never, |p| PrefabMatcher::parse(p, prefabs, groups));
        let mut filter = ObjectFilter::new(prefab, default_distance);
        if let Some(range) = split.get(1) {
            match float_range(range) {
                Some((min, max)) => filter = filter.with_range(min, max),
                None => tracing::warn!("Invalid distance range: {}", range),
            }
        }
        if let Some(name) = split.get(2) {
            filter.set_data_name(name, data);
        }
        if let Some(weight) = split.get(3) {
            filter.weight = parse_int(weight).unwrap_or(1);
        }
        filter
    }

    /// Attach a named data filter. Unknown names make the filter match nothing.
    pub fn set_data_name(&mut self, name: &str, data: &DataRegistry) {
        if name.is_empty() {
            return;
        }
        match data.lookup(name) {
            Some(entry) => self.data = Some(entry),
            None => self.unresolved_data = true,
        }
    }

    /// Whether a candidate matches, measured from `reference` on the XZ plane
    pub fn matches(&self, candidate: &WorldObject, reference: Vec3, ctx: &FilterContext<'_>) -> bool {
        if self.unresolved_data {
            return false;
        }
        if !self.prefab.matches(candidate, ctx) {
            return false;
        }
        let d = distance_xz(reference, candidate.position);
        if self.min_distance > 0.0 && d < self.min_distance {
            return false;
        }
        if d > self.max_distance {
            return false;
        }
        match &self.data {
            Some(entry) => entry.matches(ctx.pars, Some(ctx.source(candidate)), candidate),
            None => true,
        }
    }
}

/// Required count of weighted matches. Without a maximum only the minimum applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRange {
    pub min: i32,
    pub max: Option<i32>,
}

impl CountRange {
    pub fn new(min: i32, max: Option<i32>) -> Self {
        CountRange { min, max }
    }

    /// Parse `min-max` or `min`. Empty text means no limit.
    pub fn parse(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        let parsed = int_range(text).map(|(min, max)| CountRange { min, max });
        if parsed.is_none() {
            tracing::warn!("Invalid count range: {}", text);
        }
        parsed
    }

    pub fn contains(&self, count: i32) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataValue;
    use crate::memory::MemoryWorld;
    use crate::template::Parameters;
    use crate::value::ResolvableValue;
    use crate::world::FieldValue;
    use crate::ObjectId;
    use glam::Quat;

    fn record(world: &MemoryWorld, name: &str, x: f32) -> WorldObject {
        let prefab = world.resolve(name).unwrap();
        WorldObject::new(ObjectId(7), prefab, Vec3::new(x, 0.0, 0.0), Quat::IDENTITY)
    }

    #[test]
    fn test_parse_line() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.register_prefab("Boar");
        let mut data = DataRegistry::new();
        data.insert(
            "tamed",
            DataEntry::new().with("tamed", DataValue::Bool(ResolvableValue::constant(true))),
        );

        let filter = ObjectFilter::parse("Boar, 5-20, tamed, 2", &world, &ValueGroups::new(), &data, 100.0);
        assert_eq!(filter.prefab, PrefabMatcher::Exact(PrefabHash::of("Boar")));
        assert_eq!(filter.min_distance, 5.0);
        assert_eq!(filter.max_distance, 20.0);
        assert!(filter.data.is_some());
        assert_eq!(filter.weight, 2);

        let within = ObjectFilter::parse("Boar, 20", &world, &ValueGroups::new(), &data, 100.0);
        assert_eq!(within.min_distance, 0.0);
        assert_eq!(within.max_distance, 20.0);

        let default = ObjectFilter::parse("Boar", &world, &ValueGroups::new(), &data, 100.0);
        assert_eq!(default.max_distance, 100.0);
    }

    #[test]
    fn test_distance_band() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.register_prefab("Boar");
        let pars = Parameters::new();
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);
        let filter = ObjectFilter::new(PrefabMatcher::Exact(PrefabHash::of("Boar")), 100.0).with_range(5.0, 20.0);

        assert!(!filter.matches(&record(&world, "Boar", 3.0), Vec3::ZERO, &ctx));
        assert!(filter.matches(&record(&world, "Boar", 10.0), Vec3::ZERO, &ctx));
        assert!(!filter.matches(&record(&world, "Boar", 25.0), Vec3::ZERO, &ctx));
    }

    #[test]
    fn test_unknown_data_never_matches() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.register_prefab("Boar");
        let filter = ObjectFilter::parse("Boar, 50, nonexistent", &world, &ValueGroups::new(), &DataRegistry::new(), 100.0);
        let pars = Parameters::new();
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);
        assert!(!filter.matches(&record(&world, "Boar", 1.0), Vec3::ZERO, &ctx));
    }

    #[test]
    fn test_templated_prefab() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.register_prefab("Boar");
        world.register_prefab("Wolf");
        let matcher = PrefabMatcher::parse("<par0>", &world, &ValueGroups::new());
        assert!(matches!(matcher, PrefabMatcher::Template(_)));

        let pars = Parameters::new().with("par0", "Wolf");
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);
        assert!(matcher.matches(&record(&world, "Wolf", 0.0), &ctx));
        assert!(!matcher.matches(&record(&world, "Boar", 0.0), &ctx));
    }

    #[test]
    fn test_prefab_sets_from_groups() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.register_prefab("Boar");
        world.register_prefab("Wolf");
        let mut groups = ValueGroups::new();
        groups.insert("animals", vec!["Boar".into(), "Wolf".into(), "Dragon".into()]);
        let matcher = PrefabMatcher::parse("<animals>", &world, &groups);
        let PrefabMatcher::Set(set) = matcher else {
            panic!("expected a set");
        };
        assert_eq!(set.len(), 2);
        assert_eq!(PrefabMatcher::parse("Dragon", &world, &groups), PrefabMatcher::Never);
    }

    #[test]
    fn test_data_filter_on_candidate() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.register_prefab("Boar");
        let filter = ObjectFilter::new(PrefabMatcher::Exact(PrefabHash::of("Boar")), 100.0)
            .with_data(DataEntry::new().with("tamed", DataValue::Bool(ResolvableValue::constant(true))));
        let pars = Parameters::new();
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);

        let wild = record(&world, "Boar", 1.0);
        let tame = record(&world, "Boar", 1.0).with_field("tamed", FieldValue::Bool(true));
        assert!(!filter.matches(&wild, Vec3::ZERO, &ctx));
        assert!(filter.matches(&tame, Vec3::ZERO, &ctx));
    }

    #[test]
    fn test_count_range() {
        assert_eq!(CountRange::parse("2-4"), Some(CountRange::new(2, Some(4))));
        assert_eq!(CountRange::parse("3"), Some(CountRange::new(3, None)));
        assert_eq!(CountRange::parse(""), None);
        assert!(CountRange::new(2, Some(4)).contains(4));
        assert!(!CountRange::new(2, Some(4)).contains(5));
        assert!(CountRange::new(3, None).contains(50));
    }
}
