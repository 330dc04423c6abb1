//! Rule table and first-match selection

use crate::config::EngineConfig;
use crate::filter::FilterContext;
use crate::host::Host;
use crate::rule::{Rule, RuleId, TriggerKind};
use crate::spatial::{has_nearby, has_not_nearby};
use crate::template::{resolve, FieldSource, Pars};
use crate::world::{distance_xz, WorldObject};
use crate::{Condition, Error, Result};
use glam::Vec3;
use std::collections::HashMap;
use std::sync::Arc;

/// What a rule is matched against
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub trigger: TriggerKind,
    /// Space separated event arguments
    pub args: &'a str,
    pub pars: Pars<'a>,
    pub position: Vec3,
    /// Triggering record, absent for global events
    pub record: Option<&'a WorldObject>,
    /// Registered name of the record's prefab
    pub prefab_name: &'a str,
    /// Remove flag of a global event
    pub remove: bool,
}

/// Registered rules, grouped by trigger kind in declaration order
#[derive(Debug, Default)]
pub struct RuleTable {
    by_trigger: HashMap<TriggerKind, Vec<Arc<Rule>>>,
    ids: HashMap<RuleId, TriggerKind>,
}

impl RuleTable {
    pub fn new() -> Self {
        RuleTable::default()
    }

    /// Append a rule after every rule already registered for its trigger
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        let id = rule.id().to_string();
        if self.ids.contains_key(&id) {
            return Err(Error::DuplicateRule(id));
        }
        self.ids.insert(id, rule.trigger());
        self.by_trigger
            .entry(rule.trigger())
            .or_default()
            .push(Arc::new(rule));
        Ok(())
    }

    /// Remove a rule by ID
    pub fn remove_rule(&mut self, id: &str) -> Result<Arc<Rule>> {
        let trigger = self
            .ids
            .remove(id)
            .ok_or_else(|| Error::RuleNotFound(id.to_string()))?;
        let rules = self.by_trigger.entry(trigger).or_default();
        let index = rules
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| Error::RuleNotFound(id.to_string()))?;
        Ok(rules.remove(index))
    }

    pub fn get_rule(&self, id: &str) -> Option<&Arc<Rule>> {
        let trigger = self.ids.get(id)?;
        self.by_trigger.get(trigger)?.iter().find(|r| r.id() == id)
    }

    pub fn rules_for(&self, trigger: TriggerKind) -> &[Arc<Rule>] {
        self.by_trigger.get(&trigger).map_or(&[], Vec::as_slice)
    }

    pub fn rule_count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Select the rule for an object event.
    ///
    /// Single pass in declaration order: the first matching regular rule wins
    /// immediately, the first matching fallback rule is kept in case none does.
    pub fn select<H: Host>(&self, host: &H, ctx: &MatchContext<'_>, config: &EngineConfig) -> Option<Arc<Rule>> {
        let record = ctx.record?;
        let mut fallback = None;
        for rule in self.rules_for(ctx.trigger) {
            if !rule.is_enabled() {
                continue;
            }
            if !rule.prefabs().matches(record.prefab, ctx.prefab_name) {
                continue;
            }
            if !rule.matches_args(ctx.args) {
                continue;
            }
            if !matches(rule, host, ctx, config) {
                continue;
            }
            if rule.is_fallback() {
                if fallback.is_none() {
                    fallback = Some(rule.clone());
                }
                continue;
            }
            tracing::trace!("Rule {} selected for {}", rule.id(), record.id);
            return Some(rule.clone());
        }
        fallback
    }

    /// Select the rule for a global event. Identity and record conditions are
    /// skipped; the rule's remove flag must equal the event's.
    pub fn select_global<H: Host>(
        &self,
        host: &H,
        ctx: &MatchContext<'_>,
        config: &EngineConfig,
    ) -> Option<Arc<Rule>> {
        let mut fallback = None;
        for rule in self.rules_for(ctx.trigger) {
            if !rule.is_enabled() || rule.remove_event() != ctx.remove {
                continue;
            }
            if !rule.matches_args(ctx.args) {
                continue;
            }
            if !matches(rule, host, ctx, config) {
                continue;
            }
            if rule.is_fallback() {
                if fallback.is_none() {
                    fallback = Some(rule.clone());
                }
                continue;
            }
            return Some(rule.clone());
        }
        fallback
    }
}

/// Check if every condition of a rule holds (empty conditions always match)
pub fn matches<H: Host>(rule: &Rule, host: &H, ctx: &MatchContext<'_>, config: &EngineConfig) -> bool {
    rule.conditions()
        .iter()
        .all(|c| evaluate_condition(c, host, ctx, config))
}

/// Evaluate a single condition
pub fn evaluate_condition<H: Host>(
    condition: &Condition,
    host: &H,
    ctx: &MatchContext<'_>,
    config: &EngineConfig,
) -> bool {
    let position = ctx.position;
    let source = ctx.record.map(|r| FieldSource::new(r, host, host));
    match condition {
        Condition::TimeOfDay { day, night } => {
            if host.is_day() {
                *day
            } else {
                *night
            }
        }

        Condition::Biomes(biomes) => biomes.contains(&host.biome_at(position).to_lowercase()),

        Condition::Environments(envs) => envs.contains(&host.environment().to_lowercase()),

        Condition::BannedEnvironments(envs) => !envs.contains(&host.environment().to_lowercase()),

        Condition::GlobalKeys(keys) => keys
            .iter()
            .all(|k| host.has_global_key(&resolve(k, ctx.pars, source))),

        Condition::BannedGlobalKeys(keys) => !keys
            .iter()
            .any(|k| host.has_global_key(&resolve(k, ctx.pars, source))),

        Condition::Events { names, distance } => host
            .active_events()
            .iter()
            .any(|(name, pos)| names.contains(&name.to_lowercase()) && distance_xz(position, *pos) <= *distance),

        Condition::Objects { filters, limit } => {
            let filter_ctx = FilterContext::new(ctx.pars, host, host);
            let exclude = ctx.record.map(|r| r.id);
            has_nearby(host, filters, *limit, position, exclude, &filter_ctx)
        }

        Condition::BannedObjects { filters, limit } => {
            let filter_ctx = FilterContext::new(ctx.pars, host, host);
            let exclude = ctx.record.map(|r| r.id);
            has_not_nearby(host, filters, *limit, position, exclude, &filter_ctx)
        }

        Condition::Locations { names, distance } => host
            .locations_near(position, *distance)
            .iter()
            .any(|name| names.contains(&name.to_lowercase())),

        Condition::Distance { min, max } => {
            let d = distance_xz(Vec3::ZERO, position);
            d >= *min && d <= *max
        }

        Condition::Altitude { min, max } => {
            let altitude = position.y - config.water_level;
            altitude >= *min && altitude <= *max
        }

        Condition::Height { min, max } => position.y >= *min && position.y <= *max,

        Condition::Paint { min, max } => {
            let paint = host.paint_at(position.x, position.z);
            paint.cmpge(*min).all() && paint.cmple(*max).all()
        }

        // Record conditions pass when there is no record (global events)
        Condition::Filter(data) => match ctx.record {
            Some(record) => data.matches(ctx.pars, source, record),
            None => true,
        },

        Condition::BannedFilter(data) => match ctx.record {
            Some(record) => !data.matches(ctx.pars, source, record),
            None => true,
        },

        Condition::Never => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;
    use crate::rule::PrefabSet;
    use crate::template::Parameters;
    use crate::PrefabHash;

    fn ctx<'a>(
        trigger: TriggerKind,
        pars: &'a Parameters,
        record: Option<&'a WorldObject>,
        name: &'a str,
    ) -> MatchContext<'a> {
        MatchContext {
            trigger,
            args: "",
            pars: Pars::new(pars),
            position: record.map_or(Vec3::ZERO, |r| r.position),
            record,
            prefab_name: name,
            remove: false,
        }
    }

    #[test]
    fn test_table_add_remove() {
        let mut table = RuleTable::new();
        table.add_rule(Rule::new("a", TriggerKind::Create)).unwrap();
        assert!(matches!(
            table.add_rule(Rule::new("a", TriggerKind::Poke)),
            Err(Error::DuplicateRule(_))
        ));
        assert_eq!(table.rule_count(), 1);
        assert!(table.get_rule("a").is_some());
        assert!(table.remove_rule("a").is_ok());
        assert!(matches!(table.remove_rule("a"), Err(Error::RuleNotFound(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_day_rule_skipped_at_night() {
        let mut world = MemoryWorld::new(64.0, 4);
        let id = world.spawn("Boar", Vec3::ZERO);
        world.set_day(false);
        let mut table = RuleTable::new();
        table
            .add_rule(Rule::new("day", TriggerKind::Create).when(Condition::time_of_day(true, false)))
            .unwrap();
        table.add_rule(Rule::new("any", TriggerKind::Create)).unwrap();

        let pars = Parameters::new();
        let record = world.get_record(id);
        let selected = table.select(&world, &ctx(TriggerKind::Create, &pars, Some(&record), "Boar"), &EngineConfig::default());
        assert_eq!(selected.unwrap().id(), "any");
    }

    #[test]
    fn test_fallback_only_without_regular_match() {
        let mut world = MemoryWorld::new(64.0, 4);
        let boar = world.spawn("Boar", Vec3::ZERO);
        let wolf = world.spawn("Wolf", Vec3::ZERO);
        let mut table = RuleTable::new();
        table
            .add_rule(Rule::new("fallback", TriggerKind::Create).as_fallback())
            .unwrap();
        table
            .add_rule(Rule::new("boar", TriggerKind::Create).for_prefabs(PrefabSet::of([PrefabHash::of("Boar")])))
            .unwrap();

        let pars = Parameters::new();
        let config = EngineConfig::default();
        let boar = world.get_record(boar);
        let wolf = world.get_record(wolf);
        let picked = table.select(&world, &ctx(TriggerKind::Create, &pars, Some(&boar), "Boar"), &config);
        assert_eq!(picked.unwrap().id(), "boar");
        let picked = table.select(&world, &ctx(TriggerKind::Create, &pars, Some(&wolf), "Wolf"), &config);
        assert_eq!(picked.unwrap().id(), "fallback");
    }

    #[test]
    fn test_global_remove_flag() {
        let world = MemoryWorld::new(64.0, 4);
        let mut table = RuleTable::new();
        table
            .add_rule(Rule::new("start", TriggerKind::Event).with_args(["army_*"]))
            .unwrap();
        table
            .add_rule(
                Rule::new("end", TriggerKind::Event)
                    .with_args(["army_*"])
                    .on_remove_event(true),
            )
            .unwrap();
        let pars = Parameters::new();
        let config = EngineConfig::default();
        let mut event = ctx(TriggerKind::Event, &pars, None, "");
        event.args = "army_eikthyr";
        assert_eq!(table.select_global(&world, &event, &config).unwrap().id(), "start");
        event.remove = true;
        assert_eq!(table.select_global(&world, &event, &config).unwrap().id(), "end");
        event.args = "foo";
        assert!(table.select_global(&world, &event, &config).is_none());
    }

    #[test]
    fn test_environment_conditions() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.set_biome("Meadows");
        world.set_environment("Rain");
        world.set_global_key("defeated_eikthyr", "");
        let config = EngineConfig::default();
        let pars = Parameters::new();
        let c = ctx(TriggerKind::Time, &pars, None, "");

        assert!(evaluate_condition(&Condition::biomes(["meadows"]), &world, &c, &config));
        assert!(!evaluate_condition(&Condition::biomes(["Swamp"]), &world, &c, &config));
        assert!(evaluate_condition(&Condition::Environments(Condition::names(["rain"])), &world, &c, &config));
        assert!(!evaluate_condition(&Condition::BannedEnvironments(Condition::names(["Rain"])), &world, &c, &config));
        assert!(evaluate_condition(&Condition::GlobalKeys(vec!["defeated_eikthyr".into()]), &world, &c, &config));
        assert!(!evaluate_condition(&Condition::BannedGlobalKeys(vec!["defeated_eikthyr".into()]), &world, &c, &config));
    }

    #[test]
    fn test_height_bands() {
        let world = MemoryWorld::new(64.0, 4);
        let config = EngineConfig::default();
        let pars = Parameters::new();
        let mut c = ctx(TriggerKind::Time, &pars, None, "");
        c.position = Vec3::new(300.0, 40.0, 400.0);

        assert!(evaluate_condition(&Condition::Altitude { min: 5.0, max: 15.0 }, &world, &c, &config));
        assert!(evaluate_condition(&Condition::Height { min: 35.0, max: 45.0 }, &world, &c, &config));
        assert!(evaluate_condition(&Condition::Distance { min: 499.0, max: 501.0 }, &world, &c, &config));
        assert!(!evaluate_condition(&Condition::Distance { min: 0.0, max: 400.0 }, &world, &c, &config));
    }

    #[test]
    fn test_paint_condition() {
        let mut world = MemoryWorld::new(64.0, 4);
        let config = EngineConfig::default();
        let pars = Parameters::new();
        let c = ctx(TriggerKind::Time, &pars, None, "");
        let cultivated = Condition::Paint {
            min: glam::Vec4::new(0.0, 0.9, 0.0, 0.0),
            max: glam::Vec4::ONE,
        };

        assert!(!evaluate_condition(&cultivated, &world, &c, &config));
        world.set_paint(glam::Vec4::new(0.0, 1.0, 0.0, 1.0));
        assert!(evaluate_condition(&cultivated, &world, &c, &config));
    }

    #[test]
    fn test_events_within_distance() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.add_event("army_moder", Vec3::new(50.0, 0.0, 0.0));
        let config = EngineConfig::default();
        let pars = Parameters::new();
        let c = ctx(TriggerKind::Time, &pars, None, "");
        let near = Condition::Events {
            names: Condition::names(["Army_Moder"]),
            distance: 100.0,
        };
        let far = Condition::Events {
            names: Condition::names(["army_moder"]),
            distance: 10.0,
        };
        assert!(evaluate_condition(&near, &world, &c, &config));
        assert!(!evaluate_condition(&far, &world, &c, &config));
    }
}
