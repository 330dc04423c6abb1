//! Rule engine entry points

use crate::config::EngineConfig;
use crate::dispatch::ScheduledTask;
use crate::host::Host;
use crate::rule::{Rule, TriggerKind};
use crate::scheduler::Scheduler;
use crate::selector::{MatchContext, RuleTable};
use crate::template::{Parameters, Pars};
use crate::world::ObjectId;
use crate::Result;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// The rule engine reacts to object and world events.
///
/// Events select at most one rule. Its commands run immediately; everything
/// else is queued and carried out by [`RuleEngine::tick`], which the host
/// calls once per simulation tick.
#[derive(Debug)]
pub struct RuleEngine {
    pub(crate) config: EngineConfig,
    pub(crate) table: RuleTable,
    pub(crate) scheduler: Scheduler<ScheduledTask>,
    /// Replaced record -> replacement
    pub(crate) links: HashMap<ObjectId, ObjectId>,
    /// Records with a removal already queued
    pub(crate) pending_removals: HashSet<ObjectId>,
    pub(crate) rng: StdRng,
}

impl Default for RuleEngine {
    fn default() -> Self {
        RuleEngine::new(EngineConfig::default())
    }
}

impl RuleEngine {
    pub fn new(config: EngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        RuleEngine {
            config,
            table: RuleTable::new(),
            scheduler: Scheduler::new(),
            links: HashMap::new(),
            pending_removals: HashSet::new(),
            rng,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add a rule after all rules of its trigger kind
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        self.table.add_rule(rule)
    }

    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = Rule>) -> Result<()> {
        for rule in rules {
            self.table.add_rule(rule)?;
        }
        Ok(())
    }

    /// Remove a rule from the engine
    pub fn remove_rule(&mut self, id: &str) -> Result<Arc<Rule>> {
        self.table.remove_rule(id)
    }

    pub fn rules(&self) -> &RuleTable {
        &self.table
    }

    /// Get the number of rules
    pub fn rule_count(&self) -> usize {
        self.table.rule_count()
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    /// World time at which the next queued task falls due
    pub fn next_due(&self) -> Option<f64> {
        self.scheduler.next_due()
    }

    /// Direct replacement of a swapped or regenerated record
    pub fn replacement(&self, id: ObjectId) -> Option<ObjectId> {
        self.links.get(&id).copied()
    }

    /// Follow replacements to the newest record
    pub fn latest(&self, id: ObjectId) -> ObjectId {
        let mut current = id;
        for _ in 0..=self.links.len() {
            match self.links.get(&current) {
                Some(next) => current = *next,
                None => break,
            }
        }
        current
    }

    /// Handle an event on an object record.
    ///
    /// `source` is the record that caused the event, if any; it is exposed to
    /// templates as `<source>` and `<sourceprefab>`.
    pub fn handle<H: Host>(
        &mut self,
        host: &mut H,
        trigger: TriggerKind,
        args: &str,
        id: ObjectId,
        source: Option<ObjectId>,
    ) {
        if host.is_dead(id) {
            trace!("Skipping {} on destroyed {}", trigger, id);
            return;
        }
        if !self.config.is_server {
            return;
        }
        let Some(record) = host.get(id) else {
            trace!("Skipping {} on unknown {}", trigger, id);
            return;
        };
        let name = host.name(record.prefab).unwrap_or_default().to_string();
        let mut pars = Parameters::for_object(&name, args, record, &*host, &*host, host.sector_size());
        if let Some(src) = source.and_then(|s| host.get(s)) {
            pars.insert("source", src.id.to_string());
            pars.insert("sourceprefab", host.name(src.prefab).unwrap_or_default());
        }

        let ctx = MatchContext {
            trigger,
            args,
            pars: Pars::new(&pars),
            position: record.position,
            record: Some(record),
            prefab_name: &name,
            remove: false,
        };
        let Some(rule) = self.table.select(&*host, &ctx, &self.config) else {
            return;
        };
        debug!("{} on {} ({}) selected rule {}", trigger, name, id, rule.id());
        self.dispatch_object(host, &rule, id, &pars);
    }

    /// Handle an event with no object record: commands, time, global keys,
    /// world events. `remove` marks the end of the event.
    pub fn handle_global<H: Host>(
        &mut self,
        host: &mut H,
        trigger: TriggerKind,
        args: &str,
        position: Vec3,
        remove: bool,
    ) {
        if !self.config.is_server {
            return;
        }
        let pars = Parameters::for_position(args, position, &*host, host.sector_size());
        let ctx = MatchContext {
            trigger,
            args,
            pars: Pars::new(&pars),
            position,
            record: None,
            prefab_name: "",
            remove,
        };
        let Some(rule) = self.table.select_global(&*host, &ctx, &self.config) else {
            return;
        };
        debug!("Global {} ({}) selected rule {}", trigger, args, rule.id());
        self.dispatch_global(host, &rule, position, &pars);
    }

    /// Run every queued task that is due. Tasks queued while ticking wait for
    /// the next tick. Returns the number of tasks run.
    pub fn tick<H: Host>(&mut self, host: &mut H) -> usize {
        let now = host.time();
        let limit = self.scheduler.next_sequence();
        let mut executed = 0;
        while let Some(task) = self.scheduler.pop_due_before(now, limit) {
            self.execute(host, task);
            executed += 1;
        }
        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ObjectStore;
    use crate::memory::MemoryWorld;
    use crate::{Action, Error};

    fn engine() -> RuleEngine {
        RuleEngine::new(EngineConfig::default().with_seed(7))
    }

    #[test]
    fn test_engine_add_rule() {
        let mut engine = engine();
        assert!(engine.add_rule(Rule::new("test", TriggerKind::Create)).is_ok());
        assert_eq!(engine.rule_count(), 1);

        // Duplicate should fail
        let dup = Rule::new("test", TriggerKind::Poke);
        assert!(matches!(engine.add_rule(dup), Err(Error::DuplicateRule(_))));
    }

    #[test]
    fn test_engine_remove_rule() {
        let mut engine = engine();
        engine.add_rule(Rule::new("test", TriggerKind::Create)).unwrap();
        assert!(engine.remove_rule("test").is_ok());
        assert_eq!(engine.rule_count(), 0);
        assert!(matches!(engine.remove_rule("test"), Err(Error::RuleNotFound(_))));
    }

    #[test]
    fn test_commands_run_immediately() {
        let mut engine = engine();
        engine
            .add_rule(Rule::new("greet", TriggerKind::Say).then(Action::command("say <prefab> <par>")))
            .unwrap();
        let mut world = MemoryWorld::new(64.0, 4);
        let id = world.spawn("Raven", Vec3::ZERO);

        engine.handle(&mut world, TriggerKind::Say, "hello there", id, None);
        assert_eq!(world.commands, vec!["say Raven hello there".to_string()]);
    }

    #[test]
    fn test_dead_records_are_skipped() {
        let mut engine = engine();
        engine
            .add_rule(Rule::new("any", TriggerKind::Poke).then(Action::command("noop")))
            .unwrap();
        let mut world = MemoryWorld::new(64.0, 4);
        let id = world.spawn("Raven", Vec3::ZERO);
        world.mark_dead(id);

        engine.handle(&mut world, TriggerKind::Poke, "", id, None);
        assert!(world.commands.is_empty());
    }

    #[test]
    fn test_clients_ignore_events() {
        let config = EngineConfig {
            is_server: false,
            ..EngineConfig::default()
        };
        let mut engine = RuleEngine::new(config);
        engine
            .add_rule(Rule::new("any", TriggerKind::Create).then(Action::command("noop")))
            .unwrap();
        let mut world = MemoryWorld::new(64.0, 4);
        let id = world.spawn("Raven", Vec3::ZERO);

        engine.handle(&mut world, TriggerKind::Create, "", id, None);
        engine.handle_global(&mut world, TriggerKind::Time, "", Vec3::ZERO, false);
        assert!(world.commands.is_empty());
    }

    #[test]
    fn test_source_parameters() {
        let mut engine = engine();
        engine
            .add_rule(Rule::new("hit", TriggerKind::Damage).then(Action::command("hit by <sourceprefab> <source>")))
            .unwrap();
        let mut world = MemoryWorld::new(64.0, 4);
        let target = world.spawn("Raven", Vec3::ZERO);
        let attacker = world.spawn("Troll", Vec3::ONE);

        engine.handle(&mut world, TriggerKind::Damage, "", target, Some(attacker));
        assert_eq!(world.commands, vec![format!("hit by Troll {attacker}")]);
    }

    #[test]
    fn test_next_due_tracks_queue() {
        let mut engine = engine();
        engine
            .add_rule(
                Rule::new("fade", TriggerKind::Damage).with_lifecycle(crate::Lifecycle {
                    remove: true,
                    remove_delay: 4.0,
                    ..crate::Lifecycle::default()
                }),
            )
            .unwrap();
        let mut world = MemoryWorld::new(64.0, 4);
        let id = world.spawn("Raven", Vec3::ZERO);
        assert_eq!(engine.next_due(), None);

        engine.handle(&mut world, TriggerKind::Damage, "", id, None);
        assert_eq!(engine.next_due(), Some(4.0));
        world.advance(4.0);
        engine.tick(&mut world);
        assert_eq!(engine.next_due(), None);
    }

    #[test]
    fn test_latest_follows_chain() {
        let mut engine = engine();
        engine.links.insert(ObjectId(1), ObjectId(2));
        engine.links.insert(ObjectId(2), ObjectId(3));
        assert_eq!(engine.replacement(ObjectId(1)), Some(ObjectId(2)));
        assert_eq!(engine.latest(ObjectId(1)), ObjectId(3));
        assert_eq!(engine.latest(ObjectId(9)), ObjectId(9));
    }
}
