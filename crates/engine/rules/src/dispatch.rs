//! Action dispatch and execution of queued work

use crate::action::{encode_args, Action, PokeAction, RpcAction, RpcTarget, SpawnAction};
use crate::data::DataEntry;
use crate::engine::RuleEngine;
use crate::filter::FilterContext;
use crate::hash::PrefabHash;
use crate::host::Host;
use crate::rule::{Rule, TriggerKind};
use crate::spatial::nearby;
use crate::template::{resolve, FieldSource, Parameters, Pars};
use crate::world::{distance_xz, ObjectId, WorldObject};
use glam::{Quat, Vec3};
use tracing::{debug, error, trace, warn};

/// An object creation waiting for its delay
#[derive(Debug, Clone)]
pub struct PendingSpawn {
    pub prefab: PrefabHash,
    pub position: Vec3,
    pub rotation: Quat,
    /// Owner of the source record, reassigned on execution
    pub owner: i64,
    pub data: Option<DataEntry>,
    /// Event parameters captured at dispatch
    pub pars: Parameters,
    pub object_pars: Parameters,
    pub trigger_rules: bool,
    /// Record this spawn replaces, linked once created
    pub replaces: Option<ObjectId>,
    /// Snapshot of the triggering record for field directives in the data
    pub source: Option<WorldObject>,
}

/// Work queued by dispatch
#[derive(Debug, Clone)]
pub enum ScheduledTask {
    Spawn(PendingSpawn),
    Remove {
        id: ObjectId,
        trigger_rules: bool,
    },
    Poke {
        targets: Vec<ObjectId>,
        parameter: String,
    },
    Rpc {
        source: i64,
        target: i64,
        object: Option<ObjectId>,
        procedure: i32,
        args: Vec<u8>,
    },
}

fn field_source<'a, H: Host>(record: &'a WorldObject, host: &'a H) -> FieldSource<'a> {
    FieldSource::new(record, host, host)
}

fn commands(rule: &Rule) -> impl Iterator<Item = &String> {
    rule.actions().iter().filter_map(|a| match a {
        Action::Command(command) => Some(command),
        _ => None,
    })
}

fn object_rpcs(rule: &Rule) -> impl Iterator<Item = &RpcAction> {
    rule.actions().iter().filter_map(|a| match a {
        Action::ObjectRpc(rpc) => Some(rpc),
        _ => None,
    })
}

fn client_rpcs(rule: &Rule) -> impl Iterator<Item = &RpcAction> {
    rule.actions().iter().filter_map(|a| match a {
        Action::ClientRpc(rpc) => Some(rpc),
        _ => None,
    })
}

fn spawns(rule: &Rule) -> impl Iterator<Item = &SpawnAction> {
    rule.actions().iter().filter_map(|a| match a {
        Action::Spawn(spawn) => Some(spawn),
        _ => None,
    })
}

fn swaps(rule: &Rule) -> impl Iterator<Item = &SpawnAction> {
    rule.actions().iter().filter_map(|a| match a {
        Action::Swap(spawn) => Some(spawn),
        _ => None,
    })
}

fn pokes(rule: &Rule) -> impl Iterator<Item = &PokeAction> {
    rule.actions().iter().filter_map(|a| match a {
        Action::Poke(poke) => Some(poke),
        _ => None,
    })
}

/// Owner of a created record. A dedicated server hands its own records to
/// the closest other peer, or to nobody.
fn assign_owner<H: Host>(host: &H, owner: i64, position: Vec3) -> i64 {
    if !host.is_dedicated() || owner != host.session_id() {
        return owner;
    }
    host.peers()
        .iter()
        .filter(|p| p.uid != owner)
        .min_by(|a, b| {
            distance_xz(a.position, position).total_cmp(&distance_xz(b.position, position))
        })
        .map_or(0, |p| p.uid)
}

impl RuleEngine {
    /// Carry out a selected rule on an object record
    pub(crate) fn dispatch_object<H: Host>(&mut self, host: &mut H, rule: &Rule, id: ObjectId, pars: &Parameters) {
        let Some(record) = host.get(id).cloned() else {
            return;
        };
        let now = host.time();
        let lifecycle = rule.lifecycle();

        for command in commands(rule) {
            let text = resolve(command, Pars::new(pars), Some(field_source(&record, &*host)));
            debug!("Running command: {}", text);
            host.run(&text);
        }

        for rpc in object_rpcs(rule) {
            self.schedule_rpc(&*host, rpc, Some(id), Some(&record), pars, now);
        }
        for rpc in client_rpcs(rule) {
            self.schedule_rpc(&*host, rpc, None, Some(&record), pars, now);
        }

        let custom = lifecycle.data.as_ref();
        for spawn in spawns(rule) {
            self.schedule_spawn(&*host, spawn, &record, custom, pars, lifecycle.trigger_rules, None, now);
        }

        let swaps: Vec<&SpawnAction> = swaps(rule).collect();
        // A swap already replaces the record
        let regenerate = swaps.is_empty() && lifecycle.regenerates();
        if !swaps.is_empty() || regenerate {
            let merged = DataEntry::merge(Some(&DataEntry::from_record(&record)), custom);
            for swap in &swaps {
                self.schedule_spawn(&*host, swap, &record, merged.as_ref(), pars, lifecycle.trigger_rules, Some(id), now);
            }
            if regenerate {
                let source = field_source(&record, &*host);
                let object_pars = merged
                    .as_ref()
                    .map(|d| d.parameters(&mut self.rng, Pars::new(pars), Some(source)))
                    .unwrap_or_default();
                trace!("Regenerating {}", id);
                self.scheduler.push(
                    now,
                    ScheduledTask::Spawn(PendingSpawn {
                        prefab: record.prefab,
                        position: record.position,
                        rotation: record.rotation,
                        owner: record.owner,
                        data: merged,
                        pars: pars.clone(),
                        object_pars,
                        trigger_rules: false,
                        replaces: Some(id),
                        source: Some(record.clone()),
                    }),
                );
            }
        }

        for poke in pokes(rule) {
            self.schedule_poke(&*host, poke, record.position, Some(&record), pars, now);
        }

        if rule.actions().iter().any(|a| matches!(a, Action::Drops)) {
            host.spawn_drops(id);
        }

        let swapped = !swaps.is_empty();
        if lifecycle.removes() || swapped {
            let due = now + lifecycle.remove_delay as f64;
            self.schedule_remove(id, due, (lifecycle.remove || swapped) && lifecycle.trigger_rules);
        } else if lifecycle.inject_data {
            if let Some(data) = &lifecycle.data {
                self.inject(host, data, &record, pars);
            }
        }
    }

    /// Carry out a selected rule for a global event
    pub(crate) fn dispatch_global<H: Host>(&mut self, host: &mut H, rule: &Rule, position: Vec3, pars: &Parameters) {
        let now = host.time();
        for command in commands(rule) {
            let text = resolve(command, Pars::new(pars), None);
            debug!("Running command: {}", text);
            host.run(&text);
        }
        for rpc in client_rpcs(rule) {
            self.schedule_rpc(&*host, rpc, None, None, pars, now);
        }
        for poke in pokes(rule) {
            self.schedule_poke(&*host, poke, position, None, pars, now);
        }
    }

    /// Write data into a live record and push it to observers
    fn inject<H: Host>(&mut self, host: &mut H, data: &DataEntry, record: &WorldObject, pars: &Parameters) {
        let source = field_source(record, &*host);
        let object_pars = data.parameters(&mut self.rng, Pars::new(pars), Some(source));
        let fields = data.resolve_fields(&mut self.rng, Pars::with_object(pars, &object_pars), Some(source));
        let increment = self.config.revision_increment;
        let Some(target) = host.get_mut(record.id) else {
            return;
        };
        data.apply(target, fields);
        target.revision = target.revision.wrapping_add(increment);
        host.force_send(record.id);
        debug!("Injected data into {}", record.id);
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_spawn<H: Host>(
        &mut self,
        host: &H,
        spawn: &SpawnAction,
        record: &WorldObject,
        data: Option<&DataEntry>,
        pars: &Parameters,
        trigger_rules: bool,
        replaces: Option<ObjectId>,
        now: f64,
    ) {
        let mut position = record.position + record.rotation * spawn.offset;
        let rotation = record.rotation * spawn.rotation;
        if spawn.snap {
            position.y = host.height_at(position.x, position.z);
        }
        let data = DataEntry::merge(data, spawn.data.as_ref());
        let source = field_source(record, host);
        let object_pars = data
            .as_ref()
            .map(|d| d.parameters(&mut self.rng, Pars::new(pars), Some(source)))
            .unwrap_or_default();
        let Some(prefab) = spawn
            .prefab
            .resolve(Pars::with_object(pars, &object_pars), Some(source), host)
        else {
            error!("Can't spawn missing prefab: {}", spawn.prefab.describe(host));
            return;
        };
        self.scheduler.push(
            now + spawn.delay as f64,
            ScheduledTask::Spawn(PendingSpawn {
                prefab,
                position,
                rotation,
                owner: record.owner,
                data,
                pars: pars.clone(),
                object_pars,
                trigger_rules,
                replaces,
                source: Some(record.clone()),
            }),
        );
    }

    fn schedule_rpc<H: Host>(
        &mut self,
        host: &H,
        rpc: &RpcAction,
        object: Option<ObjectId>,
        record: Option<&WorldObject>,
        pars: &Parameters,
        now: f64,
    ) {
        let source = record.map(|r| field_source(r, host));
        let p = Pars::new(pars);
        let sender = match &rpc.source {
            Some(template) => match resolve(template, p, source).trim().parse::<i64>() {
                Ok(uid) => uid,
                Err(_) => {
                    warn!("Invalid source of {}: {}", rpc.name, template);
                    return;
                }
            },
            None => host.session_id(),
        };
        let target = match &rpc.target {
            RpcTarget::Owner => record.map_or(0, |r| r.owner),
            RpcTarget::All => 0,
            RpcTarget::Peer(template) => match resolve(template, p, source).trim().parse::<i64>() {
                Ok(uid) => uid,
                Err(_) => {
                    warn!("Invalid target of {}: {}", rpc.name, template);
                    return;
                }
            },
        };
        let values: Vec<_> = rpc.args.iter().map(|a| a.resolve(&mut self.rng, p, source)).collect();
        let args = match encode_args(&values) {
            Ok(args) => args,
            Err(err) => {
                warn!("Failed to encode arguments of {}: {}", rpc.name, err);
                return;
            }
        };
        trace!("Queued {} from {} to {}", rpc.name, sender, target);
        self.scheduler.push(
            now + rpc.delay as f64,
            ScheduledTask::Rpc {
                source: sender,
                target,
                object,
                procedure: rpc.procedure,
                args,
            },
        );
    }

    fn schedule_poke<H: Host>(
        &mut self,
        host: &H,
        poke: &PokeAction,
        position: Vec3,
        record: Option<&WorldObject>,
        pars: &Parameters,
        now: f64,
    ) {
        let ctx = FilterContext::new(Pars::new(pars), host, host);
        let targets = nearby(host, &poke.filters, position, poke.limit, None, &ctx);
        if targets.is_empty() {
            return;
        }
        let parameter = resolve(&poke.parameter, Pars::new(pars), record.map(|r| field_source(r, host)));
        trace!("Poking {} objects with '{}'", targets.len(), parameter);
        self.scheduler.push(now + poke.delay as f64, ScheduledTask::Poke { targets, parameter });
    }

    fn schedule_remove(&mut self, id: ObjectId, due: f64, trigger_rules: bool) {
        if !self.pending_removals.insert(id) {
            trace!("{} already pending removal", id);
            return;
        }
        self.scheduler.push(due, ScheduledTask::Remove { id, trigger_rules });
    }

    pub(crate) fn execute<H: Host>(&mut self, host: &mut H, task: ScheduledTask) {
        match task {
            ScheduledTask::Spawn(spawn) => self.execute_spawn(host, spawn),
            ScheduledTask::Remove { id, trigger_rules } => self.execute_remove(host, id, trigger_rules),
            ScheduledTask::Poke { targets, parameter } => {
                for id in targets {
                    self.handle(host, TriggerKind::Poke, &parameter, id, None);
                }
            }
            ScheduledTask::Rpc {
                source,
                target,
                object,
                procedure,
                args,
            } => {
                if let Some(id) = object {
                    if host.is_dead(id) || host.get(id).is_none() {
                        trace!("Dropping call on removed {}", id);
                        return;
                    }
                }
                host.send(source, target, object, procedure, &args);
            }
        }
    }

    fn execute_spawn<H: Host>(&mut self, host: &mut H, spawn: PendingSpawn) {
        if !host.contains(spawn.prefab) {
            error!("Can't spawn missing prefab: {}", spawn.prefab);
            return;
        }
        let owner = assign_owner(&*host, spawn.owner, spawn.position);
        let id = host.create(spawn.prefab, spawn.position, spawn.rotation, owner, spawn.trigger_rules);
        if let Some(data) = &spawn.data {
            let source = spawn.source.as_ref().map(|r| field_source(r, &*host));
            let fields = data.resolve_fields(&mut self.rng, Pars::with_object(&spawn.pars, &spawn.object_pars), source);
            if let Some(created) = host.get_mut(id) {
                data.apply(created, fields);
            }
        }
        if let Some(original) = spawn.replaces {
            debug!("{} replaced by {}", original, id);
            self.links.insert(original, id);
        }
    }

    fn execute_remove<H: Host>(&mut self, host: &mut H, id: ObjectId, trigger_rules: bool) {
        self.pending_removals.remove(&id);
        if host.is_dead(id) {
            trace!("{} already destroyed", id);
            return;
        }
        let session = host.session_id();
        let Some(record) = host.get_mut(id) else {
            return;
        };
        record.owner = session;
        if !trigger_rules {
            host.mark_dead(id);
        }
        host.destroy(id);
        debug!("Removed {}", id);
    }
}
