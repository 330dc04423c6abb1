//! Rule records and their compilation into rules
//!
//! Records mirror the configuration file format: every field is optional and
//! names are camelCase. Compilation resolves prefab names, data names and value
//! groups once, logging what cannot be resolved. A record that cannot be
//! compiled at all is skipped; the rest of the set still loads.

use crate::action::{Action, PokeAction, RpcAction, RpcArg, RpcTarget, SpawnAction};
use crate::config::EngineConfig;
use crate::data::{DataEntry, DataRegistry, DataValue};
use crate::engine::RuleEngine;
use crate::filter::{CountRange, ObjectFilter, PrefabMatcher};
use crate::host::PrefabRegistry;
use crate::items::{ItemData, ItemList};
use crate::parse::{format_number, parse_float, parse_paint, to_list};
use crate::rule::{Lifecycle, PrefabSet, Rule, TriggerKind};
use crate::value::{split_with_values, ResolvableValue, ValueGroups};
use crate::world::FieldKind;
use crate::{Condition, Error, Result};
use glam::Vec4;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_DISTANCE: f32 = 100_000.0;
const DEFAULT_MIN_ALTITUDE: f32 = -10_000.0;
const DEFAULT_MAX_ALTITUDE: f32 = 10_000.0;

/// A complete rule file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleSet {
    pub value_groups: Vec<ValueGroupData>,
    pub data: Vec<DataData>,
    pub rules: Vec<RuleData>,
}

/// Named list of values, referenced as `<name>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueGroupData {
    pub name: String,
    /// Each entry may itself be a comma separated list
    pub values: Vec<String>,
}

/// Named data entry. Typed fields are written as `key, value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataData {
    pub name: String,
    pub ints: Vec<String>,
    pub floats: Vec<String>,
    pub longs: Vec<String>,
    pub strings: Vec<String>,
    pub bools: Vec<String>,
    pub hashes: Vec<String>,
    pub vecs: Vec<String>,
    pub quats: Vec<String>,
    /// Base64 blobs
    pub bytes: Vec<String>,
    pub refs: Vec<String>,
    /// Keys that only need to be present
    pub exists: Vec<String>,
    /// Object-scoped template parameters, `name, value`
    pub parameters: Vec<String>,
    pub persistent: Option<bool>,
    /// Container contents written to the `items` field
    pub items: Vec<ItemData>,
    /// Container slots as `columns, rows`
    pub container_size: String,
    /// Number of items drawn by weight, each item rolls its own chance when empty
    pub item_amount: String,
}

/// Targeted poke
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PokeData {
    pub prefab: String,
    pub delay: f32,
    pub parameter: String,
    pub max_distance: f32,
    pub min_distance: f32,
    pub limit: i32,
    pub data: String,
}

/// Untyped scalar in a procedure call table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => format_number(*f),
            Scalar::Text(s) => s.clone(),
        }
    }
}

/// One rule record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleData {
    /// Rule id, generated from the record position when unset
    pub id: Option<String>,
    pub description: Option<String>,
    pub prefab: String,
    /// `kind, args`, for example `say, hello *`
    #[serde(rename = "type")]
    pub kind: String,
    /// Several triggers sharing the rest of the record
    pub types: Option<Vec<String>>,
    pub fallback: bool,
    pub swap: Option<String>,
    pub swaps: Option<Vec<String>>,
    pub spawn: Option<String>,
    pub spawns: Option<Vec<String>>,
    pub spawn_delay: f32,
    pub remove: bool,
    pub remove_delay: f32,
    pub drops: bool,
    pub data: String,
    pub command: Option<String>,
    pub commands: Option<Vec<String>>,
    pub day: bool,
    pub night: bool,
    pub biomes: String,
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_altitude: f32,
    pub max_altitude: f32,
    pub min_y: Option<f32>,
    pub max_y: Option<f32>,
    /// Terrain paint, either a preset or `r,g,b,a`
    pub min_paint: String,
    pub max_paint: String,
    /// Preset or color matched with a small tolerance on each channel
    pub paint: String,
    pub environments: String,
    pub banned_environments: String,
    pub global_keys: String,
    pub banned_global_keys: String,
    pub events: String,
    pub event_distance: Option<f32>,
    pub poke: Option<Vec<PokeData>>,
    /// Filter lines poked together with the shared poke settings below
    pub pokes: Option<Vec<String>>,
    pub poke_limit: i32,
    pub poke_parameter: String,
    pub poke_delay: f32,
    pub objects: Option<Vec<String>>,
    pub objects_limit: String,
    pub banned_objects: Option<Vec<String>>,
    pub banned_objects_limit: String,
    pub locations: String,
    pub location_distance: f32,
    pub filter: Option<String>,
    pub filters: Option<Vec<String>>,
    pub banned_filter: Option<String>,
    pub banned_filters: Option<Vec<String>>,
    /// Shared delay for spawns, pokes and removal that set none of their own
    pub delay: f32,
    pub trigger_rules: bool,
    pub object_rpc: Option<Vec<BTreeMap<String, Scalar>>>,
    pub client_rpc: Option<Vec<BTreeMap<String, Scalar>>>,
    pub inject_data: bool,
}

impl Default for RuleData {
    fn default() -> Self {
        RuleData {
            id: None,
            description: None,
            prefab: String::new(),
            kind: String::new(),
            types: None,
            fallback: false,
            swap: None,
            swaps: None,
            spawn: None,
            spawns: None,
            spawn_delay: 0.0,
            remove: false,
            remove_delay: 0.0,
            drops: false,
            data: String::new(),
            command: None,
            commands: None,
            day: true,
            night: true,
            biomes: String::new(),
            min_distance: 0.0,
            max_distance: DEFAULT_MAX_DISTANCE,
            min_altitude: DEFAULT_MIN_ALTITUDE,
            max_altitude: DEFAULT_MAX_ALTITUDE,
            min_y: None,
            max_y: None,
            min_paint: String::new(),
            max_paint: String::new(),
            paint: String::new(),
            environments: String::new(),
            banned_environments: String::new(),
            global_keys: String::new(),
            banned_global_keys: String::new(),
            events: String::new(),
            event_distance: None,
            poke: None,
            pokes: None,
            poke_limit: 0,
            poke_parameter: String::new(),
            poke_delay: 0.0,
            objects: None,
            objects_limit: String::new(),
            banned_objects: None,
            banned_objects_limit: String::new(),
            locations: String::new(),
            location_distance: 0.0,
            filter: None,
            filters: None,
            banned_filter: None,
            banned_filters: None,
            delay: 0.0,
            trigger_rules: false,
            object_rpc: None,
            client_rpc: None,
            inject_data: false,
        }
    }
}

/// `one` followed by `many`, the singular and plural forms of a field
fn one_and_many<'a>(one: &'a Option<String>, many: &'a Option<Vec<String>>) -> impl Iterator<Item = &'a String> {
    one.iter().chain(many.iter().flatten())
}

fn own_or_shared(own: f32, shared: f32) -> f32 {
    if own > 0.0 {
        own
    } else {
        shared
    }
}

const PAINT_TOLERANCE: f32 = 0.1;

/// Paint band from `paint` or `minPaint`/`maxPaint`. Unreadable colors never match.
fn paint_condition(record: &RuleData) -> Option<Condition> {
    let paint = record.paint.trim();
    if !paint.is_empty() {
        let (Some(min), Some(max)) = (parse_paint(paint, 0.0), parse_paint(paint, 1.0)) else {
            warn!("Invalid paint: {}", paint);
            return Some(Condition::Never);
        };
        return Some(Condition::Paint {
            min: (min - Vec4::splat(PAINT_TOLERANCE)).clamp(Vec4::ZERO, Vec4::ONE),
            max: (max + Vec4::splat(PAINT_TOLERANCE)).clamp(Vec4::ZERO, Vec4::ONE),
        });
    }
    let min_text = record.min_paint.trim();
    let max_text = record.max_paint.trim();
    if min_text.is_empty() && max_text.is_empty() {
        return None;
    }
    let min = if min_text.is_empty() { Some(Vec4::ZERO) } else { parse_paint(min_text, 0.0) };
    let max = if max_text.is_empty() { Some(Vec4::ONE) } else { parse_paint(max_text, 1.0) };
    match (min, max) {
        (Some(min), Some(max)) => Some(Condition::Paint { min, max }),
        _ => {
            warn!("Invalid paint range: {} - {}", min_text, max_text);
            Some(Condition::Never)
        }
    }
}

/// Parse `kind, args`. Arguments are separated by spaces.
fn parse_type(line: &str) -> Result<(TriggerKind, Vec<String>)> {
    let split = to_list(line);
    let Some(kind) = split.first() else {
        return Ok((TriggerKind::Create, Vec::new()));
    };
    let trigger = kind.parse::<TriggerKind>()?;
    let args = split
        .get(1)
        .map(|a| a.split(' ').map(String::from).collect())
        .unwrap_or_default();
    Ok((trigger, args))
}

impl DataData {
    fn compile(&self, groups: &ValueGroups, required: &mut HashSet<String>) -> DataEntry {
        let mut entry = DataEntry::new();
        let typed = [
            (FieldKind::Int, &self.ints),
            (FieldKind::Float, &self.floats),
            (FieldKind::Long, &self.longs),
            (FieldKind::String, &self.strings),
            (FieldKind::Bool, &self.bools),
            (FieldKind::Hash, &self.hashes),
            (FieldKind::Vec, &self.vecs),
            (FieldKind::Quat, &self.quats),
            (FieldKind::Byte, &self.bytes),
            (FieldKind::Ref, &self.refs),
        ];
        for (kind, lines) in typed {
            for line in lines {
                let Some((key, value)) = line.split_once(',') else {
                    warn!("Invalid {:?} value in data {}: {}", kind, self.name, line);
                    continue;
                };
                if let Some(value) = DataValue::parse(kind, value.trim(), groups, required) {
                    entry.set(key.trim(), value);
                }
            }
        }
        for key in &self.exists {
            entry.set(key.trim(), DataValue::Exists);
        }
        for line in &self.parameters {
            match line.split_once(',') {
                Some((name, value)) => {
                    entry.set_parameter(name.trim(), ResolvableValue::parse(value.trim(), groups, required))
                }
                None => warn!("Invalid parameter in data {}: {}", self.name, line),
            }
        }
        if let Some(persistent) = self.persistent {
            entry.set_persistent(persistent);
        }
        if !self.items.is_empty() {
            entry.set_items(ItemList::compile(
                &self.items,
                &self.container_size,
                &self.item_amount,
                groups,
                required,
            ));
        }
        entry
    }
}

/// Compile data records into a registry
pub fn compile_data(records: &[DataData], groups: &ValueGroups) -> DataRegistry {
    let mut registry = DataRegistry::new();
    let mut required = HashSet::new();
    for record in records {
        if record.name.is_empty() {
            warn!("Skipping data entry without a name");
            continue;
        }
        if registry.contains(&record.name) {
            warn!("Data entry {} is defined twice, the last one is used", record.name);
        }
        registry.insert(record.name.clone(), record.compile(groups, &mut required));
    }
    registry
}

/// Compiles rule records against a prefab registry
pub struct Loader<'a> {
    prefabs: &'a dyn PrefabRegistry,
    config: &'a EngineConfig,
    groups: ValueGroups,
    data: DataRegistry,
    /// Placeholders left for runtime parameters
    required: HashSet<String>,
}

impl<'a> Loader<'a> {
    pub fn new(set: &RuleSet, prefabs: &'a dyn PrefabRegistry, config: &'a EngineConfig) -> Self {
        let groups = ValueGroups::from_definitions(
            set.value_groups
                .iter()
                .map(|g| (g.name.clone(), g.values.iter().flat_map(|v| to_list(v)).collect())),
        );
        let data = compile_data(&set.data, &groups);
        Loader {
            prefabs,
            config,
            groups,
            data,
            required: HashSet::new(),
        }
    }

    pub fn groups(&self) -> &ValueGroups {
        &self.groups
    }

    pub fn data(&self) -> &DataRegistry {
        &self.data
    }

    /// Placeholders that no value group defines
    pub fn required(&self) -> &HashSet<String> {
        &self.required
    }

    /// Compile one record, one rule per trigger type
    pub fn compile_rule(&mut self, index: usize, record: &RuleData) -> Result<Vec<Rule>> {
        let base_id = record.id.clone().unwrap_or_else(|| format!("rule-{index}"));
        let invalid = |reason: String| Error::InvalidRule {
            rule: base_id.clone(),
            reason,
        };

        let types: Vec<&str> = match &record.types {
            Some(types) if !types.is_empty() => types.iter().map(String::as_str).collect(),
            _ => vec![record.kind.as_str()],
        };
        if types.iter().all(|t| t.trim().is_empty()) {
            warn!("Missing type for prefab {}, using create", record.prefab);
        }

        let prefabs = self
            .prefab_set(&record.prefab)
            .ok_or_else(|| invalid(format!("no known prefab in '{}'", record.prefab)))?;
        let conditions = self.conditions(record);
        let actions = self.actions(record);
        let lifecycle = self.lifecycle(record);

        let mut rules = Vec::with_capacity(types.len());
        for line in &types {
            let (trigger, args) = parse_type(line).map_err(|err| invalid(err.to_string()))?;
            let id = if types.len() > 1 {
                format!("{base_id}-{trigger}")
            } else {
                base_id.clone()
            };
            let mut rule = Rule::new(id, trigger)
                .for_prefabs(prefabs.clone())
                .with_args(args)
                .when_all(conditions.iter().cloned())
                .then_all(actions.iter().cloned())
                .with_lifecycle(lifecycle.clone())
                .on_remove_event(trigger.is_global() && record.remove);
            if record.fallback {
                rule = rule.as_fallback();
            }
            if let Some(description) = &record.description {
                rule = rule.with_description(description.clone());
            }
            rules.push(rule);
        }
        Ok(rules)
    }

    /// Prefab names, wildcards and value groups. `None` when names were given
    /// but none of them is known.
    fn prefab_set(&mut self, text: &str) -> Option<PrefabSet> {
        let mut set = PrefabSet::any();
        let mut given = false;
        for part in to_list(text) {
            for name in split_with_values(&part, &self.groups, &mut self.required) {
                given = true;
                if name.contains('*') {
                    set.wildcards.push(name);
                    continue;
                }
                match self.prefabs.resolve(&name) {
                    Some(hash) => {
                        set.exact.insert(hash);
                    }
                    None => warn!("Unknown prefab: {}", name),
                }
            }
        }
        if given && set.is_any() {
            return None;
        }
        Some(set)
    }

    fn object_filters(&self, lines: &[String]) -> Vec<ObjectFilter> {
        lines
            .iter()
            .map(|line| {
                ObjectFilter::parse(
                    line,
                    self.prefabs,
                    &self.groups,
                    &self.data,
                    self.config.default_filter_distance,
                )
            })
            .collect()
    }

    /// Merge named data entries. `None` when any name is unknown.
    fn merged_data<'n>(&self, names: impl Iterator<Item = &'n String>) -> Option<Option<DataEntry>> {
        let mut merged: Option<DataEntry> = None;
        for name in names {
            let entry = self.data.lookup(name)?;
            merged = DataEntry::merge(merged.as_ref(), Some(&entry));
        }
        Some(merged)
    }

    fn conditions(&self, record: &RuleData) -> Vec<Condition> {
        let mut conditions = Vec::new();
        let default_distance = self.config.default_filter_distance;

        if !record.day || !record.night {
            conditions.push(Condition::time_of_day(record.day, record.night));
        }
        let biomes = to_list(&record.biomes);
        if !biomes.is_empty() {
            conditions.push(Condition::biomes(biomes));
        }
        let environments = to_list(&record.environments);
        if !environments.is_empty() {
            conditions.push(Condition::Environments(Condition::names(environments)));
        }
        let banned = to_list(&record.banned_environments);
        if !banned.is_empty() {
            conditions.push(Condition::BannedEnvironments(Condition::names(banned)));
        }
        let keys = to_list(&record.global_keys);
        if !keys.is_empty() {
            conditions.push(Condition::GlobalKeys(keys));
        }
        let banned_keys = to_list(&record.banned_global_keys);
        if !banned_keys.is_empty() {
            conditions.push(Condition::BannedGlobalKeys(banned_keys));
        }
        let events = to_list(&record.events);
        if !events.is_empty() {
            conditions.push(Condition::Events {
                names: Condition::names(events),
                distance: record.event_distance.unwrap_or(default_distance),
            });
        }
        if record.min_distance > 0.0 || record.max_distance < DEFAULT_MAX_DISTANCE {
            conditions.push(Condition::Distance {
                min: record.min_distance,
                max: record.max_distance,
            });
        }
        if record.min_altitude > DEFAULT_MIN_ALTITUDE || record.max_altitude < DEFAULT_MAX_ALTITUDE {
            conditions.push(Condition::Altitude {
                min: record.min_altitude,
                max: record.max_altitude,
            });
        }
        if record.min_y.is_some() || record.max_y.is_some() {
            conditions.push(Condition::Height {
                min: record.min_y.unwrap_or(f32::MIN),
                max: record.max_y.unwrap_or(f32::MAX),
            });
        }
        if let Some(paint) = paint_condition(record) {
            conditions.push(paint);
        }
        if let Some(lines) = record.objects.as_deref().filter(|l| !l.is_empty()) {
            let filters = self.object_filters(lines);
            conditions.push(Condition::objects(filters, CountRange::parse(&record.objects_limit)));
        }
        if let Some(lines) = record.banned_objects.as_deref().filter(|l| !l.is_empty()) {
            let filters = self.object_filters(lines);
            conditions.push(Condition::banned_objects(
                filters,
                CountRange::parse(&record.banned_objects_limit),
            ));
        }
        let locations = to_list(&record.locations);
        if !locations.is_empty() {
            conditions.push(Condition::Locations {
                names: Condition::names(locations),
                distance: own_or_shared(record.location_distance, default_distance),
            });
        }

        match self.merged_data(one_and_many(&record.filter, &record.filters)) {
            Some(Some(entry)) => conditions.push(Condition::Filter(entry)),
            Some(None) => {}
            // Unknown data, the filter can never match
            None => conditions.push(Condition::Never),
        }
        let banned_names: Vec<&String> = one_and_many(&record.banned_filter, &record.banned_filters)
            .filter(|name| self.data.contains(name))
            .collect();
        if let Some(Some(entry)) = self.merged_data(banned_names.into_iter()) {
            conditions.push(Condition::BannedFilter(entry));
        }
        conditions
    }

    fn actions(&mut self, record: &RuleData) -> Vec<Action> {
        let mut actions = Vec::new();
        for command in one_and_many(&record.command, &record.commands) {
            actions.push(Action::command(command.clone()));
        }
        for table in record.object_rpc.iter().flatten() {
            if let Some(rpc) = self.rpc(table) {
                actions.push(Action::ObjectRpc(rpc));
            }
        }
        for table in record.client_rpc.iter().flatten() {
            if let Some(rpc) = self.rpc(table) {
                actions.push(Action::ClientRpc(rpc));
            }
        }

        let spawn_delay = own_or_shared(record.spawn_delay, record.delay);
        for line in one_and_many(&record.spawn, &record.spawns) {
            let spawn = SpawnAction::parse(line, self.prefabs, |name| self.data.lookup(name), spawn_delay);
            actions.push(Action::spawn(spawn));
        }
        for line in one_and_many(&record.swap, &record.swaps) {
            let swap = SpawnAction::parse(line, self.prefabs, |name| self.data.lookup(name), spawn_delay);
            actions.push(Action::swap(swap));
        }

        for poke in record.poke.iter().flatten() {
            actions.push(Action::Poke(self.poke(poke)));
        }
        if let Some(lines) = record.pokes.as_deref().filter(|l| !l.is_empty()) {
            actions.push(Action::Poke(PokeAction {
                filters: self.object_filters(lines),
                limit: record.poke_limit,
                parameter: record.poke_parameter.clone(),
                delay: own_or_shared(record.poke_delay, record.delay),
            }));
        }
        if record.drops {
            actions.push(Action::Drops);
        }
        actions
    }

    fn poke(&self, data: &PokeData) -> PokeAction {
        let prefab = PrefabMatcher::parse(&data.prefab, self.prefabs, &self.groups);
        let max = own_or_shared(data.max_distance, self.config.default_filter_distance);
        let mut filter = ObjectFilter::new(prefab, max);
        filter.min_distance = data.min_distance;
        filter.set_data_name(&data.data, &self.data);
        PokeAction {
            filters: vec![filter],
            limit: data.limit,
            parameter: data.parameter.clone(),
            delay: data.delay,
        }
    }

    /// Build a procedure call from its table: `name`, `source`, `target`,
    /// `delay` and numbered `kind, value` arguments.
    fn rpc(&mut self, table: &BTreeMap<String, Scalar>) -> Option<RpcAction> {
        let Some(name) = table.get("name").map(Scalar::to_text) else {
            error!("Procedure call without a name");
            return None;
        };
        let mut rpc = RpcAction::new(name);
        let mut args: Vec<(i32, String)> = Vec::new();
        for (key, value) in table {
            let text = value.to_text();
            match key.as_str() {
                "name" => {}
                "source" => rpc.source = Some(text),
                "target" => rpc.target = RpcTarget::parse(&text),
                "delay" => rpc.delay = parse_float(&text).unwrap_or_default(),
                other => match other.parse::<i32>() {
                    Ok(position) => args.push((position, text)),
                    Err(_) => warn!("Unknown key {} in procedure call {}", other, rpc.name),
                },
            }
        }
        args.sort_by_key(|(position, _)| *position);
        for (_, text) in args {
            if let Some(arg) = RpcArg::parse(&text, &self.groups, &mut self.required) {
                rpc.args.push(arg);
            }
        }
        Some(rpc)
    }

    fn lifecycle(&self, record: &RuleData) -> Lifecycle {
        Lifecycle {
            remove: record.remove,
            remove_delay: own_or_shared(record.remove_delay, record.delay),
            data: self.data.lookup(&record.data),
            inject_data: record.inject_data,
            trigger_rules: record.trigger_rules,
        }
    }
}

/// Compile every record of a set. Records that fail are logged and skipped.
pub fn compile(set: &RuleSet, prefabs: &dyn PrefabRegistry, config: &EngineConfig) -> Vec<Rule> {
    let mut loader = Loader::new(set, prefabs, config);
    let mut rules = Vec::new();
    for (index, record) in set.rules.iter().enumerate() {
        match loader.compile_rule(index, record) {
            Ok(compiled) => rules.extend(compiled),
            Err(err) => error!("Skipping rule: {}", err),
        }
    }
    if !loader.required().is_empty() {
        debug!("Parameters resolved at runtime: {:?}", loader.required());
    }
    rules
}

impl RuleEngine {
    /// Compile a rule set and add its rules. Returns the number added.
    pub fn load(&mut self, set: &RuleSet, prefabs: &dyn PrefabRegistry) -> usize {
        let rules = compile(set, prefabs, &self.config);
        let mut added = 0;
        for rule in rules {
            match self.add_rule(rule) {
                Ok(()) => added += 1,
                Err(err) => error!("{}", err),
            }
        }
        info!("Loaded {} rules", added);
        added
    }
}
