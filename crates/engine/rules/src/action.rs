//! Actions that can be dispatched by rules

use crate::data::DataEntry;
use crate::error::Result;
use crate::filter::ObjectFilter;
use crate::hash::PrefabHash;
use crate::host::PrefabRegistry;
use crate::parse::{angle_yxz, parse_float, to_list_with_empty};
use crate::template::{has_placeholder, resolve, FieldSource, Pars};
use crate::value::{ResolvableValue, ValueGroups};
use glam::{Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Which prefab a spawn or swap creates
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnPrefab {
    Fixed(PrefabHash),
    /// Name resolved against the event parameters when dispatched
    Template(String),
    /// Configured with an unregistered name
    Missing(String),
}

impl SpawnPrefab {
    pub fn parse(name: &str, prefabs: &dyn PrefabRegistry) -> Self {
        if has_placeholder(name) {
            return SpawnPrefab::Template(name.to_string());
        }
        match prefabs.resolve(name) {
            Some(hash) => SpawnPrefab::Fixed(hash),
            None => {
                tracing::warn!("Unknown spawn prefab: {}", name);
                SpawnPrefab::Missing(name.to_string())
            }
        }
    }

    /// Resolve to a registered prefab, `None` when the name is not registered
    pub fn resolve(&self, pars: Pars<'_>, source: Option<FieldSource<'_>>, prefabs: &dyn PrefabRegistry) -> Option<PrefabHash> {
        match self {
            SpawnPrefab::Fixed(hash) => Some(*hash),
            SpawnPrefab::Template(name) => prefabs.resolve(&resolve(name, pars, source)),
            SpawnPrefab::Missing(_) => None,
        }
    }

    /// Configured name for logging
    pub fn describe(&self, prefabs: &dyn PrefabRegistry) -> String {
        match self {
            SpawnPrefab::Fixed(hash) => prefabs.name(*hash).map_or_else(|| hash.to_string(), str::to_string),
            SpawnPrefab::Template(name) | SpawnPrefab::Missing(name) => name.clone(),
        }
    }
}

/// Create a new object relative to the triggering one
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnAction {
    pub prefab: SpawnPrefab,
    /// Offset in the local frame of the source record
    pub offset: Vec3,
    /// Rotation relative to the source record
    pub rotation: Quat,
    /// Place on the terrain surface
    pub snap: bool,
    pub data: Option<DataEntry>,
    /// Seconds before the object is created
    pub delay: f32,
}

impl SpawnAction {
    pub fn new(prefab: SpawnPrefab) -> Self {
        SpawnAction {
            prefab,
            offset: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            snap: false,
            data: None,
            delay: 0.0,
        }
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_delay(mut self, delay: f32) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_data(mut self, data: DataEntry) -> Self {
        self.data = Some(data);
        self
    }

    /// Parse `prefab, x, z, y|snap, ry, rx, rz, data, delay`.
    ///
    /// Shorter forms are accepted: `prefab, data`, `prefab, x, z, y` and
    /// `prefab, x, z, y, data`. `lookup` resolves data names.
    pub fn parse(
        line: &str,
        prefabs: &dyn PrefabRegistry,
        lookup: impl Fn(&str) -> Option<DataEntry>,
        default_delay: f32,
    ) -> Self {
        let split = to_list_with_empty(line);
        let name = split.first().map(String::as_str).unwrap_or_default();
        let mut spawn = SpawnAction::new(SpawnPrefab::parse(name, prefabs)).with_delay(default_delay);
        let arg = |i: usize| split.get(i).map(String::as_str).unwrap_or_default();

        if split.len() == 2 {
            spawn.data = lookup(arg(1));
        }
        if split.len() > 3 {
            let x = parse_float(arg(1)).unwrap_or_default();
            let z = parse_float(arg(2)).unwrap_or_default();
            let y = if arg(3).eq_ignore_ascii_case("snap") {
                spawn.snap = true;
                0.0
            } else {
                parse_float(arg(3)).unwrap_or_default()
            };
            spawn.offset = Vec3::new(x, y, z);
        }
        if split.len() == 5 {
            spawn.data = lookup(arg(4));
        }
        if split.len() > 6 {
            match angle_yxz(&[arg(4), arg(5), arg(6)]) {
                Some(rotation) => spawn.rotation = rotation,
                None => spawn.data = lookup(arg(4)),
            }
        }
        if split.len() > 7 {
            spawn.data = lookup(arg(7));
        }
        if split.len() > 8 {
            spawn.delay = parse_float(arg(8)).unwrap_or(default_delay);
        }
        spawn
    }
}

/// Deliver a poke event to matching nearby objects
#[derive(Debug, Clone, PartialEq)]
pub struct PokeAction {
    pub filters: Vec<ObjectFilter>,
    /// Closest targets kept when positive
    pub limit: i32,
    /// Argument text passed to the poke event, templated
    pub parameter: String,
    pub delay: f32,
}

/// Where a remote procedure call is routed
#[derive(Debug, Clone, PartialEq)]
pub enum RpcTarget {
    /// Owner of the triggering record
    Owner,
    /// Every peer
    All,
    /// Peer id resolved from a template
    Peer(String),
}

impl RpcTarget {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "" | "owner" => RpcTarget::Owner,
            "all" => RpcTarget::All,
            _ => RpcTarget::Peer(text.trim().to_string()),
        }
    }
}

/// Concrete procedure argument as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcArgValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Bool(bool),
    String(String),
    Hash(i32),
    Vec([f32; 3]),
    Quat([f32; 4]),
}

/// Typed, templated procedure argument
#[derive(Debug, Clone, PartialEq)]
pub enum RpcArg {
    Int(ResolvableValue<i32>),
    Long(ResolvableValue<i64>),
    Float(ResolvableValue<f32>),
    Bool(ResolvableValue<bool>),
    String(ResolvableValue<String>),
    Hash(ResolvableValue<PrefabHash>),
    Vec(ResolvableValue<Vec3>),
    Quat(ResolvableValue<Quat>),
}

impl RpcArg {
    /// Parse `kind, value`. Unknown kinds yield `None`.
    pub fn parse(text: &str, groups: &ValueGroups, required: &mut HashSet<String>) -> Option<Self> {
        let (kind, value) = text.split_once(',')?;
        let value = value.trim();
        let arg = match kind.trim().to_lowercase().as_str() {
            "int" => RpcArg::Int(ResolvableValue::parse(value, groups, required)),
            "long" => RpcArg::Long(ResolvableValue::parse(value, groups, required)),
            "float" => RpcArg::Float(ResolvableValue::parse(value, groups, required)),
            "bool" => RpcArg::Bool(ResolvableValue::parse(value, groups, required)),
            "string" => RpcArg::String(ResolvableValue::parse(value, groups, required)),
            "hash" => RpcArg::Hash(ResolvableValue::parse(value, groups, required)),
            "vec" => RpcArg::Vec(ResolvableValue::parse(value, groups, required)),
            "quat" => RpcArg::Quat(ResolvableValue::parse(value, groups, required)),
            other => {
                tracing::warn!("Unknown RPC argument kind: {}", other);
                return None;
            }
        };
        Some(arg)
    }

    /// Resolve to a wire value. Arguments resolving to none fall back to defaults.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R, pars: Pars<'_>, source: Option<FieldSource<'_>>) -> RpcArgValue {
        match self {
            RpcArg::Int(v) => RpcArgValue::Int(v.get(rng, pars, source).unwrap_or_default()),
            RpcArg::Long(v) => RpcArgValue::Long(v.get(rng, pars, source).unwrap_or_default()),
            RpcArg::Float(v) => RpcArgValue::Float(v.get(rng, pars, source).unwrap_or_default()),
            RpcArg::Bool(v) => RpcArgValue::Bool(v.get(rng, pars, source).unwrap_or_default()),
            RpcArg::String(v) => RpcArgValue::String(v.get(rng, pars, source).unwrap_or_default()),
            RpcArg::Hash(v) => RpcArgValue::Hash(v.get(rng, pars, source).unwrap_or(PrefabHash::NONE).0),
            RpcArg::Vec(v) => RpcArgValue::Vec(v.get(rng, pars, source).unwrap_or(Vec3::ZERO).to_array()),
            RpcArg::Quat(v) => RpcArgValue::Quat(v.get(rng, pars, source).unwrap_or(Quat::IDENTITY).to_array()),
        }
    }
}

/// Encode resolved arguments for the transport
pub fn encode_args(args: &[RpcArgValue]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(args)?)
}

/// A remote procedure call, either on the triggering object or client-wide
#[derive(Debug, Clone, PartialEq)]
pub struct RpcAction {
    pub name: String,
    /// Procedure id, the stable hash of the name
    pub procedure: i32,
    /// Sender override, templated. Defaults to this process.
    pub source: Option<String>,
    pub target: RpcTarget,
    pub delay: f32,
    pub args: Vec<RpcArg>,
}

impl RpcAction {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        RpcAction {
            procedure: crate::hash::stable_hash(&name),
            name,
            source: None,
            target: RpcTarget::Owner,
            delay: 0.0,
            args: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: RpcTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_arg(mut self, arg: RpcArg) -> Self {
        self.args.push(arg);
        self
    }
}

/// Action to perform when a rule is selected.
///
/// Actions run in a fixed order regardless of how they were added: commands,
/// object then client procedure calls, spawns then swaps, pokes, drops.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Run a console command, templated
    Command(String),

    /// Procedure call routed through the triggering object
    ObjectRpc(RpcAction),

    /// Procedure call sent to clients
    ClientRpc(RpcAction),

    /// Create an object next to the source
    Spawn(SpawnAction),

    /// Create a replacement carrying the source's data
    Swap(SpawnAction),

    /// Send poke events to nearby objects
    Poke(PokeAction),

    /// Generate the source's loot
    Drops,
}

impl Action {
    pub fn command(command: impl Into<String>) -> Self {
        Action::Command(command.into())
    }

    pub fn spawn(spawn: SpawnAction) -> Self {
        Action::Spawn(spawn)
    }

    pub fn swap(spawn: SpawnAction) -> Self {
        Action::Swap(spawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;
    use crate::parse::quat_from_degrees;

    fn world() -> MemoryWorld {
        let mut world = MemoryWorld::new(64.0, 4);
        world.register_prefab("Stone");
        world
    }

    #[test]
    fn test_spawn_line_full() {
        let world = world();
        let spawn = SpawnAction::parse("Stone, 1, 2, 3, 90, 0, 0, , 5", &world, |_| None, 0.0);
        assert_eq!(spawn.prefab, SpawnPrefab::Fixed(PrefabHash::of("Stone")));
        assert_eq!(spawn.offset, Vec3::new(1.0, 3.0, 2.0));
        assert!(!spawn.snap);
        assert_eq!(spawn.delay, 5.0);
        let expected = quat_from_degrees(90.0, 0.0, 0.0);
        assert!(spawn.rotation.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_spawn_line_snap_and_data() {
        let world = world();
        let data = DataEntry::new();
        let spawn = SpawnAction::parse("Stone, 0, 0, snap, mossy", &world, |name| (name == "mossy").then(|| data.clone()), 1.5);
        assert!(spawn.snap);
        assert!(spawn.data.is_some());
        assert_eq!(spawn.delay, 1.5);

        let short = SpawnAction::parse("Stone, mossy", &world, |name| (name == "mossy").then(|| data.clone()), 0.0);
        assert!(short.data.is_some());
        assert_eq!(short.offset, Vec3::ZERO);
    }

    #[test]
    fn test_spawn_line_fields_read_independently() {
        let world = world();
        let spawn = SpawnAction::parse("Stone, , 4, snap", &world, |_| None, 0.0);
        assert!(spawn.snap);
        assert_eq!(spawn.offset, Vec3::new(0.0, 0.0, 4.0));

        let raised = SpawnAction::parse("Stone, x, z, 2", &world, |_| None, 0.0);
        assert_eq!(raised.offset, Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn test_spawn_prefab_kinds() {
        let world = world();
        assert!(matches!(SpawnPrefab::parse("<par0>", &world), SpawnPrefab::Template(_)));
        assert!(matches!(SpawnPrefab::parse("Nope", &world), SpawnPrefab::Missing(_)));
    }

    #[test]
    fn test_rpc_args_encode() {
        let mut required = HashSet::new();
        let groups = ValueGroups::new();
        let arg = RpcArg::parse("int, 5", &groups, &mut required).unwrap();
        assert!(RpcArg::parse("matrix, 1", &groups, &mut required).is_none());

        let pars = crate::template::Parameters::new();
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(1);
        let value = arg.resolve(&mut rng, Pars::new(&pars), None);
        assert_eq!(value, RpcArgValue::Int(5));

        let bytes = encode_args(&[value.clone()]).unwrap();
        let decoded: Vec<RpcArgValue> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, vec![value]);
    }

    #[test]
    fn test_rpc_target() {
        assert_eq!(RpcTarget::parse("owner"), RpcTarget::Owner);
        assert_eq!(RpcTarget::parse("ALL"), RpcTarget::All);
        assert_eq!(RpcTarget::parse("<pid>"), RpcTarget::Peer("<pid>".into()));
    }
}
