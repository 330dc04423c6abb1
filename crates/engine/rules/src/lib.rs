//! Rules crate - Rule-driven lifecycle engine for persistent world objects
//!
//! This crate reacts to lifecycle events on world object records (creation,
//! destruction, pokes and the other [`TriggerKind`]s). Each event selects at
//! most one rule from an ordered table and runs its actions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Rule Engine                           │
//! ├─────────────────────────────────────────────────────────┤
//! │  Selection                                               │
//! │  ├── Rules per trigger kind, declaration order          │
//! │  ├── Conditions (time, biome, keys, nearby objects...)  │
//! │  └── First match wins, fallback rules last              │
//! ├─────────────────────────────────────────────────────────┤
//! │  Actions                                                 │
//! │  ├── Command - Run a console command now                │
//! │  ├── ObjectRpc / ClientRpc - Remote procedure calls     │
//! │  ├── Spawn / Swap - Create objects near the source      │
//! │  ├── Poke - Send poke events to nearby objects          │
//! │  └── Drops - Generate loot                              │
//! ├─────────────────────────────────────────────────────────┤
//! │  Scheduler                                               │
//! │  ├── Deferred spawns, removals, pokes and calls         │
//! │  └── Run in due-time order by tick()                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The world itself is reached only through the narrow traits in [`host`].
//! [`memory::MemoryWorld`] implements all of them in memory.
//!
//! # Example
//!
//! ```rust
//! use rules::memory::MemoryWorld;
//! use rules::{Action, Condition, EngineConfig, Rule, RuleEngine, TriggerKind};
//! use rules::glam::Vec3;
//!
//! // Announce boars that appear at night
//! let rule = Rule::new("night_boar", TriggerKind::Create)
//!     .when(Condition::time_of_day(false, true))
//!     .then(Action::command("broadcast center <prefab> at <pos>"));
//!
//! let mut engine = RuleEngine::new(EngineConfig::default());
//! engine.add_rule(rule).unwrap();
//!
//! let mut world = MemoryWorld::new(64.0, 8);
//! world.set_day(false);
//! let boar = world.spawn("Boar", Vec3::new(10.0, 0.0, 20.0));
//! engine.handle(&mut world, TriggerKind::Create, "", boar, None);
//! assert_eq!(world.commands, vec!["broadcast center Boar at 10,20,0"]);
//! ```

mod action;
mod condition;
mod config;
mod data;
mod dispatch;
mod engine;
mod error;
mod filter;
mod hash;
pub mod host;
mod items;
mod loading;
pub mod memory;
mod parse;
mod rule;
mod scheduler;
mod selector;
mod spatial;
mod template;
mod value;
mod world;

pub use action::{encode_args, Action, PokeAction, RpcAction, RpcArg, RpcArgValue, RpcTarget, SpawnAction, SpawnPrefab};
pub use condition::Condition;
pub use config::EngineConfig;
pub use data::{DataEntry, DataRegistry, DataValue};
pub use dispatch::{PendingSpawn, ScheduledTask};
pub use engine::RuleEngine;
pub use error::{Error, Result};
pub use filter::{CountRange, FilterContext, ObjectFilter, PrefabMatcher};
pub use hash::{stable_hash, PrefabHash};
pub use host::Host;
pub use items::{decode_items, encode_items, Item, ItemData, ItemList, ItemValue, ITEMS_FIELD};
pub use loading::{compile, compile_data, DataData, Loader, PokeData, RuleData, RuleSet, Scalar, ValueGroupData};
pub use rule::{Lifecycle, PrefabSet, Rule, RuleId, TriggerKind};
pub use scheduler::Scheduler;
pub use selector::{MatchContext, RuleTable};
pub use spatial::sector_of;
pub use template::{resolve, FieldSource, Parameters, Pars};
pub use value::{ResolvableValue, ValueGroups};
pub use world::{distance_xz, FieldKind, FieldValue, ObjectId, WorldObject};

// Re-export glam for convenience
pub use glam;
