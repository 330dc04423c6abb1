use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use rules::host::PrefabRegistry;
use rules::memory::MemoryWorld;
use rules::{EngineConfig, ObjectId, RuleEngine, RuleSet, TriggerKind};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const BUNDLED_RULES: &str = include_str!("../rules.json");

const PREFABS: &[&str] = &[
    "Beech", "Birch", "Oak", "Stump", "Boar", "Wolf", "Troll", "Stone",
];

#[derive(Parser, Debug)]
#[command(name = "sandbox")]
#[command(about = "Runs a prefab rule set against a small in-memory world", long_about = None)]
struct Args {
    /// Rule set in JSON, the bundled sample when omitted
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Seed for random value selection
    #[arg(long)]
    seed: Option<u64>,

    /// Number of simulation ticks
    #[arg(long, default_value = "20")]
    ticks: usize,

    /// Seconds of world time per tick
    #[arg(long, default_value = "1.0")]
    step: f64,

    /// Print a JSON summary to stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let set = load_rules(args.rules.as_ref())?;
    let mut world = build_world();
    let mut engine = RuleEngine::new(config);
    let loaded = engine.load(&set, &world);
    info!("Sandbox ready: {} rules, {} objects", loaded, world.len());

    run(&mut engine, &mut world, args.ticks, args.step);

    info!(
        "Finished after {} ticks: {} commands, {} created, {} destroyed, {} calls",
        args.ticks,
        world.commands.len(),
        world.created.len(),
        world.destroyed.len(),
        world.rpcs.len()
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary(&world))?);
    }
    Ok(())
}

fn load_rules(path: Option<&PathBuf>) -> Result<RuleSet> {
    let text = match path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None => BUNDLED_RULES.to_string(),
    };
    serde_json::from_str(&text).context("Failed to parse rule set")
}

fn build_world() -> MemoryWorld {
    let mut world = MemoryWorld::new(64.0, 16);
    for name in PREFABS {
        world.register_prefab(name);
    }
    world.set_terrain(30.0);

    for (i, tree) in ["Beech", "Birch", "Oak"].iter().enumerate() {
        world.spawn(tree, Vec3::new(i as f32 * 12.0, 30.0, -20.0));
    }
    world.spawn("Boar", Vec3::new(4.0, 30.0, 4.0));
    world.spawn("Boar", Vec3::new(-6.0, 30.0, 8.0));
    world.spawn("Wolf", Vec3::new(10.0, 30.0, 10.0));
    world.spawn("Troll", Vec3::new(-40.0, 30.0, 40.0));
    world.add_event("army_eikthyr", Vec3::new(0.0, 30.0, 0.0));
    world
}

fn ids_of(world: &MemoryWorld, name: &str) -> Vec<ObjectId> {
    let Some(prefab) = world.resolve(name) else {
        return Vec::new();
    };
    world.objects().filter(|o| o.prefab == prefab).map(|o| o.id).collect()
}

/// Feed newly created records back into the engine as create events
fn pump_created(engine: &mut RuleEngine, world: &mut MemoryWorld) {
    for id in world.take_created_events() {
        engine.handle(world, TriggerKind::Create, "", id, None);
    }
}

fn run(engine: &mut RuleEngine, world: &mut MemoryWorld, ticks: usize, step: f64) {
    let initial: Vec<ObjectId> = world.objects().map(|o| o.id).collect();
    for id in initial {
        engine.handle(world, TriggerKind::Create, "", id, None);
    }
    engine.handle_global(world, TriggerKind::Event, "army_eikthyr", Vec3::ZERO, false);

    let dusk = ticks / 3;
    let dawn = ticks * 2 / 3;
    for tick in 0..ticks {
        world.advance(step);
        if tick == dusk {
            info!("Night falls");
            world.set_day(false);
            for wolf in ids_of(world, "Wolf") {
                engine.handle(world, TriggerKind::Say, "howl", wolf, None);
            }
        }
        if tick == dusk + 1 {
            if let Some(tree) = ids_of(world, "Oak").first().copied() {
                engine.handle(world, TriggerKind::Destroy, "", tree, None);
            }
        }
        if tick == dawn {
            info!("Day breaks");
            world.set_day(true);
            for troll in ids_of(world, "Troll") {
                engine.handle(world, TriggerKind::State, "dawn", troll, None);
            }
        }
        let executed = engine.tick(world);
        pump_created(engine, world);
        match engine.next_due() {
            Some(due) => debug!(
                "Tick {}: {} tasks run, {} pending, next at {:.1}",
                tick,
                executed,
                engine.pending(),
                due
            ),
            None => debug!("Tick {}: {} tasks run, queue empty", tick, executed),
        }
    }
    for command in &world.commands {
        info!("Command: {}", command);
    }
}

fn summary(world: &MemoryWorld) -> serde_json::Value {
    let objects: Vec<serde_json::Value> = world
        .objects()
        .map(|o| {
            serde_json::json!({
                "id": o.id.to_string(),
                "prefab": world.name(o.prefab).unwrap_or_default(),
                "position": [o.position.x, o.position.y, o.position.z],
                "owner": o.owner,
                "revision": o.revision,
            })
        })
        .collect();
    serde_json::json!({
        "commands": world.commands,
        "created": world.created.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "destroyed": world.destroyed.iter().map(|(id, _)| id.to_string()).collect::<Vec<_>>(),
        "calls": world.rpcs.len(),
        "drops": world.drops.len(),
        "objects": objects,
    })
}
