//! In-memory host
//!
//! A complete [`Host`](crate::Host) backed by plain collections. Everything the
//! engine does to the world is recorded in public logs so callers can inspect
//! it afterwards.

use crate::host::{
    Clock, CommandRunner, Environment, ObjectStore, PeerInfo, PrefabRegistry, RpcTransport, SpatialIndex, Terrain,
};
use crate::spatial::sector_of;
use crate::world::{distance_xz, ObjectId, WorldObject};
use crate::PrefabHash;
use glam::{IVec2, Quat, Vec3, Vec4};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;

/// A procedure call routed through the transport
#[derive(Debug, Clone, PartialEq)]
pub struct SentRpc {
    pub source: i64,
    pub target: i64,
    pub object: Option<ObjectId>,
    pub procedure: i32,
    pub args: Vec<u8>,
}

#[derive(Debug)]
pub struct MemoryWorld {
    sector_size: f32,
    /// Sectors `-half..=half` on both axes are on the grid
    half: i32,
    sectors: Vec<Vec<ObjectId>>,
    outside: HashMap<IVec2, Vec<ObjectId>>,
    objects: BTreeMap<ObjectId, WorldObject>,
    dead: HashSet<ObjectId>,
    next_id: u64,

    prefab_names: HashMap<PrefabHash, String>,
    prefab_ids: HashMap<String, PrefabHash>,

    session: i64,
    dedicated: bool,
    peers: Vec<PeerInfo>,

    time: f64,
    day: i32,
    is_day: bool,

    biome: String,
    environment: String,
    global_keys: HashMap<String, String>,
    events: Vec<(String, Vec3)>,
    locations: Vec<(String, Vec3)>,
    terrain_height: f32,
    terrain_paint: Vec4,

    /// Commands in execution order
    pub commands: Vec<String>,
    pub rpcs: Vec<SentRpc>,
    /// Records created through the store
    pub created: Vec<ObjectId>,
    /// Destroyed records with their owner at the time
    pub destroyed: Vec<(ObjectId, i64)>,
    pub forced: Vec<ObjectId>,
    pub drops: Vec<ObjectId>,
    /// Creations that should be reported as create events
    created_events: Vec<ObjectId>,
}

impl MemoryWorld {
    /// Empty world with a square grid of `2 * half + 1` sectors per side
    pub fn new(sector_size: f32, half: i32) -> Self {
        let width = (2 * half + 1).max(1) as usize;
        MemoryWorld {
            sector_size,
            half,
            sectors: vec![Vec::new(); width * width],
            outside: HashMap::new(),
            objects: BTreeMap::new(),
            dead: HashSet::new(),
            next_id: 1,
            prefab_names: HashMap::new(),
            prefab_ids: HashMap::new(),
            session: 1,
            dedicated: false,
            peers: Vec::new(),
            time: 0.0,
            day: 1,
            is_day: true,
            biome: "Meadows".into(),
            environment: "Clear".into(),
            global_keys: HashMap::new(),
            events: Vec::new(),
            locations: Vec::new(),
            terrain_height: 0.0,
            terrain_paint: Vec4::new(0.0, 0.0, 0.0, 1.0),
            commands: Vec::new(),
            rpcs: Vec::new(),
            created: Vec::new(),
            destroyed: Vec::new(),
            forced: Vec::new(),
            drops: Vec::new(),
            created_events: Vec::new(),
        }
    }

    pub fn register_prefab(&mut self, name: &str) -> PrefabHash {
        let hash = PrefabHash::of(name);
        self.prefab_names.insert(hash, name.to_string());
        self.prefab_ids.insert(name.to_string(), hash);
        hash
    }

    /// Place an unowned record, registering its prefab when needed.
    /// No create event is reported.
    pub fn spawn(&mut self, name: &str, position: Vec3) -> ObjectId {
        let prefab = self.register_prefab(name);
        self.insert(prefab, position, Quat::IDENTITY, 0)
    }

    /// Copy of a live record
    ///
    /// # Panics
    ///
    /// Panics when the record does not exist.
    pub fn get_record(&self, id: ObjectId) -> WorldObject {
        match self.objects.get(&id) {
            Some(record) => record.clone(),
            None => panic!("no record {id}"),
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Creations since the last call that should fire create events
    pub fn take_created_events(&mut self) -> Vec<ObjectId> {
        std::mem::take(&mut self.created_events)
    }

    pub fn set_time(&mut self, time: f64, day: i32) {
        self.time = time;
        self.day = day;
    }

    pub fn advance(&mut self, seconds: f64) {
        self.time += seconds;
    }

    pub fn set_day(&mut self, is_day: bool) {
        self.is_day = is_day;
    }

    /// Biome reported everywhere
    pub fn set_biome(&mut self, biome: &str) {
        self.biome = biome.to_string();
    }

    pub fn set_environment(&mut self, environment: &str) {
        self.environment = environment.to_string();
    }

    pub fn set_global_key(&mut self, key: &str, value: &str) {
        self.global_keys.insert(key.to_lowercase(), value.to_string());
    }

    pub fn remove_global_key(&mut self, key: &str) {
        self.global_keys.remove(&key.to_lowercase());
    }

    pub fn add_event(&mut self, name: &str, position: Vec3) {
        self.events.push((name.to_string(), position));
    }

    pub fn end_event(&mut self, name: &str) {
        self.events.retain(|(n, _)| n != name);
    }

    pub fn add_location(&mut self, name: &str, position: Vec3) {
        self.locations.push((name.to_string(), position));
    }

    pub fn add_peer(&mut self, peer: PeerInfo) {
        self.peers.push(peer);
    }

    pub fn set_dedicated(&mut self, dedicated: bool) {
        self.dedicated = dedicated;
    }

    pub fn set_session(&mut self, session: i64) {
        self.session = session;
    }

    /// Flat terrain at the given height
    pub fn set_terrain(&mut self, height: f32) {
        self.terrain_height = height;
    }

    /// Paint the whole terrain with one color
    pub fn set_paint(&mut self, paint: Vec4) {
        self.terrain_paint = paint;
    }

    fn insert(&mut self, prefab: PrefabHash, position: Vec3, rotation: Quat, owner: i64) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        let record = WorldObject::new(id, prefab, position, rotation).with_owner(owner);
        self.objects.insert(id, record);
        self.bucket_mut(sector_of(position, self.sector_size)).push(id);
        id
    }

    fn bucket_mut(&mut self, sector: IVec2) -> &mut Vec<ObjectId> {
        match self.sector_index(sector) {
            Some(i) => &mut self.sectors[i],
            None => self.outside.entry(sector).or_default(),
        }
    }
}

impl SpatialIndex for MemoryWorld {
    fn sector_size(&self) -> f32 {
        self.sector_size
    }

    fn sector_index(&self, sector: IVec2) -> Option<usize> {
        let half = self.half;
        if sector.x.abs() > half || sector.y.abs() > half {
            return None;
        }
        let width = 2 * half + 1;
        Some(((sector.y + half) * width + sector.x + half) as usize)
    }

    fn sector_objects(&self, index: usize) -> &[ObjectId] {
        self.sectors.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    fn outside_objects(&self, sector: IVec2) -> Option<&[ObjectId]> {
        self.outside.get(&sector).map(Vec::as_slice)
    }
}

impl PrefabRegistry for MemoryWorld {
    fn resolve(&self, name: &str) -> Option<PrefabHash> {
        self.prefab_ids.get(name).copied()
    }

    fn name(&self, prefab: PrefabHash) -> Option<&str> {
        self.prefab_names.get(&prefab).map(String::as_str)
    }
}

impl ObjectStore for MemoryWorld {
    fn get(&self, id: ObjectId) -> Option<&WorldObject> {
        self.objects.get(&id)
    }

    fn get_mut(&mut self, id: ObjectId) -> Option<&mut WorldObject> {
        self.objects.get_mut(&id)
    }

    fn create(&mut self, prefab: PrefabHash, position: Vec3, rotation: Quat, owner: i64, trigger_rules: bool) -> ObjectId {
        let id = self.insert(prefab, position, rotation, owner);
        trace!("Created {} ({})", id, prefab);
        self.created.push(id);
        if trigger_rules {
            self.created_events.push(id);
        }
        id
    }

    fn destroy(&mut self, id: ObjectId) -> bool {
        let Some(record) = self.objects.remove(&id) else {
            return false;
        };
        let sector = sector_of(record.position, self.sector_size);
        self.bucket_mut(sector).retain(|o| *o != id);
        self.created_events.retain(|o| *o != id);
        self.dead.insert(id);
        self.destroyed.push((id, record.owner));
        trace!("Destroyed {}", id);
        true
    }

    fn is_dead(&self, id: ObjectId) -> bool {
        self.dead.contains(&id)
    }

    fn mark_dead(&mut self, id: ObjectId) {
        self.dead.insert(id);
    }

    fn force_send(&mut self, id: ObjectId) {
        self.forced.push(id);
    }

    fn spawn_drops(&mut self, id: ObjectId) {
        self.drops.push(id);
    }
}

impl RpcTransport for MemoryWorld {
    fn session_id(&self) -> i64 {
        self.session
    }

    fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    fn send(&mut self, source: i64, target: i64, object: Option<ObjectId>, procedure: i32, args: &[u8]) {
        self.rpcs.push(SentRpc {
            source,
            target,
            object,
            procedure,
            args: args.to_vec(),
        });
    }
}

impl Clock for MemoryWorld {
    fn time(&self) -> f64 {
        self.time
    }

    fn day(&self) -> i32 {
        self.day
    }

    fn ticks(&self) -> i64 {
        (self.time * 10_000_000.0) as i64
    }

    fn is_day(&self) -> bool {
        self.is_day
    }
}

impl Environment for MemoryWorld {
    fn biome_at(&self, _position: Vec3) -> String {
        self.biome.clone()
    }

    fn environment(&self) -> String {
        self.environment.clone()
    }

    fn has_global_key(&self, key: &str) -> bool {
        self.global_keys.contains_key(&key.to_lowercase())
    }

    fn global_key_value(&self, key: &str) -> String {
        self.global_keys.get(&key.to_lowercase()).cloned().unwrap_or_default()
    }

    fn active_events(&self) -> Vec<(String, Vec3)> {
        self.events.clone()
    }

    fn locations_near(&self, position: Vec3, distance: f32) -> Vec<String> {
        self.locations
            .iter()
            .filter(|(_, pos)| distance_xz(position, *pos) <= distance)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Terrain for MemoryWorld {
    fn height_at(&self, _x: f32, _z: f32) -> f32 {
        self.terrain_height
    }

    fn paint_at(&self, _x: f32, _z: f32) -> Vec4 {
        self.terrain_paint
    }
}

impl CommandRunner for MemoryWorld {
    fn run(&mut self, command: &str) {
        self.commands.push(command.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_is_guarded() {
        let mut world = MemoryWorld::new(64.0, 2);
        let id = world.spawn("Rock", Vec3::new(10.0, 0.0, 10.0));
        assert!(world.destroy(id));
        assert!(world.is_dead(id));
        assert!(!world.destroy(id));
        assert_eq!(world.destroyed.len(), 1);
        assert!(world.sector_objects(world.sector_index(IVec2::ZERO).unwrap()).is_empty());
    }

    #[test]
    fn test_create_events_follow_flag() {
        let mut world = MemoryWorld::new(64.0, 2);
        let rock = world.register_prefab("Rock");
        let quiet = world.create(rock, Vec3::ZERO, Quat::IDENTITY, 0, false);
        let loud = world.create(rock, Vec3::ZERO, Quat::IDENTITY, 0, true);
        assert_eq!(world.created, vec![quiet, loud]);
        assert_eq!(world.take_created_events(), vec![loud]);
        assert!(world.take_created_events().is_empty());
    }

    #[test]
    fn test_grid_indices_are_unique() {
        let world = MemoryWorld::new(64.0, 2);
        let mut seen = HashSet::new();
        for x in -2..=2 {
            for y in -2..=2 {
                assert!(seen.insert(world.sector_index(IVec2::new(x, y)).unwrap()));
            }
        }
        assert_eq!(seen.len(), 25);
        assert_eq!(world.sector_index(IVec2::new(3, 0)), None);
    }

    #[test]
    fn test_global_keys_ignore_case() {
        let mut world = MemoryWorld::new(64.0, 2);
        world.set_global_key("Defeated_Eikthyr", "1");
        assert!(world.has_global_key("defeated_eikthyr"));
        assert_eq!(world.global_key_value("DEFEATED_EIKTHYR"), "1");
        world.remove_global_key("defeated_eikthyr");
        assert!(!world.has_global_key("defeated_eikthyr"));
    }
}
