//! Collaborator interfaces the engine needs from its host
//!
//! Each trait is narrow so a component only asks for what it uses. A host
//! normally implements all of them on one world type and gets [`Host`] for
//! free through the blanket impl.

use crate::{ObjectId, PrefabHash, WorldObject};
use glam::{IVec2, Quat, Vec3, Vec4};

/// Sector-bucketed spatial index over object records
pub trait SpatialIndex {
    /// Edge length of one sector
    fn sector_size(&self) -> f32;

    /// Flat index of a sector inside the indexed grid, `None` when off-grid
    fn sector_index(&self, sector: IVec2) -> Option<usize>;

    /// Records bucketed in an on-grid sector
    fn sector_objects(&self, index: usize) -> &[ObjectId];

    /// Overflow bucket of an off-grid sector
    fn outside_objects(&self, sector: IVec2) -> Option<&[ObjectId]>;
}

/// Prefab type registry
pub trait PrefabRegistry {
    /// Resolve a prefab name to its id, `None` when not registered
    fn resolve(&self, name: &str) -> Option<PrefabHash>;

    /// Reverse lookup of a registered prefab
    fn name(&self, prefab: PrefabHash) -> Option<&str>;

    fn contains(&self, prefab: PrefabHash) -> bool {
        self.name(prefab).is_some()
    }
}

/// Storage of object records
pub trait ObjectStore {
    fn get(&self, id: ObjectId) -> Option<&WorldObject>;

    fn get_mut(&mut self, id: ObjectId) -> Option<&mut WorldObject>;

    /// Create a record. When `trigger_rules` is false the host must not
    /// report a creation event for it.
    fn create(
        &mut self,
        prefab: PrefabHash,
        position: Vec3,
        rotation: Quat,
        owner: i64,
        trigger_rules: bool,
    ) -> ObjectId;

    /// Destroy a record, returning false when it did not exist
    fn destroy(&mut self, id: ObjectId) -> bool;

    /// Whether the record was destroyed recently or is pending destruction
    fn is_dead(&self, id: ObjectId) -> bool;

    /// Put the record into the recently destroyed set
    fn mark_dead(&mut self, id: ObjectId);

    /// Propagate a changed record to observers immediately
    fn force_send(&mut self, id: ObjectId);

    /// Generate the configured loot of a record at its position
    fn spawn_drops(&mut self, id: ObjectId);
}

/// Connected peer as seen by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub uid: i64,
    pub host_name: String,
    pub player_name: String,
    pub character_id: ObjectId,
    /// Reference position used for interest management
    pub position: Vec3,
}

/// Remote procedure transport
pub trait RpcTransport {
    /// Session id of this process
    fn session_id(&self) -> i64;

    /// Whether this process is a dedicated server
    fn is_dedicated(&self) -> bool;

    fn peers(&self) -> &[PeerInfo];

    fn peer(&self, uid: i64) -> Option<&PeerInfo> {
        self.peers().iter().find(|p| p.uid == uid)
    }

    /// Route a procedure call. `target` 0 means every peer.
    fn send(&mut self, source: i64, target: i64, object: Option<ObjectId>, procedure: i32, args: &[u8]);
}

/// World clock
pub trait Clock {
    /// World time in seconds
    fn time(&self) -> f64;

    fn day(&self) -> i32;

    /// Monotonic tick counter
    fn ticks(&self) -> i64;

    fn is_day(&self) -> bool;
}

/// Read-only queries about the surrounding world
pub trait Environment {
    fn biome_at(&self, position: Vec3) -> String;

    /// Name of the active weather environment
    fn environment(&self) -> String;

    fn has_global_key(&self, key: &str) -> bool;

    /// Value of a global key, empty when unset
    fn global_key_value(&self, key: &str) -> String;

    /// Active world events and their positions
    fn active_events(&self) -> Vec<(String, Vec3)>;

    /// Location names registered within `distance` of a position
    fn locations_near(&self, position: Vec3, distance: f32) -> Vec<String>;
}

/// Terrain sampling
pub trait Terrain {
    fn height_at(&self, x: f32, z: f32) -> f32;

    /// Paint mask color: dirt, cultivated and paved in the first three channels
    fn paint_at(&self, x: f32, z: f32) -> Vec4;
}

/// Synchronous console command execution
pub trait CommandRunner {
    fn run(&mut self, command: &str);
}

/// Everything the engine needs from a host
pub trait Host:
    SpatialIndex + PrefabRegistry + ObjectStore + RpcTransport + Clock + Environment + Terrain + CommandRunner
{
}

impl<T> Host for T where
    T: SpatialIndex
        + PrefabRegistry
        + ObjectStore
        + RpcTransport
        + Clock
        + Environment
        + Terrain
        + CommandRunner
{
}
