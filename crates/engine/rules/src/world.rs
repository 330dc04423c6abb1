//! World object records and their typed fields

use crate::PrefabHash;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a world object record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    pub const NONE: ObjectId = ObjectId(0);
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ObjectId)
    }
}

/// Field kinds addressable by `<kind_name>` template directives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Global key value (not stored on the record)
    Key,
    String,
    Float,
    Int,
    Long,
    Bool,
    /// Int field holding a prefab hash, rendered as the prefab name
    Hash,
    Vec,
    Quat,
    /// Binary blob, rendered as base64
    Byte,
    /// Cross-reference to another record
    Ref,
}

impl FieldKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "key" => FieldKind::Key,
            "string" => FieldKind::String,
            "float" => FieldKind::Float,
            "int" => FieldKind::Int,
            "long" => FieldKind::Long,
            "bool" => FieldKind::Bool,
            "hash" => FieldKind::Hash,
            "vec" => FieldKind::Vec,
            "quat" => FieldKind::Quat,
            "byte" => FieldKind::Byte,
            "ref" | "zdo" => FieldKind::Ref,
            _ => return None,
        };
        Some(kind)
    }
}

/// A typed field value stored on a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    String(String),
    Float(f32),
    Int(i32),
    Long(i64),
    Bool(bool),
    Vec(Vec3),
    Quat(Quat),
    Bytes(Vec<u8>),
    Ref(ObjectId),
}

/// A persistent world object record
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    pub id: ObjectId,
    pub prefab: PrefabHash,
    pub position: Vec3,
    pub rotation: Quat,
    /// Owning peer id, 0 when unowned
    pub owner: i64,
    pub revision: u32,
    pub persistent: bool,
    fields: HashMap<String, FieldValue>,
}

impl WorldObject {
    pub fn new(id: ObjectId, prefab: PrefabHash, position: Vec3, rotation: Quat) -> Self {
        WorldObject {
            id,
            prefab,
            position,
            rotation,
            owner: 0,
            revision: 0,
            persistent: true,
            fields: HashMap::new(),
        }
    }

    pub fn with_owner(mut self, owner: i64) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_string(&self, name: &str) -> &str {
        match self.get(name) {
            Some(FieldValue::String(s)) => s,
            _ => "",
        }
    }

    pub fn get_float(&self, name: &str) -> f32 {
        match self.get(name) {
            Some(FieldValue::Float(f)) => *f,
            _ => 0.0,
        }
    }

    pub fn get_int(&self, name: &str) -> i32 {
        match self.get(name) {
            Some(FieldValue::Int(i)) => *i,
            _ => 0,
        }
    }

    pub fn get_long(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(FieldValue::Long(l)) => *l,
            _ => 0,
        }
    }

    pub fn get_bool(&self, name: &str) -> bool {
        match self.get(name) {
            Some(FieldValue::Bool(b)) => *b,
            Some(FieldValue::Int(i)) => *i != 0,
            _ => false,
        }
    }

    pub fn get_vec(&self, name: &str) -> Vec3 {
        match self.get(name) {
            Some(FieldValue::Vec(v)) => *v,
            _ => Vec3::ZERO,
        }
    }

    pub fn get_quat(&self, name: &str) -> Quat {
        match self.get(name) {
            Some(FieldValue::Quat(q)) => *q,
            _ => Quat::IDENTITY,
        }
    }

    pub fn get_bytes(&self, name: &str) -> &[u8] {
        match self.get(name) {
            Some(FieldValue::Bytes(b)) => b,
            _ => &[],
        }
    }

    pub fn get_ref(&self, name: &str) -> ObjectId {
        match self.get(name) {
            Some(FieldValue::Ref(id)) => *id,
            _ => ObjectId::NONE,
        }
    }
}

/// Horizontal (XZ plane) distance between two points
pub fn distance_xz(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    (dx * dx + dz * dz).sqrt()
}
