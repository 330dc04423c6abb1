//! Conditions a rule checks before it is selected

use crate::data::DataEntry;
use crate::filter::{CountRange, ObjectFilter};
use glam::Vec4;
use std::collections::HashSet;

/// Condition for rule matching
///
/// Conditions are evaluated against the event position and, for object
/// events, the triggering record. All conditions of a rule must pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Match during the day, the night, or both
    TimeOfDay {
        day: bool,
        night: bool,
    },

    /// Biome at the event position is one of these (lowercase)
    Biomes(HashSet<String>),

    /// Active weather environment is one of these (lowercase)
    Environments(HashSet<String>),

    /// Active weather environment is none of these (lowercase)
    BannedEnvironments(HashSet<String>),

    /// Every key is set
    GlobalKeys(Vec<String>),

    /// No key is set
    BannedGlobalKeys(Vec<String>),

    /// One of the named world events is active within `distance`
    Events {
        names: HashSet<String>,
        distance: f32,
    },

    /// Required nearby objects
    Objects {
        filters: Vec<ObjectFilter>,
        limit: Option<CountRange>,
    },

    /// Banned nearby objects
    BannedObjects {
        filters: Vec<ObjectFilter>,
        limit: Option<CountRange>,
    },

    /// One of the named locations is within `distance`
    Locations {
        names: HashSet<String>,
        distance: f32,
    },

    /// Horizontal distance from the world centre
    Distance {
        min: f32,
        max: f32,
    },

    /// Height above the water level
    Altitude {
        min: f32,
        max: f32,
    },

    /// Absolute height
    Height {
        min: f32,
        max: f32,
    },

    /// Terrain paint at the position lies between two colors, per channel
    Paint {
        min: Vec4,
        max: Vec4,
    },

    /// The triggering record matches a data entry
    Filter(DataEntry),

    /// The triggering record does not match a data entry
    BannedFilter(DataEntry),

    /// Never matches (configured with an unknown reference)
    Never,
}

impl Condition {
    pub fn time_of_day(day: bool, night: bool) -> Self {
        Condition::TimeOfDay { day, night }
    }

    /// Lowercased name set, the form every name condition stores
    pub fn names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> HashSet<String> {
        names.into_iter().map(|n| n.as_ref().to_lowercase()).collect()
    }

    pub fn biomes<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        Condition::Biomes(Self::names(names))
    }

    pub fn objects(filters: Vec<ObjectFilter>, limit: Option<CountRange>) -> Self {
        Condition::Objects { filters, limit }
    }

    pub fn banned_objects(filters: Vec<ObjectFilter>, limit: Option<CountRange>) -> Self {
        Condition::BannedObjects { filters, limit }
    }

    /// Whether the condition reads the triggering record.
    /// Such conditions are skipped for global events.
    pub fn needs_record(&self) -> bool {
        matches!(self, Condition::Filter(_) | Condition::BannedFilter(_))
    }
}
