//! Container contents generated from item lists

use crate::template::{FieldSource, Pars};
use crate::value::{ResolvableValue, ValueGroups};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use glam::IVec2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Field that holds the encoded container contents
pub const ITEMS_FIELD: &str = "items";

/// Format version written in front of the item list
pub const ITEMS_VERSION: i32 = 106;

/// Slots used when a list does not give a container size
const DEFAULT_SIZE: IVec2 = IVec2::new(4, 2);

/// One item record as configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemData {
    pub prefab: String,
    /// Probability of the item, or its weight when an amount is rolled
    pub chance: f32,
    pub stack: String,
    pub durability: String,
    /// Fixed slot `x,y`, empty for the next free slot
    pub pos: String,
    pub equipped: String,
    pub quality: String,
    pub variant: String,
    pub crafter_id: String,
    pub crafter_name: String,
    pub custom_data: BTreeMap<String, String>,
    pub world_level: String,
    pub picked_up: String,
}

impl Default for ItemData {
    fn default() -> Self {
        ItemData {
            prefab: String::new(),
            chance: 1.0,
            stack: String::new(),
            durability: String::new(),
            pos: String::new(),
            equipped: String::new(),
            quality: String::new(),
            variant: String::new(),
            crafter_id: String::new(),
            crafter_name: String::new(),
            custom_data: BTreeMap::new(),
            world_level: String::new(),
            picked_up: String::new(),
        }
    }
}

/// A generated item as stored in a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub prefab: String,
    pub stack: i32,
    pub durability: f32,
    pub slot: [i32; 2],
    pub equipped: bool,
    pub quality: i32,
    pub variant: i32,
    pub crafter_id: i64,
    pub crafter_name: String,
    pub custom_data: Vec<(String, String)>,
    pub world_level: i32,
    pub picked_up: bool,
}

/// Compiled item record
#[derive(Debug, Clone, PartialEq)]
pub struct ItemValue {
    /// Items are stored by name, so the prefab stays a string
    pub prefab: ResolvableValue<String>,
    pub chance: f32,
    pub stack: ResolvableValue<i32>,
    pub durability: ResolvableValue<f32>,
    pub slot: Option<IVec2>,
    pub equipped: ResolvableValue<bool>,
    pub quality: ResolvableValue<i32>,
    pub variant: ResolvableValue<i32>,
    pub crafter_id: ResolvableValue<i64>,
    pub crafter_name: ResolvableValue<String>,
    pub custom_data: BTreeMap<String, ResolvableValue<String>>,
    pub world_level: ResolvableValue<i32>,
    pub picked_up: ResolvableValue<bool>,
}

fn parse_slot(text: &str) -> Option<IVec2> {
    let (x, y) = text.split_once(',')?;
    Some(IVec2::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
}

impl ItemValue {
    pub fn compile(data: &ItemData, groups: &ValueGroups, required: &mut HashSet<String>) -> Self {
        let slot = if data.pos.trim().is_empty() {
            None
        } else {
            let slot = parse_slot(&data.pos);
            if slot.is_none() {
                tracing::warn!("Invalid item slot: {}", data.pos);
            }
            slot
        };
        ItemValue {
            prefab: ResolvableValue::parse(&data.prefab, groups, required),
            chance: data.chance,
            stack: ResolvableValue::parse(&data.stack, groups, required),
            durability: ResolvableValue::parse(&data.durability, groups, required),
            slot,
            equipped: ResolvableValue::parse(&data.equipped, groups, required),
            quality: ResolvableValue::parse(&data.quality, groups, required),
            variant: ResolvableValue::parse(&data.variant, groups, required),
            crafter_id: ResolvableValue::parse(&data.crafter_id, groups, required),
            crafter_name: ResolvableValue::parse(&data.crafter_name, groups, required),
            custom_data: data
                .custom_data
                .iter()
                .map(|(k, v)| (k.clone(), ResolvableValue::parse(v, groups, required)))
                .collect(),
            world_level: ResolvableValue::parse(&data.world_level, groups, required),
            picked_up: ResolvableValue::parse(&data.picked_up, groups, required),
        }
    }

    fn roll_chance<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.chance >= 1.0 || rng.random::<f32>() <= self.chance
    }

    fn roll_prefab<R: Rng + ?Sized>(&self, rng: &mut R, pars: Pars<'_>, source: Option<FieldSource<'_>>) -> Option<String> {
        self.prefab.get(rng, pars, source).filter(|p| !p.is_empty())
    }

    fn build<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        prefab: String,
        slot: IVec2,
        pars: Pars<'_>,
        source: Option<FieldSource<'_>>,
    ) -> Item {
        Item {
            prefab,
            stack: self.stack.get(rng, pars, source).unwrap_or(1),
            durability: self.durability.get(rng, pars, source).unwrap_or(100.0),
            slot: slot.to_array(),
            equipped: self.equipped.get(rng, pars, source).unwrap_or(false),
            quality: self.quality.get(rng, pars, source).unwrap_or(1),
            variant: self.variant.get(rng, pars, source).unwrap_or(1),
            crafter_id: self.crafter_id.get(rng, pars, source).unwrap_or(0),
            crafter_name: self.crafter_name.get(rng, pars, source).unwrap_or_default(),
            custom_data: self
                .custom_data
                .iter()
                .map(|(k, v)| (k.clone(), v.get(rng, pars, source).unwrap_or_default()))
                .collect(),
            world_level: self.world_level.get(rng, pars, source).unwrap_or(1),
            picked_up: self.picked_up.get(rng, pars, source).unwrap_or(false),
        }
    }
}

/// Items written into a container when a data entry is applied.
///
/// Items with a fixed slot are placed first. The rest fill free slots in
/// row order: each one rolled on its own chance, or, with an `amount`, that
/// many drawn by weight without replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemList {
    pub items: Vec<ItemValue>,
    /// Container slots, columns by rows
    pub size: Option<IVec2>,
    pub amount: ResolvableValue<i32>,
}

impl ItemList {
    pub fn compile(
        items: &[ItemData],
        size: &str,
        amount: &str,
        groups: &ValueGroups,
        required: &mut HashSet<String>,
    ) -> Self {
        let size = if size.trim().is_empty() {
            None
        } else {
            let parsed = parse_slot(size);
            if parsed.is_none() {
                tracing::warn!("Invalid container size: {}", size);
            }
            parsed
        };
        ItemList {
            items: items.iter().map(|i| ItemValue::compile(i, groups, required)).collect(),
            size,
            amount: ResolvableValue::parse(amount, groups, required),
        }
    }

    /// Roll the container contents
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, pars: Pars<'_>, source: Option<FieldSource<'_>>) -> Vec<Item> {
        let size = match self.size {
            Some(size) => IVec2::new(
                if size.x == 0 { DEFAULT_SIZE.x } else { size.x },
                if size.y == 0 { DEFAULT_SIZE.y } else { size.y },
            ),
            None => DEFAULT_SIZE,
        };
        // Keyed by (row, column) so the output is in slot order
        let mut inventory: BTreeMap<(i32, i32), Item> = BTreeMap::new();

        for item in self.items.iter().filter(|i| i.slot.is_some()) {
            let Some(slot) = item.slot else {
                continue;
            };
            if !item.roll_chance(rng) {
                continue;
            }
            if let Some(prefab) = item.roll_prefab(rng, pars, source) {
                inventory.insert((slot.y, slot.x), item.build(rng, prefab, slot, pars, source));
            }
        }

        let mut pool: Vec<&ItemValue> = self.items.iter().filter(|i| i.slot.is_none()).collect();
        let amount = self.amount.get(rng, pars, source).unwrap_or(0);
        if amount <= 0 {
            for item in pool {
                if !item.roll_chance(rng) {
                    continue;
                }
                let Some(prefab) = item.roll_prefab(rng, pars, source) else {
                    continue;
                };
                let Some(slot) = free_slot(&inventory, size) else {
                    break;
                };
                inventory.insert((slot.y, slot.x), item.build(rng, prefab, slot, pars, source));
            }
        } else {
            let mut total: f32 = pool.iter().map(|i| i.chance).sum();
            for _ in 0..amount {
                if pool.is_empty() {
                    break;
                }
                let Some(slot) = free_slot(&inventory, size) else {
                    break;
                };
                let index = pick_weighted(rng, &pool, total);
                let item = pool.remove(index);
                total -= item.chance;
                if let Some(prefab) = item.roll_prefab(rng, pars, source) {
                    inventory.insert((slot.y, slot.x), item.build(rng, prefab, slot, pars, source));
                }
            }
        }
        inventory.into_values().collect()
    }
}

fn free_slot(inventory: &BTreeMap<(i32, i32), Item>, size: IVec2) -> Option<IVec2> {
    (0..size.y)
        .flat_map(|y| (0..size.x).map(move |x| (y, x)))
        .find(|key| !inventory.contains_key(key))
        .map(|(y, x)| IVec2::new(x, y))
}

fn pick_weighted<R: Rng + ?Sized>(rng: &mut R, pool: &[&ItemValue], total: f32) -> usize {
    let mut roll = if total > 0.0 { rng.random_range(0.0..total) } else { 0.0 };
    for (i, item) in pool.iter().enumerate() {
        if roll < item.chance {
            return i;
        }
        roll -= item.chance;
    }
    pool.len() - 1
}

/// Encode container contents as stored in the items field
pub fn encode_items(items: &[Item]) -> Result<String> {
    let bytes = bincode::serialize(&(ITEMS_VERSION, items)).map_err(|e| Error::Items(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

/// Decode the items field
pub fn decode_items(text: &str) -> Result<Vec<Item>> {
    let bytes = STANDARD.decode(text).map_err(|e| Error::Items(e.to_string()))?;
    let (version, items): (i32, Vec<Item>) = bincode::deserialize(&bytes).map_err(|e| Error::Items(e.to_string()))?;
    if version != ITEMS_VERSION {
        return Err(Error::Items(format!("unsupported version {version}")));
    }
    Ok(items)
}
