//! Structured data entries: typed field patches and field filters

use crate::items::{encode_items, ItemList, ITEMS_FIELD};
use crate::template::{FieldSource, Parameters, Pars};
use crate::value::{ResolvableValue, ValueGroups};
use crate::world::{FieldKind, FieldValue, ObjectId, WorldObject};
use crate::PrefabHash;
use glam::{Quat, Vec3};
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One field of a data entry
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Int(ResolvableValue<i32>),
    Float(ResolvableValue<f32>),
    Long(ResolvableValue<i64>),
    Bool(ResolvableValue<bool>),
    String(ResolvableValue<String>),
    /// Prefab name stored as an int hash
    Hash(ResolvableValue<PrefabHash>),
    Vec(ResolvableValue<Vec3>),
    Quat(ResolvableValue<Quat>),
    Bytes(Vec<u8>),
    Ref(ObjectId),
    /// Only the presence of the field is checked, nothing is written
    Exists,
}

impl DataValue {
    /// Parse a raw value for a field kind. Kinds that are not stored on
    /// records (`key`) yield `None`.
    pub fn parse(
        kind: FieldKind,
        raw: &str,
        groups: &ValueGroups,
        required: &mut HashSet<String>,
    ) -> Option<Self> {
        let value = match kind {
            FieldKind::Int => DataValue::Int(ResolvableValue::parse(raw, groups, required)),
            FieldKind::Float => DataValue::Float(ResolvableValue::parse(raw, groups, required)),
            FieldKind::Long => DataValue::Long(ResolvableValue::parse(raw, groups, required)),
            FieldKind::Bool => DataValue::Bool(ResolvableValue::parse(raw, groups, required)),
            FieldKind::String => DataValue::String(ResolvableValue::parse(raw, groups, required)),
            FieldKind::Hash => DataValue::Hash(ResolvableValue::parse(raw, groups, required)),
            FieldKind::Vec => DataValue::Vec(ResolvableValue::parse(raw, groups, required)),
            FieldKind::Quat => DataValue::Quat(ResolvableValue::parse(raw, groups, required)),
            FieldKind::Byte => {
                use base64::{engine::general_purpose::STANDARD, Engine as _};
                match STANDARD.decode(raw.trim()) {
                    Ok(bytes) => DataValue::Bytes(bytes),
                    Err(err) => {
                        tracing::warn!("Invalid byte value {}: {}", raw, err);
                        DataValue::Bytes(Vec::new())
                    }
                }
            }
            FieldKind::Ref => match raw.parse::<ObjectId>() {
                Ok(id) => DataValue::Ref(id),
                Err(_) => {
                    tracing::warn!("Invalid ref value: {}", raw);
                    DataValue::Ref(ObjectId::NONE)
                }
            },
            FieldKind::Key => return None,
        };
        Some(value)
    }

    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::String(s) => DataValue::String(ResolvableValue::constant(s.clone())),
            FieldValue::Float(f) => DataValue::Float(ResolvableValue::constant(*f)),
            FieldValue::Int(i) => DataValue::Int(ResolvableValue::constant(*i)),
            FieldValue::Long(l) => DataValue::Long(ResolvableValue::constant(*l)),
            FieldValue::Bool(b) => DataValue::Bool(ResolvableValue::constant(*b)),
            FieldValue::Vec(v) => DataValue::Vec(ResolvableValue::constant(*v)),
            FieldValue::Quat(q) => DataValue::Quat(ResolvableValue::constant(*q)),
            FieldValue::Bytes(b) => DataValue::Bytes(b.clone()),
            FieldValue::Ref(id) => DataValue::Ref(*id),
        }
    }

    fn resolve<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        pars: Pars<'_>,
        source: Option<FieldSource<'_>>,
    ) -> Option<FieldValue> {
        match self {
            DataValue::Int(v) => v.get(rng, pars, source).map(FieldValue::Int),
            DataValue::Float(v) => v.get(rng, pars, source).map(FieldValue::Float),
            DataValue::Long(v) => v.get(rng, pars, source).map(FieldValue::Long),
            DataValue::Bool(v) => v.get(rng, pars, source).map(FieldValue::Bool),
            DataValue::String(v) => v.get(rng, pars, source).map(FieldValue::String),
            DataValue::Hash(v) => v.get(rng, pars, source).map(|h| FieldValue::Int(h.0)),
            DataValue::Vec(v) => v.get(rng, pars, source).map(FieldValue::Vec),
            DataValue::Quat(v) => v.get(rng, pars, source).map(FieldValue::Quat),
            DataValue::Bytes(b) => Some(FieldValue::Bytes(b.clone())),
            DataValue::Ref(id) => Some(FieldValue::Ref(*id)),
            DataValue::Exists => None,
        }
    }

    fn matches(&self, pars: Pars<'_>, source: Option<FieldSource<'_>>, actual: &FieldValue) -> bool {
        match (self, actual) {
            (DataValue::Exists, _) => true,
            (DataValue::Int(v), FieldValue::Int(a)) => v.matches(pars, source, a),
            (DataValue::Hash(v), FieldValue::Int(a)) => v.matches(pars, source, &PrefabHash(*a)),
            (DataValue::Float(v), FieldValue::Float(a)) => v.matches(pars, source, a),
            (DataValue::Long(v), FieldValue::Long(a)) => v.matches(pars, source, a),
            (DataValue::Bool(v), FieldValue::Bool(a)) => v.matches(pars, source, a),
            (DataValue::String(v), FieldValue::String(a)) => v.matches(pars, source, a),
            (DataValue::Vec(v), FieldValue::Vec(a)) => v.matches(pars, source, a),
            (DataValue::Quat(v), FieldValue::Quat(a)) => v.matches(pars, source, a),
            (DataValue::Bytes(b), FieldValue::Bytes(a)) => b == a,
            (DataValue::Ref(id), FieldValue::Ref(a)) => id == a,
            _ => false,
        }
    }
}

/// A named set of typed field values.
///
/// Used both as a patch written onto records and as a filter that records
/// must match. Entries can also declare object-scoped parameters that take
/// priority over event parameters when templates are resolved, and container
/// items generated into the items field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataEntry {
    fields: BTreeMap<String, DataValue>,
    parameters: BTreeMap<String, ResolvableValue<String>>,
    persistent: Option<bool>,
    items: Option<ItemList>,
}

impl DataEntry {
    pub fn new() -> Self {
        DataEntry::default()
    }

    /// Snapshot of a live record's fields as constants
    pub fn from_record(record: &WorldObject) -> Self {
        let fields = record
            .fields()
            .map(|(name, value)| (name.to_string(), DataValue::from_field(value)))
            .collect();
        DataEntry {
            fields,
            parameters: BTreeMap::new(),
            persistent: Some(record.persistent),
            items: None,
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: DataValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: DataValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: ResolvableValue<String>) {
        self.parameters.insert(name.into(), value);
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = Some(persistent);
    }

    pub fn set_items(&mut self, items: ItemList) {
        self.items = Some(items);
    }

    pub fn items(&self) -> Option<&ItemList> {
        self.items.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overlay `patch` on `base`; the patch wins on conflicting keys
    pub fn merge(base: Option<&DataEntry>, patch: Option<&DataEntry>) -> Option<DataEntry> {
        match (base, patch) {
            (None, None) => None,
            (Some(b), None) => Some(b.clone()),
            (None, Some(p)) => Some(p.clone()),
            (Some(b), Some(p)) => {
                let mut merged = b.clone();
                merged
                    .fields
                    .extend(p.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged
                    .parameters
                    .extend(p.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged.persistent = p.persistent.or(b.persistent);
                if p.items.is_some() {
                    merged.items = p.items.clone();
                }
                Some(merged)
            }
        }
    }

    /// Resolve the object-scoped parameter table
    pub fn parameters<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        pars: Pars<'_>,
        source: Option<FieldSource<'_>>,
    ) -> Parameters {
        let mut table = Parameters::new();
        for (name, value) in &self.parameters {
            if let Some(resolved) = value.get(rng, pars, source) {
                table.insert(name, resolved);
            }
        }
        table
    }

    /// Resolve every writable field. Fields resolving to none are skipped.
    /// Container items are rolled and encoded into the items field.
    pub fn resolve_fields<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        pars: Pars<'_>,
        source: Option<FieldSource<'_>>,
    ) -> Vec<(String, FieldValue)> {
        let mut fields: Vec<(String, FieldValue)> = self
            .fields
            .iter()
            .filter_map(|(name, value)| {
                value
                    .resolve(rng, pars, source)
                    .map(|v| (name.clone(), v))
            })
            .collect();
        if let Some(list) = &self.items {
            let items = list.generate(rng, pars, source);
            match encode_items(&items) {
                Ok(text) => fields.push((ITEMS_FIELD.to_string(), FieldValue::String(text))),
                Err(err) => tracing::warn!("{}", err),
            }
        }
        fields
    }

    /// Write resolved fields onto a record
    pub fn apply(&self, record: &mut WorldObject, fields: Vec<(String, FieldValue)>) {
        for (name, value) in fields {
            record.set(name, value);
        }
        if let Some(persistent) = self.persistent {
            record.persistent = persistent;
        }
    }

    /// Whether the record carries every field, with matching values where given
    pub fn matches(&self, pars: Pars<'_>, source: Option<FieldSource<'_>>, record: &WorldObject) -> bool {
        self.fields.iter().all(|(name, expected)| match record.get(name) {
            Some(actual) => expected.matches(pars, source, actual),
            None => false,
        })
    }
}

/// Data entries by name
#[derive(Debug, Clone, Default)]
pub struct DataRegistry {
    entries: HashMap<String, DataEntry>,
}

impl DataRegistry {
    pub fn new() -> Self {
        DataRegistry::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: DataEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&DataEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a configured data name, logging unknown names
    pub fn lookup(&self, name: &str) -> Option<DataEntry> {
        if name.is_empty() {
            return None;
        }
        let entry = self.entries.get(name).cloned();
        if entry.is_none() {
            tracing::error!("Invalid data entry: {}", name);
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record() -> WorldObject {
        WorldObject::new(ObjectId(1), PrefabHash::of("Wolf"), Vec3::ZERO, Quat::IDENTITY)
            .with_field("level", FieldValue::Int(2))
            .with_field("name", FieldValue::String("Fang".into()))
    }

    fn int(v: i32) -> DataValue {
        DataValue::Int(ResolvableValue::constant(v))
    }

    #[test]
    fn test_merge_patch_wins() {
        let base = DataEntry::from_record(&record());
        let patch = DataEntry::new().with("level", int(3)).with("tamed", DataValue::Exists);
        let merged = DataEntry::merge(Some(&base), Some(&patch)).unwrap();
        assert_eq!(merged.get("level"), Some(&int(3)));
        assert!(merged.get("name").is_some());
        assert!(merged.get("tamed").is_some());
        assert_eq!(DataEntry::merge(None, None), None);
    }

    #[test]
    fn test_write_resolves_templates() {
        let mut groups = ValueGroups::new();
        groups.insert("levels", vec!["4".into()]);
        let mut required = HashSet::new();
        let entry = DataEntry::new()
            .with("level", DataValue::parse(FieldKind::Int, "<levels>", &groups, &mut required).unwrap())
            .with("owner", DataValue::parse(FieldKind::String, "<pname>", &groups, &mut required).unwrap());
        assert!(required.contains("pname"));

        let pars = Parameters::new().with("pname", "Ada");
        let mut rng = StdRng::seed_from_u64(3);
        let mut target = record();
        let fields = entry.resolve_fields(&mut rng, Pars::new(&pars), None);
        entry.apply(&mut target, fields);
        assert_eq!(target.get_int("level"), 4);
        assert_eq!(target.get_string("owner"), "Ada");
    }

    #[test]
    fn test_filter_presence_and_value() {
        let pars = Parameters::new();
        let present = DataEntry::new().with("name", DataValue::Exists);
        assert!(present.matches(Pars::new(&pars), None, &record()));

        let wrong = DataEntry::new().with("level", int(5));
        assert!(!wrong.matches(Pars::new(&pars), None, &record()));

        let missing = DataEntry::new().with("stars", DataValue::Exists);
        assert!(!missing.matches(Pars::new(&pars), None, &record()));

        let kind_mismatch = DataEntry::new().with("level", DataValue::Float(ResolvableValue::constant(2.0)));
        assert!(!kind_mismatch.matches(Pars::new(&pars), None, &record()));
    }

    #[test]
    fn test_object_parameters() {
        let mut entry = DataEntry::new();
        entry.set_parameter("loot", ResolvableValue::constant("Coins".to_string()));
        let pars = Parameters::new();
        let mut rng = StdRng::seed_from_u64(3);
        let table = entry.parameters(&mut rng, Pars::new(&pars), None);
        assert_eq!(table.get("<loot>"), Some("Coins"));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = DataRegistry::new();
        registry.insert("tame", DataEntry::new().with("tamed", DataValue::Bool(ResolvableValue::constant(true))));
        assert!(registry.lookup("tame").is_some());
        assert!(registry.lookup("missing").is_none());
        assert!(registry.lookup("").is_none());
    }

    #[test]
    fn test_items_written_to_field() {
        use crate::items::{decode_items, ItemData};

        let groups = ValueGroups::new();
        let mut required = HashSet::new();
        let list = ItemList::compile(
            &[ItemData {
                prefab: "Amber".into(),
                stack: "3".into(),
                ..ItemData::default()
            }],
            "",
            "",
            &groups,
            &mut required,
        );
        let mut chest = DataEntry::new();
        chest.set_items(list);
        let merged = DataEntry::merge(Some(&DataEntry::from_record(&record())), Some(&chest)).unwrap();
        assert!(merged.items().is_some());

        let pars = Parameters::new();
        let mut target = record();
        let fields = merged.resolve_fields(&mut StdRng::seed_from_u64(8), Pars::new(&pars), None);
        merged.apply(&mut target, fields);
        let items = decode_items(&target.get_string(ITEMS_FIELD)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].prefab, "Amber");
        assert_eq!(items[0].stack, 3);
        assert_eq!(target.get_int("level"), 2);
    }
}
