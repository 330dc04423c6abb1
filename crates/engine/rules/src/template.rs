//! Template engine: `<token>` substitution against parameter tables
//!
//! Tokens are resolved right to left. The rightmost `>` is located, then the
//! nearest `<` before it, and the token between them is replaced in place.
//! The next search only looks left of the replaced token, so replacements of
//! any length never disturb tokens that are still pending, and replaced text
//! is never scanned again.

use crate::host::{Clock, Environment, PrefabRegistry, RpcTransport};
use crate::parse::{degrees_from_quat, format_number};
use crate::spatial::sector_of;
use crate::world::{FieldKind, WorldObject};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use glam::Vec3;
use std::collections::HashMap;

/// A parameter table keyed by full token text (`<name>`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    table: HashMap<String, String>,
}

impl Parameters {
    pub fn new() -> Self {
        Parameters::default()
    }

    /// Insert a parameter by bare name (`par0`) or full token (`<par0>`)
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let key = if name.starts_with('<') && name.ends_with('>') {
            name.to_string()
        } else {
            format!("<{name}>")
        };
        self.table.insert(key, value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up by full token text
    pub fn get(&self, token: &str) -> Option<&str> {
        self.table.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Parameters of an event on an object record
    pub fn for_object(
        prefab_name: &str,
        args: &str,
        record: &WorldObject,
        clock: &dyn Clock,
        transport: &dyn RpcTransport,
        sector_size: f32,
    ) -> Self {
        let mut pars = Parameters::for_position(args, record.position, clock, sector_size);
        pars.insert("zdo", record.id.to_string());
        pars.insert("prefab", prefab_name);

        let (yaw, pitch, roll) = degrees_from_quat(record.rotation);
        let (ry, rx, rz) = (
            format_number(yaw as f64),
            format_number(pitch as f64),
            format_number(roll as f64),
        );
        pars.insert("a", ry.clone());
        pars.insert("rot", format!("{ry},{rx},{rz}"));

        let peer = if record.owner != 0 {
            transport.peer(record.owner)
        } else {
            None
        };
        pars.insert("pid", peer.map(|p| p.host_name.clone()).unwrap_or_default());
        pars.insert("pname", peer.map(|p| p.player_name.clone()).unwrap_or_default());
        pars.insert(
            "pchar",
            peer.map(|p| p.character_id.to_string()).unwrap_or_default(),
        );
        pars
    }

    /// Parameters of a position-anchored event with no object
    pub fn for_position(args: &str, position: Vec3, clock: &dyn Clock, sector_size: f32) -> Self {
        let mut pars = Parameters::new();
        let split: Vec<&str> = args.split(' ').collect();
        for i in 0..5 {
            pars.insert(&format!("par{i}"), split.get(i).copied().unwrap_or(""));
        }
        pars.insert("par", args);

        let x = format_number(position.x as f64);
        let y = format_number(position.y as f64);
        let z = format_number(position.z as f64);
        pars.insert("pos", format!("{x},{z},{y}"));
        pars.insert("x", x);
        pars.insert("y", y);
        pars.insert("z", z);

        let sector = sector_of(position, sector_size);
        pars.insert("i", sector.x.to_string());
        pars.insert("j", sector.y.to_string());

        let time = clock.time();
        pars.insert("time", format_number(time));
        pars.insert("day", clock.day().to_string());
        pars.insert("ticks", clock.ticks().to_string());
        pars
    }
}

/// Parameter tables consulted during resolution, object scope first
#[derive(Debug, Clone, Copy)]
pub struct Pars<'a> {
    pub global: &'a Parameters,
    pub object: Option<&'a Parameters>,
}

impl<'a> Pars<'a> {
    pub fn new(global: &'a Parameters) -> Self {
        Pars {
            global,
            object: None,
        }
    }

    pub fn with_object(global: &'a Parameters, object: &'a Parameters) -> Self {
        Pars {
            global,
            object: Some(object),
        }
    }

    fn lookup(&self, token: &str) -> Option<&'a str> {
        self.object
            .and_then(|o| o.get(token))
            .or_else(|| self.global.get(token))
    }
}

/// A record whose typed fields can be read by `<kind_name>` directives
#[derive(Clone, Copy)]
pub struct FieldSource<'a> {
    pub record: &'a WorldObject,
    pub prefabs: &'a dyn PrefabRegistry,
    pub environment: &'a dyn Environment,
}

impl<'a> FieldSource<'a> {
    pub fn new(
        record: &'a WorldObject,
        prefabs: &'a dyn PrefabRegistry,
        environment: &'a dyn Environment,
    ) -> Self {
        FieldSource {
            record,
            prefabs,
            environment,
        }
    }

    /// Render a field of the given kind as text
    pub fn field_text(&self, kind: FieldKind, name: &str) -> String {
        let record = self.record;
        match kind {
            FieldKind::Key => self.environment.global_key_value(name),
            FieldKind::String => record.get_string(name).to_string(),
            FieldKind::Float => record.get_float(name).to_string(),
            FieldKind::Int => record.get_int(name).to_string(),
            FieldKind::Long => record.get_long(name).to_string(),
            FieldKind::Bool => record.get_bool(name).to_string(),
            FieldKind::Hash => self
                .prefabs
                .name(crate::PrefabHash(record.get_int(name)))
                .unwrap_or_default()
                .to_string(),
            FieldKind::Vec => {
                let v = record.get_vec(name);
                format!(
                    "{},{},{}",
                    format_number(v.x as f64),
                    format_number(v.z as f64),
                    format_number(v.y as f64)
                )
            }
            FieldKind::Quat => {
                let (y, x, z) = degrees_from_quat(record.get_quat(name));
                format!(
                    "{},{},{}",
                    format_number(y as f64),
                    format_number(x as f64),
                    format_number(z as f64)
                )
            }
            FieldKind::Byte => STANDARD.encode(record.get_bytes(name)),
            FieldKind::Ref => record.get_ref(name).to_string(),
        }
    }

    fn directive(&self, token: &str) -> Option<String> {
        let inner = &token[1..token.len() - 1];
        let (tag, name) = inner.split_once('_')?;
        if name.is_empty() {
            return None;
        }
        let kind = FieldKind::from_tag(tag)?;
        Some(self.field_text(kind, name))
    }
}

/// Resolve every `<token>` in `text`. Unresolved tokens stay verbatim.
pub fn resolve(text: &str, pars: Pars<'_>, source: Option<FieldSource<'_>>) -> String {
    if !text.contains('<') {
        return text.to_string();
    }
    let mut out = text.to_string();
    // Exclusive bound of the region still to scan
    let mut bound = out.len();
    loop {
        let Some(end) = out[..bound].rfind('>') else {
            break;
        };
        let Some(start) = out[..end].rfind('<') else {
            break;
        };
        bound = start;
        let token = &out[start..=end];
        let value = match pars.lookup(token) {
            Some(v) => Some(v.to_string()),
            None => source.and_then(|s| s.directive(token)),
        };
        if let Some(value) = value {
            out.replace_range(start..=end, &value);
        }
    }
    out
}

/// Whether a string still carries a `<...>` placeholder
pub fn has_placeholder(text: &str) -> bool {
    match text.find('<') {
        Some(start) => text[start..].contains('>'),
        None => false,
    }
}
