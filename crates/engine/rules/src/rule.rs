//! Rule definition and management

use crate::data::DataEntry;
use crate::hash::PrefabHash;
use crate::parse::check_wild;
use crate::{Action, Condition, Error};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a rule
pub type RuleId = String;

/// Lifecycle events a rule can react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Create,
    Destroy,
    Repair,
    Damage,
    State,
    Say,
    Poke,
    /// Console command, global
    Command,
    /// Time tick, global
    Time,
    /// Global key change, global
    GlobalKey,
    /// World event start or end, global
    Event,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 11] = [
        TriggerKind::Create,
        TriggerKind::Destroy,
        TriggerKind::Repair,
        TriggerKind::Damage,
        TriggerKind::State,
        TriggerKind::Say,
        TriggerKind::Poke,
        TriggerKind::Command,
        TriggerKind::Time,
        TriggerKind::GlobalKey,
        TriggerKind::Event,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Create => "create",
            TriggerKind::Destroy => "destroy",
            TriggerKind::Repair => "repair",
            TriggerKind::Damage => "damage",
            TriggerKind::State => "state",
            TriggerKind::Say => "say",
            TriggerKind::Poke => "poke",
            TriggerKind::Command => "command",
            TriggerKind::Time => "time",
            TriggerKind::GlobalKey => "globalkey",
            TriggerKind::Event => "event",
        }
    }

    /// Whether events of this kind carry no object record
    pub fn is_global(self) -> bool {
        matches!(
            self,
            TriggerKind::Command | TriggerKind::Time | TriggerKind::GlobalKey | TriggerKind::Event
        )
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        TriggerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| Error::UnknownTrigger(s.to_string()))
    }
}

/// Prefab identities a rule applies to. Empty means every prefab.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefabSet {
    pub exact: HashSet<PrefabHash>,
    /// Wildcard patterns matched against prefab names
    pub wildcards: Vec<String>,
}

impl PrefabSet {
    pub fn any() -> Self {
        PrefabSet::default()
    }

    pub fn of(prefabs: impl IntoIterator<Item = PrefabHash>) -> Self {
        PrefabSet {
            exact: prefabs.into_iter().collect(),
            wildcards: Vec::new(),
        }
    }

    pub fn is_any(&self) -> bool {
        self.exact.is_empty() && self.wildcards.is_empty()
    }

    pub fn matches(&self, prefab: PrefabHash, name: &str) -> bool {
        self.is_any() || self.exact.contains(&prefab) || self.wildcards.iter().any(|w| check_wild(w, name))
    }
}

/// What happens to the triggering object once its rule has fired
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lifecycle {
    /// Destroy the original
    pub remove: bool,
    /// Seconds before removal
    pub remove_delay: f32,
    /// Custom data applied to the object
    pub data: Option<DataEntry>,
    /// Write `data` in place instead of regenerating the object
    pub inject_data: bool,
    /// Whether removals and regenerations fire rules of their own
    pub trigger_rules: bool,
}

impl Lifecycle {
    /// Object is recreated with merged data, then the original is removed
    pub fn regenerates(&self) -> bool {
        !self.remove && self.data.is_some() && !self.inject_data
    }

    /// Original is scheduled for removal
    pub fn removes(&self) -> bool {
        self.remove || self.regenerates()
    }
}

/// A rule that matches conditions and dispatches actions
///
/// Rules are checked in registration order within their trigger kind. The
/// first matching rule wins; fallback rules are only used when no regular
/// rule matched.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique identifier for this rule
    id: RuleId,

    /// Human-readable description
    description: Option<String>,

    trigger: TriggerKind,

    prefabs: PrefabSet,

    /// Wildcard patterns for the space separated event arguments
    args: Vec<String>,

    fallback: bool,

    /// Remove flag the event must carry (global events only)
    remove_event: bool,

    /// Conditions that must all match (AND logic)
    conditions: Vec<Condition>,

    /// Actions to perform when conditions match
    actions: Vec<Action>,

    lifecycle: Lifecycle,

    /// Whether this rule is currently enabled
    enabled: bool,
}

impl Rule {
    /// Create a new rule with the given ID
    pub fn new(id: impl Into<RuleId>, trigger: TriggerKind) -> Self {
        Rule {
            id: id.into(),
            description: None,
            trigger,
            prefabs: PrefabSet::any(),
            args: Vec::new(),
            fallback: false,
            remove_event: false,
            conditions: Vec::new(),
            actions: Vec::new(),
            lifecycle: Lifecycle::default(),
            enabled: true,
        }
    }

    /// Get the rule's unique identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn trigger(&self) -> TriggerKind {
        self.trigger
    }

    pub fn prefabs(&self) -> &PrefabSet {
        &self.prefabs
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn remove_event(&self) -> bool {
        self.remove_event
    }

    /// Get the rule's conditions
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Get the rule's actions
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Check if the rule is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the rule's description (builder pattern)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn for_prefabs(mut self, prefabs: PrefabSet) -> Self {
        self.prefabs = prefabs;
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    /// Match global events that carry the remove flag
    pub fn on_remove_event(mut self, remove: bool) -> Self {
        self.remove_event = remove;
        self
    }

    /// Add a condition to this rule (builder pattern)
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add multiple conditions to this rule (builder pattern)
    pub fn when_all(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// Add an action to this rule (builder pattern)
    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Add multiple actions to this rule (builder pattern)
    pub fn then_all(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.actions.extend(actions);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set whether the rule is enabled (builder pattern)
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enable or disable this rule
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the space separated event arguments match the patterns
    pub fn matches_args(&self, args: &str) -> bool {
        if self.args.is_empty() {
            return true;
        }
        let split: Vec<&str> = args.split(' ').collect();
        self.args
            .iter()
            .enumerate()
            .all(|(i, pattern)| check_wild(pattern, split.get(i).copied().unwrap_or_default()))
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Rule {}

impl std::hash::Hash for Rule {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
