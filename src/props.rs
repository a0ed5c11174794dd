//! Late-bound property maps for visited nodes.
//!
//! Every node visit carries a [`PropertyMap`]: a name-to-value mapping that
//! borrows most bindings from its parent (the enclosing directory, archive,
//! or compressed stream) and overrides the node-specific ones (`type`,
//! `path`, `depth`, `name`, format fields).
//!
//! Values may be produced lazily: a producer registered with
//! [`PropertyMap::set_lazy`] runs at most once, on first read, and its result
//! is cached for the lifetime of the map. This is how streaming archive
//! entries expose `size` without draining their stream unless someone asks.
//!
//! Missing names are not errors: [`PropertyMap::get_str`] returns the empty
//! string, and definedness is observable separately through
//! [`PropertyMap::contains`]. Three virtual keys are always defined:
//! `_keys` (the defined names), `_values` (their values, forcing producers),
//! and `_map` (a `name=value` snapshot).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::SystemTime;

use chrono::{DateTime, Local};

use crate::{Error, Result};

/// A property value.
///
/// The traversal uses a small closed set of variants; codec-specific
/// attributes (entry mode bits, uid/gid) travel as `Int` or `Str`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string.
    Str(String),
    /// A signed integer. `size` uses -1 for "unknown until consumed".
    Int(i64),
    /// A point in time (`lastModifiedDate`).
    Date(SystemTime),
    /// A boolean.
    Bool(bool),
    /// Raw bytes (digests, checksums).
    Bytes(Vec<u8>),
}

impl Value {
    /// Renders the value the way `-echo` and `${name}` substitution show it.
    pub fn render(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Date(t) => {
                let local: DateTime<Local> = (*t).into();
                local.format("%Y-%m-%d %H:%M:%S").to_string()
            }
            Value::Bytes(b) => hex::encode(b),
        }
    }

    /// The truthiness rule used by property-boolean tests.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty() && s != "false",
            Value::Int(i) => *i != 0,
            Value::Bool(b) => *b,
            Value::Date(_) => true,
            Value::Bytes(b) => !b.is_empty(),
        }
    }

    /// Returns the integer form, coercing `Str` when it parses.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Str(s) => s.parse().ok(),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Returns the `SystemTime` for `Date` values.
    pub fn as_date(&self) -> Option<SystemTime> {
        match self {
            Value::Date(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<SystemTime> for Value {
    fn from(t: SystemTime) -> Self {
        Value::Date(t)
    }
}

/// A deferred value producer. Runs at most once per map.
type Producer = Box<dyn FnOnce() -> Result<Value>>;

enum Slot {
    Ready(Value),
    Lazy(Producer),
    /// Placeholder while a producer is running; observable only on
    /// re-entrant reads.
    Running,
}

/// A parent-linked, lazily-evaluated property map.
///
/// Created on entry into a node, derived from the parent's map, dropped when
/// the visitor returns. Overrides shadow parent bindings; lazy producers are
/// memoized within this map only.
pub struct PropertyMap<'p> {
    parent: Option<&'p PropertyMap<'p>>,
    slots: RefCell<BTreeMap<String, Slot>>,
    frozen: bool,
}

impl<'p> PropertyMap<'p> {
    /// Creates an empty root map.
    pub fn new() -> Self {
        Self {
            parent: None,
            slots: RefCell::new(BTreeMap::new()),
            frozen: false,
        }
    }

    /// Creates a child map that inherits every binding of `parent`.
    pub fn derived(parent: &'p PropertyMap<'p>) -> Self {
        Self {
            parent: Some(parent),
            slots: RefCell::new(BTreeMap::new()),
            frozen: false,
        }
    }

    /// Binds `name` to an eager value, shadowing any parent binding.
    ///
    /// # Errors
    ///
    /// Fails on a frozen map.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.frozen {
            return Err(Error::Config(format!(
                "property map is read-only, cannot set '{name}'"
            )));
        }
        self.slots
            .borrow_mut()
            .insert(name.to_string(), Slot::Ready(value.into()));
        Ok(())
    }

    /// Binds `name` to a producer that runs at most once, on first read.
    pub fn set_lazy(
        &mut self,
        name: &str,
        producer: impl FnOnce() -> Result<Value> + 'static,
    ) -> Result<()> {
        if self.frozen {
            return Err(Error::Config(format!(
                "property map is read-only, cannot set '{name}'"
            )));
        }
        self.slots
            .borrow_mut()
            .insert(name.to_string(), Slot::Lazy(Box::new(producer)));
        Ok(())
    }

    /// Derives a child map with the given eager overrides.
    pub fn with_overrides(&'p self, pairs: &[(&str, Value)]) -> Self {
        let mut child = Self::derived(self);
        for (name, value) in pairs {
            // A fresh map is never frozen.
            child.set(name, value.clone()).expect("fresh map");
        }
        child
    }

    /// Freezes the map: subsequent `set`/`set_lazy` calls fail. Reads (and
    /// therefore lazy materialization) still work.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Returns whether `name` is defined here or in any ancestor.
    ///
    /// The virtual keys `_keys`, `_values` and `_map` are always defined.
    pub fn contains(&self, name: &str) -> bool {
        if matches!(name, "_keys" | "_values" | "_map") {
            return true;
        }
        if self.slots.borrow().contains_key(name) {
            return true;
        }
        self.parent.is_some_and(|p| p.contains(name))
    }

    /// Reads a value, running (and caching) its producer if necessary.
    ///
    /// Returns `Ok(None)` for undefined names. A producer's I/O error
    /// propagates to the caller.
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        match name {
            "_keys" => return Ok(Some(Value::Str(self.keys().join(",")))),
            "_values" => {
                let mut values = Vec::new();
                for key in self.keys() {
                    if let Some(v) = self.get(&key)? {
                        values.push(v.render());
                    }
                }
                return Ok(Some(Value::Str(values.join(","))));
            }
            "_map" => {
                let mut entries = Vec::new();
                for key in self.keys() {
                    if let Some(v) = self.get(&key)? {
                        entries.push(format!("{key}={}", v.render()));
                    }
                }
                return Ok(Some(Value::Str(entries.join(", "))));
            }
            _ => {}
        }

        let slot_state = {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(name) {
                None => None,
                Some(Slot::Ready(v)) => return Ok(Some(v.clone())),
                Some(Slot::Running) => {
                    return Err(Error::Config(format!(
                        "re-entrant read of property '{name}'"
                    )));
                }
                Some(slot @ Slot::Lazy(_)) => {
                    Some(std::mem::replace(slot, Slot::Running))
                }
            }
        };

        match slot_state {
            Some(Slot::Lazy(producer)) => {
                // The borrow is released while the producer runs, so it may
                // read other properties of this same map.
                let result = producer();
                let mut slots = self.slots.borrow_mut();
                match result {
                    Ok(value) => {
                        slots.insert(name.to_string(), Slot::Ready(value.clone()));
                        Ok(Some(value))
                    }
                    Err(e) => {
                        slots.remove(name);
                        Err(e)
                    }
                }
            }
            Some(_) => unreachable!("only Lazy slots are taken"),
            None => match self.parent {
                Some(parent) => parent.get(name),
                None => Ok(None),
            },
        }
    }

    /// Reads a value as a rendered string; undefined names read as `""`.
    pub fn get_str(&self, name: &str) -> Result<String> {
        Ok(self.get(name)?.map(|v| v.render()).unwrap_or_default())
    }

    /// Returns all defined names, child bindings first, ancestors
    /// de-duplicated.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots.borrow().keys().cloned().collect();
        if let Some(parent) = self.parent {
            for key in parent.keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

impl Default for PropertyMap<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PropertyMap<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyMap")
            .field("keys", &self.keys())
            .field("frozen", &self.frozen)
            .finish()
    }
}
