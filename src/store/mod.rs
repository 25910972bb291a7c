//! # Register Value Store
//!
//! Per-device cache of logical values keyed by register name.
//!
//! * `apply` resolves raw register values through the descriptor, diffs them
//!   against the cache and returns the names that changed.
//! * Every apply that resolves at least one register resets the idle timer,
//!   even if nothing changed.
//! * `clear` empties every value (keys stay) and reports the names that held
//!   a value. `expire_if_idle` runs it once the idle window has passed.
//!
//! The store itself is synchronous. Devices share it behind one mutex so a
//! frame's updates become visible together, and the [`watchdog`] task drives
//! the idle check.

pub mod value;
pub mod watchdog;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::register::{ProtocolDescriptor, RawValue, RegisterKey};

pub use value::{Bounds, LogicalValue};
pub use watchdog::Watchdog;

/// Logical names that changed in one operation.
pub type ChangeSet = BTreeSet<String>;

/// A store shared between the frame pipeline, writers and the watchdog.
pub type SharedStore = Arc<Mutex<RegisterStore>>;

/// Lock a shared store, recovering from a poisoned mutex.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, RegisterStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Logical updates derived outside the generic pipeline, committed atomically.
#[derive(Debug, Default, Clone)]
pub struct StoreUpdate {
    pub values: Vec<(String, LogicalValue)>,
    pub bounds: Vec<(String, Bounds)>,
    /// Last raw value of composite registers, for change detection.
    pub raw_marks: Vec<(RegisterKey, i64)>,
    /// Names reported as changed even if their value did not move.
    pub force_changed: Vec<String>,
    /// Registers consumed from the frame; non-zero resets the idle timer.
    pub resolved: usize,
}

impl StoreUpdate {
    pub fn set(&mut self, name: impl Into<String>, value: LogicalValue) {
        self.values.push((name.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
            && self.bounds.is_empty()
            && self.raw_marks.is_empty()
            && self.force_changed.is_empty()
            && self.resolved == 0
    }

    pub fn merge(&mut self, other: StoreUpdate) {
        self.values.extend(other.values);
        self.bounds.extend(other.bounds);
        self.raw_marks.extend(other.raw_marks);
        self.force_changed.extend(other.force_changed);
        self.resolved += other.resolved;
    }
}

#[derive(Debug)]
pub struct RegisterStore {
    values: HashMap<String, Option<LogicalValue>>,
    bounds: HashMap<String, Bounds>,
    raw_marks: HashMap<RegisterKey, i64>,
    unknown: HashSet<RegisterKey>,
    idle_window: Duration,
    last_touched: Option<Instant>,
}

impl RegisterStore {
    pub fn new(idle_window: Duration) -> Self {
        RegisterStore {
            values: HashMap::new(),
            bounds: HashMap::new(),
            raw_marks: HashMap::new(),
            unknown: HashSet::new(),
            idle_window,
            last_touched: None,
        }
    }

    /// Pre-register names as empty so consumers see them as unknown.
    pub fn with_names<I, S>(idle_window: Duration, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut store = Self::new(idle_window);
        for name in names {
            store.values.insert(name.into(), None);
        }
        store
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }

    /// Generic pipeline: resolve names through the descriptor, scale, diff.
    pub fn apply(
        &mut self,
        raw: &BTreeMap<RegisterKey, RawValue>,
        descriptor: &ProtocolDescriptor,
    ) -> ChangeSet {
        let mut changed = ChangeSet::new();
        let mut resolved = 0usize;

        for (key, value) in raw {
            let Some(def) = descriptor.register(*key) else {
                if self.unknown.insert(*key) {
                    log::warn!("No name found for register {key}");
                }
                continue;
            };
            resolved += 1;
            let logical = def.to_logical(value);
            if self.set(&def.name, logical) {
                log::debug!("Updated register {} ({}): {}", key, def.name, value);
                changed.insert(def.name.clone());
            }
        }

        if resolved > 0 {
            self.touch(Instant::now());
        }
        changed
    }

    /// Commit a plugin-derived update as one transaction.
    pub fn commit(&mut self, update: StoreUpdate) -> ChangeSet {
        let mut changed = ChangeSet::new();

        for (key, raw) in update.raw_marks {
            self.raw_marks.insert(key, raw);
        }
        for (name, bounds) in update.bounds {
            if self.bounds.insert(name.clone(), bounds) != Some(bounds) {
                log::debug!("Updated range for {name}: {}..={}", bounds.min, bounds.max);
                changed.insert(name);
            }
        }
        for (name, value) in update.values {
            if self.set(&name, value) {
                changed.insert(name);
            }
        }
        changed.extend(update.force_changed);

        if update.resolved > 0 {
            self.touch(Instant::now());
        }
        changed
    }

    /// Store one value; true if it differs from the cached one.
    pub fn set(&mut self, name: &str, value: LogicalValue) -> bool {
        match self.values.get_mut(name) {
            Some(slot) if slot.as_ref() == Some(&value) => false,
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => {
                self.values.insert(name.to_string(), Some(value));
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&LogicalValue> {
        self.values.get(name).and_then(Option::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn bounds(&self, name: &str) -> Option<Bounds> {
        self.bounds.get(name).copied()
    }

    pub fn last_raw(&self, key: RegisterKey) -> Option<i64> {
        self.raw_marks.get(&key).copied()
    }

    /// Non-empty values by name.
    pub fn snapshot(&self) -> BTreeMap<String, LogicalValue> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Every known name, empty or not.
    pub fn names(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    /// Reset the idle timer.
    pub fn touch(&mut self, now: Instant) {
        self.last_touched = Some(now);
    }

    pub fn last_touched(&self) -> Option<Instant> {
        self.last_touched
    }

    /// When the store goes stale without another touch.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_touched.map(|t| t + self.idle_window)
    }

    /// Empty all values; returns the names that held one. Idempotent.
    pub fn clear(&mut self) -> ChangeSet {
        let mut changed = ChangeSet::new();
        for (name, value) in self.values.iter_mut() {
            if value.take().is_some() {
                changed.insert(name.clone());
            }
        }
        self.raw_marks.clear();
        if !changed.is_empty() {
            log::info!("Cleared {} stale values", changed.len());
        }
        changed
    }

    /// Clear the store if the idle window has passed by `now`.
    pub fn expire_if_idle(&mut self, now: Instant) -> ChangeSet {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last_touched = None;
                self.clear()
            }
            _ => ChangeSet::new(),
        }
    }
}
