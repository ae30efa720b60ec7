//! Host platform state store.
//!
//! The host platform keeps a flat map of state ids to values. Every write
//! carries an acknowledged flag: user-originated writes (a button press in a
//! visualization) are unacknowledged, writes made by scripts and adapters to
//! report or reset state are acknowledged.

use crate::model::{HostState, StateCommon};
use serde_json::Value;
use std::collections::BTreeMap;

/// A change produced by a state write.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// The state id that was written
    pub id: String,
    /// The state after the write
    pub state: HostState,
    /// The value before the write (None if the state did not exist)
    pub old_val: Option<Value>,
}

impl StateChange {
    /// True if the write changed the value.
    pub fn is_value_change(&self) -> bool {
        self.old_val.as_ref() != Some(&self.state.val)
    }

    pub fn val(&self) -> &Value {
        &self.state.val
    }

    pub fn ack(&self) -> bool {
        self.state.ack
    }
}

/// Trait for host state storage implementations.
pub trait StateStore: Send + Sync {
    /// Create a state with metadata if it does not exist yet.
    ///
    /// Returns false and leaves the state untouched if it already exists.
    fn create_state(&mut self, id: &str, def: Value, common: StateCommon) -> bool;

    /// Write a value, creating the state if needed.
    fn set_state(&mut self, id: &str, val: Value, ack: bool) -> StateChange;

    /// Get the current state.
    fn get_state(&self, id: &str) -> Option<&HostState>;

    /// All known state ids in sorted order.
    fn ids(&self) -> Vec<&str>;
}

/// In-memory host state store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    states: BTreeMap<String, HostState>,
}

impl MemoryStateStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of states in the store.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

impl StateStore for MemoryStateStore {
    fn create_state(&mut self, id: &str, def: Value, common: StateCommon) -> bool {
        if self.states.contains_key(id) {
            return false;
        }

        self.states.insert(
            id.to_string(),
            HostState {
                val: def,
                ack: true,
                ts: Self::now(),
                common: Some(common),
            },
        );
        true
    }

    fn set_state(&mut self, id: &str, val: Value, ack: bool) -> StateChange {
        let ts = Self::now();

        let (old_val, state) = match self.states.get_mut(id) {
            Some(existing) => {
                let old = std::mem::replace(&mut existing.val, val);
                existing.ack = ack;
                existing.ts = ts;
                (Some(old), existing.clone())
            }
            None => {
                let state = HostState {
                    val,
                    ack,
                    ts,
                    common: None,
                };
                self.states.insert(id.to_string(), state.clone());
                (None, state)
            }
        };

        StateChange {
            id: id.to_string(),
            state,
            old_val,
        }
    }

    fn get_state(&self, id: &str) -> Option<&HostState> {
        self.states.get(id)
    }

    fn ids(&self) -> Vec<&str> {
        self.states.keys().map(String::as_str).collect()
    }
}
