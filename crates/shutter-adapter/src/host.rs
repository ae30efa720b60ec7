//! Host platform seam.
//!
//! The home-automation platform owns the state objects the bridge reacts
//! to. The bridge needs three things from it: change subscriptions keyed by
//! pattern or explicit id list, a state write with an acknowledged flag,
//! one-time state creation for provisioning and a stop hook that comes with
//! a shutdown budget.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

use shutter_core::{HostState, MemoryStateStore, StateChange, StateCommon, StatePattern, StateStore};

/// Change events buffered per subscriber.
const EVENT_CAPACITY: usize = 256;

const DEFAULT_SHUTDOWN_BUDGET: Duration = Duration::from_millis(2000);

/// A state change as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub id: String,
    pub val: Value,
    /// Value before the write, if the state existed
    pub old_val: Option<Value>,
    pub ack: bool,
}

impl StateEvent {
    /// True if the write changed the value.
    pub fn is_value_change(&self) -> bool {
        self.old_val.as_ref() != Some(&self.val)
    }
}

impl From<StateChange> for StateEvent {
    fn from(change: StateChange) -> Self {
        Self {
            id: change.id,
            val: change.state.val,
            old_val: change.old_val,
            ack: change.state.ack,
        }
    }
}

/// Which state ids a subscriber receives.
#[derive(Debug, Clone)]
pub enum Subscription {
    /// Ids matching a regular expression
    Pattern(Regex),
    /// Ids matching a segment glob such as `javascript.0.Rollershutters.*`
    Glob(StatePattern),
    /// An explicit list of ids
    Ids(HashSet<String>),
}

impl Subscription {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Subscription::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, id: &str) -> bool {
        match self {
            Subscription::Pattern(re) => re.is_match(id),
            Subscription::Glob(pattern) => pattern.matches(id),
            Subscription::Ids(ids) => ids.contains(id),
        }
    }
}

/// Errors reported by the host platform.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("Invalid state id: {0:?}")]
    InvalidId(String),

    #[error("Invalid state assignment {line:?}: {reason}")]
    InvalidAssignment { line: String, reason: String },

    #[error("Host platform unavailable: {0}")]
    Unavailable(String),
}

/// A filtered stream of state events.
pub struct StateEvents {
    rx: broadcast::Receiver<StateEvent>,
    filter: Subscription,
}

impl StateEvents {
    pub fn new(rx: broadcast::Receiver<StateEvent>, filter: Subscription) -> Self {
        Self { rx, filter }
    }

    /// Next matching event, or `None` once the host has gone away.
    pub async fn recv(&mut self) -> Option<StateEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event.id) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "State subscriber lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The home-automation platform as seen by the bridge.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Subscribe to changes of matching states.
    fn subscribe(&self, filter: Subscription) -> StateEvents;

    /// Write a state value. Every write is delivered to matching subscribers.
    async fn set_state(&self, id: &str, val: Value, ack: bool) -> Result<(), HostError>;

    /// Create a state with metadata. Returns false if it already existed.
    async fn create_state(&self, id: &str, common: StateCommon) -> Result<bool, HostError>;

    async fn get_state(&self, id: &str) -> Result<Option<HostState>, HostError>;

    /// Resolves once the host asks the bridge to stop.
    async fn stopped(&self);

    /// Time the host grants the bridge to finish after `stopped` resolves.
    fn shutdown_budget(&self) -> Duration;
}

/// In-process host backed by a `MemoryStateStore`.
///
/// Writes are rejected once a stop has been requested; reads keep working.
pub struct MemoryHost {
    store: RwLock<MemoryStateStore>,
    events: broadcast::Sender<StateEvent>,
    stop_tx: watch::Sender<bool>,
    shutdown_budget: Duration,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::with_shutdown_budget(DEFAULT_SHUTDOWN_BUDGET)
    }

    pub fn with_shutdown_budget(shutdown_budget: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            store: RwLock::new(MemoryStateStore::new()),
            events,
            stop_tx,
            shutdown_budget,
        }
    }

    /// Ask the bridge to stop. Idempotent.
    pub fn request_stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!(budget_ms = self.shutdown_budget.as_millis() as u64, "Host stop requested");
        }
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn ensure_running(&self) -> Result<(), HostError> {
        if self.is_stopping() {
            return Err(HostError::Unavailable("host is stopping".to_string()));
        }
        Ok(())
    }

    /// Number of known states.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// All known state ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let store = self.store.read().await;
        store.ids().into_iter().map(str::to_string).collect()
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

fn check_id(id: &str) -> Result<(), HostError> {
    if id.is_empty() || id.split('.').any(str::is_empty) {
        return Err(HostError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl HostPlatform for MemoryHost {
    fn subscribe(&self, filter: Subscription) -> StateEvents {
        StateEvents::new(self.events.subscribe(), filter)
    }

    async fn set_state(&self, id: &str, val: Value, ack: bool) -> Result<(), HostError> {
        self.ensure_running()?;
        check_id(id)?;
        let change = self.store.write().await.set_state(id, val, ack);
        debug!(state_id = %id, val = %change.state.val, ack, "State written");
        // No subscribers is fine
        let _ = self.events.send(change.into());
        Ok(())
    }

    async fn create_state(&self, id: &str, common: StateCommon) -> Result<bool, HostError> {
        self.ensure_running()?;
        check_id(id)?;
        let def = common.def.clone();
        Ok(self.store.write().await.create_state(id, def, common))
    }

    async fn get_state(&self, id: &str) -> Result<Option<HostState>, HostError> {
        Ok(self.store.read().await.get_state(id).cloned())
    }

    async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        // The sender lives as long as self
        let _ = rx.wait_for(|stop| *stop).await;
    }

    fn shutdown_budget(&self) -> Duration {
        self.shutdown_budget
    }
}

/// Parse a `<state id>=<value>` line.
///
/// The value is JSON if it parses as such, otherwise it is taken as a
/// plain string, so `Links.OG.Command=O6:1` works without quoting.
pub fn parse_assignment(line: &str) -> Result<(String, Value), HostError> {
    let invalid = |reason: &str| HostError::InvalidAssignment {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let (id, raw) = line.split_once('=').ok_or_else(|| invalid("missing '='"))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(invalid("missing state id"));
    }

    let raw = raw.trim();
    let val = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((id.to_string(), val))
}
