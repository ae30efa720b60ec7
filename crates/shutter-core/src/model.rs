//! Shutter bridge data model types.
//!
//! These types describe the static configuration of the bridge:
//! - Serial links and the destinations each one drives
//! - Local address derivation per link
//! - Bridge-wide timing and queueing settings
//! - Host platform state values and their metadata

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global identifier of an addressable actuator (one roller shutter).
pub type DestinationId = u32;

/// Address of a destination as understood by the microcontroller on its link.
pub type LocalAddress = u32;

/// Default base id of the host states the bridge listens on.
pub const DEFAULT_BASE_ID: &str = "javascript.0.Rollershutters.";

/// Default baud rate of the shutter controllers.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default pause before each write, giving the controller time to reset after open.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;

/// Configuration of a single serial link to one microcontroller.
///
/// Immutable after load. Each `LinkConfig` maps to exactly one live link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    /// Link identifier used in logs and string-command state ids (e.g. "OG").
    pub id: String,

    /// Transport address, usually a device path like "/dev/ttyACM0".
    pub path: String,

    /// Serial baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Settle delay in milliseconds before every write.
    #[serde(default = "default_settle_delay_ms", alias = "openDelay")]
    pub settle_delay_ms: u64,

    /// Global destination ids handled by this link.
    #[serde(default)]
    pub destinations: Vec<DestinationId>,

    /// How global destination ids map to local addresses on this link.
    #[serde(default)]
    pub addressing: Addressing,
}

impl LinkConfig {
    /// Create a link with default baud rate, settle delay and offset addressing.
    pub fn new(id: &str, path: &str, destinations: Vec<DestinationId>) -> Self {
        Self {
            id: id.to_string(),
            path: path.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            destinations,
            addressing: Addressing::default(),
        }
    }

    /// Settle delay as a `Duration`.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

/// Local address derivation for the destinations of one link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Addressing {
    /// Local address is `destination - destinations[0]`.
    #[default]
    Offset,

    /// Local address is the destination's position in the list.
    Index,

    /// Local addresses are listed explicitly, parallel to `destinations`.
    Explicit { locals: Vec<LocalAddress> },
}

/// What happens to commands issued before their link is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreOpenPolicy {
    /// Drop with a warning.
    #[default]
    Drop,

    /// Buffer up to the queue capacity and flush once the link is open.
    Buffer,
}

/// Bridge-wide settings, the root of the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Prefix of all host state ids the bridge owns (with trailing dot).
    pub base_id: String,

    /// Configured serial links.
    pub links: Vec<LinkConfig>,

    /// Delay before a pressed button state is reset to `false`.
    pub button_reset_delay_ms: u64,

    /// Upper bound on waiting for links to close at shutdown.
    pub shutdown_timeout_ms: u64,

    /// Handling of commands issued before a link is open.
    pub pre_open_policy: PreOpenPolicy,

    /// Maximum number of pending commands per link.
    pub queue_capacity: usize,

    /// Number of shutters to provision button states for at startup (0 = none).
    pub provision_buttons: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            base_id: DEFAULT_BASE_ID.to_string(),
            links: Vec::new(),
            button_reset_delay_ms: 200,
            shutdown_timeout_ms: 2000,
            pre_open_policy: PreOpenPolicy::Drop,
            queue_capacity: 32,
            provision_buttons: 0,
        }
    }
}

impl BridgeSettings {
    /// Button reset delay as a `Duration`.
    pub fn button_reset_delay(&self) -> Duration {
        Duration::from_millis(self.button_reset_delay_ms)
    }

    /// Shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Find a link by identifier.
    pub fn link(&self, id: &str) -> Option<&LinkConfig> {
        self.links.iter().find(|l| l.id == id)
    }
}

/// A state value held by the host platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    /// Current value
    pub val: serde_json::Value,

    /// True if the value was written by the system rather than a user
    pub ack: bool,

    /// RFC 3339 timestamp of the last write
    pub ts: String,

    /// Object metadata, present for provisioned states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common: Option<StateCommon>,
}

/// Metadata describing a host state object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCommon {
    /// Human-readable name (e.g. "Shutter 3 Open")
    pub name: String,

    /// Value type ("boolean", "string", ...)
    #[serde(rename = "type")]
    pub value_type: String,

    /// Semantic role (e.g. "button.open.blind")
    pub role: String,

    pub read: bool,

    pub write: bool,

    /// Default value
    pub def: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_link_config_defaults() {
        let json = r#"{ "id": "OG", "path": "/dev/ttyACM0", "destinations": [0, 1, 2] }"#;
        let link: LinkConfig = serde_json::from_str(json).unwrap();

        assert_eq!(link.baud_rate, 9600);
        assert_eq!(link.settle_delay(), Duration::from_millis(1000));
        assert_eq!(link.addressing, Addressing::Offset);
    }

    #[test]
    fn test_open_delay_alias() {
        let json = r#"{ "id": "EG", "path": "/dev/ttyACM1", "openDelay": 250 }"#;
        let link: LinkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(link.settle_delay_ms, 250);
        assert!(link.destinations.is_empty());
    }

    #[test]
    fn test_addressing_modes_deserialize() {
        let index: Addressing = serde_json::from_str(r#"{ "mode": "index" }"#).unwrap();
        assert_eq!(index, Addressing::Index);

        let explicit: Addressing =
            serde_json::from_str(r#"{ "mode": "explicit", "locals": [3, 1] }"#).unwrap();
        assert_eq!(explicit, Addressing::Explicit { locals: vec![3, 1] });
    }

    #[test]
    fn test_bridge_settings_defaults() {
        let settings: BridgeSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, BridgeSettings::default());
        assert_eq!(settings.base_id, "javascript.0.Rollershutters.");
        assert_eq!(settings.button_reset_delay(), Duration::from_millis(200));
        assert_eq!(settings.shutdown_timeout(), Duration::from_millis(2000));
        assert_eq!(settings.pre_open_policy, PreOpenPolicy::Drop);
    }

    #[test]
    fn test_bridge_settings_full_document() {
        let json = r#"{
            "baseId": "javascript.1.Rollershutters.",
            "links": [
                { "id": "OG", "path": "/dev/ttyACM0", "destinations": [0, 1, 2, 3, 4, 5, 6, 7] },
                { "id": "EG", "path": "/dev/ttyACM1", "baudRate": 115200,
                  "destinations": [8, 9], "addressing": { "mode": "index" } }
            ],
            "preOpenPolicy": "buffer",
            "queueCapacity": 4,
            "provisionButtons": 17
        }"#;

        let settings: BridgeSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.links.len(), 2);
        assert_eq!(settings.link("EG").unwrap().baud_rate, 115200);
        assert_eq!(settings.pre_open_policy, PreOpenPolicy::Buffer);
        assert_eq!(settings.queue_capacity, 4);
        assert_eq!(settings.provision_buttons, 17);
        assert!(settings.link("DG").is_none());
    }

    #[test]
    fn test_state_common_serialize() {
        let common = StateCommon {
            name: "Shutter 0 Open".to_string(),
            value_type: "boolean".to_string(),
            role: "button.open.blind".to_string(),
            read: false,
            write: true,
            def: serde_json::json!(false),
        };

        let json = serde_json::to_value(&common).unwrap();
        assert_eq!(json["type"], "boolean");
        assert_eq!(json["role"], "button.open.blind");
    }
}
