//! # shutter-adapter
//!
//! Connects the home-automation host to the dispatcher.
//!
//! - `host`: the `HostPlatform` seam and the in-process `MemoryHost`
//! - `trigger`: decoding of button and command-string state changes
//! - `adapter`: the `EventAdapter` loop with acknowledgement and button reset
//! - `provision`: one-time creation of the button states

pub mod adapter;
pub mod host;
pub mod provision;
pub mod trigger;

pub use adapter::EventAdapter;
pub use host::{parse_assignment, HostError, HostPlatform, MemoryHost, StateEvent, StateEvents, Subscription};
pub use provision::{button_common, provision_buttons};
pub use trigger::{button_state_id, command_state_id, ButtonKind, Trigger, TriggerDecoder, TriggerError};
