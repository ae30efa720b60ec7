//! Command types sent to the shutter controllers.
//!
//! - `Action`: what a shutter should do
//! - `ShutterCommand`: an action addressed to a local shutter on one link
//! - `Command`: an encoded payload ready to be written to a link

use serde::{Deserialize, Serialize};
use shutter_core::{DestinationId, LocalAddress};

use crate::codec::{encode_raw_command, CodecError};

/// Shutter action, encoded on the wire as `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Close,
    Open,
}

impl Action {
    /// Wire code of this action.
    pub fn code(self) -> u8 {
        match self {
            Action::Close => 0,
            Action::Open => 1,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Action::Close),
            1 => Some(Action::Open),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Close => write!(f, "CLOSE"),
            Action::Open => write!(f, "OPEN"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "up" | "1" => Ok(Action::Open),
            "close" | "down" | "0" => Ok(Action::Close),
            _ => Err(CodecError::InvalidAction(s.to_string())),
        }
    }
}

/// An action addressed to a shutter by its local address on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutterCommand {
    pub local_address: LocalAddress,
    pub action: Action,
}

impl ShutterCommand {
    pub fn new(local_address: LocalAddress, action: Action) -> Self {
        Self {
            local_address,
            action,
        }
    }

    /// Encode as a newline-terminated wire line, e.g. `O6:1\n`.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

impl std::fmt::Display for ShutterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "O{}:{}", self.local_address, self.action.code())
    }
}

/// An encoded command bound to a link.
///
/// Ephemeral: created per dispatch request and dropped once the write
/// completes or fails. No response is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Identifier of the target link
    pub link: String,
    /// Bytes written to the link, newline included
    pub payload: Vec<u8>,
    /// Global destination, if the command was routed from one
    pub destination: Option<DestinationId>,
}

impl Command {
    /// Build a structured shutter command for a routed destination.
    pub fn shutter(link: &str, destination: DestinationId, cmd: ShutterCommand) -> Self {
        Self {
            link: link.to_string(),
            payload: cmd.encode().into_bytes(),
            destination: Some(destination),
        }
    }

    /// Build a command from a pre-formatted string. A trailing newline is
    /// added if missing.
    pub fn raw(link: &str, text: &str) -> Result<Self, CodecError> {
        Ok(Self {
            link: link.to_string(),
            payload: encode_raw_command(text)?.into_bytes(),
            destination: None,
        })
    }

    /// Payload without the line terminator, for logging.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).trim_end().to_string()
    }
}
