//! # shutter-protocol
//!
//! Serial wire format spoken by the shutter controllers.
//!
//! Commands are single ASCII lines terminated by `\n`. The structured form is
//! `O<localAddress>:<action>` with action `1` (open) or `0` (close); links
//! can also carry arbitrary pre-formatted command strings.

pub mod codec;
pub mod messages;

pub use codec::{decode_shutter_command, encode_raw_command, CodecError, LineBuffer};
pub use messages::*;
