use shutter_core::RouteError;
use shutter_protocol::CodecError;

use crate::link::LinkState;

/// Reasons a dispatch request was not accepted.
///
/// All of these are contained locally: the caller logs and drops the
/// trigger, nothing is retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("Link {link} is not open (state: {state}), command dropped")]
    NotOpen { link: String, state: LinkState },

    #[error("Queue for link {link} is full, command dropped")]
    QueueFull { link: String },

    #[error("Unknown link: {0}")]
    UnknownLink(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}
