//! # shutter-dispatch
//!
//! Tokio runtime for the shutter bridge: serial link lifecycle and per-link
//! command dispatch.
//!
//! ## Architecture
//!
//! ```text
//! Dispatcher ──resolve──> RouteTable
//!     │
//!     ├── QueueHandle "OG" ──mpsc──> DispatchQueue task ──> SerialLink ──> /dev/ttyACM0
//!     └── QueueHandle "EG" ──mpsc──> DispatchQueue task ──> SerialLink ──> /dev/ttyACM1
//! ```
//!
//! Each link is owned by exactly one queue task, so writes on a link are
//! strictly sequential while different links run independently. Link state
//! is observed through `watch` channels and shutdown is a `watch` signal.

pub mod dispatcher;
pub mod error;
pub mod link;
pub mod queue;
pub mod transport;

pub use dispatcher::{DispatchOptions, Dispatcher, ShutdownReport};
pub use error::DispatchError;
pub use link::{LinkError, LinkState, SerialLink};
pub use queue::{DispatchQueue, QueueHandle};
pub use transport::{Connector, LinkIo, LinkReader, LinkWriter, MemoryConnector, SerialConnector};
