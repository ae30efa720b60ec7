//! Serial link lifecycle.
//!
//! A `SerialLink` owns one connection to a microcontroller and moves through
//! an explicit state machine:
//!
//! ```text
//! Closed -> Opening -> Open -> Closing -> Closed
//!              \
//!               -> Failed
//! ```
//!
//! The current state is published on a `watch` channel so queues and
//! callers can react when a link becomes open. Unsolicited inbound bytes
//! are split into lines, logged and broadcast for diagnostics only.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shutter_core::LinkConfig;
use shutter_protocol::LineBuffer;

use crate::transport::{Connector, LinkReader, LinkWriter};

/// Inbound diagnostic lines kept for slow subscribers.
const INBOUND_CAPACITY: usize = 64;

/// Lifecycle state of a serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    Closing,
    Failed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::Closed => "closed",
            LinkState::Opening => "opening",
            LinkState::Open => "open",
            LinkState::Closing => "closing",
            LinkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors raised by link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Failed to open link {link} at {path}: {source}")]
    Open {
        link: String,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Link {link} is not open (state: {state})")]
    NotOpen { link: String, state: LinkState },

    #[error("Write to link {link} failed: {source}")]
    Write {
        link: String,
        #[source]
        source: io::Error,
    },

    #[error("Closing link {link} failed: {source}")]
    Close {
        link: String,
        #[source]
        source: io::Error,
    },
}

/// One serial connection and its lifecycle.
pub struct SerialLink {
    config: Arc<LinkConfig>,
    state_tx: watch::Sender<LinkState>,
    inbound_tx: broadcast::Sender<String>,
    writer: Option<LinkWriter>,
    reader: Option<JoinHandle<()>>,
}

impl SerialLink {
    /// Create a closed link for the given configuration.
    pub fn new(config: Arc<LinkConfig>) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Closed);
        let (inbound_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            config,
            state_tx,
            inbound_tx,
            writer: None,
            reader: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &Arc<LinkConfig> {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Sender side of the inbound line broadcast, for handing out subscriptions.
    pub fn inbound_sender(&self) -> broadcast::Sender<String> {
        self.inbound_tx.clone()
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(link = %self.config.id, from = %previous, to = %state, "Link state changed");
        }
    }

    /// Open the transport. A no-op if the link is already open.
    pub async fn open(&mut self, connector: &dyn Connector) -> Result<(), LinkError> {
        if self.state() == LinkState::Open {
            info!(link = %self.config.id, path = %self.config.path, "Link already open");
            return Ok(());
        }

        info!(
            link = %self.config.id,
            path = %self.config.path,
            baud_rate = self.config.baud_rate,
            "Opening link"
        );
        self.set_state(LinkState::Opening);

        match connector.connect(&self.config).await {
            Ok(io) => {
                self.writer = Some(io.writer);
                self.reader = Some(tokio::spawn(read_inbound(
                    self.config.id.clone(),
                    io.reader,
                    self.inbound_tx.clone(),
                )));
                self.set_state(LinkState::Open);
                info!(
                    link = %self.config.id,
                    path = %self.config.path,
                    settle_delay_ms = self.config.settle_delay_ms,
                    "Link open"
                );
                Ok(())
            }
            Err(source) => {
                self.set_state(LinkState::Failed);
                error!(
                    link = %self.config.id,
                    path = %self.config.path,
                    error = %source,
                    "Failed to open link"
                );
                Err(LinkError::Open {
                    link: self.config.id.clone(),
                    path: self.config.path.clone(),
                    source,
                })
            }
        }
    }

    /// Write a payload and flush it. Fails unless the link is open.
    pub async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let state = self.state();
        let writer = match (state, self.writer.as_mut()) {
            (LinkState::Open, Some(writer)) => writer,
            _ => {
                return Err(LinkError::NotOpen {
                    link: self.config.id.clone(),
                    state,
                })
            }
        };

        let result = async {
            writer.write_all(payload).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|source| {
            error!(link = %self.config.id, error = %source, "Write failed");
            LinkError::Write {
                link: self.config.id.clone(),
                source,
            }
        })
    }

    /// Close the transport. Safe to call on a closed link.
    pub async fn close(&mut self) -> Result<(), LinkError> {
        match self.state() {
            LinkState::Closed => {
                debug!(link = %self.config.id, "Link already closed");
                return Ok(());
            }
            LinkState::Failed => {
                self.set_state(LinkState::Closed);
                return Ok(());
            }
            _ => {}
        }

        self.set_state(LinkState::Closing);

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        let result = match self.writer.take() {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        };

        self.set_state(LinkState::Closed);

        match result {
            Ok(()) => {
                info!(link = %self.config.id, path = %self.config.path, "Link closed");
                Ok(())
            }
            Err(source) => {
                error!(link = %self.config.id, error = %source, "Error closing link");
                Err(LinkError::Close {
                    link: self.config.id.clone(),
                    source,
                })
            }
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Log unsolicited data from the device until the stream ends.
async fn read_inbound(link: String, mut reader: LinkReader, tx: broadcast::Sender<String>) {
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 512];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                if let Some(rest) = lines.flush() {
                    info!(link = %link, data = %rest, "Data received");
                    let _ = tx.send(rest);
                }
                warn!(link = %link, "Device closed the connection");
                break;
            }
            Ok(n) => {
                let trims = lines.trims();
                for line in lines.push(&buf[..n]) {
                    info!(link = %link, data = %line, "Data received");
                    let _ = tx.send(line);
                }
                if lines.trims() > trims {
                    warn!(link = %link, trims = lines.trims(), "Unterminated inbound data, oldest bytes discarded");
                }
            }
            Err(e) => {
                error!(link = %link, error = %e, "Read error");
                break;
            }
        }
    }
}
