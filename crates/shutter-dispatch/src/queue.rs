//! Per-link dispatch queue.
//!
//! Each link is driven by one `DispatchQueue` task that exclusively owns the
//! `SerialLink`. Commands arrive over a bounded mpsc channel and are written
//! strictly in FIFO order, one at a time, each preceded by the link's settle
//! delay. Producers hold a cloneable `QueueHandle`.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use shutter_core::{LinkConfig, PreOpenPolicy};
use shutter_protocol::Command;

use crate::error::DispatchError;
use crate::link::{LinkState, SerialLink};
use crate::transport::Connector;

/// Producer side of a link's queue.
#[derive(Clone)]
pub struct QueueHandle {
    link_id: String,
    tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<LinkState>,
    inbound: broadcast::Sender<String>,
    reopen: Arc<Notify>,
    policy: PreOpenPolicy,
}

impl QueueHandle {
    pub fn link_id(&self) -> &str {
        &self.link_id
    }

    /// Current state of the link behind this queue.
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Lines received from the device, for diagnostics.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }

    /// Append a command to the queue.
    ///
    /// Under the `drop` policy the command is rejected unless the link is
    /// open at this moment; it is never written later. Under `buffer` it
    /// is also accepted while the link is closed or opening.
    pub fn enqueue(&self, command: Command) -> Result<(), DispatchError> {
        let state = self.state();
        let accepted = match state {
            LinkState::Open => true,
            LinkState::Closed | LinkState::Opening => self.policy == PreOpenPolicy::Buffer,
            LinkState::Closing | LinkState::Failed => false,
        };

        if !accepted {
            warn!(
                link = %self.link_id,
                state = %state,
                command = %command.text(),
                "Link not open, dropping command"
            );
            return Err(DispatchError::NotOpen {
                link: self.link_id.clone(),
                state,
            });
        }

        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(command) => {
                warn!(link = %self.link_id, command = %command.text(), "Queue full, dropping command");
                DispatchError::QueueFull {
                    link: self.link_id.clone(),
                }
            }
            mpsc::error::TrySendError::Closed(_) => DispatchError::ShuttingDown,
        })
    }

    /// Ask the queue task to open its link again. No-op if already open.
    pub fn reopen(&self) {
        self.reopen.notify_one();
    }

    /// Wait until the link is open or has failed to open.
    ///
    /// Returns the state that ended the wait. If the queue task is gone the
    /// last known state is returned.
    pub async fn wait_ready(&self) -> LinkState {
        let mut rx = self.state_rx.clone();
        let result = rx
            .wait_for(|s| matches!(s, LinkState::Open | LinkState::Failed))
            .await
            .map(|s| *s);
        result.unwrap_or_else(|_| *self.state_rx.borrow())
    }
}

enum Next {
    Command(Command),
    Reopen,
    Stop,
}

/// Consumer side of a link's queue; owns the link.
pub struct DispatchQueue {
    link: SerialLink,
    connector: Arc<dyn Connector>,
    rx: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
    reopen: Arc<Notify>,
}

impl DispatchQueue {
    /// Create the queue for one link and the handle producers use.
    ///
    /// `capacity` is clamped to at least one pending command.
    pub fn new(
        config: Arc<LinkConfig>,
        connector: Arc<dyn Connector>,
        capacity: usize,
        policy: PreOpenPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, QueueHandle) {
        let link = SerialLink::new(config);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reopen = Arc::new(Notify::new());

        let handle = QueueHandle {
            link_id: link.id().to_string(),
            tx,
            state_rx: link.subscribe_state(),
            inbound: link.inbound_sender(),
            reopen: reopen.clone(),
            policy,
        };

        let queue = Self {
            link,
            connector,
            rx,
            shutdown,
            reopen,
        };

        (queue, handle)
    }

    /// Open the link, then drain commands until shutdown.
    ///
    /// A failed open leaves the link `Failed`; the task keeps running so a
    /// manual reopen is possible, but nothing is retried automatically.
    /// On exit, queued-but-unsent commands are discarded and the link closed.
    pub async fn run(mut self) {
        let settle_delay = self.link.config().settle_delay();

        if !*self.shutdown.borrow() {
            self.open().await;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => Next::Stop,
                _ = self.reopen.notified() => Next::Reopen,
                command = self.rx.recv() => match command {
                    Some(command) => Next::Command(command),
                    None => Next::Stop,
                },
            };

            let command = match next {
                Next::Command(command) => command,
                Next::Reopen => {
                    self.open().await;
                    continue;
                }
                Next::Stop => break,
            };

            let state = self.link.state();
            if state != LinkState::Open {
                warn!(
                    link = %self.link.id(),
                    state = %state,
                    command = %command.text(),
                    "Link not open, dropping command"
                );
                continue;
            }

            // Settle delay before every write, abandoned on shutdown
            let stopped = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => true,
                _ = tokio::time::sleep(settle_delay) => false,
            };
            if stopped {
                warn!(
                    link = %self.link.id(),
                    command = %command.text(),
                    "Shutdown during settle delay, discarding command"
                );
                break;
            }

            match self.link.write(&command.payload).await {
                Ok(()) => info!(
                    link = %self.link.id(),
                    destination = ?command.destination,
                    command = %command.text(),
                    "Message written"
                ),
                Err(e) => error!(
                    link = %self.link.id(),
                    command = %command.text(),
                    error = %e,
                    "Error writing message"
                ),
            }
        }

        self.finish().await;
    }

    async fn open(&mut self) {
        // Failure is logged by the link and leaves it in the Failed state
        if let Err(e) = self.link.open(self.connector.as_ref()).await {
            debug!(link = %self.link.id(), error = %e, "Link unavailable");
        }
    }

    async fn finish(&mut self) {
        self.rx.close();
        let mut discarded = 0usize;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(link = %self.link.id(), discarded, "Discarding queued commands");
        }

        // Close errors are logged by the link
        let _ = self.link.close().await;
        debug!(link = %self.link.id(), "Dispatch queue stopped");
    }
}

/// Resolves once shutdown is requested or the signal sender is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn config(settle_ms: u64) -> Arc<LinkConfig> {
        let mut link = LinkConfig::new("OG", "/dev/ttyACM0", (0..8).collect());
        link.settle_delay_ms = settle_ms;
        Arc::new(link)
    }

    fn command(text: &str) -> Command {
        Command::raw("OG", text).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_before_open_is_dropped() {
        let (connector, _devices) = MemoryConnector::new(["OG"]);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_queue, handle) = DispatchQueue::new(
            config(10),
            Arc::new(connector),
            4,
            PreOpenPolicy::Drop,
            shutdown_rx,
        );

        let err = handle.enqueue(command("O1:1")).unwrap_err();
        assert_eq!(
            err,
            DispatchError::NotOpen {
                link: "OG".to_string(),
                state: LinkState::Closed
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_policy_bounds_queue() {
        let (connector, _devices) = MemoryConnector::new(["OG"]);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_queue, handle) = DispatchQueue::new(
            config(10),
            Arc::new(connector),
            2,
            PreOpenPolicy::Buffer,
            shutdown_rx,
        );

        handle.enqueue(command("O1:1")).unwrap();
        handle.enqueue(command("O2:1")).unwrap();
        let err = handle.enqueue(command("O3:1")).unwrap_err();
        assert_eq!(
            err,
            DispatchError::QueueFull {
                link: "OG".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_writes_after_settle_delay() {
        let (connector, mut devices) = MemoryConnector::new(["OG"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, handle) = DispatchQueue::new(
            config(1000),
            Arc::new(connector),
            4,
            PreOpenPolicy::Drop,
            shutdown_rx,
        );
        let task = tokio::spawn(queue.run());

        assert_eq!(handle.wait_ready().await, LinkState::Open);
        let start = tokio::time::Instant::now();
        handle.enqueue(command("O6:1")).unwrap();

        let mut device = devices.remove("OG").unwrap();
        let mut buf = [0u8; 5];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"O6:1\n");
        assert!(start.elapsed() >= Duration::from_millis(1000));

        shutdown_tx.send_replace(true);
        task.await.unwrap();
        assert_eq!(handle.state(), LinkState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_and_manual_reopen() {
        let (connector, _devices) = MemoryConnector::new(["EG"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, handle) = DispatchQueue::new(
            config(10),
            Arc::new(connector),
            4,
            PreOpenPolicy::Buffer,
            shutdown_rx,
        );
        let task = tokio::spawn(queue.run());

        assert_eq!(handle.wait_ready().await, LinkState::Failed);
        assert!(matches!(
            handle.enqueue(command("O1:1")),
            Err(DispatchError::NotOpen {
                state: LinkState::Failed,
                ..
            })
        ));

        // Still no device: the reopen fails again
        handle.reopen();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.state(), LinkState::Failed);

        shutdown_tx.send_replace(true);
        task.await.unwrap();
        assert_eq!(handle.state(), LinkState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_shutdown() {
        let (connector, _devices) = MemoryConnector::new(["OG"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, handle) = DispatchQueue::new(
            config(10),
            Arc::new(connector),
            4,
            PreOpenPolicy::Buffer,
            shutdown_rx,
        );
        let task = tokio::spawn(queue.run());
        handle.wait_ready().await;

        shutdown_tx.send_replace(true);
        task.await.unwrap();

        assert!(handle.enqueue(command("O1:1")).is_err());
    }
}
