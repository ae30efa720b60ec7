//! Dispatcher: the registry of live links.
//!
//! Maps link ids to their queue handles, routes destination-addressed
//! commands through the static route table and coordinates shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shutter_core::{BridgeSettings, DestinationId, PreOpenPolicy, RouteTable};
use shutter_protocol::{Action, Command, ShutterCommand};

use crate::error::DispatchError;
use crate::link::LinkState;
use crate::queue::{DispatchQueue, QueueHandle};
use crate::transport::Connector;

/// Queueing options shared by all links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub queue_capacity: usize,
    pub pre_open_policy: PreOpenPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            pre_open_policy: PreOpenPolicy::Drop,
        }
    }
}

impl From<&BridgeSettings> for DispatchOptions {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            pre_open_policy: settings.pre_open_policy,
        }
    }
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Links whose queue task finished and closed the link in time
    pub closed: Vec<String>,
    /// Links still busy when the timeout elapsed; their tasks were aborted
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Routes commands to per-link dispatch queues.
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    queues: HashMap<String, QueueHandle>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    shutdown_tx: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

impl Dispatcher {
    /// Spawn one dispatch queue task per configured link.
    ///
    /// Must be called from within a tokio runtime. Links start opening
    /// immediately; commands issued before a link is open follow the
    /// configured pre-open policy.
    pub fn start(
        routes: Arc<RouteTable>,
        connector: Arc<dyn Connector>,
        options: DispatchOptions,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut queues = HashMap::new();
        let mut tasks = Vec::new();

        for config in routes.links() {
            let (queue, handle) = DispatchQueue::new(
                config.clone(),
                connector.clone(),
                options.queue_capacity,
                options.pre_open_policy,
                shutdown_tx.subscribe(),
            );
            debug!(
                link = %config.id,
                destinations = config.destinations.len(),
                "Starting dispatch queue"
            );
            tasks.push((config.id.clone(), tokio::spawn(queue.run())));
            queues.insert(config.id.clone(), handle);
        }

        info!(
            links = queues.len(),
            destinations = routes.len(),
            policy = ?options.pre_open_policy,
            "Dispatcher started"
        );

        Self {
            routes,
            queues,
            tasks: Mutex::new(tasks),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Queue handle of a link.
    pub fn queue(&self, link_id: &str) -> Option<&QueueHandle> {
        self.queues.get(link_id)
    }

    /// Current state of every link, in configuration order.
    pub fn link_states(&self) -> Vec<(String, LinkState)> {
        self.routes
            .links()
            .iter()
            .filter_map(|l| self.queues.get(&l.id).map(|q| (l.id.clone(), q.state())))
            .collect()
    }

    /// Wait until a link is open or has failed.
    pub async fn wait_ready(&self, link_id: &str) -> Result<LinkState, DispatchError> {
        let queue = self.queue_for(link_id)?;
        Ok(queue.wait_ready().await)
    }

    /// Wait until every link is open or has failed.
    pub async fn wait_all_ready(&self) -> Vec<(String, LinkState)> {
        join_all(self.queues.values().map(|q| q.wait_ready())).await;
        self.link_states()
    }

    /// Subscribe to diagnostic lines received on a link.
    pub fn subscribe_inbound(&self, link_id: &str) -> Result<broadcast::Receiver<String>, DispatchError> {
        Ok(self.queue_for(link_id)?.subscribe_inbound())
    }

    /// Resolve a destination and queue the matching shutter command.
    pub fn dispatch(&self, destination: DestinationId, action: Action) -> Result<(), DispatchError> {
        self.ensure_running()?;

        let route = self.routes.resolve(destination).map_err(|e| {
            warn!(destination, action = %action, error = %e, "Cannot route command");
            e
        })?;

        let command = Command::shutter(
            route.link_id(),
            destination,
            ShutterCommand::new(route.local_address, action),
        );
        info!(
            destination,
            action = %action,
            link = %route.link_id(),
            local_address = route.local_address,
            "Dispatching command"
        );

        self.queue_for(route.link_id())?.enqueue(command)
    }

    /// Queue a pre-formatted command string on a link.
    pub fn dispatch_raw(&self, link_id: &str, text: &str) -> Result<(), DispatchError> {
        self.ensure_running()?;

        let queue = self.queue_for(link_id)?;
        let command = Command::raw(link_id, text).map_err(|e| {
            warn!(link = %link_id, error = %e, "Rejecting raw command");
            e
        })?;
        info!(link = %link_id, command = %command.text(), "Dispatching raw command");

        queue.enqueue(command)
    }

    /// Reopen a link that failed or was closed.
    pub fn reopen(&self, link_id: &str) -> Result<(), DispatchError> {
        self.ensure_running()?;
        let queue = self.queue_for(link_id)?;
        info!(link = %link_id, "Reopen requested");
        queue.reopen();
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop accepting commands, discard queued ones and close every link.
    ///
    /// Waits for each queue task to close its link, bounded by `timeout`.
    /// An in-flight write is not interrupted; tasks still running when the
    /// timeout elapses are aborted and reported. Calling this twice is
    /// harmless: the second call finds no tasks left.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return ShutdownReport::default();
        }

        info!(links = tasks.len(), timeout_ms = timeout.as_millis() as u64, "Shutting down links");
        let deadline = tokio::time::Instant::now() + timeout;

        let outcomes = join_all(tasks.into_iter().map(|(link, mut task)| async move {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => (link, true),
                Ok(Err(e)) => {
                    error!(link = %link, error = %e, "Dispatch queue task failed");
                    (link, true)
                }
                Err(_) => {
                    task.abort();
                    error!(link = %link, "Link did not close before the shutdown timeout");
                    (link, false)
                }
            }
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (link, closed) in outcomes {
            if closed {
                report.closed.push(link);
            } else {
                report.timed_out.push(link);
            }
        }

        if report.is_clean() {
            info!(closed = report.closed.len(), "All links closed");
        } else {
            warn!(
                closed = report.closed.len(),
                timed_out = report.timed_out.len(),
                "Shutdown finished with links still busy"
            );
        }
        report
    }

    fn ensure_running(&self) -> Result<(), DispatchError> {
        if self.is_shutting_down() {
            debug!("Dispatcher shutting down, rejecting command");
            return Err(DispatchError::ShuttingDown);
        }
        Ok(())
    }

    fn queue_for(&self, link_id: &str) -> Result<&QueueHandle, DispatchError> {
        self.queues
            .get(link_id)
            .ok_or_else(|| DispatchError::UnknownLink(link_id.to_string()))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;
    use shutter_core::{LinkConfig, RouteError};

    fn routes() -> Arc<RouteTable> {
        let links = vec![
            LinkConfig::new("OG", "/dev/ttyACM0", (0..8).collect()),
            LinkConfig::new("EG", "/dev/ttyACM1", (8..15).collect()),
        ];
        Arc::new(RouteTable::build(&links).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_destination_rejected() {
        let (connector, _devices) = MemoryConnector::new(["OG", "EG"]);
        let dispatcher = Dispatcher::start(routes(), Arc::new(connector), DispatchOptions::default());
        dispatcher.wait_all_ready().await;

        let err = dispatcher.dispatch(99, Action::Open).unwrap_err();
        assert_eq!(err, DispatchError::Route(RouteError::UnknownDestination(99)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_link_rejected() {
        let (connector, _devices) = MemoryConnector::new(["OG", "EG"]);
        let dispatcher = Dispatcher::start(routes(), Arc::new(connector), DispatchOptions::default());

        let err = dispatcher.dispatch_raw("DG", "O1:1").unwrap_err();
        assert_eq!(err, DispatchError::UnknownLink("DG".to_string()));
        assert!(dispatcher.wait_ready("DG").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_states_in_config_order() {
        let (connector, _devices) = MemoryConnector::new(["OG"]);
        let dispatcher = Dispatcher::start(routes(), Arc::new(connector), DispatchOptions::default());

        let states = dispatcher.wait_all_ready().await;
        assert_eq!(
            states,
            vec![
                ("OG".to_string(), LinkState::Open),
                ("EG".to_string(), LinkState::Failed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_rejected_after_shutdown() {
        let (connector, _devices) = MemoryConnector::new(["OG", "EG"]);
        let dispatcher = Dispatcher::start(routes(), Arc::new(connector), DispatchOptions::default());
        dispatcher.wait_all_ready().await;

        let report = dispatcher.shutdown(Duration::from_secs(2)).await;
        assert!(report.is_clean());
        assert_eq!(report.closed.len(), 2);

        assert_eq!(dispatcher.dispatch(1, Action::Open), Err(DispatchError::ShuttingDown));
        assert_eq!(dispatcher.shutdown(Duration::from_secs(2)).await, ShutdownReport::default());
        assert!(dispatcher
            .link_states()
            .iter()
            .all(|(_, state)| *state == LinkState::Closed));
    }
}
