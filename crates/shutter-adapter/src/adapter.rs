//! Event adapter: host state changes in, dispatcher calls out.
//!
//! Per interaction: Idle -> Triggered -> Resolved -> Queued -> Sent|Dropped.
//! Button states are reset to `false` (acknowledged) after the button reset
//! delay; command-string states are cleared to `""` (acknowledged) right
//! after dispatch. Acknowledged writes never trigger.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use shutter_core::BridgeSettings;
use shutter_dispatch::Dispatcher;

use crate::host::{HostPlatform, StateEvent, StateEvents};
use crate::trigger::{Trigger, TriggerDecoder};

/// Translates host triggers into dispatcher calls.
pub struct EventAdapter {
    host: Arc<dyn HostPlatform>,
    dispatcher: Arc<Dispatcher>,
    decoder: TriggerDecoder,
    base_id: String,
    buttons: StateEvents,
    commands: StateEvents,
    reset_delay: Duration,
    resets: JoinSet<()>,
}

impl EventAdapter {
    /// Subscribe to the button and command-string states.
    ///
    /// Subscriptions are live from here on, so events written before `run`
    /// is first polled are not lost.
    pub fn new(
        host: Arc<dyn HostPlatform>,
        dispatcher: Arc<Dispatcher>,
        settings: &BridgeSettings,
    ) -> Result<Self, regex::Error> {
        let link_ids = dispatcher.routes().links().iter().map(|l| l.id.as_str());
        let decoder = TriggerDecoder::new(&settings.base_id, link_ids)?;

        let buttons = host.subscribe(decoder.button_subscription());
        let commands = host.subscribe(decoder.command_subscription());

        Ok(Self {
            host,
            dispatcher,
            decoder,
            base_id: settings.base_id.clone(),
            buttons,
            commands,
            reset_delay: settings.button_reset_delay(),
            resets: JoinSet::new(),
        })
    }

    /// Handle events until the host asks to stop or goes away.
    ///
    /// Pending button resets are cancelled on exit.
    pub async fn run(mut self) {
        info!(base_id = %self.base_id, "Listening for shutter triggers");

        let host = self.host.clone();
        let mut stopped = host.stopped();

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut stopped => {
                    debug!("Host stopping, no more triggers");
                    break;
                }
                Some(result) = self.resets.join_next(), if !self.resets.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(error = %e, "Button reset task panicked");
                        }
                    }
                    continue;
                }
                event = self.buttons.recv() => event,
                event = self.commands.recv() => event,
            };

            match event {
                Some(event) => self.handle(event).await,
                None => {
                    warn!("Host event stream closed");
                    break;
                }
            }
        }

        let pending = self.resets.len();
        self.resets.abort_all();
        if pending > 0 {
            debug!(pending, "Cancelled pending button resets");
        }
        info!("Event adapter stopped");
    }

    async fn handle(&mut self, event: StateEvent) {
        let trigger = match self.decoder.decode(&event) {
            Ok(Some(trigger)) => trigger,
            Ok(None) => {
                debug!(state_id = %event.id, val = %event.val, ack = event.ack, "Ignoring state change");
                return;
            }
            Err(e) => {
                warn!(state_id = %event.id, error = %e, "Dropping trigger");
                return;
            }
        };

        match trigger {
            Trigger::Button {
                destination,
                action,
            } => {
                info!(state_id = %event.id, destination, action = %action, "Button pressed");
                if let Err(e) = self.dispatcher.dispatch(destination, action) {
                    warn!(destination, action = %action, error = %e, "Command not queued");
                }
                self.schedule_reset(event.id);
            }
            Trigger::Command { link, text } => {
                info!(state_id = %event.id, link = %link, command = %text, "Command string received");
                if let Err(e) = self.dispatcher.dispatch_raw(&link, &text) {
                    warn!(link = %link, error = %e, "Command not queued");
                }
                self.write_ack(&event.id, json!("")).await;
            }
        }
    }

    fn schedule_reset(&mut self, id: String) {
        let host = self.host.clone();
        let delay = self.reset_delay;
        self.resets.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = host.set_state(&id, Value::Bool(false), true).await {
                error!(state_id = %id, error = %e, "Failed to reset button");
            }
        });
    }

    async fn write_ack(&self, id: &str, val: Value) {
        if let Err(e) = self.host.set_state(id, val, true).await {
            error!(state_id = %id, error = %e, "Failed to acknowledge state");
        }
    }
}
