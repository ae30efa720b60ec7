//! Trigger decoding.
//!
//! Two kinds of host states start a dispatch:
//! - button states `<base>Shutter_<n>.OpenButton` / `.CloseButton`, which
//!   fire on an unacknowledged change to `true`
//! - command-string states `<base>Links.<link>.Command`, which fire on an
//!   unacknowledged non-empty string

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde_json::Value;

use shutter_core::DestinationId;
use shutter_protocol::Action;

use crate::host::{StateEvent, Subscription};

/// Which button of a shutter was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Open,
    Close,
}

impl ButtonKind {
    pub const ALL: [ButtonKind; 2] = [ButtonKind::Open, ButtonKind::Close];

    /// Last segment of the button state id.
    pub fn state_name(self) -> &'static str {
        match self {
            ButtonKind::Open => "OpenButton",
            ButtonKind::Close => "CloseButton",
        }
    }

    pub fn action(self) -> Action {
        match self {
            ButtonKind::Open => Action::Open,
            ButtonKind::Close => Action::Close,
        }
    }

    fn from_state_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.state_name() == name)
    }
}

/// Id of a shutter's button state.
pub fn button_state_id(base_id: &str, shutter: DestinationId, kind: ButtonKind) -> String {
    format!("{base_id}Shutter_{shutter}.{}", kind.state_name())
}

/// Id of a link's command-string state.
pub fn command_state_id(base_id: &str, link_id: &str) -> String {
    format!("{base_id}Links.{link_id}.Command")
}

/// A decoded trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Button {
        destination: DestinationId,
        action: Action,
    },
    Command {
        link: String,
        text: String,
    },
}

/// Events that look like triggers but cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("State {0} is not a shutter trigger")]
    Unrecognized(String),

    #[error("Malformed trigger {id}: {reason}")]
    Malformed { id: String, reason: String },
}

impl TriggerError {
    fn malformed(id: &str, reason: impl Into<String>) -> Self {
        TriggerError::Malformed {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Decodes state events into triggers.
#[derive(Debug, Clone)]
pub struct TriggerDecoder {
    button_pattern: Regex,
    /// Command state id -> link id
    command_states: HashMap<String, String>,
}

impl TriggerDecoder {
    /// Build a decoder for the given base id and link ids.
    pub fn new<'a, I>(base_id: &str, link_ids: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let button_pattern = Regex::new(&format!(
            r"^{}Shutter_(\d+)\.(OpenButton|CloseButton)$",
            regex::escape(base_id)
        ))?;

        let command_states = link_ids
            .into_iter()
            .map(|link| (command_state_id(base_id, link), link.to_string()))
            .collect();

        Ok(Self {
            button_pattern,
            command_states,
        })
    }

    /// Subscription covering every button state.
    pub fn button_subscription(&self) -> Subscription {
        Subscription::Pattern(self.button_pattern.clone())
    }

    /// Subscription covering the command-string state of every link.
    pub fn command_subscription(&self) -> Subscription {
        Subscription::Ids(self.command_states.keys().cloned().collect::<HashSet<_>>())
    }

    /// Decode an event.
    ///
    /// `Ok(None)` means the event is not a firing change: acknowledged
    /// writes, button releases and cleared command strings.
    pub fn decode(&self, event: &StateEvent) -> Result<Option<Trigger>, TriggerError> {
        if let Some(caps) = self.button_pattern.captures(&event.id) {
            return self.decode_button(event, &caps[1], &caps[2]);
        }
        if let Some(link) = self.command_states.get(&event.id) {
            return Self::decode_command(event, link);
        }
        Err(TriggerError::Unrecognized(event.id.clone()))
    }

    fn decode_button(
        &self,
        event: &StateEvent,
        shutter: &str,
        button: &str,
    ) -> Result<Option<Trigger>, TriggerError> {
        if event.ack {
            return Ok(None);
        }

        let pressed = match &event.val {
            Value::Bool(pressed) => *pressed,
            other => {
                return Err(TriggerError::malformed(
                    &event.id,
                    format!("expected a boolean, got {other}"),
                ))
            }
        };
        if !pressed || !event.is_value_change() {
            return Ok(None);
        }

        let destination = shutter
            .parse::<DestinationId>()
            .map_err(|e| TriggerError::malformed(&event.id, format!("shutter number {shutter}: {e}")))?;
        let kind = ButtonKind::from_state_name(button)
            .ok_or_else(|| TriggerError::malformed(&event.id, format!("unknown button type {button}")))?;

        Ok(Some(Trigger::Button {
            destination,
            action: kind.action(),
        }))
    }

    fn decode_command(event: &StateEvent, link: &str) -> Result<Option<Trigger>, TriggerError> {
        if event.ack {
            return Ok(None);
        }

        match &event.val {
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => Ok(Some(Trigger::Command {
                link: link.to_string(),
                text: text.clone(),
            })),
            Value::Null => Ok(None),
            other => Err(TriggerError::malformed(
                &event.id,
                format!("expected a command string, got {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "javascript.0.Rollershutters.";

    fn decoder() -> TriggerDecoder {
        TriggerDecoder::new(BASE, ["OG", "EG"]).unwrap()
    }

    fn event(id: &str, val: Value, old_val: Option<Value>, ack: bool) -> StateEvent {
        StateEvent {
            id: id.to_string(),
            val,
            old_val,
            ack,
        }
    }

    #[test]
    fn test_state_ids() {
        assert_eq!(
            button_state_id(BASE, 6, ButtonKind::Open),
            "javascript.0.Rollershutters.Shutter_6.OpenButton"
        );
        assert_eq!(command_state_id(BASE, "OG"), "javascript.0.Rollershutters.Links.OG.Command");
    }

    #[test]
    fn test_button_press_decodes() {
        let d = decoder();
        let open = event(&button_state_id(BASE, 6, ButtonKind::Open), json!(true), Some(json!(false)), false);
        assert_eq!(
            d.decode(&open).unwrap(),
            Some(Trigger::Button {
                destination: 6,
                action: Action::Open
            })
        );

        let close = event(&button_state_id(BASE, 12, ButtonKind::Close), json!(true), None, false);
        assert_eq!(
            d.decode(&close).unwrap(),
            Some(Trigger::Button {
                destination: 12,
                action: Action::Close
            })
        );
    }

    #[test]
    fn test_button_non_firing_events() {
        let d = decoder();
        let id = button_state_id(BASE, 6, ButtonKind::Open);

        // Reset written by the bridge itself
        assert_eq!(d.decode(&event(&id, json!(false), Some(json!(true)), true)).unwrap(), None);
        // Acked true
        assert_eq!(d.decode(&event(&id, json!(true), Some(json!(false)), true)).unwrap(), None);
        // Release
        assert_eq!(d.decode(&event(&id, json!(false), Some(json!(true)), false)).unwrap(), None);
        // Unchanged
        assert_eq!(d.decode(&event(&id, json!(true), Some(json!(true)), false)).unwrap(), None);
    }

    #[test]
    fn test_malformed_button() {
        let d = decoder();
        let id = button_state_id(BASE, 6, ButtonKind::Open);
        assert!(matches!(
            d.decode(&event(&id, json!("yes"), None, false)),
            Err(TriggerError::Malformed { .. })
        ));

        let huge = format!("{BASE}Shutter_99999999999.OpenButton");
        assert!(matches!(
            d.decode(&event(&huge, json!(true), None, false)),
            Err(TriggerError::Malformed { .. })
        ));
    }

    #[test]
    fn test_command_string_decodes() {
        let d = decoder();
        let id = command_state_id(BASE, "EG");

        assert_eq!(
            d.decode(&event(&id, json!("O3:1"), Some(json!("")), false)).unwrap(),
            Some(Trigger::Command {
                link: "EG".to_string(),
                text: "O3:1".to_string()
            })
        );
        assert_eq!(d.decode(&event(&id, json!(""), Some(json!("O3:1")), true)).unwrap(), None);
        assert_eq!(d.decode(&event(&id, json!("O3:1"), None, true)).unwrap(), None);
        assert!(matches!(
            d.decode(&event(&id, json!(42), None, false)),
            Err(TriggerError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unrecognized_ids() {
        let d = decoder();
        for id in [
            "javascript.0.Rollershutters.Shutter_6.StopButton",
            "javascript.1.Rollershutters.Shutter_6.OpenButton",
            "javascript.0.Rollershutters.Links.DG.Command",
        ] {
            assert_eq!(
                d.decode(&event(id, json!(true), None, false)),
                Err(TriggerError::Unrecognized(id.to_string()))
            );
        }
    }

    #[test]
    fn test_subscriptions_cover_trigger_states() {
        let d = decoder();
        assert!(d.button_subscription().matches(&button_state_id(BASE, 0, ButtonKind::Close)));
        assert!(d.command_subscription().matches(&command_state_id(BASE, "OG")));
        assert!(!d.command_subscription().matches(&command_state_id(BASE, "DG")));
    }
}
