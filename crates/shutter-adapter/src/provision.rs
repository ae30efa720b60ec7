//! One-time creation of the button states.

use serde_json::Value;
use tracing::info;

use shutter_core::{DestinationId, StateCommon};

use crate::host::{HostError, HostPlatform};
use crate::trigger::{button_state_id, ButtonKind};

/// Metadata of a shutter's button state.
pub fn button_common(shutter: DestinationId, kind: ButtonKind) -> StateCommon {
    let (label, role) = match kind {
        ButtonKind::Open => ("Open", "button.open.blind"),
        ButtonKind::Close => ("Close", "button.close.blind"),
    };
    StateCommon {
        name: format!("Shutter {shutter} {label}"),
        value_type: "boolean".to_string(),
        role: role.to_string(),
        read: false,
        write: true,
        def: Value::Bool(false),
    }
}

/// Create open and close button states for shutters `0..count`.
///
/// States that already exist are left untouched. Returns the number of
/// states created.
pub async fn provision_buttons(
    host: &dyn HostPlatform,
    base_id: &str,
    count: u32,
) -> Result<usize, HostError> {
    let mut created = 0;
    for shutter in 0..count {
        for kind in ButtonKind::ALL {
            let id = button_state_id(base_id, shutter, kind);
            if host.create_state(&id, button_common(shutter, kind)).await? {
                created += 1;
            }
        }
        info!(shutter, "Created objects for shutter");
    }
    info!(shutters = count, created, "Object creation finished");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use serde_json::json;

    const BASE: &str = "javascript.0.Rollershutters.";

    #[test]
    fn test_button_common() {
        let close = button_common(3, ButtonKind::Close);
        assert_eq!(close.name, "Shutter 3 Close");
        assert_eq!(close.role, "button.close.blind");
        assert_eq!(close.value_type, "boolean");
        assert!(!close.read);
        assert!(close.write);
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let host = MemoryHost::new();
        host.set_state(&button_state_id(BASE, 2, ButtonKind::Open), json!(true), false)
            .await
            .unwrap();

        assert_eq!(provision_buttons(&host, BASE, 17).await.unwrap(), 33);
        assert_eq!(host.len().await, 34);
        assert_eq!(provision_buttons(&host, BASE, 17).await.unwrap(), 0);

        // Pre-existing state kept its value
        let state = host
            .get_state(&button_state_id(BASE, 2, ButtonKind::Open))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.val, json!(true));

        let state = host
            .get_state(&button_state_id(BASE, 16, ButtonKind::Close))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.val, json!(false));
        assert_eq!(state.common.unwrap().name, "Shutter 16 Close");
    }
}
