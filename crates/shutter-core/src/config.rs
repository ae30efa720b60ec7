//! Configuration storage abstraction.
//!
//! Bridge settings are a single camelCase JSON document. Storage is behind a
//! trait so the binary can read from a file while tests keep documents in
//! memory.
//!
//! Loading does not validate routes; call [`validate_settings`] to build the
//! route table before any port is opened.

use std::path::{Path, PathBuf};

use crate::model::BridgeSettings;
use crate::route::{RouteError, RouteTable};

/// Errors that can occur during configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration document was not found.
    NotFound(String),
    /// Failed to read configuration.
    ReadError(String),
    /// Failed to write configuration.
    WriteError(String),
    /// Configuration data is not a valid settings document.
    InvalidData(String),
    /// Settings parsed but describe an inconsistent route table.
    InvalidRoutes(RouteError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Configuration not found: {}", key),
            ConfigError::ReadError(msg) => write!(f, "Read error: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Write error: {}", msg),
            ConfigError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            ConfigError::InvalidRoutes(err) => write!(f, "Invalid routes: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidRoutes(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RouteError> for ConfigError {
    fn from(err: RouteError) -> Self {
        ConfigError::InvalidRoutes(err)
    }
}

/// Abstract configuration storage.
pub trait ConfigStorage: Send + Sync {
    /// Load bridge settings.
    fn load_settings(&self) -> Result<BridgeSettings, ConfigError>;

    /// Save bridge settings.
    fn save_settings(&self, settings: &BridgeSettings) -> Result<(), ConfigError>;
}

/// File-based storage of a single JSON settings document.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStorage for JsonFileStorage {
    fn load_settings(&self) -> Result<BridgeSettings, ConfigError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(self.path.display().to_string())
            } else {
                ConfigError::ReadError(format!("{}: {}", self.path.display(), e))
            }
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_settings(&self, settings: &BridgeSettings) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| ConfigError::WriteError(format!("{}: {}", self.path.display(), e)))
    }
}

/// Check settings for consistency and build the route table.
pub fn validate_settings(settings: &BridgeSettings) -> Result<RouteTable, ConfigError> {
    if settings.queue_capacity == 0 {
        return Err(ConfigError::InvalidData(
            "queueCapacity must be at least 1".to_string(),
        ));
    }
    if !settings.base_id.is_empty() && !settings.base_id.ends_with('.') {
        return Err(ConfigError::InvalidData(format!(
            "baseId must end with '.': {}",
            settings.base_id
        )));
    }
    Ok(RouteTable::build(&settings.links)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkConfig;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// In-memory storage for testing.
    struct MemoryConfigStorage {
        data: RwLock<HashMap<String, String>>,
    }

    impl MemoryConfigStorage {
        fn new() -> Self {
            Self {
                data: RwLock::new(HashMap::new()),
            }
        }
    }

    impl ConfigStorage for MemoryConfigStorage {
        fn load_settings(&self) -> Result<BridgeSettings, ConfigError> {
            let data = self.data.read().unwrap();
            let json = data
                .get("settings")
                .ok_or_else(|| ConfigError::NotFound("settings".to_string()))?;
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidData(e.to_string()))
        }

        fn save_settings(&self, settings: &BridgeSettings) -> Result<(), ConfigError> {
            let json = serde_json::to_string(settings)
                .map_err(|e| ConfigError::WriteError(e.to_string()))?;
            self.data
                .write()
                .unwrap()
                .insert("settings".to_string(), json);
            Ok(())
        }
    }

    fn sample_settings() -> BridgeSettings {
        BridgeSettings {
            links: vec![
                LinkConfig::new("OG", "/dev/ttyACM0", (0..8).collect()),
                LinkConfig::new("EG", "/dev/ttyACM1", (8..15).collect()),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_round_trip() {
        let storage = MemoryConfigStorage::new();
        storage.save_settings(&sample_settings()).unwrap();

        let loaded = storage.load_settings().unwrap();
        assert_eq!(loaded, sample_settings());
    }

    #[test]
    fn test_missing_settings() {
        let storage = MemoryConfigStorage::new();
        assert!(matches!(
            storage.load_settings(),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_file_storage_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "shutter-bridge-config-{}.json",
            std::process::id()
        ));
        let storage = JsonFileStorage::new(&path);

        storage.save_settings(&sample_settings()).unwrap();
        let loaded = storage.load_settings().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.links.len(), 2);
        assert_eq!(loaded.links[1].path, "/dev/ttyACM1");
    }

    #[test]
    fn test_file_storage_not_found() {
        let storage = JsonFileStorage::new("/nonexistent/shutter-bridge.json");
        assert!(matches!(
            storage.load_settings(),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_validate_settings() {
        let table = validate_settings(&sample_settings()).unwrap();
        assert_eq!(table.len(), 15);
    }

    #[test]
    fn test_validate_rejects_overlapping_links() {
        let mut settings = sample_settings();
        settings.links[1].destinations.push(3);

        let err = validate_settings(&settings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidRoutes(RouteError::DuplicateDestination { destination: 3, .. })
        ));
        assert!(err.to_string().starts_with("Invalid routes"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let settings = BridgeSettings {
            queue_capacity: 0,
            ..sample_settings()
        };
        assert!(matches!(
            validate_settings(&settings),
            Err(ConfigError::InvalidData(_))
        ));
    }

    #[test]
    fn test_validate_rejects_base_id_without_dot() {
        let settings = BridgeSettings {
            base_id: "javascript.0.Rollershutters".to_string(),
            ..sample_settings()
        };
        assert!(matches!(
            validate_settings(&settings),
            Err(ConfigError::InvalidData(_))
        ));
    }
}
