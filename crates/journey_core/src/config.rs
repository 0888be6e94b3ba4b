//! Configuration for export and import runs
//!
//! Options can be built in code or persisted as TOML next to the export
//! files, together with the platform context they apply to.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    Result,
    context::PlatformContext,
    error::{ConfigError, CoreError},
    script::ScriptRepresentation,
};

/// Options for exporting journeys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// How script bodies are written into the bundle
    #[serde(default)]
    pub script_representation: ScriptRepresentation,

    /// Include scripts, email templates, federation entities, circles of
    /// trust, social identity providers and themes
    #[serde(default = "default_true")]
    pub include_dependencies: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            script_representation: ScriptRepresentation::Lines,
            include_dependencies: true,
        }
    }
}

/// Options for importing journeys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Assign fresh ids to every node and inner node
    #[serde(default)]
    pub regenerate_ids: bool,

    /// Install the bundle's dependency objects before the nodes
    #[serde(default = "default_true")]
    pub include_dependencies: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            regenerate_ids: false,
            include_dependencies: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub context: PlatformContext,

    #[serde(default)]
    pub export: ExportOptions,

    #[serde(default)]
    pub import: ImportOptions,
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<CoreConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "readable TOML file".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    toml::from_str(&content).map_err(|e| CoreError::ConfigurationError {
        config_path: path.display().to_string(),
        field: "content".to_string(),
        expected: "valid TOML configuration".to_string(),
        cause: ConfigError::TomlParse(e.to_string()),
    })
}

/// Save configuration to a TOML file
pub async fn save_config(config: &CoreConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: parent.display().to_string(),
                field: "directory".to_string(),
                expected: "writable directory".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| CoreError::ConfigurationError {
        config_path: path.display().to_string(),
        field: "serialization".to_string(),
        expected: "serializable config structure".to_string(),
        cause: ConfigError::TomlSerialize(e.to_string()),
    })?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "writable file location".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    Ok(())
}
