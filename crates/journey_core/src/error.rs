use std::collections::BTreeMap;

use miette::Diagnostic;
use thiserror::Error;

use crate::{gateway::GatewayError, model::ObjectKind};

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("{kind} '{name}' not found")]
    #[diagnostic(
        code(journey_core::not_found),
        help("Check that the {kind} exists in the target realm")
    )]
    NotFound { kind: ObjectKind, name: String },

    #[error("Target rejected {kind} '{id}': {message}")]
    #[diagnostic(
        code(journey_core::validation),
        help("Attributes the target accepts: {}", accepted.join(", "))
    )]
    Validation {
        kind: ObjectKind,
        id: String,
        message: String,
        accepted: Vec<String>,
    },

    #[error("{} journey(s) have unresolved dependencies", .unresolved.len())]
    #[diagnostic(
        code(journey_core::dependency_unresolved),
        help("{}", describe_unresolved(unresolved))
    )]
    DependencyUnresolved {
        unresolved: BTreeMap<String, Vec<String>>,
    },

    #[error("Missing script {script} referenced by node {node_id}{} ({node_type}) in journey {journey}", renamed(.node_id, .new_id))]
    #[diagnostic(
        code(journey_core::missing_script),
        help("Import the script first or export the journey with its dependencies")
    )]
    MissingScript {
        script: String,
        node_id: String,
        new_id: String,
        node_type: String,
        journey: String,
    },

    #[error("Error importing script {name} ({script_id}) in journey {journey}")]
    #[diagnostic(code(journey_core::script_import_failed))]
    ScriptImportFailed {
        script_id: String,
        name: String,
        journey: String,
        #[source]
        cause: GatewayError,
    },

    #[error("Error importing {} {node_id}{} in journey {journey}", node_label(.inner), renamed(.node_id, .new_id))]
    #[diagnostic(code(journey_core::node_import_failed))]
    NodeImportFailed {
        node_id: String,
        new_id: String,
        inner: bool,
        journey: String,
        #[source]
        cause: GatewayError,
    },

    #[error("Error importing journey flow {journey}")]
    #[diagnostic(
        code(journey_core::flow_import_failed),
        help("The target could not store the journey flow")
    )]
    FlowImportFailed {
        journey: String,
        #[source]
        cause: GatewayError,
    },

    #[error("Error exporting journey {journey}")]
    #[diagnostic(code(journey_core::export_failed))]
    ExportFailed {
        journey: String,
        #[source]
        cause: Box<CoreError>,
    },

    #[error("Gateway call failed while {operation}")]
    #[diagnostic(code(journey_core::gateway))]
    Gateway {
        operation: String,
        #[source]
        cause: GatewayError,
    },

    #[error("Serialization error")]
    #[diagnostic(
        code(journey_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    SerializationError {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("Invalid encoding in {data_type}: {message}")]
    #[diagnostic(
        code(journey_core::encoding),
        help("Expected base64 encoded UTF-8 text")
    )]
    Encoding { data_type: String, message: String },

    #[error("Journey '{name}' not found in export document")]
    #[diagnostic(
        code(journey_core::journey_not_in_document),
        help("Available journeys: {}", available.join(", "))
    )]
    JourneyNotInDocument {
        name: String,
        available: Vec<String>,
    },

    #[error("Configuration error")]
    #[diagnostic(
        code(journey_core::configuration_error),
        help("Check configuration file at {config_path}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

fn renamed(old: &str, new: &str) -> String {
    if old == new {
        String::new()
    } else {
        format!(" [{}]", new)
    }
}

fn node_label(inner: &bool) -> &'static str {
    if *inner { "inner node" } else { "node" }
}

fn describe_unresolved(unresolved: &BTreeMap<String, Vec<String>>) -> String {
    unresolved
        .iter()
        .map(|(journey, missing)| format!("{} requires {}", journey, missing.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn gateway(operation: impl Into<String>, cause: GatewayError) -> Self {
        Self::Gateway {
            operation: operation.into(),
            cause,
        }
    }

    /// Maps a gateway failure for a named object, keeping `NotFound` distinct
    pub fn lookup(kind: ObjectKind, name: &str, cause: GatewayError) -> Self {
        match cause {
            GatewayError::NotFound { .. } => Self::not_found(kind, name),
            other => Self::gateway(format!("reading {} '{}'", kind, name), other),
        }
    }

    pub fn serialization(data_type: impl Into<String>, cause: serde_json::Error) -> Self {
        Self::SerializationError {
            data_type: data_type.into(),
            cause,
        }
    }

    pub fn encoding(data_type: impl Into<String>, message: impl ToString) -> Self {
        Self::Encoding {
            data_type: data_type.into(),
            message: message.to_string(),
        }
    }
}
