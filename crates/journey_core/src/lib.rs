//! Journey Core - dependency closure, export bundling and import
//! reconciliation for authentication journeys
//!
//! A journey is only portable together with everything its nodes reference:
//! scripts, email templates, themes, social identity providers, SAML2
//! entities and circles of trust, and the other journeys it calls. This
//! crate computes that closure through an [`gateway::ObjectGateway`],
//! bundles it into a self-contained export document and installs such
//! documents into another realm in dependency order.

pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod gateway;
pub mod journeys;
pub mod model;
pub mod node_types;
pub mod orphans;
pub mod resolver;
pub mod script;
pub mod utils;

mod test_utils;

// Macros are automatically available at crate root due to #[macro_export]

pub use collector::DependencyCollector;
pub use config::{CoreConfig, ExportOptions, ImportOptions};
pub use context::{DeploymentType, PlatformContext};
pub use error::{CoreError, Result};
pub use export::{
    BatchImportReport, ExportDocument, ImportReport, JourneyBundle, JourneyExporter,
    JourneyImporter, MultiJourneyBundle, ObjectOutcome,
};
pub use gateway::{GatewayError, ObjectGateway};
pub use model::{Journey, Node, ObjectKind};
pub use script::{ScriptBody, ScriptRepresentation};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        CoreError, DeploymentType, ExportDocument, ExportOptions, GatewayError, ImportOptions,
        ImportReport, Journey, JourneyBundle, JourneyExporter, JourneyImporter, Node,
        ObjectGateway, ObjectKind, PlatformContext, Result, ScriptRepresentation,
    };
}
