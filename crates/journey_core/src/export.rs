//! Journey export/import
//!
//! Export walks a journey's node graph through the gateway and bundles the
//! journey with every object it depends on. Import installs such bundles in
//! dependency order, optionally under freshly generated node ids.

mod exporter;
mod importer;
mod types;

pub use exporter::JourneyExporter;
pub use importer::JourneyImporter;
pub use types::{
    BatchImportReport, ExportDocument, ExportMeta, ImportReport, JourneyBundle,
    MultiJourneyBundle, ObjectOutcome,
};

/// Tool name recorded in export metadata
pub const EXPORT_TOOL: &str = env!("CARGO_PKG_NAME");

pub const EXPORT_TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
