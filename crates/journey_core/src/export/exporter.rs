//! Journey exporter implementation

use std::collections::BTreeMap;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{
    CoreError, Result,
    collector::DependencyCollector,
    config::ExportOptions,
    context::PlatformContext,
    export::types::{ExportMeta, JourneyBundle, MultiJourneyBundle},
    gateway::ObjectGateway,
    model::{Journey, ObjectKind},
    script::{ScriptBody, ScriptRepresentation},
};

/// Journey exporter
pub struct JourneyExporter<'a, G: ObjectGateway + ?Sized> {
    gateway: &'a G,
    ctx: &'a PlatformContext,
}

impl<'a, G: ObjectGateway + ?Sized> JourneyExporter<'a, G> {
    /// Create a new exporter
    pub fn new(gateway: &'a G, ctx: &'a PlatformContext) -> Self {
        Self { gateway, ctx }
    }

    /// Export one journey by name
    pub async fn export_journey(
        &self,
        name: &str,
        options: &ExportOptions,
    ) -> Result<JourneyBundle> {
        let tree = self
            .gateway
            .get_tree(self.ctx, name)
            .await
            .map_err(|e| CoreError::lookup(ObjectKind::Tree, name, e))?;

        let collector = DependencyCollector::new(self.gateway, self.ctx);
        let mut bundle = Self::bundle(&collector, tree, options).await?;
        bundle.meta = Some(ExportMeta::new(self.ctx));
        Ok(bundle)
    }

    /// Export every journey of the realm into one document
    ///
    /// A journey that fails to export is logged and left out.
    pub async fn export_journeys(&self, options: &ExportOptions) -> Result<MultiJourneyBundle> {
        let mut trees = IndexMap::new();
        for mut bundle in self.export_all(options).await? {
            bundle.meta = None;
            trees.insert(bundle.name().to_string(), bundle);
        }
        Ok(MultiJourneyBundle {
            meta: Some(ExportMeta::new(self.ctx)),
            trees,
        })
    }

    /// Export every journey of the realm as independent documents, keyed by
    /// journey name
    pub async fn export_journeys_separately(
        &self,
        options: &ExportOptions,
    ) -> Result<BTreeMap<String, JourneyBundle>> {
        let meta = ExportMeta::new(self.ctx);
        Ok(self
            .export_all(options)
            .await?
            .into_iter()
            .map(|mut bundle| {
                bundle.meta = Some(meta.clone());
                (bundle.name().to_string(), bundle)
            })
            .collect())
    }

    async fn export_all(&self, options: &ExportOptions) -> Result<Vec<JourneyBundle>> {
        let mut trees = self
            .gateway
            .list_trees(self.ctx)
            .await
            .map_err(|e| CoreError::gateway("listing journeys", e))?;
        trees.sort_by(|a, b| a.id.cmp(&b.id));
        info!(count = trees.len(), realm = %self.ctx.realm_name(), "Exporting journeys");

        // One collector for the whole run so the federation catalog is read once
        let collector = DependencyCollector::new(self.gateway, self.ctx);
        let mut bundles = Vec::with_capacity(trees.len());
        for tree in trees {
            let journey = tree.id.clone();
            match Self::bundle(&collector, tree, options).await {
                Ok(bundle) => bundles.push(bundle),
                Err(e) => {
                    let error = CoreError::ExportFailed {
                        journey,
                        cause: Box::new(e),
                    };
                    crate::log_error_chain!("Skipping journey", error);
                }
            }
        }
        Ok(bundles)
    }

    async fn bundle(
        collector: &DependencyCollector<'_, G>,
        tree: Journey,
        options: &ExportOptions,
    ) -> Result<JourneyBundle> {
        let mut bundle = collector
            .collect(tree, options.include_dependencies)
            .await?;
        apply_script_representation(&mut bundle, options.script_representation)?;
        debug!(journey = %bundle.name(), "Bundled journey");
        Ok(bundle)
    }
}

/// Rewrite every script body of a bundle into the requested representation
pub fn apply_script_representation(
    bundle: &mut JourneyBundle,
    representation: ScriptRepresentation,
) -> Result<()> {
    for script in bundle.scripts.values_mut() {
        let encoded = script.script.to_base64();
        script.script = ScriptBody::from_base64(&encoded, representation)?;
    }
    Ok(())
}
