//! Journey importer implementation
//!
//! A bundle is installed in a fixed phase order: scripts, email templates,
//! themes, social identity providers, SAML2 entities, circles of trust, inner
//! nodes, nodes and finally the journey flow. Failures of scripts, nodes and
//! the flow abort the journey; every other object failure is recorded in the
//! [`ImportReport`] and the import carries on.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    CoreError, Result,
    config::ImportOptions,
    context::PlatformContext,
    export::types::{BatchImportReport, ExportDocument, ImportReport, JourneyBundle, ObjectOutcome},
    gateway::{GatewayError, ObjectGateway},
    model::{
        CircleOfTrust, ConfigObject, EmailTemplate, Journey, Node, ObjectKind, Saml2Entity,
        Script, SocialProvider, Theme,
    },
    node_types::is_container,
    resolver::{journey_dependencies, resolve_bundles, resolve_install_order},
    script::ScriptBody,
};

const REMOTE_LOCATION: &str = "remote";
const HOSTED_LOCATION: &str = "hosted";

/// Per-journey state of the node phases
struct NodePhase<'b> {
    journey: &'b str,
    regenerate_ids: bool,
    /// Identity resource of the journey as exported
    tree_identity: Option<&'b str>,
    remap: BTreeMap<String, String>,
}

/// Journey importer
pub struct JourneyImporter<'a, G: ObjectGateway + ?Sized> {
    gateway: &'a G,
    ctx: &'a PlatformContext,
}

impl<'a, G: ObjectGateway + ?Sized> JourneyImporter<'a, G> {
    /// Create a new importer
    pub fn new(gateway: &'a G, ctx: &'a PlatformContext) -> Self {
        Self { gateway, ctx }
    }

    /// Install one bundle without checking journey dependencies
    pub async fn import_journey(
        &self,
        bundle: &JourneyBundle,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let journey = bundle.name();
        info!(
            journey = %journey,
            realm = %self.ctx.realm_name(),
            regenerate_ids = options.regenerate_ids,
            "Importing journey"
        );
        let mut report = ImportReport::new(journey);

        if options.include_dependencies {
            self.import_scripts(journey, &bundle.scripts, &mut report)
                .await?;
            self.import_email_templates(&bundle.email_templates, &mut report)
                .await;
            self.import_themes(&bundle.themes, &mut report).await;
            self.import_social_providers(&bundle.social_identity_providers, &mut report)
                .await;
            self.import_saml2_entities(&bundle.saml2_entities, &mut report)
                .await;
            self.import_circles_of_trust(&bundle.circles_of_trust, &mut report)
                .await;
        }

        let mut phase = NodePhase {
            journey,
            regenerate_ids: options.regenerate_ids,
            tree_identity: bundle.tree.identity_resource.as_deref(),
            remap: BTreeMap::new(),
        };
        // Inner nodes go first so their new ids are known when the
        // containers referencing them are rewritten
        for (id, node) in &bundle.inner_nodes {
            self.import_node(&mut phase, id, node, true, &mut report)
                .await?;
        }
        for (id, node) in &bundle.nodes {
            self.import_node(&mut phase, id, node, false, &mut report)
                .await?;
        }

        let remap = phase.remap;
        self.import_flow(&bundle.tree, &remap, &mut report).await?;
        report.id_remap = remap;

        let failures = report.failures().count();
        if failures > 0 {
            warn!(journey = %journey, failures, "Imported journey with failures");
        } else {
            info!(journey = %journey, "Imported journey");
        }
        Ok(report)
    }

    /// Import the named journey of a document once its journey dependencies
    /// are satisfied on the target
    pub async fn import_journey_by_name(
        &self,
        document: &ExportDocument,
        name: &str,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let bundle = document
            .journey(name)
            .ok_or_else(|| CoreError::JourneyNotInDocument {
                name: name.to_string(),
                available: document.journey_names(),
            })?;
        self.import_checked(bundle, options).await
    }

    /// Import the first journey of a document once its journey dependencies
    /// are satisfied on the target
    pub async fn import_first_journey(
        &self,
        document: &ExportDocument,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let bundle = document
            .first_journey()
            .ok_or_else(|| CoreError::JourneyNotInDocument {
                name: "<first>".to_string(),
                available: Vec::new(),
            })?;
        self.import_checked(bundle, options).await
    }

    /// Import every journey of a document in dependency order
    pub async fn import_document(
        &self,
        document: ExportDocument,
        options: &ImportOptions,
    ) -> Result<BatchImportReport> {
        self.import_journeys(&document.into_bundles(), options)
            .await
    }

    /// Import a batch of journeys in dependency order
    ///
    /// Journeys whose dependencies cannot be resolved are not installed and
    /// are reported together. A journey whose import fails does not stop the
    /// rest of the batch.
    pub async fn import_journeys(
        &self,
        bundles: &BTreeMap<String, JourneyBundle>,
        options: &ImportOptions,
    ) -> Result<BatchImportReport> {
        let installed = self.installed_journeys().await?;
        let resolution = resolve_bundles(bundles, &installed);

        let mut batch = BatchImportReport {
            order: resolution.order,
            unresolved: resolution.unresolved,
            ..BatchImportReport::default()
        };
        if let Some(error) = batch.unresolved_error() {
            crate::log_error!("Skipping journeys with unresolved dependencies", error);
        }

        for name in batch.order.clone() {
            let Some(bundle) = bundles.get(&name) else {
                continue;
            };
            match self.import_journey(bundle, options).await {
                Ok(report) => batch.imported.push(report),
                Err(e) => {
                    crate::log_error_chain!(format!("Error importing journey {}", name), e);
                    batch.failed.insert(name, e);
                }
            }
        }

        info!(
            imported = batch.imported.len(),
            failed = batch.failed.len(),
            unresolved = batch.unresolved.len(),
            "Imported journeys"
        );
        Ok(batch)
    }

    async fn import_checked(
        &self,
        bundle: &JourneyBundle,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let installed = self.installed_journeys().await?;
        let mut dependencies = BTreeMap::new();
        dependencies.insert(bundle.name().to_string(), journey_dependencies(bundle));
        resolve_install_order(&dependencies, &installed).into_result()?;
        self.import_journey(bundle, options).await
    }

    async fn installed_journeys(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .gateway
            .list_trees(self.ctx)
            .await
            .map_err(|e| CoreError::gateway("listing installed journeys", e))?
            .into_iter()
            .map(|tree| tree.id)
            .collect())
    }

    async fn import_scripts(
        &self,
        journey: &str,
        scripts: &BTreeMap<String, Script>,
        report: &mut ImportReport,
    ) -> Result<()> {
        for (id, script) in scripts {
            let mut script = script.clone();
            debug!(
                script = %id,
                name = %script.name,
                form = ?script.script.detect(),
                "Importing script"
            );
            script.script = ScriptBody::Text(script.script.to_base64());

            self.gateway
                .put_script(self.ctx, id, &script)
                .await
                .map_err(|cause| CoreError::ScriptImportFailed {
                    script_id: id.clone(),
                    name: script.name.clone(),
                    journey: journey.to_string(),
                    cause,
                })?;
            report.record(ObjectKind::Script, id, ObjectOutcome::Upserted);
        }
        Ok(())
    }

    async fn import_email_templates(
        &self,
        templates: &BTreeMap<String, EmailTemplate>,
        report: &mut ImportReport,
    ) {
        if templates.is_empty() {
            return;
        }
        if !self.ctx.supports_email_templates() {
            warn!(count = templates.len(), "Target deployment has no email templates; skipping");
            return;
        }
        for (name, template) in templates {
            debug!(template = %name, "Importing email template");
            let outcome = match self
                .gateway
                .put_email_template(self.ctx, name, template)
                .await
            {
                Ok(_) => ObjectOutcome::Upserted,
                Err(e) => {
                    warn!(template = %name, error = %e, "Failed to import email template");
                    ObjectOutcome::failed(e)
                }
            };
            report.record(ObjectKind::EmailTemplate, name, outcome);
        }
    }

    /// Themes are one composite record per realm and go in a single call
    async fn import_themes(&self, themes: &[Theme], report: &mut ImportReport) {
        if themes.is_empty() {
            return;
        }
        if !self.ctx.supports_themes() {
            warn!(count = themes.len(), "Target deployment has no themes; skipping");
            return;
        }
        let themes: BTreeMap<String, Theme> = themes
            .iter()
            .map(|theme| (theme.id.clone(), theme.clone()))
            .collect();
        debug!(count = themes.len(), "Importing themes");

        let outcome = match self.gateway.put_themes(self.ctx, &themes).await {
            Ok(_) => ObjectOutcome::Upserted,
            Err(e) => {
                warn!(error = %e, "Failed to import themes");
                ObjectOutcome::failed(e)
            }
        };
        for id in themes.keys() {
            report.record(ObjectKind::Theme, id, outcome.clone());
        }
    }

    async fn import_social_providers(
        &self,
        providers: &BTreeMap<String, SocialProvider>,
        report: &mut ImportReport,
    ) {
        for (id, provider) in providers {
            debug!(provider = %id, "Importing social identity provider");
            let provider_type = provider.provider_type.id.as_str();
            let outcome = match self
                .gateway
                .put_social_provider(self.ctx, provider_type, id, provider)
                .await
            {
                Ok(_) => ObjectOutcome::Upserted,
                Err(e) if e.is_redirect_uri_rejected() => {
                    debug!(provider = %id, "Retrying without redirectAfterFormPostURI");
                    let mut provider = provider.clone();
                    provider.extra.insert(
                        "redirectAfterFormPostURI".to_string(),
                        Value::String(String::new()),
                    );
                    match self
                        .gateway
                        .put_social_provider(self.ctx, provider_type, id, &provider)
                        .await
                    {
                        Ok(_) => ObjectOutcome::Upserted,
                        Err(e) => ObjectOutcome::failed(e),
                    }
                }
                Err(e) => ObjectOutcome::failed(e),
            };
            if let ObjectOutcome::Failed { message } = &outcome {
                warn!(
                    provider = %id,
                    error = %message,
                    "Failed to import social identity provider"
                );
            }
            report.record(ObjectKind::SocialProvider, id, outcome);
        }
    }

    async fn import_saml2_entities(
        &self,
        entities: &BTreeMap<String, Saml2Entity>,
        report: &mut ImportReport,
    ) {
        for (id, entity) in entities {
            let outcome = self.import_saml2_entity(entity).await;
            if let ObjectOutcome::Failed { message } = &outcome {
                warn!(
                    entity_id = %entity.entity_id,
                    error = %message,
                    "Failed to import SAML2 entity"
                );
            }
            report.record(ObjectKind::Saml2Entity, id, outcome);
        }
    }

    /// Create the entity when no entity with its entity id exists, else
    /// update it. Metadata is only sent on creation.
    async fn import_saml2_entity(&self, entity: &Saml2Entity) -> ObjectOutcome {
        let mut entity = entity.clone();
        entity.strip_revision();
        let location = entity
            .entity_location
            .take()
            .unwrap_or_else(|| HOSTED_LOCATION.to_string());
        let metadata = entity
            .metadata
            .take()
            .filter(|_| location == REMOTE_LOCATION)
            .map(|body| body.to_base64_url());
        debug!(entity_id = %entity.entity_id, location = %location, "Importing SAML2 entity");

        let existing = match self
            .gateway
            .find_saml2_entities(self.ctx, &entity.entity_id)
            .await
        {
            Ok(existing) => existing,
            Err(e) => return ObjectOutcome::failed(e),
        };

        if !existing.is_empty() {
            return match self
                .gateway
                .update_saml2_entity(self.ctx, &location, &entity)
                .await
            {
                Ok(_) => ObjectOutcome::Updated,
                Err(e) => ObjectOutcome::failed(e),
            };
        }

        match self
            .gateway
            .create_saml2_entity(self.ctx, &location, &entity, metadata.as_deref())
            .await
        {
            Ok(_) => ObjectOutcome::Created,
            Err(GatewayError::Conflict { .. }) => {
                debug!(entity_id = %entity.entity_id, "Entity appeared meanwhile; updating");
                match self
                    .gateway
                    .update_saml2_entity(self.ctx, &location, &entity)
                    .await
                {
                    Ok(_) => ObjectOutcome::Updated,
                    Err(e) => ObjectOutcome::failed(e),
                }
            }
            Err(e) => ObjectOutcome::failed(e),
        }
    }

    async fn import_circles_of_trust(
        &self,
        circles: &BTreeMap<String, CircleOfTrust>,
        report: &mut ImportReport,
    ) {
        for (id, cot) in circles {
            let mut cot = cot.clone();
            cot.strip_revision();
            debug!(circle = %id, "Importing circle of trust");

            let outcome = match self.gateway.create_circle_of_trust(self.ctx, &cot).await {
                Ok(_) => ObjectOutcome::Created,
                Err(
                    create_err @ (GatewayError::Conflict { .. }
                    | GatewayError::Server { status: 500, .. }),
                ) => match self.gateway.update_circle_of_trust(self.ctx, id, &cot).await {
                    Ok(_) => ObjectOutcome::Updated,
                    Err(update_err) => {
                        warn!(
                            circle = %id,
                            create = %create_err,
                            update = %update_err,
                            "Failed to create or update circle of trust"
                        );
                        ObjectOutcome::failed(format!(
                            "create: {}; update: {}",
                            create_err, update_err
                        ))
                    }
                },
                Err(e) => {
                    warn!(circle = %id, error = %e, "Failed to create circle of trust");
                    ObjectOutcome::failed(e)
                }
            };
            report.record(ObjectKind::CircleOfTrust, id, outcome);
        }
    }

    async fn import_node(
        &self,
        phase: &mut NodePhase<'_>,
        old_id: &str,
        node: &Node,
        inner: bool,
        report: &mut ImportReport,
    ) -> Result<()> {
        let mut node = node.clone();
        node.strip_revision();

        let new_id = if phase.regenerate_ids {
            let new_id = Uuid::new_v4().to_string();
            phase.remap.insert(old_id.to_string(), new_id.clone());
            new_id
        } else {
            old_id.to_string()
        };
        node.id = new_id.clone();

        if phase.regenerate_ids && !inner && is_container(node.type_name()) {
            node = remap_embedded_ids(&node, &phase.remap)?;
        }
        self.bind_identity_resource(&mut node, phase.tree_identity);

        debug!(
            node = %old_id,
            new_id = %new_id,
            node_type = %node.type_name(),
            inner,
            "Importing node"
        );
        let result = self
            .gateway
            .put_node(self.ctx, &new_id, node.type_name(), &node)
            .await;
        match result {
            Ok(_) => {
                report.record(ObjectKind::Node, old_id, ObjectOutcome::Upserted);
                Ok(())
            }
            Err(e) if e.is_missing_script() => Err(CoreError::MissingScript {
                script: node.script().unwrap_or_default().to_string(),
                node_id: old_id.to_string(),
                new_id,
                node_type: node.type_name().to_string(),
                journey: phase.journey.to_string(),
            }),
            Err(cause) => Err(CoreError::NodeImportFailed {
                node_id: old_id.to_string(),
                new_id,
                inner,
                journey: phase.journey.to_string(),
                cause,
            }),
        }
    }

    /// Rebind a node to the target realm's managed users when it uses the
    /// same generic user resource as its journey
    fn bind_identity_resource(&self, node: &mut Node, tree_identity: Option<&str>) {
        let rebind = match (node.identity_resource(), tree_identity) {
            (Some(resource), Some(tree)) => resource.ends_with("user") && resource == tree,
            _ => false,
        };
        if rebind {
            let resource = self.ctx.managed_user_resource();
            debug!(node = %node.id, identity_resource = %resource, "Binding identity resource");
            node.set_identity_resource(resource);
        }
    }

    async fn import_flow(
        &self,
        tree: &Journey,
        remap: &BTreeMap<String, String>,
        report: &mut ImportReport,
    ) -> Result<()> {
        let journey = tree.id.clone();
        let mut tree = if remap.is_empty() {
            tree.clone()
        } else {
            replace_ids(tree, remap, "journey")?
        };

        if tree
            .identity_resource
            .as_deref()
            .is_some_and(|resource| resource.ends_with("user"))
        {
            tree.identity_resource = Some(self.ctx.managed_user_resource());
        }
        tree.strip_revision();

        debug!(journey = %journey, "Importing flow");
        let first_error = match self.gateway.put_tree(self.ctx, &journey, &tree).await {
            Ok(_) => None,
            Err(e) => Some(e),
        };

        if let Some(error) = first_error {
            let Some(valid) = error.rejected_attributes().map(<[String]>::to_vec) else {
                return Err(CoreError::FlowImportFailed {
                    journey,
                    cause: error,
                });
            };
            debug!(journey = %journey, "Retrying flow without attributes unknown to the target");
            let tree = retain_attributes(&tree, &valid)?;
            if let Err(cause) = self.gateway.put_tree(self.ctx, &journey, &tree).await {
                if cause.rejected_attributes().is_some() {
                    return Err(CoreError::Validation {
                        kind: ObjectKind::Tree,
                        id: journey,
                        message: cause.message().to_string(),
                        accepted: valid,
                    });
                }
                return Err(CoreError::FlowImportFailed { journey, cause });
            }
        }

        report.record(ObjectKind::Tree, &journey, ObjectOutcome::Upserted);
        Ok(())
    }
}

/// Replace every occurrence of a container's old inner node ids in its
/// serialized form
fn remap_embedded_ids(node: &Node, remap: &BTreeMap<String, String>) -> Result<Node> {
    let mut embedded = BTreeMap::new();
    for inner in node.inner_nodes() {
        match remap.get(&inner.id) {
            Some(new_id) => {
                embedded.insert(inner.id, new_id.clone());
            }
            None => warn!(
                node = %node.id,
                inner = %inner.id,
                "Inner node not in bundle; reference kept"
            ),
        }
    }
    replace_ids(node, &embedded, "node")
}

/// String-level id substitution across an object's serialized form
fn replace_ids<T>(object: &T, remap: &BTreeMap<String, String>, data_type: &str) -> Result<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut text =
        serde_json::to_string(object).map_err(|e| CoreError::serialization(data_type, e))?;
    for (old_id, new_id) in remap {
        text = text.replace(old_id.as_str(), new_id);
    }
    serde_json::from_str(&text).map_err(|e| CoreError::serialization(data_type, e))
}

/// Keep only the attributes the target accepts, plus the id
fn retain_attributes(tree: &Journey, valid: &[String]) -> Result<Journey> {
    let mut value = serde_json::to_value(tree).map_err(|e| CoreError::serialization("journey", e))?;
    if let Value::Object(attributes) = &mut value {
        attributes.retain(|key, _| {
            let keep = key == "_id" || valid.contains(key);
            if !keep {
                debug!(attribute = %key, "Removing invalid attribute");
            }
            keep
        });
    }
    serde_json::from_value(value).map_err(|e| CoreError::serialization("journey", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportOptions;
    use crate::context::DeploymentType;
    use crate::export::{JourneyExporter, MultiJourneyBundle};
    use crate::gateway::{INVALID_ATTRIBUTE_MESSAGE, REDIRECT_URI_REJECTED_MESSAGE};
    use crate::script::{ScriptRepresentation, encode_text};
    use crate::test_utils::test::{InMemoryGateway, RealmState, federation_state, login_realm};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    async fn exported(gateway: &InMemoryGateway, name: &str) -> JourneyBundle {
        let ctx = PlatformContext::default();
        JourneyExporter::new(gateway, &ctx)
            .export_journey(name, &ExportOptions::default())
            .await
            .unwrap()
    }

    fn strip_revisions(bundle: &mut JourneyBundle) {
        bundle.tree.strip_revision();
        for node in bundle.nodes.values_mut().chain(bundle.inner_nodes.values_mut()) {
            node.strip_revision();
        }
    }

    fn options(regenerate_ids: bool) -> ImportOptions {
        ImportOptions {
            regenerate_ids,
            include_dependencies: true,
        }
    }

    #[tokio::test]
    async fn test_round_trip_into_empty_realm() {
        let source = login_realm();
        let mut bundle = exported(&source, "Login").await;
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();

        let report = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(report.id_remap.is_empty());

        let mut reexported = exported(&target, "Login").await;
        strip_revisions(&mut bundle);
        bundle.meta = None;
        reexported.meta = None;
        assert_eq!(reexported, bundle);

        // content survives whatever representation the export used
        let state = target.snapshot();
        for (id, script) in source.snapshot().scripts {
            if let Some(imported) = state.scripts.get(&id) {
                assert_eq!(imported.script, script.script);
            }
        }
        assert_eq!(state.scripts.len(), 4);
    }

    /// `Federated` journey with one SAML2 node using the remote `urn:idp`
    /// (`aWRw`) and the hosted `sp-hosted` (`c3A`)
    async fn federated_bundle() -> JourneyBundle {
        let source = login_realm();
        source.update(federation_state);
        source.add_tree(Journey::new("Federated").with_node("saml-1", "product-Saml2Node"));
        source.add_node(
            Node::new("saml-1", "product-Saml2Node")
                .with_property("metaAlias", "/alpha/sp-hosted")
                .with_property("idpEntityId", "urn:idp"),
        );
        exported(&source, "Federated").await
    }

    #[tokio::test]
    async fn test_importing_twice_is_idempotent() {
        let bundle = federated_bundle().await;
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();
        let importer = JourneyImporter::new(&target, &ctx);

        let first = importer.import_journey(&bundle, &options(false)).await.unwrap();
        let after_first = target.snapshot();
        let second = importer.import_journey(&bundle, &options(false)).await.unwrap();
        assert_eq!(target.snapshot(), after_first);

        assert_eq!(
            first.outcome(ObjectKind::Saml2Entity, "aWRw"),
            Some(&ObjectOutcome::Created)
        );
        assert_eq!(
            second.outcome(ObjectKind::Saml2Entity, "aWRw"),
            Some(&ObjectOutcome::Updated)
        );
        assert_eq!(
            second.outcome(ObjectKind::CircleOfTrust, "cot-1"),
            Some(&ObjectOutcome::Updated)
        );
        assert_eq!(target.calls_to("create_saml2_entity").len(), 2);

        // export-only attributes never reach the target
        let (location, entity) = &after_first.saml2_entities["urn:idp"];
        assert_eq!(location, "remote");
        assert!(entity.entity_location.is_none());
        assert!(entity.metadata.is_none());
        assert!(!entity.extra.contains_key("_rev"));
        assert_eq!(
            after_first.saml2_metadata["urn:idp"],
            "<EntityDescriptor entityID=\"urn:idp\"/>"
        );
    }

    #[tokio::test]
    async fn test_saml2_create_conflict_falls_back_to_update() {
        let bundle = federated_bundle().await;
        let target = InMemoryGateway::new();
        target.fail_once(
            "create_saml2_entity",
            "urn:idp",
            GatewayError::Conflict {
                message: "entity urn:idp already exists".to_string(),
            },
        );
        let ctx = PlatformContext::default();

        let report = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();
        assert_eq!(
            report.outcome(ObjectKind::Saml2Entity, "aWRw"),
            Some(&ObjectOutcome::Updated)
        );
        assert_eq!(
            report.outcome(ObjectKind::Saml2Entity, "c3A"),
            Some(&ObjectOutcome::Created)
        );
        assert_eq!(target.calls_to("update_saml2_entity"), vec!["urn:idp"]);
        assert!(report.is_complete());
        assert_eq!(target.snapshot().saml2_entities["urn:idp"].0, "remote");
    }

    #[tokio::test]
    async fn test_saml2_conflict_and_failed_update_is_recorded() {
        let bundle = federated_bundle().await;
        let target = InMemoryGateway::new();
        target.fail(
            "create_saml2_entity",
            "urn:idp",
            GatewayError::Conflict {
                message: "entity urn:idp already exists".to_string(),
            },
        );
        target.fail(
            "update_saml2_entity",
            "urn:idp",
            GatewayError::server(503, "unavailable"),
        );
        let ctx = PlatformContext::default();

        let report = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();
        assert_eq!(
            report.outcome(ObjectKind::Saml2Entity, "aWRw"),
            Some(&ObjectOutcome::failed("Server error 503: unavailable"))
        );
        assert!(!report.is_complete());
        assert_eq!(
            report.outcome(ObjectKind::Tree, "Federated"),
            Some(&ObjectOutcome::Upserted)
        );
        assert!(target.snapshot().trees.contains_key("Federated"));
    }

    #[tokio::test]
    async fn test_regenerated_ids_leave_no_old_references() {
        let source = login_realm();
        let bundle = exported(&source, "Login").await;
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();

        let report = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(true))
            .await
            .unwrap();
        assert_eq!(report.id_remap.len(), 11);

        let inner_ids = ["inner-user", "inner-pass", "inner-script"];
        let new_inner: BTreeSet<&String> =
            inner_ids.iter().map(|id| &report.id_remap[*id]).collect();
        assert_eq!(new_inner.len(), 3);
        assert!(inner_ids.iter().all(|id| !new_inner.contains(&id.to_string())));

        let state = target.snapshot();
        let page = &state.nodes[&report.id_remap["page-1"]];
        let page_text = serde_json::to_string(page).unwrap();
        for old in inner_ids {
            assert!(!page_text.contains(old), "{} left in page node", old);
        }
        let embedded: Vec<String> = page.inner_nodes().into_iter().map(|r| r.id).collect();
        assert_eq!(
            embedded,
            inner_ids
                .iter()
                .map(|id| report.id_remap[*id].clone())
                .collect::<Vec<_>>()
        );

        let tree_text = serde_json::to_string(&state.trees["Login"]).unwrap();
        for old in report.id_remap.keys() {
            assert!(!tree_text.contains(old.as_str()), "{} left in flow", old);
        }
        assert_eq!(
            state.trees["Login"].extra["entryNodeId"],
            serde_json::json!(report.id_remap["page-1"])
        );
        // no node was written under an old id
        assert_eq!(state.nodes.len(), 11);
        assert!(state.nodes.keys().all(|id| !report.id_remap.contains_key(id)));
    }

    #[tokio::test]
    async fn test_identity_resource_is_bound_to_target_realm() {
        let source = login_realm();
        let bundle = exported(&source, "Login").await;
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::new("bravo", DeploymentType::Cloud);

        JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();

        let state = target.snapshot();
        assert_eq!(
            state.trees["Login"].identity_resource.as_deref(),
            Some("managed/bravo_user")
        );
        assert_eq!(
            state.nodes["create-1"].identity_resource(),
            Some("managed/bravo_user")
        );
    }

    #[tokio::test]
    async fn test_node_resource_differing_from_journey_is_kept() {
        let source = login_realm();
        let mut bundle = exported(&source, "Login").await;
        if let Some(node) = bundle.nodes.get_mut("create-1") {
            node.set_identity_resource("managed/other_user");
        }
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::new("bravo", DeploymentType::Cloud);

        JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();
        assert_eq!(
            target.snapshot().nodes["create-1"].identity_resource(),
            Some("managed/other_user")
        );
    }

    #[tokio::test]
    async fn test_missing_script_is_descriptive() {
        let source = login_realm();
        let bundle = exported(&source, "Login").await;
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();
        let no_dependencies = ImportOptions {
            regenerate_ids: false,
            include_dependencies: false,
        };

        let err = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &no_dependencies)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing script script-inner referenced by node inner-script (ScriptedDecisionNode) in journey Login"
        );
        assert!(target.snapshot().trees.is_empty());
    }

    #[tokio::test]
    async fn test_script_representations_are_normalised() {
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();
        let mut bundle = JourneyBundle::new(Journey::new("Scripts"));
        let source = "var a = 1;\nvar b = 2;\noutcome = \"true\";";
        for (id, body) in [
            (
                "lines",
                ScriptBody::Lines(source.split('\n').map(str::to_string).collect()),
            ),
            ("encoded", ScriptBody::Text(encode_text(source))),
            (
                "json",
                ScriptBody::from_base64(&encode_text(source), ScriptRepresentation::JsonText)
                    .unwrap(),
            ),
        ] {
            bundle.scripts.insert(
                id.to_string(),
                Script {
                    id: id.to_string(),
                    name: id.to_string(),
                    script: body,
                    extra: Default::default(),
                },
            );
        }

        JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();

        let state = target.snapshot();
        for id in ["lines", "encoded", "json"] {
            assert_eq!(
                state.scripts[id].script,
                ScriptBody::Text(encode_text(source)),
                "{}",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_flow_attributes_are_removed_once() {
        let source = login_realm();
        let mut bundle = exported(&source, "Login").await;
        bundle
            .tree
            .extra
            .insert("mustRun".to_string(), serde_json::json!(true));
        let target = InMemoryGateway::new();
        target.fail_once(
            "put_tree",
            "Login",
            GatewayError::Validation {
                message: INVALID_ATTRIBUTE_MESSAGE.to_string(),
                valid_attributes: vec![
                    "nodes".to_string(),
                    "entryNodeId".to_string(),
                    "identityResource".to_string(),
                ],
            },
        );
        let ctx = PlatformContext::default();

        JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();

        let tree = &target.snapshot().trees["Login"];
        assert!(!tree.extra.contains_key("mustRun"));
        assert!(tree.extra.contains_key("entryNodeId"));
        assert_eq!(tree.nodes.len(), 8);
        assert_eq!(target.calls_to("put_tree").len(), 2);
    }

    #[tokio::test]
    async fn test_flow_rejected_twice_is_fatal() {
        let source = login_realm();
        let bundle = exported(&source, "Login").await;
        let target = InMemoryGateway::new();
        target.fail(
            "put_tree",
            "Login",
            GatewayError::Validation {
                message: INVALID_ATTRIBUTE_MESSAGE.to_string(),
                valid_attributes: vec!["nodes".to_string()],
            },
        );
        let ctx = PlatformContext::default();

        let err = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap_err();
        match err {
            CoreError::Validation { kind, id, accepted, .. } => {
                assert_eq!(kind, ObjectKind::Tree);
                assert_eq!(id, "Login");
                assert_eq!(accepted, vec!["nodes"]);
            }
            other => panic!("expected a validation error, got {:?}", other),
        }
        assert_eq!(target.calls_to("put_tree").len(), 2);
    }

    #[tokio::test]
    async fn test_flow_retry_failing_otherwise_is_an_import_failure() {
        let source = login_realm();
        let bundle = exported(&source, "Login").await;
        let target = InMemoryGateway::new();
        target.fail_once(
            "put_tree",
            "Login",
            GatewayError::Validation {
                message: INVALID_ATTRIBUTE_MESSAGE.to_string(),
                valid_attributes: vec!["nodes".to_string()],
            },
        );
        target.fail_once("put_tree", "Login", GatewayError::server(503, "unavailable"));
        let ctx = PlatformContext::default();

        let err = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FlowImportFailed { .. }));
    }

    #[tokio::test]
    async fn test_social_provider_retries_without_redirect_uri() {
        let source = login_realm();
        let bundle = exported(&source, "Login").await;
        let target = InMemoryGateway::new();
        target.fail_once(
            "put_social_provider",
            "google",
            GatewayError::server(500, REDIRECT_URI_REJECTED_MESSAGE),
        );
        let ctx = PlatformContext::default();

        let report = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();
        assert!(report.is_complete());
        let provider = &target.snapshot().social_providers["google"];
        assert_eq!(provider.extra["redirectAfterFormPostURI"], serde_json::json!(""));
    }

    #[tokio::test]
    async fn test_circle_of_trust_failure_is_recorded() {
        let mut bundle = JourneyBundle::new(Journey::new("Federated"));
        let mut realm = RealmState::default();
        federation_state(&mut realm);
        bundle.circles_of_trust = realm.circles_of_trust;
        let target = InMemoryGateway::new();
        target.fail(
            "create_circle_of_trust",
            "cot-1",
            GatewayError::server(500, "exists"),
        );
        target.fail(
            "update_circle_of_trust",
            "cot-1",
            GatewayError::server(500, "still broken"),
        );
        let ctx = PlatformContext::default();

        let report = JourneyImporter::new(&target, &ctx)
            .import_journey(&bundle, &options(false))
            .await
            .unwrap();
        assert!(!report.is_complete());
        assert!(matches!(
            report.outcome(ObjectKind::CircleOfTrust, "cot-1"),
            Some(ObjectOutcome::Failed { .. })
        ));
        assert_eq!(
            report.outcome(ObjectKind::CircleOfTrust, "cot-other"),
            Some(&ObjectOutcome::Created)
        );
        assert!(target.snapshot().trees.contains_key("Federated"));
    }

    fn calling(name: &str, callee: Option<&str>) -> JourneyBundle {
        let mut bundle = JourneyBundle::new(Journey::new(name));
        if let Some(callee) = callee {
            let id = format!("{}-inner-tree", name);
            bundle.tree = bundle.tree.with_node(id.clone(), "InnerTreeEvaluatorNode");
            bundle.nodes.insert(
                id.clone(),
                Node::new(id, "InnerTreeEvaluatorNode").with_property("tree", callee),
            );
        }
        bundle
    }

    #[tokio::test]
    async fn test_batch_installs_in_dependency_order() {
        let mut trees = IndexMap::new();
        for (name, callee) in [("A", Some("B")), ("B", None), ("C", Some("Missing"))] {
            trees.insert(name.to_string(), calling(name, callee));
        }
        let document = ExportDocument::Multi(MultiJourneyBundle { meta: None, trees });
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();

        let batch = JourneyImporter::new(&target, &ctx)
            .import_document(document, &options(false))
            .await
            .unwrap();

        assert_eq!(batch.order, vec!["B", "A"]);
        assert_eq!(target.calls_to("put_tree"), vec!["B", "A"]);
        assert_eq!(batch.unresolved["C"], vec!["Missing"]);
        assert!(matches!(
            batch.unresolved_error(),
            Some(CoreError::DependencyUnresolved { .. })
        ));
        assert!(!target.snapshot().trees.contains_key("C"));
    }

    #[tokio::test]
    async fn test_single_import_checks_installed_journeys() {
        let document = ExportDocument::Single(Box::new(calling("A", Some("B"))));
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();
        let importer = JourneyImporter::new(&target, &ctx);

        let err = importer
            .import_journey_by_name(&document, "A", &options(false))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DependencyUnresolved { .. }));

        target.add_tree(Journey::new("B"));
        let report = importer
            .import_first_journey(&document, &options(false))
            .await
            .unwrap();
        assert_eq!(report.journey, "A");

        let err = importer
            .import_journey_by_name(&document, "Z", &options(false))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::JourneyNotInDocument { .. }));
    }

    #[tokio::test]
    async fn test_first_journey_follows_file_order() {
        let text = ExportDocument::Multi(MultiJourneyBundle {
            meta: None,
            trees: IndexMap::from([
                ("Zeta".to_string(), calling("Zeta", None)),
                ("Alpha".to_string(), calling("Alpha", None)),
            ]),
        })
        .to_json()
        .unwrap();
        let document = ExportDocument::from_json(&text).unwrap();
        let target = InMemoryGateway::new();
        let ctx = PlatformContext::default();

        let report = JourneyImporter::new(&target, &ctx)
            .import_first_journey(&document, &options(false))
            .await
            .unwrap();
        assert_eq!(report.journey, "Zeta");
        assert_eq!(target.calls_to("put_tree"), vec!["Zeta"]);
    }
}
